use serde::{Deserialize, Serialize};

use crate::ledger::{Amount, LedgerError};

pub const DEFAULT_UNIT_PRICE: Amount = 100;
pub const DEFAULT_FEE_PERCENT: u64 = 1;
pub const DEFAULT_REFUND_PERCENT: u64 = 80;
pub const DEFAULT_RESERVE_CAP: Amount = 1_000_000;

const PERCENT_BASE: u64 = 100;

/// Owner-controlled market parameters.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarketTerms {
    pub unit_price: Amount,
    pub fee_percent: u64,
    pub refund_percent: u64,
    pub reserve_cap: Amount,
}

impl Default for MarketTerms {
    fn default() -> Self {
        Self {
            unit_price: DEFAULT_UNIT_PRICE,
            fee_percent: DEFAULT_FEE_PERCENT,
            refund_percent: DEFAULT_REFUND_PERCENT,
            reserve_cap: DEFAULT_RESERVE_CAP,
        }
    }
}

impl MarketTerms {
    /// Checks the per-field domains. The cap is not checked here since it
    /// only has meaning against a live reserve.
    pub fn validate(&self) -> Result<(), LedgerError> {
        check_price(self.unit_price)?;
        check_percent(self.fee_percent)?;
        check_percent(self.refund_percent)?;
        Ok(())
    }

    /// `floor(amount * fee_percent / 100)`.
    pub fn calculate_fee(&self, amount: Amount) -> Result<Amount, LedgerError> {
        let scaled = amount
            .checked_mul(self.fee_percent)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        Ok(scaled / PERCENT_BASE)
    }

    /// `floor(amount * unit_price * refund_percent / 100)`, full product
    /// taken before the division.
    pub fn calculate_refund(&self, amount: Amount) -> Result<Amount, LedgerError> {
        let scaled = amount
            .checked_mul(self.unit_price)
            .and_then(|v| v.checked_mul(self.refund_percent))
            .ok_or(LedgerError::ArithmeticOverflow)?;
        Ok(scaled / PERCENT_BASE)
    }
}

pub(crate) fn check_price(price: Amount) -> Result<(), LedgerError> {
    if price == 0 {
        return Err(LedgerError::InvalidPrice { price });
    }
    Ok(())
}

pub(crate) fn check_percent(percent: u64) -> Result<(), LedgerError> {
    if percent > PERCENT_BASE {
        return Err(LedgerError::InvalidFee { percent });
    }
    Ok(())
}

/// What `adjust_reserve` does when asked to remove more than the reserve holds.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnderflowPolicy {
    /// Truncate the reserve at zero and report success.
    #[default]
    Clamp,
    /// Fail with `ReserveUnderflow` and leave the reserve untouched.
    Reject,
}
