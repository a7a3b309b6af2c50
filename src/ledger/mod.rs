use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::terms::{check_percent, check_price, MarketTerms, UnderflowPolicy};

mod shared;

pub use shared::SharedLedger;

pub type AccountId = String;
pub type Amount = u64;
pub type BatchId = [u8; 32];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("caller {caller} is not the ledger owner")]
    NotOwner { caller: AccountId },
    #[error("invalid price {price}, must be greater than zero")]
    InvalidPrice { price: Amount },
    #[error("invalid percentage {percent}, must be at most 100")]
    InvalidFee { percent: u64 },
    #[error("amount must be greater than zero")]
    InvalidAmount,
    #[error("reserve cap {limit} is below the current reserve {current}")]
    InvalidReserveLimit { limit: Amount, current: Amount },
    #[error("account {account} has {available} resource available, {required} required")]
    InsufficientResource {
        account: AccountId,
        required: Amount,
        available: Amount,
    },
    #[error("account {account} has {available} currency, {required} required")]
    InsufficientBalance {
        account: AccountId,
        required: Amount,
        available: Amount,
    },
    #[error("reserve would reach {requested}, cap is {cap}")]
    ReserveLimitExceeded { requested: u128, cap: Amount },
    #[error("arithmetic overflow")]
    ArithmeticOverflow,
    #[error("cannot remove {requested} from a reserve of {current}")]
    ReserveUnderflow { current: Amount, requested: u128 },
    #[error("account {account} cannot buy from its own listing")]
    SelfTrade { account: AccountId },
    #[error("duplicate batch detected")]
    DuplicateBatch,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccountBalance {
    pub resource: Amount,
    pub currency: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SaleListing {
    pub amount: Amount,
    pub price: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Reserve {
    pub current: Amount,
}

/// Result of one purchase against a listing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fill {
    pub seller: AccountId,
    pub amount: Amount,
    pub price: Amount,
    pub cost: Amount,
    pub fee: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LedgerMeta {
    pub height: u64,
    pub timestamp: u64,
    pub previous_batch: Option<BatchId>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    UnitPriceSet {
        price: Amount,
    },
    FeePercentSet {
        percent: u64,
    },
    RefundPercentSet {
        percent: u64,
    },
    ReserveCapSet {
        limit: Amount,
    },
    ReserveAdjusted {
        previous: Amount,
        current: Amount,
    },
    ResourceIssued {
        to: AccountId,
        amount: Amount,
    },
    CurrencyDeposited {
        account: AccountId,
        amount: Amount,
    },
    CurrencyWithdrawn {
        account: AccountId,
        amount: Amount,
    },
    Listed {
        account: AccountId,
        amount: Amount,
        price: Amount,
    },
    Unlisted {
        account: AccountId,
        amount: Amount,
    },
    ListingRepriced {
        account: AccountId,
        price: Amount,
    },
    Purchased {
        buyer: AccountId,
        seller: AccountId,
        amount: Amount,
        cost: Amount,
        fee: Amount,
    },
    Redeemed {
        account: AccountId,
        amount: Amount,
        refund: Amount,
    },
}

/// One ledger operation as submitted by a caller.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Call {
    SetUnitPrice { price: Amount },
    SetFeePercent { percent: u64 },
    SetRefundPercent { percent: u64 },
    SetReserveCap { limit: Amount },
    AdjustReserve { delta: i64 },
    IssueResource { to: AccountId, amount: Amount },
    DepositCurrency { amount: Amount },
    WithdrawCurrency { amount: Amount },
    AddForSale { amount: Amount, price: Amount },
    RemoveFromSale { amount: Amount },
    SetListingPrice { price: Amount },
    Purchase { seller: AccountId, amount: Amount },
    Redeem { amount: Amount },
}

/// A call paired with the identity the host authenticated for it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Request {
    pub caller: AccountId,
    #[serde(flatten)]
    pub call: Call,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    Amount(Amount),
    Listing(SaleListing),
    Fill(Fill),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub meta: LedgerMeta,
    pub owner: AccountId,
    pub policy: UnderflowPolicy,
    pub terms: MarketTerms,
    pub reserve: Reserve,
    pub accounts: BTreeMap<AccountId, AccountBalance>,
    pub listings: BTreeMap<AccountId, SaleListing>,
    pub events: Vec<LedgerEvent>,
    pub applied_batches: BTreeSet<BatchId>,
    pub state_root: [u8; 32],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ledger {
    owner: AccountId,
    policy: UnderflowPolicy,
    terms: MarketTerms,
    reserve: Reserve,
    accounts: BTreeMap<AccountId, AccountBalance>,
    listings: BTreeMap<AccountId, SaleListing>,
    events: Vec<LedgerEvent>,
    meta: LedgerMeta,
    applied_batches: BTreeSet<BatchId>,
}

impl Ledger {
    /// Ledger with default terms and the clamping underflow policy.
    pub fn new(owner: impl Into<AccountId>) -> Self {
        Self {
            owner: owner.into(),
            policy: UnderflowPolicy::default(),
            terms: MarketTerms::default(),
            reserve: Reserve::default(),
            accounts: BTreeMap::new(),
            listings: BTreeMap::new(),
            events: Vec::new(),
            meta: LedgerMeta::default(),
            applied_batches: BTreeSet::new(),
        }
    }

    pub fn with_terms(
        owner: impl Into<AccountId>,
        terms: MarketTerms,
        policy: UnderflowPolicy,
    ) -> Result<Self, LedgerError> {
        terms.validate()?;
        let mut ledger = Self::new(owner);
        ledger.terms = terms;
        ledger.policy = policy;
        Ok(ledger)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn terms(&self) -> &MarketTerms {
        &self.terms
    }

    pub fn policy(&self) -> UnderflowPolicy {
        self.policy
    }

    pub fn meta(&self) -> &LedgerMeta {
        &self.meta
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn view_fee_percent(&self) -> u64 {
        self.terms.fee_percent
    }

    pub fn view_reserve(&self) -> Amount {
        self.reserve.current
    }

    /// Balance record for `account`; `{0, 0}` when the account was never touched.
    pub fn balance_of(&self, account: &str) -> AccountBalance {
        self.accounts.get(account).cloned().unwrap_or_default()
    }

    /// Listing record for `account`; `{0, 0}` when nothing was ever listed.
    pub fn listing_of(&self, account: &str) -> SaleListing {
        self.listings.get(account).cloned().unwrap_or_default()
    }

    /// Advisory only. Mutating operations repeat their own check.
    pub fn has_sufficient_resource(&self, account: &str, amount: Amount) -> bool {
        self.balance_of(account).resource >= amount
    }

    pub fn calculate_fee(&self, amount: Amount) -> Result<Amount, LedgerError> {
        self.terms.calculate_fee(amount)
    }

    pub fn calculate_refund(&self, amount: Amount) -> Result<Amount, LedgerError> {
        self.terms.calculate_refund(amount)
    }

    pub fn require_owner(&self, caller: &str) -> Result<(), LedgerError> {
        if caller != self.owner {
            return Err(LedgerError::NotOwner {
                caller: caller.to_owned(),
            });
        }
        Ok(())
    }

    // ---- configuration -------------------------------------------------

    pub fn set_unit_price(&mut self, caller: &str, price: Amount) -> Result<Amount, LedgerError> {
        self.require_owner(caller)?;
        check_price(price)?;
        self.terms.unit_price = price;
        self.record(LedgerEvent::UnitPriceSet { price });
        debug!(price, "unit price updated");
        Ok(price)
    }

    pub fn set_fee_percent(&mut self, caller: &str, percent: u64) -> Result<u64, LedgerError> {
        self.require_owner(caller)?;
        check_percent(percent)?;
        self.terms.fee_percent = percent;
        self.record(LedgerEvent::FeePercentSet { percent });
        debug!(percent, "fee percent updated");
        Ok(percent)
    }

    pub fn set_refund_percent(&mut self, caller: &str, percent: u64) -> Result<u64, LedgerError> {
        self.require_owner(caller)?;
        check_percent(percent)?;
        self.terms.refund_percent = percent;
        self.record(LedgerEvent::RefundPercentSet { percent });
        debug!(percent, "refund percent updated");
        Ok(percent)
    }

    pub fn set_reserve_cap(&mut self, caller: &str, limit: Amount) -> Result<Amount, LedgerError> {
        self.require_owner(caller)?;
        if limit < self.reserve.current {
            return Err(LedgerError::InvalidReserveLimit {
                limit,
                current: self.reserve.current,
            });
        }
        self.terms.reserve_cap = limit;
        self.record(LedgerEvent::ReserveCapSet { limit });
        debug!(limit, "reserve cap updated");
        Ok(limit)
    }

    // ---- reserve ---------------------------------------------------------

    /// Single choke point for supply changes. Returns the new reserve.
    pub fn adjust_reserve(&mut self, delta: i128) -> Result<Amount, LedgerError> {
        let next = self.plan_reserve(delta)?;
        self.commit_reserve(delta, next);
        Ok(next)
    }

    fn plan_reserve(&self, delta: i128) -> Result<Amount, LedgerError> {
        let current = self.reserve.current;
        let next = if delta < 0 {
            let magnitude = delta.unsigned_abs();
            match u128::from(current).checked_sub(magnitude) {
                Some(value) => value,
                None => match self.policy {
                    UnderflowPolicy::Clamp => 0,
                    UnderflowPolicy::Reject => {
                        return Err(LedgerError::ReserveUnderflow {
                            current,
                            requested: magnitude,
                        })
                    }
                },
            }
        } else {
            // i128::MAX + u64::MAX still fits in u128.
            u128::from(current) + delta.unsigned_abs()
        };
        if next > u128::from(self.terms.reserve_cap) {
            return Err(LedgerError::ReserveLimitExceeded {
                requested: next,
                cap: self.terms.reserve_cap,
            });
        }
        // Bounded by the cap above.
        Ok(next as Amount)
    }

    fn commit_reserve(&mut self, delta: i128, next: Amount) {
        if delta < 0 && delta.unsigned_abs() > u128::from(self.reserve.current) {
            warn!(
                current = self.reserve.current,
                requested = %delta.unsigned_abs(),
                "reserve underflow clamped to zero"
            );
        }
        let previous = std::mem::replace(&mut self.reserve.current, next);
        self.record(LedgerEvent::ReserveAdjusted {
            previous,
            current: next,
        });
    }

    // ---- balances and listings -----------------------------------------

    pub fn issue_resource(
        &mut self,
        caller: &str,
        to: &str,
        amount: Amount,
    ) -> Result<Amount, LedgerError> {
        self.require_owner(caller)?;
        require_positive(amount)?;
        let resource = self
            .balance_of(to)
            .resource
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        let reserve = self.plan_reserve(i128::from(amount))?;

        self.commit_reserve(i128::from(amount), reserve);
        self.account_mut(to).resource = resource;
        self.record(LedgerEvent::ResourceIssued {
            to: to.to_owned(),
            amount,
        });
        debug!(to, amount, reserve, "resource issued");
        Ok(resource)
    }

    /// Bookkeeping credit once the host has confirmed the external transfer.
    pub fn deposit_currency(&mut self, caller: &str, amount: Amount) -> Result<Amount, LedgerError> {
        require_positive(amount)?;
        let currency = self
            .balance_of(caller)
            .currency
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        self.account_mut(caller).currency = currency;
        self.record(LedgerEvent::CurrencyDeposited {
            account: caller.to_owned(),
            amount,
        });
        debug!(caller, amount, currency, "currency deposited");
        Ok(currency)
    }

    /// Only the bookkeeping number moves; paying out is the host's job.
    pub fn withdraw_currency(
        &mut self,
        caller: &str,
        amount: Amount,
    ) -> Result<Amount, LedgerError> {
        let available = self.balance_of(caller).currency;
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                account: caller.to_owned(),
                required: amount,
                available,
            });
        }
        let currency = available - amount;
        self.account_mut(caller).currency = currency;
        self.record(LedgerEvent::CurrencyWithdrawn {
            account: caller.to_owned(),
            amount,
        });
        debug!(caller, amount, currency, "currency withdrawn");
        Ok(currency)
    }

    /// Grows the caller's listing by `amount` and replaces its price.
    ///
    /// The reserve grows by `amount` on every call. Nothing on the selling
    /// side (`remove_from_sale`, `purchase`) gives it back, so reserve and
    /// balances are not guaranteed to reconcile.
    pub fn add_for_sale(
        &mut self,
        caller: &str,
        amount: Amount,
        price: Amount,
    ) -> Result<SaleListing, LedgerError> {
        require_positive(amount)?;
        check_price(price)?;
        let listed = amount
            .checked_add(self.listing_of(caller).amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        let resource = self.balance_of(caller).resource;
        if resource < listed {
            return Err(LedgerError::InsufficientResource {
                account: caller.to_owned(),
                required: listed,
                available: resource,
            });
        }
        let reserve = self.plan_reserve(i128::from(amount))?;

        self.commit_reserve(i128::from(amount), reserve);
        let listing = SaleListing {
            amount: listed,
            price,
        };
        self.listings.insert(caller.to_owned(), listing.clone());
        self.record(LedgerEvent::Listed {
            account: caller.to_owned(),
            amount,
            price,
        });
        debug!(caller, amount, price, listed, reserve, "listing extended");
        Ok(listing)
    }

    /// Shrinks the caller's listing. The reserve is left as it is.
    pub fn remove_from_sale(
        &mut self,
        caller: &str,
        amount: Amount,
    ) -> Result<SaleListing, LedgerError> {
        require_positive(amount)?;
        let mut listing = self.listing_of(caller);
        if listing.amount < amount {
            return Err(LedgerError::InsufficientResource {
                account: caller.to_owned(),
                required: amount,
                available: listing.amount,
            });
        }
        listing.amount -= amount;
        self.listings.insert(caller.to_owned(), listing.clone());
        self.record(LedgerEvent::Unlisted {
            account: caller.to_owned(),
            amount,
        });
        debug!(caller, amount, remaining = listing.amount, "listing reduced");
        Ok(listing)
    }

    pub fn set_listing_price(
        &mut self,
        caller: &str,
        price: Amount,
    ) -> Result<SaleListing, LedgerError> {
        check_price(price)?;
        let mut listing = self.listing_of(caller);
        listing.price = price;
        self.listings.insert(caller.to_owned(), listing.clone());
        self.record(LedgerEvent::ListingRepriced {
            account: caller.to_owned(),
            price,
        });
        debug!(caller, price, "listing repriced");
        Ok(listing)
    }

    /// Buys `amount` from `seller`'s listing at its advertised price. The
    /// buyer pays cost plus fee, the seller receives the cost and the owner
    /// collects the fee.
    pub fn purchase(
        &mut self,
        buyer: &str,
        seller: &str,
        amount: Amount,
    ) -> Result<Fill, LedgerError> {
        require_positive(amount)?;
        if buyer == seller {
            return Err(LedgerError::SelfTrade {
                account: buyer.to_owned(),
            });
        }
        let mut listing = self.listing_of(seller);
        if listing.amount < amount {
            return Err(LedgerError::InsufficientResource {
                account: seller.to_owned(),
                required: amount,
                available: listing.amount,
            });
        }
        let cost = amount
            .checked_mul(listing.price)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        let fee = self.calculate_fee(cost)?;
        let total = cost.checked_add(fee).ok_or(LedgerError::ArithmeticOverflow)?;

        // Stage every touched account; the owner may also be buyer or seller.
        let mut staged = Staged::new(self);
        let seller_bal = staged.get(seller);
        if seller_bal.resource < amount {
            return Err(LedgerError::InsufficientResource {
                account: seller.to_owned(),
                required: amount,
                available: seller_bal.resource,
            });
        }
        seller_bal.resource -= amount;
        let buyer_bal = staged.get(buyer);
        if buyer_bal.currency < total {
            return Err(LedgerError::InsufficientBalance {
                account: buyer.to_owned(),
                required: total,
                available: buyer_bal.currency,
            });
        }
        buyer_bal.currency -= total;
        buyer_bal.resource = buyer_bal
            .resource
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        staged.credit_currency(seller, cost)?;
        staged.credit_currency(&self.owner, fee)?;
        let touched = staged.finish();

        self.accounts.extend(touched);
        listing.amount -= amount;
        let price = listing.price;
        self.listings.insert(seller.to_owned(), listing);
        self.record(LedgerEvent::Purchased {
            buyer: buyer.to_owned(),
            seller: seller.to_owned(),
            amount,
            cost,
            fee,
        });
        debug!(buyer, seller, amount, cost, fee, "listing filled");
        Ok(Fill {
            seller: seller.to_owned(),
            amount,
            price,
            cost,
            fee,
        })
    }

    /// Sells unlisted resource back to the system at the refund rate and
    /// retires it from the reserve.
    pub fn redeem(&mut self, caller: &str, amount: Amount) -> Result<Amount, LedgerError> {
        require_positive(amount)?;
        let balance = self.balance_of(caller);
        let free = balance
            .resource
            .saturating_sub(self.listing_of(caller).amount);
        if free < amount {
            return Err(LedgerError::InsufficientResource {
                account: caller.to_owned(),
                required: amount,
                available: free,
            });
        }
        let refund = self.calculate_refund(amount)?;
        let currency = balance
            .currency
            .checked_add(refund)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        let delta = -i128::from(amount);
        let reserve = self.plan_reserve(delta)?;

        self.commit_reserve(delta, reserve);
        let account = self.account_mut(caller);
        account.resource -= amount;
        account.currency = currency;
        self.record(LedgerEvent::Redeemed {
            account: caller.to_owned(),
            amount,
            refund,
        });
        debug!(caller, amount, refund, reserve, "resource redeemed");
        Ok(refund)
    }

    // ---- dispatch --------------------------------------------------------

    pub fn execute(&mut self, caller: &str, call: &Call) -> Result<Outcome, LedgerError> {
        match call {
            Call::SetUnitPrice { price } => self.set_unit_price(caller, *price).map(Outcome::Amount),
            Call::SetFeePercent { percent } => {
                self.set_fee_percent(caller, *percent).map(Outcome::Amount)
            }
            Call::SetRefundPercent { percent } => {
                self.set_refund_percent(caller, *percent).map(Outcome::Amount)
            }
            Call::SetReserveCap { limit } => {
                self.set_reserve_cap(caller, *limit).map(Outcome::Amount)
            }
            Call::AdjustReserve { delta } => {
                self.require_owner(caller)?;
                self.adjust_reserve(i128::from(*delta)).map(Outcome::Amount)
            }
            Call::IssueResource { to, amount } => {
                self.issue_resource(caller, to, *amount).map(Outcome::Amount)
            }
            Call::DepositCurrency { amount } => {
                self.deposit_currency(caller, *amount).map(Outcome::Amount)
            }
            Call::WithdrawCurrency { amount } => {
                self.withdraw_currency(caller, *amount).map(Outcome::Amount)
            }
            Call::AddForSale { amount, price } => {
                self.add_for_sale(caller, *amount, *price).map(Outcome::Listing)
            }
            Call::RemoveFromSale { amount } => {
                self.remove_from_sale(caller, *amount).map(Outcome::Listing)
            }
            Call::SetListingPrice { price } => {
                self.set_listing_price(caller, *price).map(Outcome::Listing)
            }
            Call::Purchase { seller, amount } => {
                self.purchase(caller, seller, *amount).map(Outcome::Fill)
            }
            Call::Redeem { amount } => self.redeem(caller, *amount).map(Outcome::Amount),
        }
    }

    /// Applies `requests` in order as one unit. Work is staged on a copy of
    /// the ledger; if any request fails the ledger is left untouched.
    pub fn apply_batch(
        &mut self,
        requests: &[Request],
        batch_id: BatchId,
        timestamp: u64,
    ) -> Result<Vec<Outcome>, LedgerError> {
        if self.applied_batches.contains(&batch_id) {
            return Err(LedgerError::DuplicateBatch);
        }

        // History is moved aside so staging clones only the live state.
        let mut history = std::mem::take(&mut self.events);
        let applied = std::mem::take(&mut self.applied_batches);
        let mut staged = self.clone();
        let result: Result<Vec<Outcome>, LedgerError> = requests
            .iter()
            .enumerate()
            .map(|(index, request)| {
                staged
                    .execute(&request.caller, &request.call)
                    .inspect_err(|err| {
                        warn!(
                            index,
                            caller = %request.caller,
                            error = %err,
                            batch = %hex::encode(batch_id),
                            "batch rejected"
                        );
                    })
            })
            .collect();
        let outcomes = match result {
            Ok(outcomes) => outcomes,
            Err(err) => {
                self.events = history;
                self.applied_batches = applied;
                return Err(err);
            }
        };

        history.append(&mut staged.events);
        staged.events = history;
        staged.applied_batches = applied;
        staged.meta.height += 1;
        staged.meta.timestamp = timestamp;
        staged.meta.previous_batch = Some(batch_id);
        staged.applied_batches.insert(batch_id);
        *self = staged;
        debug!(height = self.meta.height, calls = requests.len(), "batch applied");
        Ok(outcomes)
    }

    // ---- snapshots -------------------------------------------------------

    pub fn state_root(&self) -> [u8; 32] {
        compute_state_root(
            &self.owner,
            &self.terms,
            &self.reserve,
            &self.accounts,
            &self.listings,
        )
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            meta: self.meta.clone(),
            owner: self.owner.clone(),
            policy: self.policy,
            terms: self.terms.clone(),
            reserve: self.reserve.clone(),
            accounts: self.accounts.clone(),
            listings: self.listings.clone(),
            events: self.events.clone(),
            applied_batches: self.applied_batches.clone(),
            state_root: self.state_root(),
        }
    }

    /// Rebuilds a ledger, rejecting snapshots whose terms or reserve break
    /// the ledger invariants.
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self, LedgerError> {
        snapshot.terms.validate()?;
        if snapshot.reserve.current > snapshot.terms.reserve_cap {
            return Err(LedgerError::InvalidReserveLimit {
                limit: snapshot.terms.reserve_cap,
                current: snapshot.reserve.current,
            });
        }
        Ok(Self {
            owner: snapshot.owner,
            policy: snapshot.policy,
            terms: snapshot.terms,
            reserve: snapshot.reserve,
            accounts: snapshot.accounts,
            listings: snapshot.listings,
            events: snapshot.events,
            meta: snapshot.meta,
            applied_batches: snapshot.applied_batches,
        })
    }

    fn account_mut(&mut self, account: &str) -> &mut AccountBalance {
        self.accounts.entry(account.to_owned()).or_default()
    }

    fn record(&mut self, event: LedgerEvent) {
        self.events.push(event);
    }
}

fn require_positive(amount: Amount) -> Result<(), LedgerError> {
    if amount == 0 {
        return Err(LedgerError::InvalidAmount);
    }
    Ok(())
}

/// Working copies of the balances a multi-account operation touches.
struct Staged<'a> {
    ledger: &'a Ledger,
    working: BTreeMap<AccountId, AccountBalance>,
}

impl<'a> Staged<'a> {
    fn new(ledger: &'a Ledger) -> Self {
        Self {
            ledger,
            working: BTreeMap::new(),
        }
    }

    fn get(&mut self, account: &str) -> &mut AccountBalance {
        let ledger = self.ledger;
        self.working
            .entry(account.to_owned())
            .or_insert_with(|| ledger.balance_of(account))
    }

    fn credit_currency(&mut self, account: &str, amount: Amount) -> Result<(), LedgerError> {
        let balance = self.get(account);
        balance.currency = balance
            .currency
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        Ok(())
    }

    fn finish(self) -> BTreeMap<AccountId, AccountBalance> {
        self.working
    }
}

fn compute_state_root(
    owner: &str,
    terms: &MarketTerms,
    reserve: &Reserve,
    accounts: &BTreeMap<AccountId, AccountBalance>,
    listings: &BTreeMap<AccountId, SaleListing>,
) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();

    let mut hasher = Sha256::new();
    hasher.update(b"terms");
    hasher.update(owner.as_bytes());
    hasher.update(terms.unit_price.to_le_bytes());
    hasher.update(terms.fee_percent.to_le_bytes());
    hasher.update(terms.refund_percent.to_le_bytes());
    hasher.update(terms.reserve_cap.to_le_bytes());
    hasher.update(reserve.current.to_le_bytes());
    leaves.push(hasher.finalize().into());

    // An absent entry and a zeroed one are the same state.
    for (account, balance) in accounts
        .iter()
        .filter(|(_, balance)| **balance != AccountBalance::default())
    {
        let mut hasher = Sha256::new();
        hasher.update(b"acct");
        hasher.update(account.as_bytes());
        hasher.update(balance.resource.to_le_bytes());
        hasher.update(balance.currency.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (account, listing) in listings
        .iter()
        .filter(|(_, listing)| **listing != SaleListing::default())
    {
        let mut hasher = Sha256::new();
        hasher.update(b"listing");
        hasher.update(account.as_bytes());
        hasher.update(listing.amount.to_le_bytes());
        hasher.update(listing.price.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    // The terms leaf is always present.
    leaves[0]
}
