//! Accounting core for a capped water-trading ledger.
//!
//! The crate is split into a few small pieces:
//!
//! * [`ledger`] — balances, sale listings, the global reserve and every
//!   operation that mutates them, plus batches, events and state roots.
//! * [`terms`] — owner-controlled market parameters and the fee/refund
//!   arithmetic.
//! * [`config`] — TOML application configuration.
//! * [`store`] — JSON snapshot persistence.
//!
//! Every operation checks all of its preconditions before its first write,
//! so a rejected call leaves the ledger exactly as it was.

pub mod config;
pub mod ledger;
pub mod store;
pub mod terms;

pub use config::{AppConfig, ConfigError};
pub use ledger::{
    AccountBalance, AccountId, Amount, Call, Fill, Ledger, LedgerError, LedgerEvent,
    LedgerSnapshot, Outcome, Request, SaleListing, SharedLedger,
};
pub use store::{SnapshotStore, StoreError};
pub use terms::{MarketTerms, UnderflowPolicy};
