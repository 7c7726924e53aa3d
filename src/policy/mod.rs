//! Policy module
//!
//! Pure, read-only checks consulted by the money-movement paths:
//! - `fees` - Tiered fee computation per wallet class
//! - `limits` - Freeze, per-transaction, minimum and rolling daily caps
//!
//! Policy objects never mutate wallets or the ledger.

pub mod fees;
pub mod limits;

pub use fees::{FeePolicy, FeeSchedule, FeeTier};
pub use limits::{LimitConfig, LimitPolicy};
