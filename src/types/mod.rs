//! Types module
//!
//! Contains core data structures used throughout the engine.
//! This module organizes types into logical submodules:
//! - `wallet`: Wallet state and classification
//! - `ledger`: Ledger entries and the withdrawal lifecycle
//! - `event`: Normalized gateway events (collections, payout outcomes)
//! - `error`: Error types for the wallet engine

pub mod error;
pub mod event;
pub mod ledger;
pub mod wallet;

pub use error::{LimitScope, WalletError};
pub use event::{Direction, GatewayEvent, PayoutOutcome};
pub use ledger::{EntryKind, EntryStatus, LedgerEntry, WithdrawalState};
pub use wallet::{Wallet, WalletClass};

/// Canonical wallet identifier
///
/// A single opaque owner identity. External identifiers (phone numbers,
/// emails) are mapped to it at the boundary by the gateway adapters; the
/// core never stores them on a second schema.
pub type WalletId = String;

/// Monetary amount in minor currency units
///
/// All money values are unsigned integers (cents). Signedness is implied
/// by the ledger entry kind, never carried on the amount itself.
pub type Amount = u64;

/// Ledger entry identifier, assigned by the ledger on append
pub type EntryId = u64;

/// Correlation id shared by the entry-set of one logical operation
pub type Reference = String;
