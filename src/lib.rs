//! Wallet Ledger Engine Library
//! # Overview
//!
//! The accounting core of a mobile-money wallet platform: it owns
//! account balances, records every balance movement as an immutable
//! ledger entry, and reconciles asynchronous notifications from
//! external payment rails without double-crediting, double-debiting, or
//! losing money on partial failure.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Core data types (Wallet, LedgerEntry, gateway events, errors)
//! - [`policy`] - Pure policy checks ([`policy::FeePolicy`], [`policy::LimitPolicy`])
//! - [`core`] - Money-movement components:
//!   - [`core::wallet_store`] - Balance storage with atomic, isolated mutation
//!   - [`core::ledger`] - Append-only audit trail, written ahead of effects
//!   - [`core::auth`] - PIN lockout and one-shot OTP authorization
//!   - [`core::transfer`] - Internal transfers with automatic compensation
//!   - [`core::reconciler`] - At-most-once crediting of inbound collections
//!   - [`core::compensation`] - Payout outcome settlement and reversal
//!   - [`core::engine`] - The [`core::WalletEngine`] facade
//! - [`gateway`] - Ack-fast event ingestion and the payout dispatch trait
//! - [`config`] - Policy configuration (fee tiers, caps, auth windows)
//! - [`io`] / [`cli`] - Operations-CSV replay tooling
//!
//! # Guarantees
//!
//! - Every wallet balance equals the signed replay of its ledger stream.
//! - `(gateway, external_ref)` pairs credit a wallet at most once, no
//!   matter how often the rail redelivers.
//! - Operations touching several wallets serialize per wallet and lock
//!   in a fixed global order; partial failures are compensated with
//!   REVERSAL entries before an error is surfaced.
//! - Gateway acknowledgments are always fast and optimistic; internal
//!   failures are retried out-of-band and escalated, never dropped.

// Module declarations
pub mod cli;
pub mod config;
pub mod core;
pub mod gateway;
pub mod io;
pub mod observability;
pub mod policy;
pub mod types;

pub use crate::config::EngineConfig;
pub use crate::core::{
    CreditOutcome, OutcomeDisposition, TransferReceipt, WalletEngine, WithdrawQuote,
    WithdrawReceipt,
};
pub use crate::gateway::{CollectionIngestor, IngestConfig, NullDispatcher, PayoutDispatcher};
pub use crate::io::run_replay;
pub use crate::policy::{FeePolicy, FeeSchedule, FeeTier, LimitConfig, LimitPolicy};
pub use crate::types::{
    Amount, Direction, EntryId, EntryKind, EntryStatus, GatewayEvent, LedgerEntry, PayoutOutcome,
    Reference, Wallet, WalletClass, WalletError, WalletId, WithdrawalState,
};
