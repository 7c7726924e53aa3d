//! Wallet-related types for the wallet ledger engine
//!
//! This module defines the Wallet structure and related functionality
//! for managing per-owner balance state.

use super::{Amount, WalletId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wallet classification
///
/// Determines which fee schedule applies and whether the wallet may act
/// as the platform fee sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WalletClass {
    /// Ordinary end-user wallet
    User,

    /// Merchant/business wallet
    Business,

    /// Platform-owned wallet (fee sink); always fee-exempt
    Platform,
}

/// Wallet state
///
/// Represents the current state of one owner's wallet: its balance in
/// minor currency units, PIN credential state, freeze flag, rolling
/// daily spend window, and the optimistic-concurrency version counter.
///
/// # Invariants
///
/// - `balance` is never negative (enforced by the unsigned type and by
///   [`crate::core::WalletStore::mutate`] rejecting overdrafts before
///   any write).
/// - `version` increments on every committed mutation; a mutation with
///   a stale expected version is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    /// Canonical owner identifier
    pub id: WalletId,

    /// Wallet classification (USER, BUSINESS, PLATFORM)
    pub class: WalletClass,

    /// Current balance in minor currency units
    pub balance: Amount,

    /// Digest of the wallet PIN, if one has been set
    ///
    /// Only the digest is ever stored; the raw PIN is never persisted
    /// or logged.
    pub pin_hash: Option<String>,

    /// Consecutive failed PIN attempts since the last success
    pub failed_pin_attempts: u32,

    /// If set, PIN verification is refused until this instant
    pub pin_locked_until: Option<DateTime<Utc>>,

    /// Wallet-level freeze flag; blocks transfers and withdrawals
    pub frozen: bool,

    /// Amount spent inside the current daily window
    pub daily_spent: Amount,

    /// Start of the current daily window
    pub daily_window_start: DateTime<Utc>,

    /// Optimistic concurrency version, bumped on every committed mutation
    pub version: u64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    /// Create a new wallet with zero balance and no credential state
    ///
    /// # Arguments
    ///
    /// * `id` - The canonical owner identifier
    /// * `class` - The wallet classification
    /// * `now` - Creation instant (also seeds the daily window)
    pub fn new(id: impl Into<WalletId>, class: WalletClass, now: DateTime<Utc>) -> Self {
        Wallet {
            id: id.into(),
            class,
            balance: 0,
            pin_hash: None,
            failed_pin_attempts: 0,
            pin_locked_until: None,
            frozen: false,
            daily_spent: 0,
            daily_window_start: now,
            version: 0,
            created_at: now,
        }
    }

    /// Whether PIN verification is currently refused due to lockout
    pub fn is_pin_locked(&self, now: DateTime<Utc>) -> bool {
        self.pin_locked_until.is_some_and(|until| now < until)
    }
}
