//! Spending limit checks
//!
//! Freeze flags, the fixed per-transaction cap, the minimum withdrawal
//! amount, and the rolling daily cap. The daily window is a UTC calendar
//! day; `effective_daily_spent` treats a wallet whose window has lapsed
//! as having spent nothing, and the write paths reset the stored fields
//! at most once per window while holding the wallet's lock.

use crate::types::{Amount, LimitScope, Wallet, WalletClass, WalletError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Limit configuration, in minor currency units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Cap on a single transfer or withdrawal
    pub per_tx_cap: Amount,

    /// Rolling daily cap on outbound spend
    pub daily_cap: Amount,

    /// Minimum withdrawal amount
    pub min_withdrawal: Amount,
}

impl Default for LimitConfig {
    /// Defaults: 50 000 per transaction and per day, 10 minimum withdrawal
    fn default() -> Self {
        LimitConfig {
            per_tx_cap: 50_000,
            daily_cap: 50_000,
            min_withdrawal: 10,
        }
    }
}

/// Limit policy consulted by every debit path
#[derive(Debug, Clone, PartialEq)]
pub struct LimitPolicy {
    config: LimitConfig,
}

impl LimitPolicy {
    /// Create a limit policy from configuration
    pub fn new(config: LimitConfig) -> Self {
        LimitPolicy { config }
    }

    /// Reject if the platform or this wallet is frozen for debits
    ///
    /// Read-only operations are never routed through this check.
    pub fn check_frozen(&self, wallet: &Wallet, globally_frozen: bool) -> Result<(), WalletError> {
        if globally_frozen || wallet.frozen {
            return Err(WalletError::wallet_frozen(&wallet.id));
        }
        Ok(())
    }

    /// Reject amounts above the fixed per-transaction cap
    pub fn check_per_transaction(&self, wallet_id: &str, amount: Amount) -> Result<(), WalletError> {
        if amount > self.config.per_tx_cap {
            return Err(WalletError::limit_exceeded(
                wallet_id,
                LimitScope::PerTransaction,
                amount,
                self.config.per_tx_cap,
            ));
        }
        Ok(())
    }

    /// Reject withdrawals below the configured minimum
    pub fn check_min_withdrawal(&self, wallet_id: &str, amount: Amount) -> Result<(), WalletError> {
        if amount < self.config.min_withdrawal {
            return Err(WalletError::limit_exceeded(
                wallet_id,
                LimitScope::MinWithdrawal,
                amount,
                self.config.min_withdrawal,
            ));
        }
        Ok(())
    }

    /// Whether the wallet's daily window has lapsed at `now`
    ///
    /// The window rolls over when the UTC calendar day changes.
    pub fn window_lapsed(wallet: &Wallet, now: DateTime<Utc>) -> bool {
        now.date_naive() > wallet.daily_window_start.date_naive()
    }

    /// Daily spend that still counts against the cap at `now`
    pub fn effective_daily_spent(wallet: &Wallet, now: DateTime<Utc>) -> Amount {
        if Self::window_lapsed(wallet, now) {
            0
        } else {
            wallet.daily_spent
        }
    }

    /// Reject if `amount` would push the wallet past its rolling daily cap
    ///
    /// The PLATFORM wallet is exempt; it only ever accrues fees.
    pub fn check_daily(
        &self,
        wallet: &Wallet,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<(), WalletError> {
        if wallet.class == WalletClass::Platform {
            return Ok(());
        }
        let spent = Self::effective_daily_spent(wallet, now);
        let projected = spent.checked_add(amount).unwrap_or(Amount::MAX);
        if projected > self.config.daily_cap {
            return Err(WalletError::limit_exceeded(
                &wallet.id,
                LimitScope::Daily,
                projected,
                self.config.daily_cap,
            ));
        }
        Ok(())
    }
}
