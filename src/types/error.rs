//! Error types for the wallet ledger engine
//!
//! This module defines all error types that can occur during money
//! movement. Errors are designed so that callers can distinguish
//! precondition failures (no state was changed) from reconciliation
//! conflicts (operator attention required).
//!
//! # Error Categories
//!
//! - **Validation errors**: malformed input, rejected before any state change
//! - **Precondition failures**: missing wallet, insufficient funds, limits,
//!   freeze flags, credential failures
//! - **Concurrency errors**: stale version on an optimistic mutation
//!   (retryable internally)
//! - **Reconciliation conflicts**: payout outcome mismatch; fatal,
//!   requires manual review, never auto-resolved

use super::Amount;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Which limit a rejected operation ran into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    /// Fixed cap on a single operation
    PerTransaction,

    /// Rolling daily cap
    Daily,

    /// Minimum withdrawal amount
    MinWithdrawal,
}

impl std::fmt::Display for LimitScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitScope::PerTransaction => write!(f, "per-transaction"),
            LimitScope::Daily => write!(f, "daily"),
            LimitScope::MinWithdrawal => write!(f, "minimum-withdrawal"),
        }
    }
}

/// Main error type for the wallet ledger engine
///
/// Every variant carries enough context to diagnose the rejection
/// without consulting logs. A duplicate external transaction is NOT an
/// error: reconciliation reports it as a success-no-op.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WalletError {
    /// Malformed input, rejected before any state change
    #[error("Validation failed: {message}")]
    Validation {
        /// Description of the rejected input
        message: String,
    },

    /// The referenced wallet does not exist
    #[error("Wallet {wallet} not found")]
    WalletNotFound {
        /// Wallet identifier
        wallet: String,
    },

    /// The wallet cannot cover the requested debit
    #[error("Insufficient funds for wallet {wallet}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Wallet identifier
        wallet: String,
        /// Current balance
        balance: Amount,
        /// Requested debit (amount plus fee)
        requested: Amount,
    },

    /// No PIN has been set for a wallet that requires one
    #[error("Wallet {wallet} has no PIN set")]
    PinNotSet {
        /// Wallet identifier
        wallet: String,
    },

    /// The supplied PIN does not match
    #[error("Invalid PIN for wallet {wallet}")]
    InvalidPin {
        /// Wallet identifier
        wallet: String,
    },

    /// Too many failed attempts; PIN verification refused until `until`
    #[error("Wallet {wallet} PIN locked until {until}")]
    PinLocked {
        /// Wallet identifier
        wallet: String,
        /// Lock expiry instant
        until: DateTime<Utc>,
    },

    /// No pending OTP exists for the wallet
    #[error("No pending OTP for wallet {wallet}")]
    OtpNotRequested {
        /// Wallet identifier
        wallet: String,
    },

    /// The pending OTP has expired; the record was consumed
    #[error("OTP for wallet {wallet} has expired")]
    OtpExpired {
        /// Wallet identifier
        wallet: String,
    },

    /// The supplied OTP does not match the pending record
    #[error("Invalid OTP for wallet {wallet}")]
    OtpInvalid {
        /// Wallet identifier
        wallet: String,
    },

    /// A limit policy rejected the operation
    #[error("{scope} limit exceeded for wallet {wallet}: amount {amount}, cap {cap}")]
    LimitExceeded {
        /// Wallet identifier
        wallet: String,
        /// Which limit was hit
        scope: LimitScope,
        /// Requested amount
        amount: Amount,
        /// Configured cap (or floor, for the minimum-withdrawal scope)
        cap: Amount,
    },

    /// The wallet, or the whole platform, is frozen for debits
    #[error("Wallet {wallet} is frozen")]
    WalletFrozen {
        /// Wallet identifier
        wallet: String,
    },

    /// Optimistic mutation raced a concurrent commit (retryable)
    #[error("Version conflict on wallet {wallet}: expected {expected}, actual {actual}")]
    VersionConflict {
        /// Wallet identifier
        wallet: String,
        /// Version the caller expected
        expected: u64,
        /// Version actually stored
        actual: u64,
    },

    /// Balance arithmetic would overflow
    #[error("Arithmetic overflow in {operation} for wallet {wallet}")]
    ArithmeticOverflow {
        /// Operation that would overflow
        operation: String,
        /// Wallet identifier
        wallet: String,
    },

    /// Illegal ledger entry status transition
    #[error("Ledger entry {entry} cannot move from {from:?} to {to:?}")]
    InvalidStatusTransition {
        /// Entry identifier
        entry: u64,
        /// Current status
        from: super::EntryStatus,
        /// Requested status
        to: super::EntryStatus,
    },

    /// Payout outcome disagrees with recorded state; manual review required
    #[error("Reconciliation conflict on reference {reference}: {message}")]
    ReconciliationConflict {
        /// Operation reference the outcome named
        reference: String,
        /// Description of the mismatch
        message: String,
    },
}

// Helper functions for creating common errors

impl WalletError {
    /// Create a Validation error
    pub fn validation(message: impl Into<String>) -> Self {
        WalletError::Validation {
            message: message.into(),
        }
    }

    /// Create a WalletNotFound error
    pub fn wallet_not_found(wallet: &str) -> Self {
        WalletError::WalletNotFound {
            wallet: wallet.to_string(),
        }
    }

    /// Create an InsufficientFunds error
    pub fn insufficient_funds(wallet: &str, balance: Amount, requested: Amount) -> Self {
        WalletError::InsufficientFunds {
            wallet: wallet.to_string(),
            balance,
            requested,
        }
    }

    /// Create a LimitExceeded error
    pub fn limit_exceeded(wallet: &str, scope: LimitScope, amount: Amount, cap: Amount) -> Self {
        WalletError::LimitExceeded {
            wallet: wallet.to_string(),
            scope,
            amount,
            cap,
        }
    }

    /// Create a WalletFrozen error
    pub fn wallet_frozen(wallet: &str) -> Self {
        WalletError::WalletFrozen {
            wallet: wallet.to_string(),
        }
    }

    /// Create a VersionConflict error
    pub fn version_conflict(wallet: &str, expected: u64, actual: u64) -> Self {
        WalletError::VersionConflict {
            wallet: wallet.to_string(),
            expected,
            actual,
        }
    }

    /// Create an ArithmeticOverflow error
    pub fn arithmetic_overflow(operation: &str, wallet: &str) -> Self {
        WalletError::ArithmeticOverflow {
            operation: operation.to_string(),
            wallet: wallet.to_string(),
        }
    }

    /// Create a ReconciliationConflict error
    pub fn reconciliation_conflict(reference: &str, message: impl Into<String>) -> Self {
        WalletError::ReconciliationConflict {
            reference: reference.to_string(),
            message: message.into(),
        }
    }

    /// Whether internal processing may retry this failure
    ///
    /// Version conflicts and arithmetic rejections can succeed on a
    /// later attempt; validation failures and reconciliation conflicts
    /// cannot.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WalletError::VersionConflict { .. } | WalletError::ArithmeticOverflow { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntryStatus;
    use chrono::TimeZone;
    use rstest::rstest;

    #[rstest]
    #[case::validation(
        WalletError::validation("amount must be positive"),
        "Validation failed: amount must be positive"
    )]
    #[case::wallet_not_found(
        WalletError::wallet_not_found("254700000001"),
        "Wallet 254700000001 not found"
    )]
    #[case::insufficient_funds(
        WalletError::insufficient_funds("w1", 500, 1_000),
        "Insufficient funds for wallet w1: balance 500, requested 1000"
    )]
    #[case::limit_daily(
        WalletError::limit_exceeded("w1", LimitScope::Daily, 60_000, 50_000),
        "daily limit exceeded for wallet w1: amount 60000, cap 50000"
    )]
    #[case::limit_per_tx(
        WalletError::limit_exceeded("w1", LimitScope::PerTransaction, 99_999, 50_000),
        "per-transaction limit exceeded for wallet w1: amount 99999, cap 50000"
    )]
    #[case::frozen(WalletError::wallet_frozen("w1"), "Wallet w1 is frozen")]
    #[case::version_conflict(
        WalletError::version_conflict("w1", 3, 5),
        "Version conflict on wallet w1: expected 3, actual 5"
    )]
    #[case::reconciliation(
        WalletError::reconciliation_conflict("WDR-1", "amount mismatch"),
        "Reconciliation conflict on reference WDR-1: amount mismatch"
    )]
    fn test_error_display(#[case] error: WalletError, #[case] expected: &str) {
        assert_eq!(error.to_string(), expected);
    }

    #[test]
    fn test_pin_locked_display_includes_expiry() {
        let until = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let error = WalletError::PinLocked {
            wallet: "w1".to_string(),
            until,
        };
        assert!(error.to_string().starts_with("Wallet w1 PIN locked until"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(WalletError::version_conflict("w1", 1, 2).is_retryable());
        assert!(WalletError::arithmetic_overflow("credit", "w1").is_retryable());
        assert!(!WalletError::validation("bad").is_retryable());
        assert!(!WalletError::reconciliation_conflict("r", "m").is_retryable());
        assert!(!WalletError::wallet_frozen("w1").is_retryable());
    }

    #[test]
    fn test_invalid_status_transition_display() {
        let error = WalletError::InvalidStatusTransition {
            entry: 7,
            from: EntryStatus::Success,
            to: EntryStatus::Failed,
        };
        assert_eq!(
            error.to_string(),
            "Ledger entry 7 cannot move from Success to Failed"
        );
    }
}
