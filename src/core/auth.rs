//! PIN and OTP authorization
//!
//! This module provides the `AuthorizationGuard`: PIN verification with
//! failed-attempt lockout, and one-time passwords gating high-risk
//! payouts. Only digests of credentials are ever stored or compared;
//! raw PINs and OTP codes never appear in state or logs.
//!
//! # One-shot OTP records
//!
//! A pending authorization is created when an OTP is issued and removed
//! when it is consumed: a successful confirm takes it, an expired
//! confirm deletes it (so a fresh OTP can be requested), and a wrong
//! code leaves it in place until it expires. Records live in a
//! TTL-checked store keyed by wallet id; there is no background sweep,
//! expiry is enforced on access.

use crate::core::clock::Clock;
use crate::core::wallet_store::WalletStore;
use crate::types::{Amount, WalletError, WalletId};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of a secret
pub fn digest_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Authorization configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthConfig {
    /// Consecutive failed PIN attempts that trigger a lockout
    pub max_pin_attempts: u32,

    /// Length of the PIN lockout window, in seconds
    pub pin_lock_secs: i64,

    /// OTP time-to-live, in seconds
    pub otp_ttl_secs: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            max_pin_attempts: 3,
            pin_lock_secs: 900,
            otp_ttl_secs: 120,
        }
    }
}

/// The operation a pending OTP authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    /// Withdrawal of `amount` with `fee`, both in minor units
    Withdraw {
        /// Payout amount
        amount: Amount,
        /// Fee quoted when the OTP was issued
        fee: Amount,
    },
}

/// Transient record for an in-flight OTP-gated operation
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAuthorization {
    /// Wallet the authorization belongs to
    pub wallet_id: WalletId,

    /// Digest of the issued OTP code
    pub otp_hash: String,

    /// Instant after which the record is dead
    pub expires_at: DateTime<Utc>,

    /// The operation being authorized
    pub action: PendingAction,
}

/// An OTP as handed to the delivery channel
///
/// The raw code exists only in this value; the guard stores its digest.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedOtp {
    /// The one-time code, for out-of-band delivery to the owner
    pub code: String,

    /// When the code stops being valid
    pub expires_at: DateTime<Utc>,
}

/// PIN verification and OTP issuance/confirmation
#[derive(Debug, Default)]
pub struct AuthorizationGuard {
    config: AuthConfig,
    pending: DashMap<WalletId, PendingAuthorization>,
}

impl AuthorizationGuard {
    /// Create a guard with the given configuration
    pub fn new(config: AuthConfig) -> Self {
        AuthorizationGuard {
            config,
            pending: DashMap::new(),
        }
    }

    /// Verify a wallet PIN, maintaining the lockout counter
    ///
    /// Must be called while the caller holds the wallet's serialization
    /// lock, so the read-decide-write on the attempt counter cannot
    /// interleave with another verification.
    ///
    /// - While locked out, every attempt fails with `PinLocked`, even a
    ///   correct one, and does not touch the counter.
    /// - A mismatch increments the counter; reaching the configured
    ///   threshold sets the lockout window and resets the counter.
    /// - A match resets the counter to zero.
    ///
    /// # Errors
    ///
    /// `WalletNotFound`, `PinNotSet`, `PinLocked`, `InvalidPin`
    pub fn verify_pin(
        &self,
        wallets: &WalletStore,
        wallet_id: &str,
        pin: &str,
        clock: &dyn Clock,
    ) -> Result<(), WalletError> {
        let now = clock.now();
        let wallet = wallets
            .get(wallet_id)
            .ok_or_else(|| WalletError::wallet_not_found(wallet_id))?;

        if let Some(until) = wallet.pin_locked_until {
            if now < until {
                return Err(WalletError::PinLocked {
                    wallet: wallet_id.to_string(),
                    until,
                });
            }
        }

        let stored = wallet.pin_hash.ok_or_else(|| WalletError::PinNotSet {
            wallet: wallet_id.to_string(),
        })?;

        if stored == digest_secret(pin) {
            wallets.update(wallet_id, |w| {
                w.failed_pin_attempts = 0;
                w.pin_locked_until = None;
                Ok(())
            })?;
            return Ok(());
        }

        let threshold = self.config.max_pin_attempts;
        let lock_window = Duration::seconds(self.config.pin_lock_secs);
        wallets.update(wallet_id, |w| {
            w.failed_pin_attempts += 1;
            if w.failed_pin_attempts >= threshold {
                w.pin_locked_until = Some(now + lock_window);
                w.failed_pin_attempts = 0;
            }
            Ok(())
        })?;

        Err(WalletError::InvalidPin {
            wallet: wallet_id.to_string(),
        })
    }

    /// Issue an OTP for `action`, replacing any prior pending record
    ///
    /// Returns the raw code for out-of-band delivery; only its digest is
    /// stored.
    pub fn issue_otp(
        &self,
        wallet_id: &str,
        action: PendingAction,
        clock: &dyn Clock,
    ) -> IssuedOtp {
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32));
        let expires_at = clock.now() + Duration::seconds(self.config.otp_ttl_secs);

        self.pending.insert(
            wallet_id.to_string(),
            PendingAuthorization {
                wallet_id: wallet_id.to_string(),
                otp_hash: digest_secret(&code),
                expires_at,
                action,
            },
        );

        IssuedOtp { code, expires_at }
    }

    /// Confirm an OTP and consume its pending record
    ///
    /// The record is taken out of the store atomically, so a code can
    /// be redeemed at most once even under concurrent confirmation.
    ///
    /// # Errors
    ///
    /// - `OtpNotRequested` if no record exists for the wallet
    /// - `OtpExpired` if the record lapsed; the record is consumed so a
    ///   fresh request can replace it
    /// - `OtpInvalid` on a code mismatch; the record stays until expiry
    pub fn confirm_otp(
        &self,
        wallet_id: &str,
        code: &str,
        clock: &dyn Clock,
    ) -> Result<PendingAction, WalletError> {
        let now = clock.now();
        let (key, record) = self
            .pending
            .remove(wallet_id)
            .ok_or_else(|| WalletError::OtpNotRequested {
                wallet: wallet_id.to_string(),
            })?;

        if now >= record.expires_at {
            return Err(WalletError::OtpExpired {
                wallet: wallet_id.to_string(),
            });
        }

        if record.otp_hash != digest_secret(code) {
            // Wrong code does not burn the record.
            self.pending.insert(key, record);
            return Err(WalletError::OtpInvalid {
                wallet: wallet_id.to_string(),
            });
        }

        Ok(record.action)
    }

    /// Whether a live pending authorization exists for the wallet
    pub fn has_pending(&self, wallet_id: &str, clock: &dyn Clock) -> bool {
        self.pending
            .get(wallet_id)
            .is_some_and(|rec| clock.now() < rec.expires_at)
    }
}
