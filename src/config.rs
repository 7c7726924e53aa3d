//! Engine configuration
//!
//! Fee tiers, spending limits, authorization windows, and the platform
//! wallet id are policy configuration, not contracts: the engine
//! guarantees the mechanisms, deployments pick the numbers. The defaults
//! reproduce the production constants this engine replaced (flat small
//! fee, 50 000 daily cap, 10 minimum withdrawal, 3-attempt PIN lockout).

use crate::core::auth::AuthConfig;
use crate::policy::{FeeSchedule, LimitConfig};
use crate::types::{WalletError, WalletId};

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Tiered fee schedule
    pub fees: FeeSchedule,

    /// Per-transaction, daily, and minimum-withdrawal limits
    pub limits: LimitConfig,

    /// PIN lockout and OTP windows
    pub auth: AuthConfig,

    /// Id of the PLATFORM wallet that collects fees
    pub platform_wallet: WalletId,
}

impl EngineConfig {
    /// Validate cross-field consistency
    ///
    /// # Errors
    ///
    /// Returns a validation error if the platform wallet id is empty,
    /// the minimum withdrawal exceeds the per-transaction cap, or any
    /// window is non-positive.
    pub fn validate(&self) -> Result<(), WalletError> {
        if self.platform_wallet.is_empty() {
            return Err(WalletError::validation("platform wallet id is empty"));
        }
        if self.limits.min_withdrawal > self.limits.per_tx_cap {
            return Err(WalletError::validation(format!(
                "minimum withdrawal {} exceeds per-transaction cap {}",
                self.limits.min_withdrawal, self.limits.per_tx_cap
            )));
        }
        if self.auth.max_pin_attempts == 0 {
            return Err(WalletError::validation("max_pin_attempts must be positive"));
        }
        if self.auth.pin_lock_secs <= 0 || self.auth.otp_ttl_secs <= 0 {
            return Err(WalletError::validation(
                "lockout and OTP windows must be positive",
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            fees: FeeSchedule::default(),
            limits: LimitConfig::default(),
            auth: AuthConfig::default(),
            platform_wallet: "platform".to_string(),
        }
    }
}
