//! Tiered fee computation
//!
//! Fees are a deterministic function of amount and wallet class. The
//! tier values are policy configuration, not a contract: deployments
//! configure their own schedule and the engine only guarantees the
//! mechanism (deterministic, never negative, monotonically
//! non-decreasing in amount).

use crate::types::{Amount, WalletClass, WalletError};
use serde::{Deserialize, Serialize};

/// One fee tier: amounts up to and including `up_to` pay `fee`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTier {
    /// Inclusive upper bound of the tier, in minor units
    pub up_to: Amount,

    /// Flat fee charged inside the tier, in minor units
    pub fee: Amount,
}

/// Validated tiered fee schedule
///
/// Tiers must be sorted by ascending `up_to` with strictly increasing
/// bounds and non-decreasing fees, so the overall schedule is monotone.
/// Amounts above the last tier pay `top_fee`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    tiers: Vec<FeeTier>,
    top_fee: Amount,
}

impl FeeSchedule {
    /// Create a validated fee schedule
    ///
    /// # Arguments
    ///
    /// * `tiers` - Fee tiers sorted by ascending upper bound
    /// * `top_fee` - Fee for amounts above the last tier
    ///
    /// # Errors
    ///
    /// Returns a validation error if tier bounds are not strictly
    /// increasing, tier fees decrease, or `top_fee` undercuts the last
    /// tier's fee.
    pub fn new(tiers: Vec<FeeTier>, top_fee: Amount) -> Result<Self, WalletError> {
        let mut previous: Option<&FeeTier> = None;
        for tier in &tiers {
            if let Some(prev) = previous {
                if tier.up_to <= prev.up_to {
                    return Err(WalletError::validation(format!(
                        "fee tier bounds must increase: {} after {}",
                        tier.up_to, prev.up_to
                    )));
                }
                if tier.fee < prev.fee {
                    return Err(WalletError::validation(format!(
                        "fee tiers must be non-decreasing: {} after {}",
                        tier.fee, prev.fee
                    )));
                }
            }
            previous = Some(tier);
        }
        if let Some(last) = tiers.last() {
            if top_fee < last.fee {
                return Err(WalletError::validation(format!(
                    "top fee {} undercuts last tier fee {}",
                    top_fee, last.fee
                )));
            }
        }
        Ok(FeeSchedule { tiers, top_fee })
    }

    /// A schedule that charges the same fee for every positive amount
    pub fn flat(fee: Amount) -> Self {
        FeeSchedule {
            tiers: Vec::new(),
            top_fee: fee,
        }
    }

    /// Fee for the given amount; zero amounts are free
    pub fn fee_for(&self, amount: Amount) -> Amount {
        if amount == 0 {
            return 0;
        }
        for tier in &self.tiers {
            if amount <= tier.up_to {
                return tier.fee;
            }
        }
        self.top_fee
    }
}

impl Default for FeeSchedule {
    /// Example schedule: 10 units up to 1 000, 25 up to 10 000, 50 above
    ///
    /// Policy configuration, not a contract; deployments supply their own.
    fn default() -> Self {
        FeeSchedule {
            tiers: vec![
                FeeTier {
                    up_to: 1_000,
                    fee: 10,
                },
                FeeTier {
                    up_to: 10_000,
                    fee: 25,
                },
            ],
            top_fee: 50,
        }
    }
}

/// Fee policy: schedule lookup plus class exemptions
///
/// The PLATFORM class is always fee-exempt; it is the fee sink, and
/// charging it would route money to itself.
#[derive(Debug, Clone, PartialEq)]
pub struct FeePolicy {
    schedule: FeeSchedule,
}

impl FeePolicy {
    /// Create a fee policy from a validated schedule
    pub fn new(schedule: FeeSchedule) -> Self {
        FeePolicy { schedule }
    }

    /// Compute the fee for an operation of `amount` by a wallet of `class`
    pub fn compute(&self, amount: Amount, class: WalletClass) -> Amount {
        match class {
            WalletClass::Platform => 0,
            WalletClass::User | WalletClass::Business => self.schedule.fee_for(amount),
        }
    }
}
