//! Normalized gateway event types
//!
//! Gateway adapters translate rail-specific callback payloads into these
//! shapes before they reach the core; the core never sees wire formats.

use super::{Amount, Reference, WalletId};
use serde::{Deserialize, Serialize};

/// Direction of an external movement relative to the wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Money arrives into the wallet (inbound collection)
    Credit,

    /// Money leaves the wallet (outbound payout)
    Debit,
}

/// Inbound collection notification from an external payment rail
///
/// `(gateway, external_ref)` is the idempotency key: redelivery of the
/// same pair is reconciled exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayEvent {
    /// Name of the originating rail (e.g. "MPESA")
    pub gateway: String,

    /// Rail-assigned transaction id, unique per gateway
    pub external_ref: String,

    /// Wallet to credit
    pub wallet_id: WalletId,

    /// Amount in minor currency units
    pub amount: Amount,

    /// Movement direction; collection events are always credits
    pub direction: Direction,
}

/// Asynchronous outcome of a previously dispatched payout
///
/// Keyed by the withdrawal's `reference`, not by delivery order; a
/// duplicate outcome for an already-settled withdrawal is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutOutcome {
    /// Reference of the withdrawal this outcome settles
    pub reference: Reference,

    /// Whether the rail completed the payout
    pub success: bool,

    /// Amount echoed by the rail, if it reports one; checked against
    /// the queued debit and escalated on mismatch
    pub amount: Option<Amount>,

    /// Rail-supplied failure reason, if any
    pub reason: Option<String>,
}
