//! Ledger entry types for the wallet ledger engine
//!
//! Every balance movement is recorded as one append-only ledger entry.
//! Entries are never mutated after reaching a terminal status; replaying
//! a wallet's entry stream reproduces its balance exactly.

use super::{Amount, EntryId, Reference, WalletId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of balance movement recorded in the ledger
///
/// The sign of a movement is implied by its kind; `amount` is always
/// positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    /// Inbound collection credit from an external rail
    Topup,

    /// Debit side of an internal transfer
    TransferOut,

    /// Credit side of an internal transfer
    TransferIn,

    /// Fee debit, credited to the platform wallet
    Fee,

    /// Withdrawal debit, queued until the payout outcome arrives
    Withdraw,

    /// Zero-effect marker written when a queued payout succeeds
    WithdrawComplete,

    /// Compensating credit that undoes a prior applied debit
    Reversal,
}

/// Lifecycle status of a ledger entry
///
/// Entries are written `Pending` before the balance mutation (write-ahead),
/// then flipped to `Success` or `Failed`. Withdrawal debits pass through
/// `Queued` while the external payout is in flight. `Success` and `Failed`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    /// Intention recorded; balance mutation not yet committed
    Pending,

    /// Movement applied and settled
    Success,

    /// Movement rejected, or applied and later compensated by a reversal
    Failed,

    /// Debit applied; external payout outcome still outstanding
    Queued,
}

impl EntryStatus {
    /// Whether this status admits no further transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryStatus::Success | EntryStatus::Failed)
    }
}

/// One immutable balance movement
///
/// `balance_before`/`balance_after` snapshot the wallet balance around
/// the movement as computed at append time, under the wallet's lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry identifier, assigned by the ledger on append
    pub id: EntryId,

    /// Wallet whose balance this entry moves
    pub wallet_id: WalletId,

    /// Kind of movement (implies the sign)
    pub kind: EntryKind,

    /// Magnitude of the movement, always positive, in minor units
    pub amount: Amount,

    /// Correlation id shared across the entry-set of one operation
    pub reference: Reference,

    /// Wallet balance immediately before the movement
    pub balance_before: Amount,

    /// Wallet balance immediately after the movement
    pub balance_after: Amount,

    /// Lifecycle status
    pub status: EntryStatus,

    /// Gateway name for externally-originated entries
    pub gateway: Option<String>,

    /// Gateway transaction id, unique when present (idempotency key)
    pub external_ref: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Signed contribution of this entry to the wallet balance
    ///
    /// Summing signed effects over a wallet's entry stream in creation
    /// order reproduces its current balance exactly:
    ///
    /// - `Topup`/`TransferIn` count positive when `Success`.
    /// - `TransferOut`/`Fee` count negative when `Success`, and a
    ///   `Withdraw` (plus its fee) counts negative already while
    ///   `Queued`: the debit is applied when the entry is queued.
    /// - A `Failed` entry counts zero: either its mutation never
    ///   applied, or it was compensated by a paired `Reversal`.
    /// - `Reversal` and `WithdrawComplete` count zero; the reversal's
    ///   amount documents the refunded sum, whose net effect with its
    ///   failed original is nil.
    pub fn signed_effect(&self) -> i64 {
        let amount = self.amount as i64;
        match (self.kind, self.status) {
            (EntryKind::Topup | EntryKind::TransferIn, EntryStatus::Success) => amount,
            (
                EntryKind::TransferOut | EntryKind::Fee | EntryKind::Withdraw,
                EntryStatus::Success | EntryStatus::Queued,
            ) => -amount,
            _ => 0,
        }
    }
}

/// Lifecycle of one withdrawal, derived from authorization and ledger state
///
/// `Requested` and `OtpPending` precede the debit; from `Queued` onward
/// the wallet has been charged and only the compensation path advances
/// the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithdrawalState {
    /// Withdrawal asked for, OTP not yet issued
    Requested,

    /// OTP issued, debit not yet applied
    OtpPending,

    /// Debit applied, payout dispatched, outcome outstanding
    Queued,

    /// Payout confirmed by the rail
    Completed,

    /// Payout failed; debit compensated by a reversal
    Reversed,
}
