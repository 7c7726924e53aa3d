//! Append-only ledger of balance movements
//!
//! The `LedgerEngine` is the source of truth for audit and
//! reconstruction: every balance movement is recorded here, written
//! ahead of the balance mutation (the intention is durable before the
//! effect) and flipped to its outcome status after the mutation
//! commits or fails.
//!
//! # Immutability
//!
//! Entries are never updated after reaching a terminal status; the only
//! permitted mutation is the status transition `Pending → Queued /
//! Success / Failed` and `Queued → Success / Failed`.
//!
//! # Indexes
//!
//! Entries are indexed per wallet in creation order, by operation
//! `reference`, and uniquely by `(gateway, external_ref)` where present,
//! supporting idempotency checks and audit queries.

use crate::core::clock::Clock;
use crate::types::{
    Amount, EntryId, EntryKind, EntryStatus, LedgerEntry, Reference, WalletError, WalletId,
};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Everything the caller knows about a movement before it has an id
///
/// `balance_before`/`balance_after` are the values computed under the
/// wallet's lock at append time; for a movement that never applies they
/// document the intention.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    /// Wallet whose balance the movement touches
    pub wallet_id: WalletId,

    /// Kind of movement
    pub kind: EntryKind,

    /// Magnitude, always positive
    pub amount: Amount,

    /// Correlation id shared across the operation's entry-set
    pub reference: Reference,

    /// Balance before the movement
    pub balance_before: Amount,

    /// Balance after the movement
    pub balance_after: Amount,

    /// Initial status, normally `Pending`
    pub status: EntryStatus,

    /// Gateway name for externally-originated movements
    pub gateway: Option<String>,

    /// Gateway transaction id (idempotency key)
    pub external_ref: Option<String>,
}

/// Append-only record of every balance movement
#[derive(Debug)]
pub struct LedgerEngine {
    /// Next entry id; ids are assigned in append order
    next_id: AtomicU64,

    /// All entries by id
    entries: DashMap<EntryId, LedgerEntry>,

    /// Per-wallet entry ids in creation order
    by_wallet: DashMap<WalletId, Vec<EntryId>>,

    /// Entry ids per operation reference, in creation order
    by_reference: DashMap<Reference, Vec<EntryId>>,

    /// Unique index on (gateway, external_ref)
    by_external: DashMap<(String, String), EntryId>,
}

impl LedgerEngine {
    /// Create an empty ledger
    pub fn new() -> Self {
        LedgerEngine {
            next_id: AtomicU64::new(1),
            entries: DashMap::new(),
            by_wallet: DashMap::new(),
            by_reference: DashMap::new(),
            by_external: DashMap::new(),
        }
    }

    /// Append one movement and return its assigned id
    ///
    /// Entries are written ahead of the balance mutation they describe,
    /// normally with `status = Pending`.
    pub fn append(&self, draft: EntryDraft, clock: &dyn Clock) -> EntryId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let entry = LedgerEntry {
            id,
            wallet_id: draft.wallet_id.clone(),
            kind: draft.kind,
            amount: draft.amount,
            reference: draft.reference.clone(),
            balance_before: draft.balance_before,
            balance_after: draft.balance_after,
            status: draft.status,
            gateway: draft.gateway.clone(),
            external_ref: draft.external_ref.clone(),
            created_at: clock.now(),
        };

        self.by_wallet
            .entry(draft.wallet_id)
            .or_default()
            .push(id);
        self.by_reference
            .entry(draft.reference)
            .or_default()
            .push(id);
        if let (Some(gateway), Some(external_ref)) = (draft.gateway, draft.external_ref) {
            self.by_external.insert((gateway, external_ref), id);
        }
        self.entries.insert(id, entry);
        id
    }

    /// Get an entry by id
    pub fn get(&self, id: EntryId) -> Option<LedgerEntry> {
        self.entries.get(&id).map(|e| e.clone())
    }

    /// Flip an entry's status
    ///
    /// Legal transitions are `Pending → Queued/Success/Failed` and
    /// `Queued → Success/Failed`; everything else is rejected, in
    /// particular any transition out of a terminal status.
    ///
    /// # Errors
    ///
    /// - `ReconciliationConflict` if the entry does not exist
    /// - `InvalidStatusTransition` for an illegal transition
    pub fn mark(&self, id: EntryId, to: EntryStatus) -> Result<(), WalletError> {
        let mut entry = self.entries.get_mut(&id).ok_or_else(|| {
            WalletError::reconciliation_conflict(&id.to_string(), "ledger entry not found")
        })?;
        let from = entry.status;

        let legal = matches!(
            (from, to),
            (
                EntryStatus::Pending,
                EntryStatus::Queued | EntryStatus::Success | EntryStatus::Failed
            ) | (EntryStatus::Queued, EntryStatus::Success | EntryStatus::Failed)
        );
        if !legal {
            return Err(WalletError::InvalidStatusTransition {
                entry: id,
                from,
                to,
            });
        }

        entry.status = to;
        Ok(())
    }

    /// All entries sharing an operation reference, in creation order
    pub fn find_by_reference(&self, reference: &str) -> Vec<LedgerEntry> {
        self.by_reference
            .get(reference)
            .map(|ids| ids.iter().filter_map(|id| self.get(*id)).collect())
            .unwrap_or_default()
    }

    /// The entry recorded for `(gateway, external_ref)`, if any
    pub fn find_by_external_ref(&self, gateway: &str, external_ref: &str) -> Option<LedgerEntry> {
        self.by_external
            .get(&(gateway.to_string(), external_ref.to_string()))
            .and_then(|id| self.get(*id))
    }

    /// A wallet's entries in creation order (its audit trail)
    pub fn wallet_entries(&self, wallet_id: &str) -> Vec<LedgerEntry> {
        self.by_wallet
            .get(wallet_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(*id)).collect())
            .unwrap_or_default()
    }

    /// Replay a wallet's stream: the signed sum of applied movements
    ///
    /// For any wallet, at any time, this equals its stored balance; see
    /// [`LedgerEntry::signed_effect`] for the contribution rules.
    pub fn replay(&self, wallet_id: &str) -> i64 {
        self.wallet_entries(wallet_id)
            .iter()
            .map(LedgerEntry::signed_effect)
            .sum()
    }
}

impl Default for LedgerEngine {
    fn default() -> Self {
        Self::new()
    }
}
