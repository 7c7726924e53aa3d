//! Inbound collection reconciliation
//!
//! The `ExternalReconciler` consumes normalized collection events from
//! the gateway adapters, deduplicates them, credits wallets, and writes
//! the TOPUP ledger entries.
//!
//! # At-most-once credit
//!
//! Idempotency is centralized in one dedupe table keyed by
//! `(gateway, external_ref)`. The claim is a single atomic
//! insert-if-absent performed *before* any effect: a concurrent or later
//! duplicate observes the claim and becomes a success-no-op. If the
//! credit fails internally after the claim, the claim is released so the
//! internal retry (or the rail's own redelivery) can succeed.

use crate::core::clock::Clock;
use crate::core::ledger::{EntryDraft, LedgerEngine};
use crate::core::wallet_store::WalletStore;
use crate::types::{
    Amount, Direction, EntryId, EntryKind, EntryStatus, GatewayEvent, WalletClass, WalletError,
};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One processed (or claimed) external transaction
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalTransactionRecord {
    /// Originating rail
    pub gateway: String,

    /// Rail-assigned transaction id
    pub external_ref: String,

    /// Wallet the event credits
    pub wallet_id: String,

    /// Event amount in minor units
    pub amount: Amount,

    /// Ledger entry written for the credit, once committed
    pub entry: Option<EntryId>,

    /// When the claim was taken
    pub recorded_at: DateTime<Utc>,
}

/// Dedupe table keyed by `(gateway, external_ref)`
///
/// Consulted by every inbound-event handler; a second event with the
/// same key is a no-op, not an error.
#[derive(Debug, Default)]
pub struct DedupeTable {
    records: DashMap<(String, String), ExternalTransactionRecord>,
}

impl DedupeTable {
    /// Create an empty table
    pub fn new() -> Self {
        DedupeTable {
            records: DashMap::new(),
        }
    }

    /// Atomically claim a key; returns `false` if it was already taken
    pub fn claim(&self, record: ExternalTransactionRecord) -> bool {
        let key = (record.gateway.clone(), record.external_ref.clone());
        match self.records.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(record);
                true
            }
        }
    }

    /// Attach the committed ledger entry to a claimed key
    pub fn complete(&self, gateway: &str, external_ref: &str, entry: EntryId) {
        if let Some(mut record) = self
            .records
            .get_mut(&(gateway.to_string(), external_ref.to_string()))
        {
            record.entry = Some(entry);
        }
    }

    /// Release a claim whose processing failed, enabling a retry
    pub fn release(&self, gateway: &str, external_ref: &str) {
        self.records
            .remove(&(gateway.to_string(), external_ref.to_string()));
    }

    /// Look up a processed or claimed key
    pub fn get(&self, gateway: &str, external_ref: &str) -> Option<ExternalTransactionRecord> {
        self.records
            .get(&(gateway.to_string(), external_ref.to_string()))
            .map(|r| r.clone())
    }
}

/// How a collection event was settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditOutcome {
    /// The wallet was credited by this delivery
    Credited {
        /// Ledger entry recording the credit
        entry: EntryId,
        /// Wallet balance after the credit
        new_balance: Amount,
    },

    /// The key was already processed; nothing changed
    Duplicate,
}

/// Consumes inbound collection events and credits wallets exactly once
pub struct ExternalReconciler {
    wallets: Arc<WalletStore>,
    ledger: Arc<LedgerEngine>,
    dedupe: Arc<DedupeTable>,
    clock: Arc<dyn Clock>,
}

impl ExternalReconciler {
    /// Create a reconciler over shared engine components
    pub fn new(
        wallets: Arc<WalletStore>,
        ledger: Arc<LedgerEngine>,
        dedupe: Arc<DedupeTable>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        ExternalReconciler {
            wallets,
            ledger,
            dedupe,
            clock,
        }
    }

    /// Reconcile one collection event
    ///
    /// Claims the `(gateway, external_ref)` key, writes a PENDING TOPUP
    /// entry carrying the external reference, credits the wallet
    /// (created lazily), and flips the entry to SUCCESS. Replaying the
    /// same key any number of times credits the wallet exactly once.
    ///
    /// # Errors
    ///
    /// - `Validation` for malformed events (wrong direction, empty ids,
    ///   zero amount); nothing is claimed or written
    /// - Mutation failures after the claim release it and propagate, so
    ///   the ingestion worker can retry
    pub fn process(&self, event: &GatewayEvent) -> Result<CreditOutcome, WalletError> {
        if event.direction != Direction::Credit {
            return Err(WalletError::validation(
                "collection events must be credits",
            ));
        }
        if event.gateway.is_empty() || event.external_ref.is_empty() || event.wallet_id.is_empty()
        {
            return Err(WalletError::validation(
                "gateway, external_ref and wallet_id must not be empty",
            ));
        }
        if event.amount == 0 {
            return Err(WalletError::validation("collection amount must be positive"));
        }

        let claimed = self.dedupe.claim(ExternalTransactionRecord {
            gateway: event.gateway.clone(),
            external_ref: event.external_ref.clone(),
            wallet_id: event.wallet_id.clone(),
            amount: event.amount,
            entry: None,
            recorded_at: self.clock.now(),
        });
        if !claimed {
            debug!(
                gateway = event.gateway.as_str(),
                external_ref = event.external_ref.as_str(),
                "duplicate collection event ignored"
            );
            return Ok(CreditOutcome::Duplicate);
        }

        let lock_set = self.wallets.lock_set(&[event.wallet_id.as_str()]);
        let _guards = lock_set.guards();

        let wallet =
            self.wallets
                .get_or_create(&event.wallet_id, WalletClass::User, self.clock.as_ref());

        let entry = self.ledger.append(
            EntryDraft {
                wallet_id: event.wallet_id.clone(),
                kind: EntryKind::Topup,
                amount: event.amount,
                reference: event.external_ref.clone(),
                balance_before: wallet.balance,
                balance_after: wallet.balance.saturating_add(event.amount),
                status: EntryStatus::Pending,
                gateway: Some(event.gateway.clone()),
                external_ref: Some(event.external_ref.clone()),
            },
            self.clock.as_ref(),
        );

        match self
            .wallets
            .mutate(&event.wallet_id, Some(wallet.version), event.amount as i64)
        {
            Ok(committed) => {
                self.ledger.mark(entry, EntryStatus::Success)?;
                self.dedupe
                    .complete(&event.gateway, &event.external_ref, entry);
                info!(
                    gateway = event.gateway.as_str(),
                    external_ref = event.external_ref.as_str(),
                    wallet = event.wallet_id.as_str(),
                    amount = event.amount,
                    "collection credited"
                );
                Ok(CreditOutcome::Credited {
                    entry,
                    new_balance: committed.balance,
                })
            }
            Err(e) => {
                // Release the claim so a retry can credit.
                if let Err(mark_err) = self.ledger.mark(entry, EntryStatus::Failed) {
                    warn!(entry, error = %mark_err, "could not fail pending topup entry");
                }
                self.dedupe.release(&event.gateway, &event.external_ref);
                warn!(
                    gateway = event.gateway.as_str(),
                    external_ref = event.external_ref.as_str(),
                    error = %e,
                    "collection credit failed, claim released"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::SystemClock;

    fn event(external_ref: &str, wallet: &str, amount: Amount) -> GatewayEvent {
        GatewayEvent {
            gateway: "MPESA".to_string(),
            external_ref: external_ref.to_string(),
            wallet_id: wallet.to_string(),
            amount,
            direction: Direction::Credit,
        }
    }

    fn reconciler() -> (ExternalReconciler, Arc<WalletStore>, Arc<LedgerEngine>) {
        let wallets = Arc::new(WalletStore::new());
        let ledger = Arc::new(LedgerEngine::new());
        let reconciler = ExternalReconciler::new(
            Arc::clone(&wallets),
            Arc::clone(&ledger),
            Arc::new(DedupeTable::new()),
            Arc::new(SystemClock),
        );
        (reconciler, wallets, ledger)
    }

    #[test]
    fn test_credit_creates_wallet_and_ledger_entry() {
        let (reconciler, wallets, ledger) = reconciler();

        let outcome = reconciler.process(&event("X1", "alice", 500)).unwrap();
        let CreditOutcome::Credited { entry, new_balance } = outcome else {
            panic!("expected a credit");
        };

        assert_eq!(new_balance, 500);
        assert_eq!(wallets.get("alice").unwrap().balance, 500);

        let recorded = ledger.get(entry).unwrap();
        assert_eq!(recorded.kind, EntryKind::Topup);
        assert_eq!(recorded.status, EntryStatus::Success);
        assert_eq!(recorded.external_ref.as_deref(), Some("X1"));
        assert_eq!(ledger.replay("alice"), 500);
    }

    #[test]
    fn test_duplicate_delivery_credits_exactly_once() {
        let (reconciler, wallets, _) = reconciler();

        assert!(matches!(
            reconciler.process(&event("X1", "alice", 500)).unwrap(),
            CreditOutcome::Credited { .. }
        ));
        assert_eq!(
            reconciler.process(&event("X1", "alice", 500)).unwrap(),
            CreditOutcome::Duplicate
        );
        assert_eq!(wallets.get("alice").unwrap().balance, 500);
    }

    #[test]
    fn test_same_ref_on_different_gateways_is_not_a_duplicate() {
        let (reconciler, wallets, _) = reconciler();

        reconciler.process(&event("X1", "alice", 500)).unwrap();

        let mut paypal = event("X1", "alice", 300);
        paypal.gateway = "PAYPAL".to_string();
        assert!(matches!(
            reconciler.process(&paypal).unwrap(),
            CreditOutcome::Credited { .. }
        ));
        assert_eq!(wallets.get("alice").unwrap().balance, 800);
    }

    #[test]
    fn test_rejects_malformed_events_without_claiming() {
        let (reconciler, _, _) = reconciler();

        let mut zero = event("X1", "alice", 0);
        assert!(reconciler.process(&zero).is_err());

        zero.amount = 500;
        zero.direction = Direction::Debit;
        assert!(reconciler.process(&zero).is_err());

        let empty = event("", "alice", 500);
        assert!(reconciler.process(&empty).is_err());

        // The key was never claimed, so a well-formed retry credits.
        assert!(matches!(
            reconciler.process(&event("X1", "alice", 500)).unwrap(),
            CreditOutcome::Credited { .. }
        ));
    }

    #[test]
    fn test_concurrent_duplicate_delivery() {
        use std::thread;

        let (reconciler, wallets, _) = reconciler();
        let reconciler = Arc::new(reconciler);

        let mut handles = vec![];
        for _ in 0..8 {
            let reconciler = Arc::clone(&reconciler);
            handles.push(thread::spawn(move || {
                reconciler.process(&event("X1", "alice", 500)).unwrap()
            }));
        }

        let credited = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| matches!(o, CreditOutcome::Credited { .. }))
            .count();

        assert_eq!(credited, 1);
        assert_eq!(wallets.get("alice").unwrap().balance, 500);
    }

    #[test]
    fn test_dedupe_claim_release_cycle() {
        let table = DedupeTable::new();
        let record = ExternalTransactionRecord {
            gateway: "MPESA".to_string(),
            external_ref: "X1".to_string(),
            wallet_id: "alice".to_string(),
            amount: 500,
            entry: None,
            recorded_at: Utc::now(),
        };

        assert!(table.claim(record.clone()));
        assert!(!table.claim(record.clone()));

        table.complete("MPESA", "X1", 42);
        assert_eq!(table.get("MPESA", "X1").unwrap().entry, Some(42));

        table.release("MPESA", "X1");
        assert!(table.claim(record));
    }
}
