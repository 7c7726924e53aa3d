//! Internal transfer orchestration
//!
//! The `TransferProcessor` moves money between wallets (payer → payee,
//! with an optional platform fee) by composing the policy checks, the
//! authorization guard, the write-ahead ledger, and the wallet store.
//!
//! Every precondition is checked before any mutation, so a caller-visible
//! error never leaves partial state behind. The operation holds the
//! serialization locks of all touched wallets (acquired in sorted id
//! order) for its whole duration; if a mutation fails after an earlier
//! one applied, the applied mutations are compensated with REVERSAL
//! entries before the error is surfaced.

use crate::core::auth::AuthorizationGuard;
use crate::core::clock::Clock;
use crate::core::ledger::{EntryDraft, LedgerEngine};
use crate::core::new_reference;
use crate::core::wallet_store::WalletStore;
use crate::policy::{FeePolicy, LimitPolicy};
use crate::types::{
    Amount, EntryId, EntryKind, EntryStatus, Reference, Wallet, WalletClass, WalletError, WalletId,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a committed transfer
#[derive(Debug, Clone, PartialEq)]
pub struct TransferReceipt {
    /// Reference shared by the transfer's ledger entry-set
    pub reference: Reference,

    /// Payer balance after the debit
    pub payer_balance: Amount,
}

/// Orchestrates internal wallet-to-wallet movements
pub struct TransferProcessor {
    wallets: Arc<WalletStore>,
    ledger: Arc<LedgerEngine>,
    auth: Arc<AuthorizationGuard>,
    fees: FeePolicy,
    limits: LimitPolicy,
    clock: Arc<dyn Clock>,
    platform_wallet: WalletId,
    global_freeze: Arc<AtomicBool>,
}

impl TransferProcessor {
    /// Create a transfer processor over shared engine components
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        wallets: Arc<WalletStore>,
        ledger: Arc<LedgerEngine>,
        auth: Arc<AuthorizationGuard>,
        fees: FeePolicy,
        limits: LimitPolicy,
        clock: Arc<dyn Clock>,
        platform_wallet: WalletId,
        global_freeze: Arc<AtomicBool>,
    ) -> Self {
        TransferProcessor {
            wallets,
            ledger,
            auth,
            fees,
            limits,
            clock,
            platform_wallet,
            global_freeze,
        }
    }

    /// Transfer `amount` from `payer_id` to `payee_id`
    ///
    /// Steps (each a precondition that short-circuits before any
    /// mutation): resolve wallets (payee created lazily, payer must
    /// exist), freeze checks, PIN verification, fee computation, limit
    /// checks (with the daily window reset applied at most once), and
    /// the balance check for `amount + fee`. Then one reference is
    /// generated, PENDING entries are written ahead, the three balances
    /// move, the entries flip to SUCCESS, and the payer's daily spend
    /// accrues.
    ///
    /// # Errors
    ///
    /// `Validation`, `WalletNotFound`, `WalletFrozen`, `PinLocked`,
    /// `InvalidPin`, `PinNotSet`, `LimitExceeded`, `InsufficientFunds`,
    /// plus any compensated mid-mutation failure.
    pub fn transfer(
        &self,
        payer_id: &str,
        payee_id: &str,
        amount: Amount,
        pin: &str,
    ) -> Result<TransferReceipt, WalletError> {
        if amount == 0 {
            return Err(WalletError::validation("transfer amount must be positive"));
        }
        if payer_id.is_empty() || payee_id.is_empty() {
            return Err(WalletError::validation("wallet ids must not be empty"));
        }
        if payer_id == payee_id {
            return Err(WalletError::validation("payer and payee must differ"));
        }
        if !self.wallets.contains(payer_id) {
            return Err(WalletError::wallet_not_found(payer_id));
        }

        // Serialize against every wallet we may touch, in sorted order.
        let platform_id = self.platform_wallet.clone();
        let lock_set = self
            .wallets
            .lock_set(&[payer_id, payee_id, platform_id.as_str()]);
        let _guards = lock_set.guards();

        let payer = self
            .wallets
            .get(payer_id)
            .ok_or_else(|| WalletError::wallet_not_found(payer_id))?;
        self.limits
            .check_frozen(&payer, self.global_freeze.load(Ordering::SeqCst))?;

        self.auth
            .verify_pin(&self.wallets, payer_id, pin, self.clock.as_ref())?;

        let fee = self.fees.compute(amount, payer.class);
        let total = amount
            .checked_add(fee)
            .ok_or_else(|| WalletError::arithmetic_overflow("transfer", payer_id))?;

        self.limits.check_per_transaction(payer_id, amount)?;

        let now = self.clock.now();
        if LimitPolicy::window_lapsed(&payer, now) {
            self.wallets.update(payer_id, |w| {
                w.daily_spent = 0;
                w.daily_window_start = now;
                Ok(())
            })?;
        }

        // Refresh after the PIN and window updates bumped the version.
        let payer = self
            .wallets
            .get(payer_id)
            .ok_or_else(|| WalletError::wallet_not_found(payer_id))?;
        self.limits.check_daily(&payer, amount, now)?;

        if payer.balance < total {
            return Err(WalletError::insufficient_funds(
                payer_id,
                payer.balance,
                total,
            ));
        }

        let payee = self
            .wallets
            .get_or_create(payee_id, WalletClass::User, self.clock.as_ref());
        let platform =
            self.wallets
                .get_or_create(&platform_id, WalletClass::Platform, self.clock.as_ref());

        // Write-ahead: the entry-set is durable before any balance moves.
        let reference = new_reference("TRF");
        let entry_set = self.append_pending_set(&payer, &payee, &platform, amount, fee, &reference);

        self.apply_mutations(&payer, payee_id, &platform_id, amount, fee, total, &entry_set)?;

        for id in entry_set.all() {
            self.ledger.mark(id, EntryStatus::Success)?;
        }

        let committed = self.wallets.update(payer_id, |w| {
            w.daily_spent = w.daily_spent.saturating_add(amount);
            Ok(())
        })?;

        info!(
            reference = reference.as_str(),
            payer = payer_id,
            payee = payee_id,
            amount,
            fee,
            "transfer committed"
        );

        Ok(TransferReceipt {
            reference,
            payer_balance: committed.balance,
        })
    }

    /// Write the PENDING entry-set for one transfer
    fn append_pending_set(
        &self,
        payer: &Wallet,
        payee: &Wallet,
        platform: &Wallet,
        amount: Amount,
        fee: Amount,
        reference: &str,
    ) -> TransferEntrySet {
        let clock = self.clock.as_ref();
        let out = self.ledger.append(
            EntryDraft {
                wallet_id: payer.id.clone(),
                kind: EntryKind::TransferOut,
                amount,
                reference: reference.to_string(),
                balance_before: payer.balance,
                balance_after: payer.balance - amount,
                status: EntryStatus::Pending,
                gateway: None,
                external_ref: None,
            },
            clock,
        );
        let fee_entry = (fee > 0).then(|| {
            self.ledger.append(
                EntryDraft {
                    wallet_id: payer.id.clone(),
                    kind: EntryKind::Fee,
                    amount: fee,
                    reference: reference.to_string(),
                    balance_before: payer.balance - amount,
                    balance_after: payer.balance - amount - fee,
                    status: EntryStatus::Pending,
                    gateway: None,
                    external_ref: None,
                },
                clock,
            )
        });
        let incoming = self.ledger.append(
            EntryDraft {
                wallet_id: payee.id.clone(),
                kind: EntryKind::TransferIn,
                amount,
                reference: reference.to_string(),
                balance_before: payee.balance,
                balance_after: payee.balance + amount,
                status: EntryStatus::Pending,
                gateway: None,
                external_ref: None,
            },
            clock,
        );
        let platform_credit = (fee > 0).then(|| {
            self.ledger.append(
                EntryDraft {
                    wallet_id: platform.id.clone(),
                    kind: EntryKind::TransferIn,
                    amount: fee,
                    reference: reference.to_string(),
                    balance_before: platform.balance,
                    balance_after: platform.balance + fee,
                    status: EntryStatus::Pending,
                    gateway: None,
                    external_ref: None,
                },
                clock,
            )
        });
        TransferEntrySet {
            out,
            fee: fee_entry,
            incoming,
            platform_credit,
        }
    }

    /// Apply the three balance mutations, compensating on mid-way failure
    ///
    /// Partial credit must never be observable to a caller who retries:
    /// if a later mutation fails, every earlier one is undone with a
    /// REVERSAL entry, all pending entries flip to FAILED, and the
    /// original error is surfaced.
    fn apply_mutations(
        &self,
        payer: &Wallet,
        payee_id: &str,
        platform_id: &str,
        amount: Amount,
        fee: Amount,
        total: Amount,
        entry_set: &TransferEntrySet,
    ) -> Result<(), WalletError> {
        if let Err(e) = self
            .wallets
            .mutate(&payer.id, Some(payer.version), -(total as i64))
        {
            self.fail_entries(entry_set);
            return Err(e);
        }

        if let Err(e) = self.wallets.mutate(payee_id, None, amount as i64) {
            self.compensate(&payer.id, total, &self.reference_of(entry_set));
            self.fail_entries(entry_set);
            return Err(e);
        }

        if fee > 0 {
            if let Err(e) = self.wallets.mutate(platform_id, None, fee as i64) {
                self.compensate(payee_id, amount, &self.reference_of(entry_set));
                self.compensate(&payer.id, total, &self.reference_of(entry_set));
                self.fail_entries(entry_set);
                return Err(e);
            }
        }

        Ok(())
    }

    fn reference_of(&self, entry_set: &TransferEntrySet) -> Reference {
        self.ledger
            .get(entry_set.out)
            .map(|e| e.reference)
            .unwrap_or_default()
    }

    /// Undo one applied mutation and document it with a REVERSAL entry
    fn compensate(&self, wallet_id: &str, amount: Amount, reference: &str) {
        match self.wallets.mutate(wallet_id, None, amount as i64) {
            Ok(restored) => {
                self.ledger.append(
                    EntryDraft {
                        wallet_id: wallet_id.to_string(),
                        kind: EntryKind::Reversal,
                        amount,
                        reference: reference.to_string(),
                        balance_before: restored.balance - amount,
                        balance_after: restored.balance,
                        status: EntryStatus::Success,
                        gateway: None,
                        external_ref: None,
                    },
                    self.clock.as_ref(),
                );
            }
            Err(e) => {
                // Nothing left to do automatically; surface loudly.
                warn!(
                    wallet = wallet_id,
                    amount,
                    reference,
                    error = %e,
                    "compensation failed, manual review required"
                );
            }
        }
    }

    fn fail_entries(&self, entry_set: &TransferEntrySet) {
        for id in entry_set.all() {
            if let Err(e) = self.ledger.mark(id, EntryStatus::Failed) {
                warn!(entry = id, error = %e, "could not fail pending entry");
            }
        }
    }
}

/// Entry ids written ahead of one transfer's mutations
struct TransferEntrySet {
    out: EntryId,
    fee: Option<EntryId>,
    incoming: EntryId,
    platform_credit: Option<EntryId>,
}

impl TransferEntrySet {
    fn all(&self) -> Vec<EntryId> {
        let mut ids = vec![self.out];
        ids.extend(self.fee);
        ids.push(self.incoming);
        ids.extend(self.platform_credit);
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::auth::{digest_secret, AuthConfig};
    use crate::core::clock::ManualClock;
    use crate::policy::{FeeSchedule, LimitConfig};
    use chrono::{Duration, TimeZone, Utc};

    struct Fixture {
        wallets: Arc<WalletStore>,
        ledger: Arc<LedgerEngine>,
        clock: Arc<ManualClock>,
        processor: TransferProcessor,
        freeze: Arc<AtomicBool>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let wallets = Arc::new(WalletStore::new());
        let ledger = Arc::new(LedgerEngine::new());
        let auth = Arc::new(AuthorizationGuard::new(AuthConfig::default()));
        let freeze = Arc::new(AtomicBool::new(false));
        let processor = TransferProcessor::new(
            Arc::clone(&wallets),
            Arc::clone(&ledger),
            auth,
            FeePolicy::new(FeeSchedule::default()),
            LimitPolicy::new(LimitConfig::default()),
            clock.clone(),
            "platform".to_string(),
            Arc::clone(&freeze),
        );

        wallets.get_or_create("alice", WalletClass::User, clock.as_ref());
        wallets
            .update("alice", |w| {
                w.pin_hash = Some(digest_secret("1234"));
                Ok(())
            })
            .unwrap();
        wallets.mutate("alice", None, 1_000).unwrap();

        Fixture {
            wallets,
            ledger,
            clock,
            processor,
            freeze,
        }
    }

    #[test]
    fn test_transfer_moves_amount_fee_and_shares_reference() {
        let fx = fixture();

        let receipt = fx.processor.transfer("alice", "bob", 200, "1234").unwrap();

        // Default schedule: 200 falls in the 10-unit tier.
        assert_eq!(receipt.payer_balance, 790);
        assert_eq!(fx.wallets.get("alice").unwrap().balance, 790);
        assert_eq!(fx.wallets.get("bob").unwrap().balance, 200);
        assert_eq!(fx.wallets.get("platform").unwrap().balance, 10);

        let set = fx.ledger.find_by_reference(&receipt.reference);
        let payer_and_payee: Vec<_> = set
            .iter()
            .filter(|e| e.wallet_id != "platform")
            .collect();
        assert_eq!(payer_and_payee.len(), 3);
        assert!(set.iter().all(|e| e.status == EntryStatus::Success));
    }

    #[test]
    fn test_transfer_replay_invariant_holds_for_all_wallets() {
        let fx = fixture();

        fx.processor.transfer("alice", "bob", 200, "1234").unwrap();

        // Alice was seeded with 1000 outside the ledger, so offset by it.
        assert_eq!(
            1_000 + fx.ledger.replay("alice"),
            fx.wallets.get("alice").unwrap().balance as i64
        );
        assert_eq!(
            fx.ledger.replay("bob"),
            fx.wallets.get("bob").unwrap().balance as i64
        );
        assert_eq!(
            fx.ledger.replay("platform"),
            fx.wallets.get("platform").unwrap().balance as i64
        );
    }

    #[test]
    fn test_transfer_rejects_unknown_payer_without_creating_it() {
        let fx = fixture();
        let result = fx.processor.transfer("ghost", "bob", 100, "1234");
        assert!(matches!(result, Err(WalletError::WalletNotFound { .. })));
        assert!(!fx.wallets.contains("ghost"));
        assert!(!fx.wallets.contains("bob"));
    }

    #[test]
    fn test_transfer_creates_payee_lazily() {
        let fx = fixture();
        assert!(!fx.wallets.contains("bob"));
        fx.processor.transfer("alice", "bob", 100, "1234").unwrap();
        assert_eq!(fx.wallets.get("bob").unwrap().class, WalletClass::User);
    }

    #[test]
    fn test_transfer_rejects_zero_amount_and_self_transfer() {
        let fx = fixture();
        assert!(matches!(
            fx.processor.transfer("alice", "bob", 0, "1234"),
            Err(WalletError::Validation { .. })
        ));
        assert!(matches!(
            fx.processor.transfer("alice", "alice", 10, "1234"),
            Err(WalletError::Validation { .. })
        ));
    }

    #[test]
    fn test_transfer_insufficient_funds_covers_fee() {
        let fx = fixture();
        // 1000 balance, fee 25 in the second tier: 990 + 25 > 1000.
        let result = fx.processor.transfer("alice", "bob", 1_990, "1234");
        assert!(matches!(
            result,
            Err(WalletError::InsufficientFunds { requested: 2_015, .. })
        ));
        // Nothing moved, nothing recorded as applied.
        assert_eq!(fx.wallets.get("alice").unwrap().balance, 1_000);
        assert!(!fx.wallets.contains("bob"));
    }

    #[test]
    fn test_transfer_wrong_pin_leaves_balances_untouched() {
        let fx = fixture();
        let result = fx.processor.transfer("alice", "bob", 100, "9999");
        assert!(matches!(result, Err(WalletError::InvalidPin { .. })));
        assert_eq!(fx.wallets.get("alice").unwrap().balance, 1_000);
        assert_eq!(fx.wallets.get("alice").unwrap().failed_pin_attempts, 1);
    }

    #[test]
    fn test_transfer_blocked_while_frozen() {
        let fx = fixture();

        fx.freeze.store(true, Ordering::SeqCst);
        assert!(matches!(
            fx.processor.transfer("alice", "bob", 100, "1234"),
            Err(WalletError::WalletFrozen { .. })
        ));
        fx.freeze.store(false, Ordering::SeqCst);

        fx.wallets
            .update("alice", |w| {
                w.frozen = true;
                Ok(())
            })
            .unwrap();
        assert!(matches!(
            fx.processor.transfer("alice", "bob", 100, "1234"),
            Err(WalletError::WalletFrozen { .. })
        ));
    }

    #[test]
    fn test_transfer_accrues_daily_spend_and_enforces_cap() {
        let fx = fixture();
        fx.wallets.mutate("alice", None, 99_000).unwrap();

        fx.processor.transfer("alice", "bob", 30_000, "1234").unwrap();
        assert_eq!(fx.wallets.get("alice").unwrap().daily_spent, 30_000);

        // 30 000 + 25 000 busts the 50 000 daily cap.
        let result = fx.processor.transfer("alice", "bob", 25_000, "1234");
        assert!(matches!(
            result,
            Err(WalletError::LimitExceeded { .. })
        ));

        // Next UTC day the window resets exactly once.
        fx.clock.advance(Duration::days(1));
        fx.processor.transfer("alice", "bob", 25_000, "1234").unwrap();
        assert_eq!(fx.wallets.get("alice").unwrap().daily_spent, 25_000);
    }

    #[test]
    fn test_transfer_per_transaction_cap() {
        let fx = fixture();
        fx.wallets.mutate("alice", None, 200_000).unwrap();
        let result = fx.processor.transfer("alice", "bob", 50_001, "1234");
        assert!(matches!(
            result,
            Err(WalletError::LimitExceeded {
                scope: crate::types::LimitScope::PerTransaction,
                ..
            })
        ));
    }

    #[test]
    fn test_concurrent_transfers_never_overdraw_payer() {
        use std::thread;

        let fx = fixture();
        fx.wallets.mutate("alice", None, -1_000).unwrap();
        fx.wallets.mutate("alice", None, 1_030).unwrap();
        // Alice holds 1030: enough for exactly one 1000+10... fee for 1000 is 10
        // (first tier boundary), so one transfer of 1000 costs 1010.

        let processor = Arc::new(fx.processor);
        let mut handles = vec![];
        for _ in 0..4 {
            let processor = Arc::clone(&processor);
            handles.push(thread::spawn(move || {
                processor.transfer("alice", "bob", 1_000, "1234").is_ok()
            }));
        }
        let succeeded = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(succeeded, 1);
        assert_eq!(fx.wallets.get("alice").unwrap().balance, 20);
        assert_eq!(fx.wallets.get("bob").unwrap().balance, 1_000);
    }
}
