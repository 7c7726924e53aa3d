//! Withdrawal debits and payout outcome compensation
//!
//! A withdrawal debits the wallet first (WITHDRAW and FEE entries at
//! QUEUED) and only then is the payout dispatched to the external rail.
//! The `CompensationManager` settles the later asynchronous outcome:
//! success finalizes the debit and credits the fee to the platform
//! wallet; failure refunds amount plus fee and documents it with a
//! REVERSAL entry. Both branches are keyed by the withdrawal's
//! reference and are idempotent for already-terminal entries.

use crate::core::clock::Clock;
use crate::core::ledger::{EntryDraft, LedgerEngine};
use crate::core::wallet_store::WalletStore;
use crate::types::{
    Amount, EntryKind, EntryStatus, LedgerEntry, PayoutOutcome, WalletClass, WalletError,
    WalletId, WithdrawalState,
};
use std::sync::Arc;
use tracing::{info, warn};

/// How a payout outcome was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeDisposition {
    /// The queued debit was finalized
    Completed,

    /// The queued debit was refunded
    Reversed,

    /// The withdrawal was already terminal; nothing changed
    AlreadySettled,
}

/// Applies payout debits and their asynchronous outcomes
pub struct CompensationManager {
    wallets: Arc<WalletStore>,
    ledger: Arc<LedgerEngine>,
    clock: Arc<dyn Clock>,
    platform_wallet: WalletId,
}

impl CompensationManager {
    /// Create a compensation manager over shared engine components
    pub fn new(
        wallets: Arc<WalletStore>,
        ledger: Arc<LedgerEngine>,
        clock: Arc<dyn Clock>,
        platform_wallet: WalletId,
    ) -> Self {
        CompensationManager {
            wallets,
            ledger,
            clock,
            platform_wallet,
        }
    }

    /// Debit `amount + fee` and queue the withdrawal under `reference`
    ///
    /// Writes the WITHDRAW and FEE entries ahead (PENDING), applies the
    /// debit all-or-nothing, then flips both entries to QUEUED. Must be
    /// called while the caller holds the wallet's serialization lock;
    /// the engine facade re-checks freeze/balance preconditions under
    /// the same lock before calling in.
    ///
    /// # Returns
    ///
    /// The wallet balance after the debit.
    ///
    /// # Errors
    ///
    /// `WalletNotFound`, `InsufficientFunds`, `ArithmeticOverflow`; on
    /// error the pending entries flip to FAILED and nothing is debited.
    pub fn queue_withdrawal(
        &self,
        wallet_id: &str,
        amount: Amount,
        fee: Amount,
        reference: &str,
    ) -> Result<Amount, WalletError> {
        let wallet = self
            .wallets
            .get(wallet_id)
            .ok_or_else(|| WalletError::wallet_not_found(wallet_id))?;
        let total = amount
            .checked_add(fee)
            .ok_or_else(|| WalletError::arithmetic_overflow("withdrawal", wallet_id))?;

        let clock = self.clock.as_ref();
        let withdraw_entry = self.ledger.append(
            EntryDraft {
                wallet_id: wallet_id.to_string(),
                kind: EntryKind::Withdraw,
                amount,
                reference: reference.to_string(),
                balance_before: wallet.balance,
                balance_after: wallet.balance.saturating_sub(amount),
                status: EntryStatus::Pending,
                gateway: None,
                external_ref: None,
            },
            clock,
        );
        let fee_entry = (fee > 0).then(|| {
            self.ledger.append(
                EntryDraft {
                    wallet_id: wallet_id.to_string(),
                    kind: EntryKind::Fee,
                    amount: fee,
                    reference: reference.to_string(),
                    balance_before: wallet.balance.saturating_sub(amount),
                    balance_after: wallet.balance.saturating_sub(total),
                    status: EntryStatus::Pending,
                    gateway: None,
                    external_ref: None,
                },
                clock,
            )
        });

        match self
            .wallets
            .mutate(wallet_id, Some(wallet.version), -(total as i64))
        {
            Ok(committed) => {
                self.ledger.mark(withdraw_entry, EntryStatus::Queued)?;
                if let Some(fee_entry) = fee_entry {
                    self.ledger.mark(fee_entry, EntryStatus::Queued)?;
                }
                info!(
                    reference,
                    wallet = wallet_id,
                    amount,
                    fee,
                    "withdrawal debited and queued"
                );
                Ok(committed.balance)
            }
            Err(e) => {
                if let Err(mark_err) = self.ledger.mark(withdraw_entry, EntryStatus::Failed) {
                    warn!(entry = withdraw_entry, error = %mark_err, "could not fail entry");
                }
                if let Some(fee_entry) = fee_entry {
                    if let Err(mark_err) = self.ledger.mark(fee_entry, EntryStatus::Failed) {
                        warn!(entry = fee_entry, error = %mark_err, "could not fail entry");
                    }
                }
                Err(e)
            }
        }
    }

    /// Settle the asynchronous outcome of a dispatched payout
    ///
    /// Idempotent: a duplicate outcome for an already-terminal
    /// withdrawal returns `AlreadySettled` without touching anything.
    ///
    /// # Errors
    ///
    /// `ReconciliationConflict` if the reference names no queued
    /// withdrawal or the echoed amount disagrees with the queued debit;
    /// these are never auto-resolved.
    pub fn on_payout_outcome(
        &self,
        outcome: &PayoutOutcome,
    ) -> Result<OutcomeDisposition, WalletError> {
        let withdraw = self
            .find_withdraw_entry(&outcome.reference)
            .ok_or_else(|| {
                WalletError::reconciliation_conflict(
                    &outcome.reference,
                    "no withdrawal recorded for this reference",
                )
            })?;

        if let Some(echoed) = outcome.amount {
            if echoed != withdraw.amount {
                return Err(WalletError::reconciliation_conflict(
                    &outcome.reference,
                    format!(
                        "amount mismatch: rail reported {}, queued {}",
                        echoed, withdraw.amount
                    ),
                ));
            }
        }

        let wallet_id = withdraw.wallet_id.clone();
        let lock_set = self
            .wallets
            .lock_set(&[wallet_id.as_str(), self.platform_wallet.as_str()]);
        let _guards = lock_set.guards();

        // Re-read under the lock; a concurrent duplicate may have settled it.
        let withdraw = self
            .ledger
            .get(withdraw.id)
            .ok_or_else(|| {
                WalletError::reconciliation_conflict(&outcome.reference, "entry vanished")
            })?;
        if withdraw.status.is_terminal() {
            return Ok(OutcomeDisposition::AlreadySettled);
        }

        let fee_entry = self
            .ledger
            .find_by_reference(&outcome.reference)
            .into_iter()
            .find(|e| e.kind == EntryKind::Fee && e.wallet_id == wallet_id);
        let fee = fee_entry.as_ref().map(|e| e.amount).unwrap_or(0);

        if outcome.success {
            self.finalize(&withdraw, fee_entry.as_ref(), fee)?;
            Ok(OutcomeDisposition::Completed)
        } else {
            self.reverse(&withdraw, fee_entry.as_ref(), fee, outcome.reason.as_deref())?;
            Ok(OutcomeDisposition::Reversed)
        }
    }

    /// Withdrawal lifecycle as recorded in the ledger, if the debit exists
    pub fn withdrawal_state(&self, reference: &str) -> Option<WithdrawalState> {
        self.find_withdraw_entry(reference)
            .map(|entry| match entry.status {
                EntryStatus::Pending => WithdrawalState::Requested,
                EntryStatus::Queued => WithdrawalState::Queued,
                EntryStatus::Success => WithdrawalState::Completed,
                EntryStatus::Failed => WithdrawalState::Reversed,
            })
    }

    fn find_withdraw_entry(&self, reference: &str) -> Option<LedgerEntry> {
        self.ledger
            .find_by_reference(reference)
            .into_iter()
            .find(|e| e.kind == EntryKind::Withdraw)
    }

    /// Payout confirmed: finalize the debit, credit the fee to the platform
    fn finalize(
        &self,
        withdraw: &LedgerEntry,
        fee_entry: Option<&LedgerEntry>,
        fee: Amount,
    ) -> Result<(), WalletError> {
        self.ledger.mark(withdraw.id, EntryStatus::Success)?;
        if let Some(fee_entry) = fee_entry {
            self.ledger.mark(fee_entry.id, EntryStatus::Success)?;
        }

        let balance = self
            .wallets
            .get(&withdraw.wallet_id)
            .map(|w| w.balance)
            .unwrap_or(0);
        self.ledger.append(
            EntryDraft {
                wallet_id: withdraw.wallet_id.clone(),
                kind: EntryKind::WithdrawComplete,
                amount: withdraw.amount,
                reference: withdraw.reference.clone(),
                balance_before: balance,
                balance_after: balance,
                status: EntryStatus::Success,
                gateway: None,
                external_ref: None,
            },
            self.clock.as_ref(),
        );

        if fee > 0 {
            let platform = self.wallets.get_or_create(
                &self.platform_wallet,
                WalletClass::Platform,
                self.clock.as_ref(),
            );
            self.wallets
                .mutate(&self.platform_wallet, Some(platform.version), fee as i64)?;
            self.ledger.append(
                EntryDraft {
                    wallet_id: self.platform_wallet.clone(),
                    kind: EntryKind::TransferIn,
                    amount: fee,
                    reference: withdraw.reference.clone(),
                    balance_before: platform.balance,
                    balance_after: platform.balance + fee,
                    status: EntryStatus::Success,
                    gateway: None,
                    external_ref: None,
                },
                self.clock.as_ref(),
            );
        }

        info!(
            reference = withdraw.reference.as_str(),
            wallet = withdraw.wallet_id.as_str(),
            amount = withdraw.amount,
            "payout completed"
        );
        Ok(())
    }

    /// Payout failed: refund amount plus fee and flip the debit to FAILED
    fn reverse(
        &self,
        withdraw: &LedgerEntry,
        fee_entry: Option<&LedgerEntry>,
        fee: Amount,
        reason: Option<&str>,
    ) -> Result<(), WalletError> {
        let refund = withdraw.amount + fee;

        let restored = self.wallets.mutate(&withdraw.wallet_id, None, refund as i64)?;
        self.ledger.append(
            EntryDraft {
                wallet_id: withdraw.wallet_id.clone(),
                kind: EntryKind::Reversal,
                amount: refund,
                reference: withdraw.reference.clone(),
                balance_before: restored.balance - refund,
                balance_after: restored.balance,
                status: EntryStatus::Success,
                gateway: None,
                external_ref: None,
            },
            self.clock.as_ref(),
        );
        self.ledger.mark(withdraw.id, EntryStatus::Failed)?;
        if let Some(fee_entry) = fee_entry {
            self.ledger.mark(fee_entry.id, EntryStatus::Failed)?;
        }

        info!(
            reference = withdraw.reference.as_str(),
            wallet = withdraw.wallet_id.as_str(),
            refund,
            reason = reason.unwrap_or("unspecified"),
            "payout failed, debit reversed"
        );
        Ok(())
    }
}
