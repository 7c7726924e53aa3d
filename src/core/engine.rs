//! Wallet engine facade
//!
//! `WalletEngine` is the composition point of the accounting core: it
//! owns the stores, the policy objects, and the processors, and exposes
//! the wallet API consumed by front-ends and gateway adapters. The
//! engine and its processors are the only writers of wallet balances
//! and ledger entries.

use crate::config::EngineConfig;
use crate::core::auth::{AuthorizationGuard, IssuedOtp, PendingAction};
use crate::core::clock::{Clock, SystemClock};
use crate::core::compensation::{CompensationManager, OutcomeDisposition};
use crate::core::ledger::LedgerEngine;
use crate::core::new_reference;
use crate::core::reconciler::{CreditOutcome, DedupeTable, ExternalReconciler};
use crate::core::transfer::{TransferProcessor, TransferReceipt};
use crate::core::wallet_store::WalletStore;
use crate::gateway::{NullDispatcher, PayoutDispatcher};
use crate::policy::{FeePolicy, LimitPolicy};
use crate::types::{
    Amount, GatewayEvent, LedgerEntry, PayoutOutcome, Reference, Wallet, WalletClass,
    WalletError, WithdrawalState,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Fee quote for a withdrawal, computed without mutating anything
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawQuote {
    /// Requested payout amount
    pub amount: Amount,

    /// Fee that would be charged
    pub fee: Amount,

    /// Total debit (`amount + fee`)
    pub total: Amount,

    /// Current wallet balance
    pub balance: Amount,
}

/// Receipt for a queued withdrawal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawReceipt {
    /// Reference shared by the withdrawal's entry-set
    pub reference: Reference,

    /// Wallet balance after the debit
    pub new_balance: Amount,
}

/// The accounting core's composition point and public API
pub struct WalletEngine {
    wallets: Arc<WalletStore>,
    ledger: Arc<LedgerEngine>,
    dedupe: Arc<DedupeTable>,
    auth: Arc<AuthorizationGuard>,
    fees: FeePolicy,
    limits: LimitPolicy,
    transfer: TransferProcessor,
    reconciler: ExternalReconciler,
    compensation: CompensationManager,
    dispatcher: Arc<dyn PayoutDispatcher>,
    clock: Arc<dyn Clock>,
    global_freeze: Arc<AtomicBool>,
    platform_wallet: String,
}

impl WalletEngine {
    /// Create an engine with the system clock and a no-op payout dispatcher
    ///
    /// # Errors
    ///
    /// Returns a validation error for an inconsistent configuration.
    pub fn new(config: EngineConfig) -> Result<Self, WalletError> {
        Self::with_parts(config, Arc::new(SystemClock), Arc::new(NullDispatcher))
    }

    /// Create an engine with explicit clock and payout dispatcher
    ///
    /// # Errors
    ///
    /// Returns a validation error for an inconsistent configuration.
    pub fn with_parts(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        dispatcher: Arc<dyn PayoutDispatcher>,
    ) -> Result<Self, WalletError> {
        config.validate()?;

        let wallets = Arc::new(WalletStore::new());
        let ledger = Arc::new(LedgerEngine::new());
        let dedupe = Arc::new(DedupeTable::new());
        let auth = Arc::new(AuthorizationGuard::new(config.auth));
        let fees = FeePolicy::new(config.fees.clone());
        let limits = LimitPolicy::new(config.limits);
        let global_freeze = Arc::new(AtomicBool::new(false));

        let transfer = TransferProcessor::new(
            Arc::clone(&wallets),
            Arc::clone(&ledger),
            Arc::clone(&auth),
            fees.clone(),
            limits.clone(),
            Arc::clone(&clock),
            config.platform_wallet.clone(),
            Arc::clone(&global_freeze),
        );
        let reconciler = ExternalReconciler::new(
            Arc::clone(&wallets),
            Arc::clone(&ledger),
            Arc::clone(&dedupe),
            Arc::clone(&clock),
        );
        let compensation = CompensationManager::new(
            Arc::clone(&wallets),
            Arc::clone(&ledger),
            Arc::clone(&clock),
            config.platform_wallet.clone(),
        );

        Ok(WalletEngine {
            wallets,
            ledger,
            dedupe,
            auth,
            fees,
            limits,
            transfer,
            reconciler,
            compensation,
            dispatcher,
            clock,
            global_freeze,
            platform_wallet: config.platform_wallet,
        })
    }

    /// Create a wallet explicitly; idempotent for an existing id
    ///
    /// # Errors
    ///
    /// `Validation` for an empty id.
    pub fn create_wallet(&self, id: &str, class: WalletClass) -> Result<Wallet, WalletError> {
        if id.is_empty() {
            return Err(WalletError::validation("wallet id must not be empty"));
        }
        Ok(self.wallets.get_or_create(id, class, self.clock.as_ref()))
    }

    /// Current balance of a wallet
    ///
    /// # Errors
    ///
    /// `WalletNotFound`
    pub fn get_balance(&self, id: &str) -> Result<Amount, WalletError> {
        self.wallets
            .get(id)
            .map(|w| w.balance)
            .ok_or_else(|| WalletError::wallet_not_found(id))
    }

    /// Set (or replace) a wallet's PIN, storing only its digest
    ///
    /// # Errors
    ///
    /// `WalletNotFound`; `Validation` if the PIN is not 4-8 digits.
    pub fn set_pin(&self, id: &str, pin: &str) -> Result<(), WalletError> {
        if pin.len() < 4 || pin.len() > 8 || !pin.chars().all(|c| c.is_ascii_digit()) {
            return Err(WalletError::validation("PIN must be 4-8 digits"));
        }
        let digest = crate::core::auth::digest_secret(pin);
        self.wallets.update(id, |w| {
            w.pin_hash = Some(digest.clone());
            w.failed_pin_attempts = 0;
            w.pin_locked_until = None;
            Ok(())
        })?;
        Ok(())
    }

    /// Toggle the platform-wide freeze; blocks all transfers/withdrawals
    pub fn set_global_freeze(&self, frozen: bool) {
        self.global_freeze.store(frozen, Ordering::SeqCst);
        info!(frozen, "global freeze toggled");
    }

    /// Whether the platform-wide freeze is active
    pub fn is_globally_frozen(&self) -> bool {
        self.global_freeze.load(Ordering::SeqCst)
    }

    /// Freeze or unfreeze a single wallet
    ///
    /// # Errors
    ///
    /// `WalletNotFound`
    pub fn set_wallet_freeze(&self, id: &str, frozen: bool) -> Result<(), WalletError> {
        self.wallets.update(id, |w| {
            w.frozen = frozen;
            Ok(())
        })?;
        Ok(())
    }

    /// Internal transfer: payer → payee with the platform fee
    ///
    /// See [`TransferProcessor::transfer`] for the precondition order
    /// and compensation guarantees.
    pub fn transfer(
        &self,
        payer_id: &str,
        payee_id: &str,
        amount: Amount,
        pin: &str,
    ) -> Result<TransferReceipt, WalletError> {
        self.transfer.transfer(payer_id, payee_id, amount, pin)
    }

    /// Quote a withdrawal without mutating anything
    ///
    /// # Errors
    ///
    /// The same precondition errors the real withdrawal would hit:
    /// `WalletNotFound`, `WalletFrozen`, `LimitExceeded`,
    /// `InsufficientFunds`.
    pub fn withdraw_preview(&self, id: &str, amount: Amount) -> Result<WithdrawQuote, WalletError> {
        if amount == 0 {
            return Err(WalletError::validation("withdrawal amount must be positive"));
        }
        let wallet = self
            .wallets
            .get(id)
            .ok_or_else(|| WalletError::wallet_not_found(id))?;

        self.limits
            .check_frozen(&wallet, self.is_globally_frozen())?;
        self.limits.check_min_withdrawal(id, amount)?;
        self.limits.check_per_transaction(id, amount)?;
        self.limits.check_daily(&wallet, amount, self.clock.now())?;

        let fee = self.fees.compute(amount, wallet.class);
        let total = amount
            .checked_add(fee)
            .ok_or_else(|| WalletError::arithmetic_overflow("withdrawal", id))?;
        if wallet.balance < total {
            return Err(WalletError::insufficient_funds(id, wallet.balance, total));
        }

        Ok(WithdrawQuote {
            amount,
            fee,
            total,
            balance: wallet.balance,
        })
    }

    /// First withdrawal leg: verify the PIN and issue a one-shot OTP
    ///
    /// All preconditions are checked now so the owner is not asked to
    /// confirm an operation that cannot succeed. The OTP is returned for
    /// out-of-band delivery; only its digest is stored.
    ///
    /// # Errors
    ///
    /// `Validation`, `WalletNotFound`, `WalletFrozen`, `PinLocked`,
    /// `InvalidPin`, `PinNotSet`, `LimitExceeded`, `InsufficientFunds`
    pub fn request_withdraw_otp(
        &self,
        id: &str,
        amount: Amount,
        pin: &str,
    ) -> Result<IssuedOtp, WalletError> {
        if amount == 0 {
            return Err(WalletError::validation("withdrawal amount must be positive"));
        }
        if !self.wallets.contains(id) {
            return Err(WalletError::wallet_not_found(id));
        }

        let lock_set = self.wallets.lock_set(&[id]);
        let _guards = lock_set.guards();

        let wallet = self
            .wallets
            .get(id)
            .ok_or_else(|| WalletError::wallet_not_found(id))?;
        self.limits
            .check_frozen(&wallet, self.is_globally_frozen())?;
        self.auth
            .verify_pin(&self.wallets, id, pin, self.clock.as_ref())?;

        self.limits.check_min_withdrawal(id, amount)?;
        self.limits.check_per_transaction(id, amount)?;
        self.limits.check_daily(&wallet, amount, self.clock.now())?;

        let fee = self.fees.compute(amount, wallet.class);
        let total = amount
            .checked_add(fee)
            .ok_or_else(|| WalletError::arithmetic_overflow("withdrawal", id))?;
        if wallet.balance < total {
            return Err(WalletError::insufficient_funds(id, wallet.balance, total));
        }

        let issued = self
            .auth
            .issue_otp(id, PendingAction::Withdraw { amount, fee }, self.clock.as_ref());
        info!(wallet = id, amount, fee, "withdrawal OTP issued");
        Ok(issued)
    }

    /// Second withdrawal leg: redeem the OTP, debit, and dispatch
    ///
    /// Re-checks freeze, daily cap, and balance under the wallet's lock
    /// (state may have moved since the OTP was issued), debits
    /// `amount + fee` with the entry-set at QUEUED, accrues the daily
    /// spend, and hands the payout to the dispatcher fire-and-forget.
    /// The outcome arrives later through [`WalletEngine::on_payout_outcome`].
    ///
    /// # Errors
    ///
    /// `OtpNotRequested`, `OtpExpired`, `OtpInvalid`, `WalletFrozen`,
    /// `LimitExceeded`, `InsufficientFunds`
    pub fn confirm_withdraw(&self, id: &str, otp: &str) -> Result<WithdrawReceipt, WalletError> {
        let PendingAction::Withdraw { amount, fee } =
            self.auth.confirm_otp(id, otp, self.clock.as_ref())?;

        let reference = new_reference("WDR");
        let new_balance;
        {
            let lock_set = self.wallets.lock_set(&[id]);
            let _guards = lock_set.guards();

            let wallet = self
                .wallets
                .get(id)
                .ok_or_else(|| WalletError::wallet_not_found(id))?;
            self.limits
                .check_frozen(&wallet, self.is_globally_frozen())?;
            let now = self.clock.now();
            self.limits.check_daily(&wallet, amount, now)?;

            new_balance = self
                .compensation
                .queue_withdrawal(id, amount, fee, &reference)?;

            self.wallets.update(id, |w| {
                if LimitPolicy::window_lapsed(w, now) {
                    w.daily_spent = 0;
                    w.daily_window_start = now;
                }
                w.daily_spent = w.daily_spent.saturating_add(amount);
                Ok(())
            })?;
        }

        self.dispatcher.dispatch(&reference, id, amount);

        Ok(WithdrawReceipt {
            reference,
            new_balance,
        })
    }

    /// Reconcile one inbound collection event (at-most-once credit)
    pub fn on_collection_event(&self, event: &GatewayEvent) -> Result<CreditOutcome, WalletError> {
        self.reconciler.process(event)
    }

    /// Settle the asynchronous outcome of a dispatched payout
    pub fn on_payout_outcome(
        &self,
        outcome: &PayoutOutcome,
    ) -> Result<OutcomeDisposition, WalletError> {
        self.compensation.on_payout_outcome(outcome)
    }

    /// A wallet's ledger entries in creation order (its audit trail)
    pub fn wallet_history(&self, id: &str) -> Vec<LedgerEntry> {
        self.ledger.wallet_entries(id)
    }

    /// Withdrawal lifecycle for a reference, as recorded in the ledger
    pub fn withdrawal_state(&self, reference: &str) -> Option<WithdrawalState> {
        self.compensation.withdrawal_state(reference)
    }

    /// Whether a live OTP authorization is pending for the wallet
    pub fn has_pending_authorization(&self, id: &str) -> bool {
        self.auth.has_pending(id, self.clock.as_ref())
    }

    /// Verify the ledger-replay invariant for one wallet
    ///
    /// Replays the wallet's entry stream and compares the signed sum
    /// with the stored balance.
    ///
    /// # Errors
    ///
    /// `WalletNotFound`
    pub fn audit_wallet(&self, id: &str) -> Result<bool, WalletError> {
        let wallet = self
            .wallets
            .get(id)
            .ok_or_else(|| WalletError::wallet_not_found(id))?;
        Ok(self.ledger.replay(id) == wallet.balance as i64)
    }

    /// Snapshots of every wallet, sorted by id
    pub fn wallets_snapshot(&self) -> Vec<Wallet> {
        self.wallets.all()
    }

    /// The ledger, for audit queries
    pub fn ledger(&self) -> &LedgerEngine {
        &self.ledger
    }

    /// The dedupe table, for reconciliation inspection
    pub fn dedupe(&self) -> &DedupeTable {
        &self.dedupe
    }

    /// Id of the platform fee wallet
    pub fn platform_wallet(&self) -> &str {
        &self.platform_wallet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::types::Direction;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Mutex;

    /// Dispatcher that records every payout request for assertions
    #[derive(Default)]
    struct RecordingDispatcher {
        requests: Mutex<Vec<(String, String, Amount)>>,
    }

    impl PayoutDispatcher for RecordingDispatcher {
        fn dispatch(&self, reference: &str, wallet_id: &str, amount: Amount) {
            self.requests
                .lock()
                .unwrap()
                .push((reference.to_string(), wallet_id.to_string(), amount));
        }
    }

    struct Fixture {
        engine: WalletEngine,
        clock: Arc<ManualClock>,
        dispatcher: Arc<RecordingDispatcher>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let engine = WalletEngine::with_parts(
            EngineConfig::default(),
            clock.clone(),
            dispatcher.clone(),
        )
        .unwrap();
        Fixture {
            engine,
            clock,
            dispatcher,
        }
    }

    fn funded(fx: &Fixture, id: &str, amount: Amount) {
        fx.engine.create_wallet(id, WalletClass::User).unwrap();
        fx.engine.set_pin(id, "1234").unwrap();
        fx.engine
            .on_collection_event(&GatewayEvent {
                gateway: "MPESA".to_string(),
                external_ref: format!("SEED-{}", id),
                wallet_id: id.to_string(),
                amount,
                direction: Direction::Credit,
            })
            .unwrap();
    }

    #[test]
    fn test_create_wallet_and_balance() {
        let fx = fixture();
        let wallet = fx.engine.create_wallet("alice", WalletClass::User).unwrap();
        assert_eq!(wallet.balance, 0);
        assert_eq!(fx.engine.get_balance("alice").unwrap(), 0);
        assert!(matches!(
            fx.engine.get_balance("ghost"),
            Err(WalletError::WalletNotFound { .. })
        ));
        assert!(fx.engine.create_wallet("", WalletClass::User).is_err());
    }

    #[test]
    fn test_set_pin_validation() {
        let fx = fixture();
        fx.engine.create_wallet("alice", WalletClass::User).unwrap();
        assert!(fx.engine.set_pin("alice", "123").is_err());
        assert!(fx.engine.set_pin("alice", "123456789").is_err());
        assert!(fx.engine.set_pin("alice", "12ab").is_err());
        assert!(fx.engine.set_pin("alice", "1234").is_ok());

        // The raw PIN never lands in state.
        let wallet = fx.engine.wallets_snapshot().remove(0);
        assert!(!wallet.pin_hash.unwrap().contains("1234"));
    }

    #[test]
    fn test_withdraw_preview_quotes_without_mutating() {
        let fx = fixture();
        funded(&fx, "alice", 1_000);

        let quote = fx.engine.withdraw_preview("alice", 300).unwrap();
        assert_eq!(quote.fee, 10);
        assert_eq!(quote.total, 310);
        assert_eq!(quote.balance, 1_000);
        assert_eq!(fx.engine.get_balance("alice").unwrap(), 1_000);

        assert!(matches!(
            fx.engine.withdraw_preview("alice", 5),
            Err(WalletError::LimitExceeded { .. })
        ));
        assert!(matches!(
            fx.engine.withdraw_preview("alice", 2_000),
            Err(WalletError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_full_withdrawal_flow_success() {
        let fx = fixture();
        funded(&fx, "alice", 1_000);

        let issued = fx.engine.request_withdraw_otp("alice", 300, "1234").unwrap();
        assert!(fx.engine.has_pending_authorization("alice"));

        let receipt = fx.engine.confirm_withdraw("alice", &issued.code).unwrap();
        assert_eq!(receipt.new_balance, 690);
        assert_eq!(
            fx.engine.withdrawal_state(&receipt.reference),
            Some(WithdrawalState::Queued)
        );

        // The payout was dispatched fire-and-forget.
        {
            let requests = fx.dispatcher.requests.lock().unwrap();
            assert_eq!(requests.len(), 1);
            assert_eq!(requests[0].0, receipt.reference);
            assert_eq!(requests[0].2, 300);
        }

        // Rail confirms: debit finalizes, fee lands on the platform wallet.
        fx.engine
            .on_payout_outcome(&PayoutOutcome {
                reference: receipt.reference.clone(),
                success: true,
                amount: Some(300),
                reason: None,
            })
            .unwrap();
        assert_eq!(
            fx.engine.withdrawal_state(&receipt.reference),
            Some(WithdrawalState::Completed)
        );
        assert_eq!(fx.engine.get_balance("platform").unwrap(), 10);
        assert!(fx.engine.audit_wallet("alice").unwrap());
        assert!(fx.engine.audit_wallet("platform").unwrap());
    }

    #[test]
    fn test_full_withdrawal_flow_failure_restores_balance() {
        let fx = fixture();
        funded(&fx, "alice", 1_000);

        let issued = fx.engine.request_withdraw_otp("alice", 300, "1234").unwrap();
        let receipt = fx.engine.confirm_withdraw("alice", &issued.code).unwrap();
        assert_eq!(receipt.new_balance, 690);

        fx.engine
            .on_payout_outcome(&PayoutOutcome {
                reference: receipt.reference.clone(),
                success: false,
                amount: None,
                reason: Some("rail timeout".to_string()),
            })
            .unwrap();

        assert_eq!(fx.engine.get_balance("alice").unwrap(), 1_000);
        assert_eq!(
            fx.engine.withdrawal_state(&receipt.reference),
            Some(WithdrawalState::Reversed)
        );
        assert!(fx.engine.audit_wallet("alice").unwrap());
    }

    #[test]
    fn test_expired_otp_rejected_then_fresh_one_succeeds() {
        let fx = fixture();
        funded(&fx, "alice", 1_000);

        let stale = fx.engine.request_withdraw_otp("alice", 300, "1234").unwrap();
        fx.clock.advance(Duration::seconds(121));

        assert!(matches!(
            fx.engine.confirm_withdraw("alice", &stale.code),
            Err(WalletError::OtpExpired { .. })
        ));
        assert_eq!(fx.engine.get_balance("alice").unwrap(), 1_000);

        let fresh = fx.engine.request_withdraw_otp("alice", 300, "1234").unwrap();
        assert!(fx.engine.confirm_withdraw("alice", &fresh.code).is_ok());
    }

    #[test]
    fn test_global_freeze_blocks_debits_not_reads() {
        let fx = fixture();
        funded(&fx, "alice", 1_000);

        fx.engine.set_global_freeze(true);
        assert!(matches!(
            fx.engine.request_withdraw_otp("alice", 300, "1234"),
            Err(WalletError::WalletFrozen { .. })
        ));
        assert!(matches!(
            fx.engine.transfer("alice", "bob", 100, "1234"),
            Err(WalletError::WalletFrozen { .. })
        ));

        // Reads and inbound credits still work.
        assert_eq!(fx.engine.get_balance("alice").unwrap(), 1_000);
        fx.engine
            .on_collection_event(&GatewayEvent {
                gateway: "MPESA".to_string(),
                external_ref: "X9".to_string(),
                wallet_id: "alice".to_string(),
                amount: 50,
                direction: Direction::Credit,
            })
            .unwrap();
        assert_eq!(fx.engine.get_balance("alice").unwrap(), 1_050);

        fx.engine.set_global_freeze(false);
        assert!(fx.engine.request_withdraw_otp("alice", 300, "1234").is_ok());
    }

    #[test]
    fn test_confirm_without_request_is_rejected() {
        let fx = fixture();
        funded(&fx, "alice", 1_000);
        assert!(matches!(
            fx.engine.confirm_withdraw("alice", "123456"),
            Err(WalletError::OtpNotRequested { .. })
        ));
    }

    #[test]
    fn test_withdrawal_accrues_daily_spend() {
        let fx = fixture();
        funded(&fx, "alice", 60_000);

        let issued = fx
            .engine
            .request_withdraw_otp("alice", 30_000, "1234")
            .unwrap();
        fx.engine.confirm_withdraw("alice", &issued.code).unwrap();

        // 30 000 spent today; another 25 000 busts the 50 000 cap.
        assert!(matches!(
            fx.engine.request_withdraw_otp("alice", 25_000, "1234"),
            Err(WalletError::LimitExceeded { .. })
        ));
    }

    #[test]
    fn test_wallet_history_and_audit() {
        let fx = fixture();
        funded(&fx, "alice", 1_000);
        fx.engine.transfer("alice", "bob", 200, "1234").unwrap();

        let history = fx.engine.wallet_history("alice");
        assert_eq!(history.len(), 3); // TOPUP, TRANSFER_OUT, FEE
        assert!(fx.engine.audit_wallet("alice").unwrap());
        assert!(fx.engine.audit_wallet("bob").unwrap());
        assert!(fx.engine.audit_wallet("platform").unwrap());
    }
}
