//! Thread-safe wallet state storage
//!
//! This module provides the `WalletStore`, which maintains all wallet
//! state using concurrent data structures so different wallets can be
//! touched in parallel while operations on the same wallet serialize.
//!
//! # Design
//!
//! Wallet state lives in a `DashMap` keyed by wallet id, giving
//! fine-grained per-entry locking for single-wallet mutations. On top of
//! that, the store hands out per-wallet lock handles: a logical
//! operation that spans several steps (or several wallets) holds the
//! handles for its whole duration, acquired in sorted id order so two
//! concurrent multi-wallet operations can never deadlock.
//!
//! # Mutation contract
//!
//! Every mutation is all-or-nothing: either balance and version both
//! advance, or nothing changes. A mutation that would drive the balance
//! below zero is rejected before any write, and a caller-supplied
//! expected version that is stale is rejected with `VersionConflict`.

use crate::core::clock::Clock;
use crate::types::{Amount, Wallet, WalletClass, WalletError, WalletId};
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Per-wallet lock handle
pub type WalletLock = Arc<Mutex<()>>;

/// Lock handles for one logical operation, in acquisition order
///
/// Obtained from [`WalletStore::lock_set`]; call [`WalletLockSet::guards`]
/// and keep the returned guards alive for the duration of the operation.
pub struct WalletLockSet {
    handles: Vec<WalletLock>,
}

impl WalletLockSet {
    /// Acquire every lock in the set, in the fixed global order
    pub fn guards(&self) -> Vec<MutexGuard<'_, ()>> {
        self.handles
            .iter()
            .map(|h| h.lock().unwrap_or_else(PoisonError::into_inner))
            .collect()
    }
}

/// Thread-safe store of all wallet state
///
/// The only writers of wallet balances are the transfer processor, the
/// external reconciler, and the compensation manager; everything else
/// reads snapshots.
#[derive(Debug, Default)]
pub struct WalletStore {
    /// Wallet state, sharded by wallet id
    wallets: DashMap<WalletId, Wallet>,

    /// Serialization domain per wallet; created lazily alongside the wallet
    locks: DashMap<WalletId, WalletLock>,
}

impl WalletStore {
    /// Create an empty store
    pub fn new() -> Self {
        WalletStore {
            wallets: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// Get a snapshot of a wallet, creating it lazily if absent
    ///
    /// Wallets are created on first reference and never deleted. The
    /// returned value is a snapshot; concurrent commits are not
    /// reflected in it. If the wallet already exists, `class` is
    /// ignored.
    pub fn get_or_create(&self, id: &str, class: WalletClass, clock: &dyn Clock) -> Wallet {
        self.wallets
            .entry(id.to_string())
            .or_insert_with(|| Wallet::new(id, class, clock.now()))
            .clone()
    }

    /// Get a snapshot of a wallet, if it exists
    pub fn get(&self, id: &str) -> Option<Wallet> {
        self.wallets.get(id).map(|w| w.clone())
    }

    /// Whether a wallet exists
    pub fn contains(&self, id: &str) -> bool {
        self.wallets.contains_key(id)
    }

    /// The serialization lock handle for one wallet
    pub fn lock_handle(&self, id: &str) -> WalletLock {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Collect the lock handles for several wallets in a fixed global order
    ///
    /// Ids are deduplicated and sorted before collection, so two
    /// concurrent operations over overlapping wallet sets always lock in
    /// the same order and cannot deadlock.
    pub fn lock_set(&self, ids: &[&str]) -> WalletLockSet {
        let mut sorted: Vec<&str> = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        WalletLockSet {
            handles: sorted.into_iter().map(|id| self.lock_handle(id)).collect(),
        }
    }

    /// Apply a signed balance delta to a wallet, all-or-nothing
    ///
    /// # Arguments
    ///
    /// * `id` - The wallet to mutate
    /// * `expected_version` - If `Some`, the mutation is rejected when the
    ///   stored version differs (optimistic concurrency)
    /// * `delta` - Signed balance change in minor units
    ///
    /// # Returns
    ///
    /// The committed wallet snapshot (version already bumped).
    ///
    /// # Errors
    ///
    /// - `WalletNotFound` if the wallet does not exist
    /// - `VersionConflict` if `expected_version` is stale
    /// - `InsufficientFunds` if the delta would drive the balance below zero
    /// - `ArithmeticOverflow` if the new balance does not fit
    pub fn mutate(
        &self,
        id: &str,
        expected_version: Option<u64>,
        delta: i64,
    ) -> Result<Wallet, WalletError> {
        let mut entry = self
            .wallets
            .get_mut(id)
            .ok_or_else(|| WalletError::wallet_not_found(id))?;
        let wallet = entry.value_mut();

        if let Some(expected) = expected_version {
            if wallet.version != expected {
                return Err(WalletError::version_conflict(id, expected, wallet.version));
            }
        }

        let new_balance = if delta >= 0 {
            wallet
                .balance
                .checked_add(delta as Amount)
                .ok_or_else(|| WalletError::arithmetic_overflow("credit", id))?
        } else {
            let debit = delta.unsigned_abs();
            if wallet.balance < debit {
                return Err(WalletError::insufficient_funds(id, wallet.balance, debit));
            }
            wallet.balance - debit
        };

        wallet.balance = new_balance;
        wallet.version += 1;
        Ok(wallet.clone())
    }

    /// Update non-balance wallet fields under the entry lock
    ///
    /// The closure receives the wallet mutably; if it returns an error,
    /// no version bump happens. On success the version is bumped, so
    /// credential and window updates also participate in optimistic
    /// concurrency.
    ///
    /// # Errors
    ///
    /// - `WalletNotFound` if the wallet does not exist
    /// - Whatever the closure returns
    pub fn update<F>(&self, id: &str, f: F) -> Result<Wallet, WalletError>
    where
        F: FnOnce(&mut Wallet) -> Result<(), WalletError>,
    {
        let mut entry = self
            .wallets
            .get_mut(id)
            .ok_or_else(|| WalletError::wallet_not_found(id))?;
        let wallet = entry.value_mut();
        f(wallet)?;
        wallet.version += 1;
        Ok(wallet.clone())
    }

    /// Snapshots of all wallets, sorted by id for deterministic output
    pub fn all(&self) -> Vec<Wallet> {
        let mut wallets: Vec<Wallet> = self.wallets.iter().map(|e| e.value().clone()).collect();
        wallets.sort_by(|a, b| a.id.cmp(&b.id));
        wallets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::SystemClock;

    fn store_with(id: &str, balance: Amount) -> WalletStore {
        let store = WalletStore::new();
        store.get_or_create(id, WalletClass::User, &SystemClock);
        if balance > 0 {
            store.mutate(id, None, balance as i64).unwrap();
        }
        store
    }

    #[test]
    fn test_get_or_create_is_lazy_and_idempotent() {
        let store = WalletStore::new();
        let wallet = store.get_or_create("w1", WalletClass::User, &SystemClock);
        assert_eq!(wallet.balance, 0);
        assert_eq!(wallet.version, 0);

        store.mutate("w1", None, 100).unwrap();
        let again = store.get_or_create("w1", WalletClass::Business, &SystemClock);
        // Existing wallet wins; the class of the second call is ignored.
        assert_eq!(again.class, WalletClass::User);
        assert_eq!(again.balance, 100);
    }

    #[test]
    fn test_mutate_credits_and_bumps_version() {
        let store = store_with("w1", 0);
        let wallet = store.mutate("w1", None, 500).unwrap();
        assert_eq!(wallet.balance, 500);
        assert_eq!(wallet.version, 1);
    }

    #[test]
    fn test_mutate_rejects_overdraft_without_writing() {
        let store = store_with("w1", 100);
        let before = store.get("w1").unwrap();

        let result = store.mutate("w1", None, -101);
        assert!(matches!(
            result,
            Err(WalletError::InsufficientFunds {
                balance: 100,
                requested: 101,
                ..
            })
        ));

        let after = store.get("w1").unwrap();
        assert_eq!(after, before);
    }

    #[test]
    fn test_mutate_rejects_stale_version() {
        let store = store_with("w1", 100);
        let snapshot = store.get("w1").unwrap();

        // A concurrent commit bumps the version.
        store.mutate("w1", None, 50).unwrap();

        let result = store.mutate("w1", Some(snapshot.version), -10);
        assert!(matches!(result, Err(WalletError::VersionConflict { .. })));
        assert_eq!(store.get("w1").unwrap().balance, 150);
    }

    #[test]
    fn test_mutate_with_current_version_succeeds() {
        let store = store_with("w1", 100);
        let snapshot = store.get("w1").unwrap();
        let wallet = store.mutate("w1", Some(snapshot.version), -40).unwrap();
        assert_eq!(wallet.balance, 60);
        assert_eq!(wallet.version, snapshot.version + 1);
    }

    #[test]
    fn test_mutate_unknown_wallet() {
        let store = WalletStore::new();
        assert!(matches!(
            store.mutate("ghost", None, 1),
            Err(WalletError::WalletNotFound { .. })
        ));
    }

    #[test]
    fn test_update_bumps_version_only_on_success() {
        let store = store_with("w1", 0);

        let err = store.update("w1", |_| Err(WalletError::validation("no")));
        assert!(err.is_err());
        assert_eq!(store.get("w1").unwrap().version, 0);

        store
            .update("w1", |w| {
                w.frozen = true;
                Ok(())
            })
            .unwrap();
        let wallet = store.get("w1").unwrap();
        assert!(wallet.frozen);
        assert_eq!(wallet.version, 1);
    }

    #[test]
    fn test_all_is_sorted_by_id() {
        let store = WalletStore::new();
        for id in ["charlie", "alice", "bob"] {
            store.get_or_create(id, WalletClass::User, &SystemClock);
        }
        let ids: Vec<String> = store.all().into_iter().map(|w| w.id).collect();
        assert_eq!(ids, vec!["alice", "bob", "charlie"]);
    }

    #[test]
    fn test_lock_set_dedups_overlapping_ids() {
        let store = WalletStore::new();
        let set = store.lock_set(&["b", "a", "b"]);
        let guards = set.guards();
        assert_eq!(guards.len(), 2);
    }

    #[test]
    fn test_concurrent_debits_never_overdraw() {
        use std::thread;

        let store = Arc::new(store_with("w1", 1_000));
        let mut handles = vec![];

        // 20 threads each try to debit 100; only 10 can succeed.
        for _ in 0..20 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                let set = store.lock_set(&["w1"]);
                let _guards = set.guards();
                store.mutate("w1", None, -100).is_ok()
            }));
        }

        let succeeded = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(succeeded, 10);
        assert_eq!(store.get("w1").unwrap().balance, 0);
    }

    #[test]
    fn test_concurrent_credits_all_apply() {
        use std::thread;

        let store = Arc::new(store_with("w1", 0));
        let mut handles = vec![];

        for _ in 0..50 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                store.mutate("w1", None, 10).unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let wallet = store.get("w1").unwrap();
        assert_eq!(wallet.balance, 500);
        assert_eq!(wallet.version, 50);
    }
}
