//! Gateway boundary
//!
//! Two contracts connect the core to the external payment rails:
//!
//! - **Inbound**: the [`CollectionIngestor`] accepts normalized
//!   collection events and acknowledges immediately, regardless of
//!   reconciliation outcome, since the rail would otherwise retry-storm.
//!   Actual reconciliation runs out-of-band on a worker task; transient
//!   failures are retried on a backoff schedule and terminal failures
//!   are escalated for operator review, never silently dropped.
//! - **Outbound**: the [`PayoutDispatcher`] trait is the fire-and-forget
//!   hand-off of a queued withdrawal to the payout rail; the outcome
//!   arrives later through `WalletEngine::on_payout_outcome`.

use crate::core::engine::WalletEngine;
use crate::types::{Amount, GatewayEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Fire-and-forget hand-off of a payout to the external rail
///
/// Implementations enqueue the request and return immediately; the only
/// long-latency leg of the system is explicitly asynchronous.
pub trait PayoutDispatcher: Send + Sync {
    /// Dispatch a queued withdrawal to the rail
    fn dispatch(&self, reference: &str, wallet_id: &str, amount: Amount);
}

/// Dispatcher that only logs; useful until a real rail adapter is wired
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDispatcher;

impl PayoutDispatcher for NullDispatcher {
    fn dispatch(&self, reference: &str, wallet_id: &str, amount: Amount) {
        debug!(reference, wallet = wallet_id, amount, "payout dispatch (no-op)");
    }
}

/// Ingestion worker configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestConfig {
    /// Attempts per event before escalating
    pub max_attempts: u32,

    /// Base backoff between attempts, doubled per retry
    pub base_backoff_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            max_attempts: 5,
            base_backoff_ms: 50,
        }
    }
}

/// Ack-fast inbound collection queue
///
/// [`CollectionIngestor::enqueue`] never rejects: the rail is always
/// told "received" within a bounded time, and reconciliation happens on
/// the worker task. Ordering between unrelated events is irrelevant;
/// a withdrawal's outcome is correlated by reference, not by arrival
/// order.
pub struct CollectionIngestor {
    tx: mpsc::UnboundedSender<GatewayEvent>,
    worker: JoinHandle<()>,
}

impl CollectionIngestor {
    /// Spawn the ingestion worker on the current tokio runtime
    pub fn spawn(engine: Arc<WalletEngine>, config: IngestConfig) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<GatewayEvent>();
        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                reconcile_with_retry(&engine, &event, config).await;
            }
        });
        CollectionIngestor { tx, worker }
    }

    /// Accept a collection event; always acknowledges
    ///
    /// Internal failures are retried by the worker and escalated if
    /// unresolvable; they are never surfaced as a rejection of the
    /// rail's notification.
    pub fn enqueue(&self, event: GatewayEvent) {
        if self.tx.send(event).is_err() {
            // Ack already given; losing the worker is an operational fault.
            error!("ingestion worker is gone; event dropped after acknowledgment");
        }
    }

    /// Drain the queue and stop the worker
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            warn!(error = %e, "ingestion worker did not shut down cleanly");
        }
    }
}

/// Process one event, retrying transient failures with backoff
async fn reconcile_with_retry(engine: &WalletEngine, event: &GatewayEvent, config: IngestConfig) {
    let mut attempt: u32 = 0;
    loop {
        match engine.on_collection_event(event) {
            Ok(_) => return,
            Err(e) if e.is_retryable() && attempt + 1 < config.max_attempts => {
                attempt += 1;
                let backoff = config.base_backoff_ms.saturating_mul(1u64 << attempt.min(10));
                debug!(
                    gateway = event.gateway.as_str(),
                    external_ref = event.external_ref.as_str(),
                    attempt,
                    backoff_ms = backoff,
                    error = %e,
                    "reconciliation retry"
                );
                tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
            }
            Err(e) => {
                // Terminally unresolvable: escalate for manual review.
                error!(
                    gateway = event.gateway.as_str(),
                    external_ref = event.external_ref.as_str(),
                    wallet = event.wallet_id.as_str(),
                    amount = event.amount,
                    error = %e,
                    "reconciliation conflict, operator intervention required"
                );
                return;
            }
        }
    }
}
