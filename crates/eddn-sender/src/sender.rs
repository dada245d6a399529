use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use eddn_core::{EntryId, Header, OutboundPayload, RelayConfig};
use eddn_store::{QueueRepo, StoreError};

use crate::backoff::RetryPolicy;
use crate::endpoint::Endpoint;
use crate::worker;

/// Delivery counters. Monotonic over the sender's lifetime; read by tests
/// and periodically exported as metrics.
#[derive(Debug, Default)]
pub struct SenderStats {
    pub(crate) submitted: AtomicU64,
    pub(crate) delivered: AtomicU64,
    pub(crate) retried: AtomicU64,
    pub(crate) exhausted: AtomicU64,
    pub(crate) rejected: AtomicU64,
    pub(crate) shed: AtomicU64,
}

impl SenderStats {
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }
    pub fn exhausted(&self) -> u64 {
        self.exhausted.load(Ordering::Relaxed)
    }
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
    pub fn shed(&self) -> u64 {
        self.shed.load(Ordering::Relaxed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("sender is shutting down")]
    ShuttingDown,
    #[error("queue error: {0}")]
    Store(#[from] StoreError),
}

/// State shared between the submit side and the delivery workers.
pub(crate) struct Shared {
    pub(crate) repo: Arc<QueueRepo>,
    pub(crate) config: RelayConfig,
    pub(crate) policy: RetryPolicy,
    pub(crate) notify: Notify,
    pub(crate) cancel: CancellationToken,
    pub(crate) stats: Arc<SenderStats>,
}

/// Accepts finished payloads into the durable queue and drives delivery
/// from a bounded worker pool. Submit never blocks on the network: the
/// handoff is an SQLite insert plus a wakeup.
pub struct Sender {
    shared: Arc<Shared>,
    accepting: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Sender {
    pub fn new(config: RelayConfig, repo: Arc<QueueRepo>) -> Self {
        let policy = RetryPolicy::from_config(&config);
        Self {
            shared: Arc::new(Shared {
                repo,
                config,
                policy,
                notify: Notify::new(),
                cancel: CancellationToken::new(),
                stats: Arc::new(SenderStats::default()),
            }),
            accepting: AtomicBool::new(true),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Durably accept a payload for delivery. Returns once the entry is
    /// persisted; actual delivery happens on the worker pool.
    pub fn submit(&self, payload: OutboundPayload) -> Result<EntryId, SubmitError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(SubmitError::ShuttingDown);
        }

        let schema_ref =
            self.shared
                .config
                .schema_ref(&payload.schema, payload.version, payload.test);
        let body = self.wire_body(&schema_ref, &payload);

        // Bound local resource use before adding more work.
        let bound = self.shared.config.max_queue_entries.saturating_sub(1);
        let shed = self.shared.repo.shed_oldest(bound)?;
        if shed > 0 {
            self.shared.stats.shed.fetch_add(shed as u64, Ordering::Relaxed);
            warn!(shed, bound = self.shared.config.max_queue_entries, "queue over bound, shed oldest pending entries");
        }

        let entry = self.shared.repo.enqueue(&schema_ref, &body, Utc::now())?;
        self.shared.stats.submitted.fetch_add(1, Ordering::Relaxed);
        self.shared.notify.notify_one();
        debug!(id = %entry.id, schema = %payload.schema, "payload accepted for delivery");
        Ok(entry.id)
    }

    fn wire_body(&self, schema_ref: &str, payload: &OutboundPayload) -> serde_json::Value {
        let config = &self.shared.config;
        json!({
            "$schemaRef": schema_ref,
            "header": Header {
                uploader_id: config.uploader_id.clone(),
                software_name: config.software_name.clone(),
                software_version: config.software_version.clone(),
            },
            "message": payload.message.clone(),
        })
    }

    /// Start the delivery worker pool.
    pub fn spawn_workers(&self, endpoint: Arc<dyn Endpoint>) {
        let count = self.shared.config.workers.max(1);
        let mut handles = self.handles.lock();
        for _ in 0..count {
            let shared = self.shared.clone();
            let endpoint = endpoint.clone();
            handles.push(tokio::spawn(worker::worker_loop(shared, endpoint)));
        }
        info!(workers = count, "delivery workers started");
    }

    /// Flip stale inflight rows back to pending. Run once at startup so
    /// deliveries interrupted by a crash are retried.
    pub fn recover(&self) -> Result<usize, StoreError> {
        let recovered = self.shared.repo.recover()?;
        if recovered > 0 {
            info!(recovered, "recovered interrupted deliveries from previous run");
        }
        Ok(recovered)
    }

    /// Stop accepting new work, give the workers a bounded window to drain
    /// what is currently owed, then stop them. Anything undelivered stays
    /// persisted for the next startup; nothing is silently discarded.
    pub async fn shutdown(&self, flush_timeout: Duration) {
        self.accepting.store(false, Ordering::Release);
        self.shared.notify.notify_waiters();

        if tokio::time::timeout(flush_timeout, self.drained()).await.is_err() {
            let remaining = self.shared.repo.count().unwrap_or(0);
            info!(remaining, "flush window elapsed, remaining entries persisted");
        }

        self.shared.cancel.cancel();
        self.shared.notify.notify_waiters();

        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn drained(&self) {
        loop {
            match self.shared.repo.unsettled_count(Utc::now()) {
                Ok(0) => return,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "queue poll failed during flush");
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    pub fn stats(&self) -> &SenderStats {
        &self.shared.stats
    }

    /// Shared handle to the counters, for the periodic metrics exporter.
    pub fn stats_handle(&self) -> Arc<SenderStats> {
        self.shared.stats.clone()
    }

    /// Current queue depth, for the periodic metrics gauge.
    pub fn queue_depth(&self) -> Result<u64, StoreError> {
        self.shared.repo.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eddn_store::Database;
    use serde_json::{Map, Value};

    fn test_config() -> RelayConfig {
        RelayConfig {
            endpoint: "https://relay.example.net".into(),
            uploader_id: "uploader-1".into(),
            workers: 1,
            max_attempts: 3,
            base_delay_secs: 0,
            jitter_factor: 0.0,
            ..Default::default()
        }
    }

    fn sender_with_repo(config: RelayConfig) -> (Sender, Arc<QueueRepo>) {
        let repo = Arc::new(QueueRepo::new(Database::in_memory().unwrap()));
        (Sender::new(config, repo.clone()), repo)
    }

    fn message(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn submit_persists_wire_body() {
        let (sender, repo) = sender_with_repo(test_config());
        let payload = OutboundPayload::new(
            "journal",
            1,
            false,
            message(&[("StarSystem", "Deciat".into())]),
        );
        sender.submit(payload).unwrap();

        let entries = repo.list().unwrap();
        assert_eq!(entries.len(), 1);
        let body = &entries[0].body;
        assert_eq!(body["$schemaRef"], "https://relay.example.net/schemas/journal/1");
        assert_eq!(body["header"]["uploaderID"], "uploader-1");
        assert_eq!(body["header"]["softwareName"], "eddn-relay");
        assert_eq!(body["message"]["StarSystem"], "Deciat");
        assert_eq!(sender.stats().submitted(), 1);
    }

    #[test]
    fn beta_payloads_route_to_test_schema() {
        let (sender, repo) = sender_with_repo(test_config());
        let payload = OutboundPayload::new("journal", 1, true, Map::new());
        sender.submit(payload).unwrap();

        let entries = repo.list().unwrap();
        assert_eq!(
            entries[0].schema_ref,
            "https://relay.example.net/schemas/journal/1/test"
        );
    }

    #[test]
    fn queue_bound_sheds_oldest() {
        let config = RelayConfig {
            max_queue_entries: 2,
            ..test_config()
        };
        let (sender, repo) = sender_with_repo(config);
        for n in 0..4u64 {
            let payload =
                OutboundPayload::new("journal", 1, false, message(&[("n", n.into())]));
            sender.submit(payload).unwrap();
        }

        assert_eq!(repo.count().unwrap(), 2);
        assert!(sender.stats().shed() >= 1);
    }

    #[tokio::test]
    async fn submit_rejected_after_shutdown() {
        let (sender, _repo) = sender_with_repo(test_config());
        sender.shutdown(Duration::from_millis(10)).await;

        let result = sender.submit(OutboundPayload::new("journal", 1, false, Map::new()));
        assert!(matches!(result, Err(SubmitError::ShuttingDown)));
    }
}
