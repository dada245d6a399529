use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use eddn_store::QueueEntry;

use crate::endpoint::Endpoint;
use crate::sender::Shared;

/// Upper bound on how long a worker sleeps with nothing due. A submit
/// wakes it earlier through the notifier; this only caps missed wakeups.
const IDLE_POLL: Duration = Duration::from_secs(30);

/// One delivery worker: claim the next due entry, POST it, settle the
/// outcome. Runs until cancelled.
pub(crate) async fn worker_loop(shared: Arc<Shared>, endpoint: Arc<dyn Endpoint>) {
    loop {
        if shared.cancel.is_cancelled() {
            break;
        }

        match shared.repo.claim_due(Utc::now()) {
            Ok(Some(entry)) => deliver_one(&shared, endpoint.as_ref(), entry).await,
            Ok(None) => {
                let wait = shared
                    .repo
                    .next_due_in(Utc::now())
                    .ok()
                    .flatten()
                    .unwrap_or(IDLE_POLL)
                    .min(IDLE_POLL);
                tokio::select! {
                    _ = shared.notify.notified() => {}
                    _ = tokio::time::sleep(wait.max(Duration::from_millis(10))) => {}
                    _ = shared.cancel.cancelled() => break,
                }
            }
            Err(e) => {
                warn!(error = %e, "queue read failed");
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    _ = shared.cancel.cancelled() => break,
                }
            }
        }
    }
}

async fn deliver_one(shared: &Shared, endpoint: &dyn Endpoint, entry: QueueEntry) {
    match endpoint.post(&entry.schema_ref, &entry.body).await {
        Ok(()) => {
            if let Err(e) = shared.repo.delete(&entry.id) {
                warn!(id = %entry.id, error = %e, "delivered entry could not be removed");
            }
            shared.stats.delivered.fetch_add(1, Ordering::Relaxed);
            debug!(id = %entry.id, schema = %entry.schema_ref, "payload delivered");
        }
        Err(err) if err.is_transient() => {
            let attempts = entry.attempts + 1;
            if attempts >= shared.config.max_attempts {
                if let Err(e) = shared.repo.delete(&entry.id) {
                    warn!(id = %entry.id, error = %e, "exhausted entry could not be removed");
                }
                shared.stats.exhausted.fetch_add(1, Ordering::Relaxed);
                warn!(
                    id = %entry.id,
                    schema = %entry.schema_ref,
                    attempts,
                    error = %err,
                    "retry budget exhausted, payload dropped"
                );
            } else {
                let delay = shared.policy.delay_for(attempts, err.retry_after());
                let next = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                if let Err(e) = shared.repo.reschedule(&entry.id, attempts, next) {
                    warn!(id = %entry.id, error = %e, "failed entry could not be rescheduled");
                }
                shared.stats.retried.fetch_add(1, Ordering::Relaxed);
                debug!(
                    id = %entry.id,
                    schema = %entry.schema_ref,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    kind = err.error_kind(),
                    "transient failure, retry scheduled"
                );
            }
        }
        Err(err) => {
            // The remote will never accept this payload; retrying forever
            // would only flood it. Report once and drop.
            if let Err(e) = shared.repo.delete(&entry.id) {
                warn!(id = %entry.id, error = %e, "rejected entry could not be removed");
            }
            shared.stats.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                id = %entry.id,
                schema = %entry.schema_ref,
                error = %err,
                "payload permanently rejected"
            );
        }
    }
}
