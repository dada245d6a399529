use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace, warn};

use eddn_core::{RawRecord, SchemaError, SessionContext};
use eddn_sender::Sender;

use crate::registry::SchemaRegistry;

/// Dispatch counters, exported periodically as metrics.
#[derive(Debug, Default)]
pub struct DispatchStats {
    dispatched: AtomicU64,
    handled: AtomicU64,
    skipped: AtomicU64,
    dropped: AtomicU64,
}

impl DispatchStats {
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumes the ordered record stream one record at a time. Runs on the
/// ingestion task: schema application and every context mutation happen
/// here, synchronously, so context updates are linearized in arrival order
/// without locking. Only the finished payload handoff crosses threads.
pub struct Dispatcher {
    registry: SchemaRegistry,
    context: SessionContext,
    sender: Sender,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(registry: SchemaRegistry, sender: Sender) -> Self {
        Self {
            registry,
            context: SessionContext::new(),
            sender,
            stats: DispatchStats::default(),
        }
    }

    /// Route one record to the schema owning its tag, if any. Always
    /// returns; a malformed record never halts ingestion of the ones
    /// behind it. There is no dispatch-level retry: redelivery is the
    /// sender's concern, classification happens exactly once.
    pub fn dispatch(&mut self, record: &RawRecord) -> bool {
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);

        // Unhandled types are expected; most journal traffic has no relay
        // destination at all.
        let Some(schema) = self.registry.get(&record.event) else {
            return false;
        };

        match schema.apply(record, &mut self.context, &self.sender) {
            Ok(outcome) => {
                if outcome.handled {
                    self.stats.handled.fetch_add(1, Ordering::Relaxed);
                    trace!(record_type = %record.event, schema = schema.name(), "record handled");
                } else {
                    self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        record_type = %record.event,
                        schema = schema.name(),
                        reason = outcome.diagnostic.as_deref().unwrap_or(""),
                        "record skipped"
                    );
                }
                outcome.handled
            }
            Err(SchemaError::ContextNotReady) => {
                // Normal before the session context settles; not log noise.
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                trace!(record_type = %record.event, "context not ready");
                false
            }
            Err(err @ SchemaError::ConsistencyMismatch { .. }) => {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                debug!(record_type = %record.event, error = %err, "record skipped");
                false
            }
            Err(err) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    record_type = %record.event,
                    schema = schema.name(),
                    error = %err,
                    context = %self.context.redacted(),
                    "record dropped"
                );
                false
            }
        }
    }

    /// Session-boundary signal from the feed (log rotation detected out of
    /// band). Fileheader records also reset on their own.
    pub fn reset_session(&mut self) {
        self.context.reset();
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SchemaRegistry;
    use crate::schemas::test_support::record;
    use std::sync::Arc;
    use std::time::Duration;

    use eddn_core::{RelayConfig, SendError};
    use eddn_sender::MockEndpoint;
    use eddn_store::{Database, QueueRepo};

    fn dispatcher() -> (Dispatcher, Arc<QueueRepo>) {
        let repo = Arc::new(QueueRepo::new(Database::in_memory().unwrap()));
        let config = RelayConfig {
            endpoint: "https://relay.example.net".into(),
            uploader_id: "uploader-1".into(),
            workers: 1,
            base_delay_secs: 0,
            jitter_factor: 0.0,
            ..Default::default()
        };
        let sender = Sender::new(config, repo.clone());
        (
            Dispatcher::new(SchemaRegistry::standard().unwrap(), sender),
            repo,
        )
    }

    fn fileheader() -> eddn_core::RawRecord {
        record(
            r#"{"timestamp":"2026-08-06T12:00:00Z","event":"Fileheader","part":1,"gameversion":"4.0.0.100","build":"r294054/r0"}"#,
        )
    }

    fn jump() -> eddn_core::RawRecord {
        record(
            r#"{"timestamp":"2026-08-06T12:01:00Z","event":"FSDJump","StarSystem":"Deciat","SystemAddress":6681123623626,"StarPos":[122.625,-0.8125,-47.28125],"JumpDist":7.56}"#,
        )
    }

    #[test]
    fn unknown_tags_are_unhandled_without_noise() {
        let (mut dispatcher, repo) = dispatcher();
        let rec = record(r#"{"timestamp":"2026-08-06T12:00:30Z","event":"Music","MusicTrack":"NoTrack"}"#);
        assert!(!dispatcher.dispatch(&rec));
        assert_eq!(repo.count().unwrap(), 0);
        assert_eq!(dispatcher.stats().dispatched(), 1);
    }

    #[test]
    fn records_before_context_settles_produce_no_payload() {
        let (mut dispatcher, repo) = dispatcher();

        assert!(!dispatcher.dispatch(&jump()));
        let donation = record(
            r#"{"timestamp":"2026-08-06T12:01:30Z","event":"ScientificResearch","Name":"nickel","Count":5}"#,
        );
        assert!(!dispatcher.dispatch(&donation));

        assert_eq!(repo.count().unwrap(), 0);
        assert_eq!(dispatcher.stats().skipped(), 2);
    }

    #[test]
    fn routing_is_exclusive_between_tags() {
        let (mut dispatcher, repo) = dispatcher();
        dispatcher.dispatch(&fileheader());
        dispatcher.dispatch(&jump());

        // A donation must reach only its own destination schema, never the
        // journal one.
        let donation = record(
            r#"{"timestamp":"2026-08-06T12:02:00Z","event":"ScientificResearch","Name":"nickel","Count":5}"#,
        );
        assert!(dispatcher.dispatch(&donation));

        let refs: Vec<String> = repo
            .list()
            .unwrap()
            .iter()
            .map(|e| e.schema_ref.clone())
            .collect();
        assert_eq!(refs.len(), 2);
        assert!(refs[0].ends_with("/schemas/journal/1"));
        assert!(refs[1].ends_with("/schemas/scientificresearch/1"));
    }

    #[test]
    fn context_updates_are_visible_to_the_next_record() {
        let (mut dispatcher, repo) = dispatcher();
        dispatcher.dispatch(&fileheader());
        dispatcher.dispatch(&jump());

        // The very next record already observes the jump's location.
        let docked = record(
            r#"{"timestamp":"2026-08-06T12:01:05Z","event":"Docked","StarSystem":"Deciat","SystemAddress":6681123623626,"StationName":"Garay Terminal"}"#,
        );
        assert!(dispatcher.dispatch(&docked));

        let entries = repo.list().unwrap();
        assert_eq!(entries[1].body["message"]["StarPos"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn later_jump_supersedes_earlier_location() {
        let (mut dispatcher, _repo) = dispatcher();
        dispatcher.dispatch(&fileheader());
        dispatcher.dispatch(&jump());

        let onward = record(
            r#"{"timestamp":"2026-08-06T12:30:00Z","event":"FSDJump","StarSystem":"Lave","SystemAddress":3932277478106,"StarPos":[75.75,48.75,70.75]}"#,
        );
        dispatcher.dispatch(&onward);
        assert_eq!(dispatcher.context().system_name(), Some("Lave"));
    }

    #[test]
    fn session_reset_clears_context() {
        let (mut dispatcher, _repo) = dispatcher();
        dispatcher.dispatch(&fileheader());
        dispatcher.dispatch(&jump());

        dispatcher.reset_session();
        assert!(!dispatcher.context().has_location());
        assert!(!dispatcher.context().has_version());
    }

    #[test]
    fn malformed_record_does_not_halt_ingestion() {
        let (mut dispatcher, repo) = dispatcher();
        dispatcher.dispatch(&fileheader());

        let truncated =
            record(r#"{"timestamp":"2026-08-06T12:01:00Z","event":"FSDJump","StarSystem":"Deciat"}"#);
        assert!(!dispatcher.dispatch(&truncated));
        assert_eq!(dispatcher.stats().dropped(), 1);

        // The stream continues as if nothing happened.
        assert!(dispatcher.dispatch(&jump()));
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn end_to_end_donation_scenario() {
        let (mut dispatcher, repo) = dispatcher();

        dispatcher.dispatch(&fileheader());
        assert!(dispatcher.dispatch(&jump()));

        let donation = record(
            r#"{"timestamp":"2026-08-06T12:02:00Z","event":"ScientificResearch","MarketID":128666762,"Name":"nickel","Category":"Raw","Count":5,"Commander":"Jameson"}"#,
        );
        assert!(dispatcher.dispatch(&donation));

        let entries = repo.list().unwrap();
        let donation_body = serde_json::to_string(&entries[1].body).unwrap();
        assert!(donation_body.contains("nickel"));
        assert!(donation_body.contains("\"Count\":5"));
        assert!(donation_body.contains("Deciat"));
        assert!(donation_body.contains("StarPos"));
        assert!(!donation_body.contains("Jameson"));
    }

    #[tokio::test]
    async fn full_pipeline_delivers_through_workers() {
        let (mut dispatcher, repo) = dispatcher();
        let endpoint = Arc::new(MockEndpoint::scripted(vec![
            Err(SendError::Transient { status: 503, retry_after: None }),
            Ok(()),
        ]));
        dispatcher.sender().spawn_workers(endpoint.clone());

        dispatcher.dispatch(&fileheader());
        dispatcher.dispatch(&jump());

        for _ in 0..200 {
            if dispatcher.sender().stats().delivered() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(dispatcher.sender().stats().delivered(), 1);
        assert_eq!(endpoint.call_count(), 2);
        assert_eq!(repo.count().unwrap(), 0);

        let delivered = endpoint.calls();
        assert!(delivered[0].schema_ref.ends_with("/schemas/journal/1"));
        assert_eq!(delivered[0].body["message"]["StarSystem"], "Deciat");

        dispatcher.sender().shutdown(Duration::from_millis(100)).await;
    }
}
