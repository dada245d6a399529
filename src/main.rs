use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncBufReadExt;

use eddn_core::{RawRecord, RelayConfig};
use eddn_schemas::{Dispatcher, SchemaRegistry};
use eddn_sender::{HttpEndpoint, Sender};
use eddn_store::{Database, QueueRepo};
use eddn_telemetry::TelemetryConfig;

#[tokio::main]
async fn main() {
    // Optional config file path as the only argument; everything else is
    // defaults. There is no interactive surface.
    let config = match std::env::args().nth(1) {
        Some(path) => match RelayConfig::load(&PathBuf::from(&path)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("eddn-relay: {e}");
                std::process::exit(1);
            }
        },
        None => RelayConfig::default(),
    };

    let telemetry = eddn_telemetry::init_telemetry(TelemetryConfig::for_data_dir(&config.data_dir));

    tracing::info!(
        endpoint = %config.endpoint,
        workers = config.workers,
        "starting relay"
    );

    let db = match Database::open(&config.data_dir.join("queue.db")) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = %e, "failed to open delivery queue");
            std::process::exit(1);
        }
    };
    let repo = Arc::new(QueueRepo::new(db));

    // Fail fast: an ambiguous tag table is a build error, not a warning.
    let registry = match SchemaRegistry::standard() {
        Ok(registry) => registry,
        Err(e) => {
            tracing::error!(error = %e, "schema registry rejected");
            std::process::exit(1);
        }
    };
    tracing::info!(tags = registry.tag_count(), "schema registry built");

    let flush_timeout = config.flush_timeout();
    let sender = Sender::new(config, repo.clone());
    if let Err(e) = sender.recover() {
        tracing::warn!(error = %e, "startup recovery failed");
    }
    sender.spawn_workers(Arc::new(HttpEndpoint::new()));

    if let Some(metrics) = telemetry.metrics() {
        spawn_metrics_exporter(metrics, repo.clone(), sender.stats_handle());
    }

    let mut dispatcher = Dispatcher::new(registry, sender);

    // The feed: one record per line on stdin, in strict arrival order.
    // Dispatch runs right here on the ingestion task.
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("interrupt received");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match RawRecord::parse(trimmed) {
                            Ok(record) => {
                                dispatcher.dispatch(&record);
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "unparseable feed line");
                            }
                        }
                    }
                    Ok(None) => {
                        tracing::info!("feed closed");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "feed read error");
                        break;
                    }
                }
            }
        }
    }

    let stats = dispatcher.stats();
    tracing::info!(
        dispatched = stats.dispatched(),
        handled = stats.handled(),
        skipped = stats.skipped(),
        dropped = stats.dropped(),
        "ingestion finished, flushing delivery queue"
    );

    dispatcher.sender().shutdown(flush_timeout).await;

    let sent = dispatcher.sender().stats();
    tracing::info!(
        delivered = sent.delivered(),
        retried = sent.retried(),
        rejected = sent.rejected(),
        exhausted = sent.exhausted(),
        shed = sent.shed(),
        "shutdown complete"
    );
}

/// Periodic metrics export: current queue depth and delivery totals,
/// snapshotted to SQLite with retention pruning.
fn spawn_metrics_exporter(
    metrics: Arc<eddn_telemetry::MetricsRecorder>,
    repo: Arc<QueueRepo>,
    stats: Arc<eddn_sender::SenderStats>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Ok(depth) = repo.count() {
                metrics.gauge_set("queue.depth", &[], depth as f64);
            }
            metrics.gauge_set("relay.submitted", &[], stats.submitted() as f64);
            metrics.gauge_set("relay.delivered", &[], stats.delivered() as f64);
            metrics.gauge_set("relay.retried", &[], stats.retried() as f64);
            metrics.gauge_set("relay.rejected", &[], stats.rejected() as f64);
            metrics.gauge_set("relay.exhausted", &[], stats.exhausted() as f64);
            metrics.gauge_set("relay.shed", &[], stats.shed() as f64);
            if let Err(e) = metrics.snapshot() {
                tracing::warn!(error = %e, "metrics snapshot failed");
            }
            let _ = metrics.prune(7);
        }
    });
}
