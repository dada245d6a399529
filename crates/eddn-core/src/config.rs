use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Static configuration supplied once at construction time. No hidden
/// defaults for the bounds that matter: retry budget, queue size and flush
/// window are explicit fields here.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Base URL of the relay network.
    pub endpoint: String,
    /// Submitter identity carried in every payload header.
    pub uploader_id: String,
    pub software_name: String,
    pub software_version: String,

    /// Delivery worker pool size.
    pub workers: usize,
    /// Attempts per payload before the retry budget is exhausted.
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt up to max_delay_secs.
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    /// Fraction of the delay randomized in each direction.
    pub jitter_factor: f64,

    /// Durable queue bound; oldest pending entries are shed past this.
    pub max_queue_entries: u64,
    /// How long shutdown waits for the queue to drain before persisting
    /// the remainder.
    pub flush_timeout_secs: u64,

    /// Directory holding the queue and telemetry databases.
    pub data_dir: PathBuf,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://eddn.edcd.io".into(),
            uploader_id: "anonymous".into(),
            software_name: "eddn-relay".into(),
            software_version: env!("CARGO_PKG_VERSION").into(),
            workers: 2,
            max_attempts: 6,
            base_delay_secs: 30,
            max_delay_secs: 1800,
            jitter_factor: 0.2,
            max_queue_entries: 10_000,
            flush_timeout_secs: 10,
            data_dir: home_fallback().join(".eddn-relay"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {detail}")]
    Io { path: String, detail: String },
    #[error("cannot parse {path}: {detail}")]
    Parse { path: String, detail: String },
}

impl RelayConfig {
    /// Load from a JSON file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            detail: e.to_string(),
        })
    }

    /// Full versioned endpoint reference for a schema, doubling as the
    /// POST URL and the $schemaRef wire field.
    pub fn schema_ref(&self, schema: &str, version: u32, test: bool) -> String {
        let base = self.endpoint.trim_end_matches('/');
        if test {
            format!("{base}/schemas/{schema}/{version}/test")
        } else {
            format!("{base}/schemas/{schema}/{version}")
        }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_secs)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_secs(self.flush_timeout_secs)
    }
}

fn home_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
