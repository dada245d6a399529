use std::time::Duration;

/// Non-fatal reasons a schema declines or abandons a record. These are
/// values, not unwinds: the dispatcher branches on them and ingestion
/// always continues with the next record.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SchemaError {
    /// The session context is not yet populated enough to vouch for the
    /// record. Normal and expected for the first records after launch.
    #[error("session context not ready")]
    ContextNotReady,

    /// The record carries a location or identity field that disagrees with
    /// the tracked session state.
    #[error("record disagrees with session context on {field}")]
    ConsistencyMismatch { field: &'static str },

    /// Unexpected or missing field shape while redacting or augmenting.
    #[error("transform failed: {0}")]
    Transform(String),

    /// The delivery queue refused the finished payload.
    #[error("submit failed: {0}")]
    Submit(String),
}

/// Typed delivery errors, classified as transient (retry with backoff) or
/// permanent (the remote will never accept this payload; drop it).
#[derive(Clone, Debug, thiserror::Error)]
pub enum SendError {
    #[error("transient failure, status {status}")]
    Transient {
        status: u16,
        retry_after: Option<Duration>,
    },
    #[error("permanent rejection, status {status}: {body}")]
    Permanent { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

impl SendError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. } | Self::Network(_) | Self::Timeout(_)
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        if let Self::Transient { retry_after, .. } = self {
            *retry_after
        } else {
            None
        }
    }

    /// Short classification string for logging and counter labels.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::Permanent { .. } => "permanent",
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Classify an HTTP response status. 408/429 and the 5xx family are
    /// worth retrying; every other non-success status means the payload
    /// itself was rejected.
    pub fn from_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        match status {
            408 | 429 | 500..=599 => Self::Transient { status, retry_after },
            _ => Self::Permanent { status, body },
        }
    }
}
