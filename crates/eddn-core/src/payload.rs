use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A finished, redacted, augmented message plus its destination. Produced
/// by a schema application, consumed by the sender. The message is a frozen
/// snapshot: sender workers never touch session state.
#[derive(Clone, Debug)]
pub struct OutboundPayload {
    /// Destination schema name, e.g. "journal".
    pub schema: String,
    /// Destination schema version.
    pub version: u32,
    /// Beta sessions route to the /test variant of the schema so they never
    /// pollute live aggregation.
    pub test: bool,
    pub message: Map<String, Value>,
}

impl OutboundPayload {
    pub fn new(schema: &str, version: u32, test: bool, message: Map<String, Value>) -> Self {
        Self {
            schema: schema.to_string(),
            version,
            test,
            message,
        }
    }
}

/// Header block attached to every wire body, identifying the submitting
/// client to the relay network.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Header {
    #[serde(rename = "uploaderID")]
    pub uploader_id: String,
    #[serde(rename = "softwareName")]
    pub software_name: String,
    #[serde(rename = "softwareVersion")]
    pub software_version: String,
}

/// Result of one dispatch attempt. Never an unwind crossing the schema
/// boundary; skips carry an optional diagnostic for low-severity logging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaOutcome {
    pub handled: bool,
    pub diagnostic: Option<String>,
}

impl SchemaOutcome {
    pub fn handled() -> Self {
        Self {
            handled: true,
            diagnostic: None,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            handled: false,
            diagnostic: Some(reason.into()),
        }
    }
}
