use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// One parsed journal record: a type tag plus its raw field map.
/// Immutable after parsing; dispatched exactly once and then discarded.
#[derive(Clone, Debug)]
pub struct RawRecord {
    pub event: String,
    pub timestamp: DateTime<Utc>,
    pub fields: Map<String, Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("invalid JSON: {0}")]
    Json(String),
    #[error("not a JSON object")]
    NotAnObject,
    #[error("missing event tag")]
    MissingEvent,
    #[error("missing timestamp")]
    MissingTimestamp,
    #[error("bad timestamp: {0}")]
    BadTimestamp(String),
}

impl RawRecord {
    /// Parse one NDJSON line as handed over by the journal tailer.
    pub fn parse(line: &str) -> Result<Self, RecordError> {
        let value: Value =
            serde_json::from_str(line).map_err(|e| RecordError::Json(e.to_string()))?;
        let Value::Object(fields) = value else {
            return Err(RecordError::NotAnObject);
        };
        let event = fields
            .get("event")
            .and_then(Value::as_str)
            .ok_or(RecordError::MissingEvent)?
            .to_string();
        let ts = fields
            .get("timestamp")
            .and_then(Value::as_str)
            .ok_or(RecordError::MissingTimestamp)?;
        let timestamp = DateTime::parse_from_rfc3339(ts)
            .map_err(|e| RecordError::BadTimestamp(e.to_string()))?
            .with_timezone(&Utc);
        Ok(Self {
            event,
            timestamp,
            fields,
        })
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.fields.get(key).and_then(Value::as_u64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.fields.get(key).and_then(Value::as_bool)
    }

    /// Read a 3-element numeric array field (a galactic position).
    pub fn get_pos(&self, key: &str) -> Option<[f64; 3]> {
        let arr = self.fields.get(key)?.as_array()?;
        if arr.len() != 3 {
            return None;
        }
        Some([arr[0].as_f64()?, arr[1].as_f64()?, arr[2].as_f64()?])
    }
}
