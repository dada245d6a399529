use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use eddn_core::SendError;

use crate::endpoint::Endpoint;

/// One captured delivery attempt.
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub schema_ref: String,
    pub body: Value,
}

/// Scripted endpoint for deterministic tests without a network. Outcomes
/// are consumed front to back; once the script runs out, calls succeed.
pub struct MockEndpoint {
    script: Mutex<VecDeque<Result<(), SendError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockEndpoint {
    pub fn scripted(outcomes: Vec<Result<(), SendError>>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn always_ok() -> Self {
        Self::scripted(Vec::new())
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Endpoint for MockEndpoint {
    async fn post(&self, schema_ref: &str, body: &Value) -> Result<(), SendError> {
        self.calls.lock().push(RecordedCall {
            schema_ref: schema_ref.to_string(),
            body: body.clone(),
        });
        self.script.lock().pop_front().unwrap_or(Ok(()))
    }
}
