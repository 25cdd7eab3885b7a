//! Message types for communication between the UI host and the bridge

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request sent by the host, one per input line
#[derive(Debug, Clone, Deserialize)]
pub struct HostRequest {
    /// Opaque correlation id echoed back in the reply
    #[serde(default)]
    pub id: Value,
    /// Registered command name
    pub command: String,
    /// Command arguments
    #[serde(default)]
    pub args: Value,
}

/// Reply sent back to the host, one per request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostReply {
    /// Command ran; `result` is its return value
    Result { id: Value, result: Value },
    /// Command could not be dispatched
    Error { id: Value, error: String },
}

impl HostReply {
    pub fn id(&self) -> &Value {
        match self {
            HostReply::Result { id, .. } | HostReply::Error { id, .. } => id,
        }
    }
}
