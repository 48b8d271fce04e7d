//! Session commands: begin, commit, disconnect.

use serde::{Deserialize, Serialize};

/// Begin request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeginRequest {
    /// Submitting owner; every cluster allocated in the session belongs to it.
    pub owner: String,
    /// Shared secret, required only when the queue manager is configured with one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Lowest protocol version the client speaks.
    pub protocol_min: i32,
    /// Highest protocol version the client speaks.
    pub protocol_max: i32,
}

/// Begin response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeginResponse {
    /// Version every later request must carry.
    pub protocol_version: i32,
    /// Capability names (see [`crate::features`]).
    #[serde(default)]
    pub features: Vec<String>,
    /// Name of the queue manager, for messages.
    #[serde(default)]
    pub schedd_name: String,
}

impl BeginResponse {
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}

/// Commit request payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitRequest {
    /// Forget everything done in the transaction instead of keeping it.
    #[serde(default)]
    pub discard: bool,
}

/// Commit response payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitResponse {
    /// Non-fatal warnings collected during the transaction.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Clusters made durable by this commit.
    #[serde(default)]
    pub clusters: Vec<i32>,
}

/// Disconnect response payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisconnectResponse {
    /// True when an open transaction was discarded by the disconnect.
    #[serde(default)]
    pub discarded: bool,
}
