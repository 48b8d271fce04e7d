//! Request envelope.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::error::QmgmtError;

/// Request envelope.
///
/// One JSON document per line on the connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QmgmtRequest {
    /// Protocol version negotiated by `begin`. `begin` itself carries 0.
    pub protocol_version: i32,
    pub command: Command,
    /// Caller-chosen request ID for correlation.
    pub request_id: String,
    /// Command-specific payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl QmgmtRequest {
    /// Build a request from a typed payload.
    pub fn new<P: Serialize>(
        protocol_version: i32,
        command: Command,
        request_id: impl Into<String>,
        payload: &P,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            protocol_version,
            command,
            request_id: request_id.into(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Decode the payload, reporting failures as `INVALID_REQUEST`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, QmgmtError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            QmgmtError::invalid_request(format!("invalid {} payload: {}", self.command, e))
        })
    }

    /// Unacknowledged assignments get no response frame.
    pub fn expects_response(&self) -> bool {
        !(self.command == Command::SetAttribute
            && self
                .payload
                .pointer("/flags/no_ack")
                .and_then(|v| v.as_bool())
                .unwrap_or(false))
    }
}
