//! Request/response channel to the queue manager.
//!
//! Handles protocol negotiation, request ids and error mapping. Nothing here
//! retries: a timeout leaves the outcome of the request unknown and is
//! reported as [`QueueError::Indeterminate`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;

use jobsub_protocol::ops::{BeginRequest, BeginResponse};
use jobsub_protocol::{Command, QmgmtRequest, PROTOCOL_MAX, PROTOCOL_MIN, PROTOCOL_VERSION_PROBE};

use super::error::{QueueError, TransportError};
use super::transport::Transport;

pub struct QmgmtChannel {
    transport: Arc<dyn Transport>,
    /// Negotiated protocol version (set by begin)
    negotiated_version: Option<i32>,
    features: Vec<String>,
    schedd_name: String,
    request_counter: AtomicU64,
}

impl QmgmtChannel {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            negotiated_version: None,
            features: Vec::new(),
            schedd_name: String::new(),
            request_counter: AtomicU64::new(0),
        }
    }

    /// Generate a unique request ID
    fn next_request_id(&self) -> String {
        let counter = self.request_counter.fetch_add(1, Ordering::SeqCst);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!("req-{:x}-{:08x}", timestamp, counter)
    }

    pub fn negotiated_version(&self) -> Option<i32> {
        self.negotiated_version
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn schedd_name(&self) -> &str {
        &self.schedd_name
    }

    /// Open a transaction, negotiating the protocol version and features.
    pub fn begin(&mut self, owner: &str, token: Option<&str>) -> Result<BeginResponse, QueueError> {
        let payload = BeginRequest {
            owner: owner.to_string(),
            token: token.map(str::to_string),
            protocol_min: PROTOCOL_MIN,
            protocol_max: PROTOCOL_MAX,
        };
        let begin: BeginResponse = self.exchange(PROTOCOL_VERSION_PROBE, Command::Begin, &payload)?;

        if begin.protocol_version < PROTOCOL_MIN || begin.protocol_version > PROTOCOL_MAX {
            return Err(QueueError::Incompatible(format!(
                "queue manager chose protocol {} outside [{}, {}]",
                begin.protocol_version, PROTOCOL_MIN, PROTOCOL_MAX
            )));
        }

        tracing::debug!(
            protocol_version = begin.protocol_version,
            features = ?begin.features,
            schedd = %begin.schedd_name,
            "queue session open"
        );
        self.negotiated_version = Some(begin.protocol_version);
        self.features.clone_from(&begin.features);
        self.schedd_name.clone_from(&begin.schedd_name);
        Ok(begin)
    }

    fn version(&self) -> Result<i32, QueueError> {
        self.negotiated_version
            .ok_or_else(|| QueueError::Protocol("session not open - call begin first".to_string()))
    }

    fn build<P: Serialize>(
        &self,
        version: i32,
        command: Command,
        payload: &P,
    ) -> Result<QmgmtRequest, QueueError> {
        QmgmtRequest::new(version, command, self.next_request_id(), payload)
            .map_err(|e| QueueError::Transport(TransportError::Serialization(e)))
    }

    fn map_transport(command: Command, err: TransportError) -> QueueError {
        match err {
            TransportError::Timeout => QueueError::Indeterminate {
                command,
                reason: "timed out waiting for the queue manager".to_string(),
            },
            other => QueueError::Transport(other),
        }
    }

    fn exchange<P: Serialize, R: DeserializeOwned>(
        &self,
        version: i32,
        command: Command,
        payload: &P,
    ) -> Result<R, QueueError> {
        let request = self.build(version, command, payload)?;
        tracing::trace!(command = %command, request_id = %request.request_id, "request");

        let response = self
            .transport
            .execute(&request)
            .map_err(|e| Self::map_transport(command, e))?;

        if !response.ok {
            let error = response.error.ok_or_else(|| {
                QueueError::Protocol(format!("{} failed without an error payload", command))
            })?;
            tracing::debug!(command = %command, code = %error.code, "request refused");
            return Err(QueueError::from_server(command, error));
        }

        response
            .payload_as()
            .map_err(|e| QueueError::Protocol(format!("invalid {} response: {}", command, e)))
    }

    /// Send a command and decode its response payload.
    pub fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        command: Command,
        payload: &P,
    ) -> Result<R, QueueError> {
        let version = self.version()?;
        self.exchange(version, command, payload)
    }

    /// Send a command that gets no response.
    pub fn send<P: Serialize>(&self, command: Command, payload: &P) -> Result<(), QueueError> {
        let version = self.version()?;
        let request = self.build(version, command, payload)?;
        self.transport
            .send(&request)
            .map_err(|e| Self::map_transport(command, e))
    }
}
