//! Queue client errors.

use std::fmt;
use std::io;

use jobsub_protocol::{Command, ErrorCode, QmgmtError};

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timed out waiting for the queue manager")]
    Timeout,

    #[error("Connection closed by the queue manager")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Map an I/O error, folding read/write timeouts into `Timeout`.
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::Timeout,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe => Self::Closed,
            _ => Self::Io(err),
        }
    }
}

/// Allocation ceiling that refused a cluster or process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ceiling {
    MaxJobsSubmitted,
    MaxJobsPerOwner,
    OwnerDisabled,
    MaxJobsPerSubmission,
    MaxProcsPerCluster,
}

impl Ceiling {
    pub fn from_code(code: ErrorCode) -> Option<Self> {
        match code {
            ErrorCode::MaxJobsSubmitted => Some(Self::MaxJobsSubmitted),
            ErrorCode::MaxJobsPerOwner => Some(Self::MaxJobsPerOwner),
            ErrorCode::OwnerDisabled => Some(Self::OwnerDisabled),
            ErrorCode::MaxJobsPerSubmission => Some(Self::MaxJobsPerSubmission),
            ErrorCode::MaxProcsPerCluster => Some(Self::MaxProcsPerCluster),
            _ => None,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MaxJobsSubmitted => ErrorCode::MaxJobsSubmitted,
            Self::MaxJobsPerOwner => ErrorCode::MaxJobsPerOwner,
            Self::OwnerDisabled => ErrorCode::OwnerDisabled,
            Self::MaxJobsPerSubmission => ErrorCode::MaxJobsPerSubmission,
            Self::MaxProcsPerCluster => ErrorCode::MaxProcsPerCluster,
        }
    }

    /// Sentence used in user-facing messages.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::MaxJobsSubmitted => "the queue is full",
            Self::MaxJobsPerOwner => "the per-owner job limit was reached",
            Self::OwnerDisabled => "the owner is not allowed to submit",
            Self::MaxJobsPerSubmission => "the per-submission job limit was reached",
            Self::MaxProcsPerCluster => "the per-cluster process limit was reached",
        }
    }
}

impl fmt::Display for Ceiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Queue client errors
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The request may or may not have been applied.
    #[error("{command} outcome unknown: {reason}")]
    Indeterminate { command: Command, reason: String },

    #[error("Queue manager incompatible: {0}")]
    Incompatible(String),

    #[error("Feature missing: {0}")]
    FeatureMissing(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Submission refused, {}: {message}", .kind.describe())]
    Ceiling {
        kind: Ceiling,
        limit: Option<u64>,
        message: String,
    },

    #[error("Transaction abandoned: {0}")]
    Abandoned(String),

    #[error("{command} rejected: {error}")]
    Rejected { command: Command, error: QmgmtError },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl QueueError {
    /// Convert a server error response for `command`.
    pub fn from_server(command: Command, error: QmgmtError) -> Self {
        if let Some(kind) = Ceiling::from_code(error.code) {
            let limit = error
                .data
                .as_ref()
                .and_then(|d| d.get("limit"))
                .and_then(|v| v.as_u64());
            return Self::Ceiling {
                kind,
                limit,
                message: error.message,
            };
        }
        match error.code {
            ErrorCode::UnsupportedProtocol => Self::Incompatible(error.message),
            ErrorCode::FeatureMissing => Self::FeatureMissing(error.message),
            ErrorCode::AuthenticationFailed => Self::Authentication(error.message),
            ErrorCode::TransactionAbandoned => Self::Abandoned(error.message),
            _ => Self::Rejected { command, error },
        }
    }

    pub fn ceiling(&self) -> Option<Ceiling> {
        match self {
            Self::Ceiling { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Server error code behind this failure, if any.
    pub fn server_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Ceiling { kind, .. } => Some(kind.code()),
            Self::Rejected { error, .. } => Some(error.code),
            Self::Abandoned(_) => Some(ErrorCode::TransactionAbandoned),
            Self::FeatureMissing(_) => Some(ErrorCode::FeatureMissing),
            _ => None,
        }
    }

    /// Failure to reach or talk to the queue manager at all.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Incompatible(_) | Self::Authentication(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceiling_mapping() {
        let err = QueueError::from_server(
            Command::NewCluster,
            QmgmtError::ceiling(ErrorCode::MaxJobsPerOwner, 10),
        );
        assert_eq!(err.ceiling(), Some(Ceiling::MaxJobsPerOwner));
        match &err {
            QueueError::Ceiling { limit, .. } => assert_eq!(*limit, Some(10)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(err.to_string().contains("per-owner"));
    }

    #[test]
    fn test_owner_disabled_is_ceiling() {
        let err =
            QueueError::from_server(Command::NewCluster, QmgmtError::owner_disabled("mallory"));
        assert_eq!(err.ceiling(), Some(Ceiling::OwnerDisabled));
        assert_eq!(err.server_code(), Some(ErrorCode::OwnerDisabled));
    }

    #[test]
    fn test_other_codes() {
        let err = QueueError::from_server(
            Command::SetAttribute,
            QmgmtError::transaction_abandoned("bad attribute"),
        );
        assert!(matches!(err, QueueError::Abandoned(_)));

        let err = QueueError::from_server(
            Command::SetAttribute,
            QmgmtError::attribute_rejected("Foo", "bad"),
        );
        assert_eq!(err.server_code(), Some(ErrorCode::AttributeRejected));
        assert!(!err.is_connection());
    }

    #[test]
    fn test_io_timeout_maps_to_timeout() {
        let err = TransportError::from_io(io::Error::new(io::ErrorKind::WouldBlock, "slow"));
        assert!(matches!(err, TransportError::Timeout));
        let err = TransportError::from_io(io::Error::new(io::ErrorKind::Other, "x"));
        assert!(matches!(err, TransportError::Io(_)));
    }
}
