//! Error types for the queue-management protocol.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes returned in error responses.
///
/// These codes are stable and used for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed JSON, missing required fields, or invalid field values.
    InvalidRequest,
    /// Protocol version is outside the supported range.
    UnsupportedProtocol,
    /// Unknown command requested.
    UnknownCommand,
    /// A required feature is not available on this queue manager.
    FeatureMissing,
    /// The session token was rejected.
    AuthenticationFailed,
    /// The command needs an open transaction.
    NoTransaction,
    /// An earlier unacknowledged assignment failed; the transaction is dead.
    TransactionAbandoned,
    /// The caller may not modify the referenced job.
    PermissionDenied,
    /// The queue-wide job ceiling was reached.
    MaxJobsSubmitted,
    /// The per-owner job ceiling was reached.
    MaxJobsPerOwner,
    /// The submitting owner is not allowed to submit.
    OwnerDisabled,
    /// The per-transaction job ceiling was reached.
    MaxJobsPerSubmission,
    /// The per-cluster process ceiling was reached.
    MaxProcsPerCluster,
    /// The cluster does not exist in this transaction.
    ClusterNotFound,
    /// An attribute value was refused.
    AttributeRejected,
    /// The factory digest could not be parsed.
    DigestInvalid,
    /// Item data does not agree with the digest.
    ItemDataMismatch,
    /// A constraint expression could not be parsed.
    ConstraintInvalid,
    /// Unexpected server-side failure.
    Internal,
}

impl ErrorCode {
    /// Allocation refusals caused by a configured ceiling or a disabled owner.
    pub fn is_ceiling(&self) -> bool {
        matches!(
            self,
            Self::MaxJobsSubmitted
                | Self::MaxJobsPerOwner
                | Self::OwnerDisabled
                | Self::MaxJobsPerSubmission
                | Self::MaxProcsPerCluster
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest => write!(f, "INVALID_REQUEST"),
            Self::UnsupportedProtocol => write!(f, "UNSUPPORTED_PROTOCOL"),
            Self::UnknownCommand => write!(f, "UNKNOWN_COMMAND"),
            Self::FeatureMissing => write!(f, "FEATURE_MISSING"),
            Self::AuthenticationFailed => write!(f, "AUTHENTICATION_FAILED"),
            Self::NoTransaction => write!(f, "NO_TRANSACTION"),
            Self::TransactionAbandoned => write!(f, "TRANSACTION_ABANDONED"),
            Self::PermissionDenied => write!(f, "PERMISSION_DENIED"),
            Self::MaxJobsSubmitted => write!(f, "MAX_JOBS_SUBMITTED"),
            Self::MaxJobsPerOwner => write!(f, "MAX_JOBS_PER_OWNER"),
            Self::OwnerDisabled => write!(f, "OWNER_DISABLED"),
            Self::MaxJobsPerSubmission => write!(f, "MAX_JOBS_PER_SUBMISSION"),
            Self::MaxProcsPerCluster => write!(f, "MAX_PROCS_PER_CLUSTER"),
            Self::ClusterNotFound => write!(f, "CLUSTER_NOT_FOUND"),
            Self::AttributeRejected => write!(f, "ATTRIBUTE_REJECTED"),
            Self::DigestInvalid => write!(f, "DIGEST_INVALID"),
            Self::ItemDataMismatch => write!(f, "ITEM_DATA_MISMATCH"),
            Self::ConstraintInvalid => write!(f, "CONSTRAINT_INVALID"),
            Self::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// Error response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QmgmtError {
    /// Error code from the registry.
    pub code: ErrorCode,
    /// Human-readable, single-line error message.
    pub message: String,
    /// Optional machine-readable details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl QmgmtError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: ErrorCode, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn unsupported_protocol(version: i32, min: i32, max: i32) -> Self {
        Self::with_data(
            ErrorCode::UnsupportedProtocol,
            format!("protocol_version {} is outside supported range [{}, {}]", version, min, max),
            serde_json::json!({
                "requested": version,
                "min": min,
                "max": max
            }),
        )
    }

    pub fn unknown_command(command: &str) -> Self {
        Self::with_data(
            ErrorCode::UnknownCommand,
            format!("unknown command: {}", command),
            serde_json::json!({ "command": command }),
        )
    }

    pub fn feature_missing(feature: &str) -> Self {
        Self::with_data(
            ErrorCode::FeatureMissing,
            format!("feature '{}' is not available on this queue manager", feature),
            serde_json::json!({ "feature": feature }),
        )
    }

    pub fn authentication_failed() -> Self {
        Self::new(ErrorCode::AuthenticationFailed, "session token rejected")
    }

    pub fn no_transaction(command: &str) -> Self {
        Self::with_data(
            ErrorCode::NoTransaction,
            format!("{} requires an open transaction", command),
            serde_json::json!({ "command": command }),
        )
    }

    pub fn transaction_abandoned(reason: &str) -> Self {
        Self::with_data(
            ErrorCode::TransactionAbandoned,
            format!("transaction abandoned: {}", reason),
            serde_json::json!({ "reason": reason }),
        )
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PermissionDenied, message)
    }

    /// A ceiling refusal. `code` should satisfy [`ErrorCode::is_ceiling`].
    pub fn ceiling(code: ErrorCode, limit: u64) -> Self {
        let what = match code {
            ErrorCode::MaxJobsSubmitted => "total jobs in queue",
            ErrorCode::MaxJobsPerOwner => "jobs per owner",
            ErrorCode::MaxJobsPerSubmission => "jobs per submission",
            ErrorCode::MaxProcsPerCluster => "procs per cluster",
            _ => "jobs",
        };
        Self::with_data(
            code,
            format!("limit of {} {} reached", limit, what),
            serde_json::json!({ "limit": limit }),
        )
    }

    pub fn owner_disabled(owner: &str) -> Self {
        Self::with_data(
            ErrorCode::OwnerDisabled,
            format!("owner '{}' is not allowed to submit jobs", owner),
            serde_json::json!({ "owner": owner }),
        )
    }

    pub fn cluster_not_found(cluster_id: i32) -> Self {
        Self::with_data(
            ErrorCode::ClusterNotFound,
            format!("cluster {} not found in this transaction", cluster_id),
            serde_json::json!({ "cluster_id": cluster_id }),
        )
    }

    pub fn attribute_rejected(name: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::with_data(
            ErrorCode::AttributeRejected,
            format!("attribute {} rejected: {}", name, reason),
            serde_json::json!({ "name": name, "reason": reason }),
        )
    }

    pub fn digest_invalid(line: usize, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::with_data(
            ErrorCode::DigestInvalid,
            format!("digest line {}: {}", line, reason),
            serde_json::json!({ "line": line, "reason": reason }),
        )
    }

    pub fn item_data_mismatch(expected: u64, actual: u64) -> Self {
        Self::with_data(
            ErrorCode::ItemDataMismatch,
            format!("expected {} item records, found {}", expected, actual),
            serde_json::json!({ "expected": expected, "actual": actual }),
        )
    }

    pub fn constraint_invalid(constraint: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::with_data(
            ErrorCode::ConstraintInvalid,
            format!("invalid constraint '{}': {}", constraint, reason),
            serde_json::json!({ "constraint": constraint, "reason": reason }),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl fmt::Display for QmgmtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for QmgmtError {}
