//! Job action errors.

use crate::queue::QueueError;

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("No jobs named: give job ids, user names or a constraint")]
    NoTargets,

    #[error("Invalid job target '{0}'")]
    InvalidTarget(String),

    #[error("Invalid result granularity '{0}' (expected none, per_job or totals)")]
    InvalidGranularity(String),

    /// The result ad carried neither totals, per-job codes nor `ActionResult`.
    #[error("No result found in the queue manager's reply to {0}")]
    MissingResult(String),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
