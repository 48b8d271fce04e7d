//! Job factory errors.

use thiserror::Error;

use crate::queue::QueueError;
use crate::submit::SubmitError;

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("late materialization is required but the queue manager does not support it")]
    Unsupported,

    #[error("digest line {line}: {reason}")]
    Digest { line: usize, reason: String },

    #[error("item index {0} does not fit an item record")]
    ItemIndexOutOfRange(usize),

    #[error("queue manager accepted {accepted} of {sent} item records")]
    ItemCountMismatch { sent: u32, accepted: u32 },

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
