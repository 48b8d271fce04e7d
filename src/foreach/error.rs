//! Errors raised while parsing queue arguments or expanding items.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForeachError {
    #[error("invalid queue count '{0}'")]
    InvalidCount(String),

    #[error("queue count {0} is out of range")]
    CountOutOfRange(i64),

    #[error("unexpected text after queue count: '{0}'")]
    TextAfterCount(String),

    #[error("unexpected keyword '{0}' in queue statement")]
    UnexpectedKeyword(String),

    #[error("loop variable '{0}' is declared twice")]
    DuplicateVariable(String),

    #[error("bad slice '{text}': {reason}")]
    BadSlice { text: String, reason: String },

    #[error("'{0}' needs an item list")]
    MissingItems(String),

    #[error("item list opened with '(' is never closed")]
    UnterminatedList,

    #[error("unexpected text after item list: '{0}'")]
    TextAfterList(String),

    #[error("invalid matching pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("cannot read items from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("item data is only available to the queue manager")]
    ItemDataUnavailable,

    #[error("empty value for {} in item {item_index}", .vars.join(", "))]
    EmptyField { item_index: usize, vars: Vec<String> },
}

impl ForeachError {
    pub(crate) fn bad_slice(text: &str, reason: impl Into<String>) -> Self {
        Self::BadSlice {
            text: text.to_string(),
            reason: reason.into(),
        }
    }
}
