//! Submit description errors.

use thiserror::Error;

use crate::foreach::ForeachError;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("line {line}: expected 'key = value', found '{text}'")]
    Syntax { line: usize, text: String },

    #[error("line {line}: queue statement item list is never closed")]
    UnterminatedQueue { line: usize },

    #[error("line {line}: {source}")]
    Queue {
        line: usize,
        #[source]
        source: ForeachError,
    },

    #[error("macro expansion of '{0}' is nested too deeply")]
    MacroDepth(String),

    #[error("no executable given")]
    MissingExecutable,

    #[error("unknown universe '{0}'")]
    UnknownUniverse(String),

    #[error("attribute {name}: {reason}")]
    Attribute { name: String, reason: String },

    #[error("submit description has no queue statement")]
    NoQueueStatement,

    #[error("cannot read submit description {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl SubmitError {
    pub(crate) fn attribute(name: &str, reason: impl ToString) -> Self {
        Self::Attribute {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}
