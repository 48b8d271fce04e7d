//! Attribute records for jobsub.
//!
//! An [`Ad`] is an ordered set of named expressions, the unit of data
//! exchanged with the queue manager. Names are case-insensitive. A process
//! record can be chained to its cluster record with [`Chained`], so that
//! lookups fall back to the parent when an attribute is not defined locally.

mod ad;
mod error;
mod eval;
mod expr;
mod parser;
mod value;

pub use ad::{Ad, AttrLookup, Chained};
pub use error::ParseError;
pub use eval::matches;
pub use expr::{BinaryOp, Expr, UnaryOp};
pub use value::Value;

/// Attribute names shared by every component that builds or inspects job records.
pub mod attrs {
    pub const CLUSTER_ID: &str = "ClusterId";
    pub const PROC_ID: &str = "ProcId";
    pub const OWNER: &str = "Owner";
    pub const USER: &str = "User";
    pub const JOB_UNIVERSE: &str = "JobUniverse";
    pub const JOB_STATUS: &str = "JobStatus";
    pub const LAST_JOB_STATUS: &str = "LastJobStatus";
    pub const Q_DATE: &str = "QDate";
    pub const ENTERED_CURRENT_STATUS: &str = "EnteredCurrentStatus";
    pub const CMD: &str = "Cmd";
    pub const ARGS: &str = "Args";
    pub const IWD: &str = "Iwd";
    pub const HOLD_REASON: &str = "HoldReason";
    pub const HOLD_REASON_CODE: &str = "HoldReasonCode";
    pub const RELEASE_REASON: &str = "ReleaseReason";
    pub const REMOVE_REASON: &str = "RemoveReason";
    pub const JOB_MATERIALIZE_LIMIT: &str = "JobMaterializeLimit";
    pub const JOB_MATERIALIZE_MAX_IDLE: &str = "JobMaterializeMaxIdle";
}

/// Integer job status codes stored in `JobStatus`.
pub mod status {
    pub const IDLE: i64 = 1;
    pub const RUNNING: i64 = 2;
    pub const REMOVED: i64 = 3;
    pub const COMPLETED: i64 = 4;
    pub const HELD: i64 = 5;
}
