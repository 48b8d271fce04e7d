//! jobsub Protocol Types
//!
//! Defines the JSON envelope exchanged between submission clients and the
//! queue manager, one document per line.

pub mod command;
pub mod error;
pub mod job_id;
pub mod ops;
pub mod request;
pub mod response;

pub use command::Command;
pub use error::{ErrorCode, QmgmtError};
pub use job_id::JobId;
pub use request::QmgmtRequest;
pub use response::QmgmtResponse;

/// Protocol version carried by `begin`, before a version is negotiated.
pub const PROTOCOL_VERSION_PROBE: i32 = 0;

/// Minimum protocol version supported by this implementation.
pub const PROTOCOL_MIN: i32 = 1;

/// Maximum protocol version supported by this implementation.
pub const PROTOCOL_MAX: i32 = 1;

/// Capability names advertised in the `begin` response.
pub mod features {
    /// The server accepts `send_item_data` and `set_job_factory`.
    pub const LATE_MATERIALIZATION: &str = "late_materialization";
    /// Action results carry per-job codes or totals instead of a single boolean.
    pub const GRANULAR_ACTION_RESULTS: &str = "granular_action_results";
}
