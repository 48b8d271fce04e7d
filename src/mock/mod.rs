//! In-memory queue manager
//!
//! A queue manager that keeps everything in memory: sessions, transactions,
//! committed clusters and jobs, job factories and staged actions. Tests talk
//! to it in-process through `MockTransport`; `jobsub serve` exposes it over
//! TCP.
//!
//! # Commands
//!
//! - `begin`, `commit`, `disconnect`: session and transaction control
//! - `new_cluster`, `new_proc`, `destroy_cluster`: id allocation
//! - `set_attribute`, `set_attribute_by_constraint`: record edits
//! - `send_item_data`, `set_job_factory`: late materialization
//! - `act_on_jobs`, `confirm_action`: hold, release and remove
//! - `query_jobs`: read committed jobs

mod failure;
mod schedd;
mod server;
mod state;

pub use failure::{FailureConfig, FailureInjector, Fault};
pub use schedd::{MockConfig, MockLimits, MockSchedd, SessionId};
pub use server::{serve, spawn};
