//! Job Action Protocol
//!
//! Hold, release or remove jobs named by id or by constraint, and report
//! what happened to each of them.

mod client;
mod error;
mod request;
mod result;

pub use client::ActionClient;
pub use error::ActionError;
pub use request::{parse_granularity, selector_for, ActionRequest, Target};
pub use result::{job_message, parse_result, ActionOutcome, ActionReport, JobOutcome};
