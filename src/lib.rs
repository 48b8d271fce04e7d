//! jobsub - batch job submission
//!
//! This crate turns submit descriptions into jobs in a remote queue manager
//! and acts on those jobs afterwards:
//! - [`foreach`] expands `queue` statements into per-job variable bindings
//! - [`queue`] runs id-allocating transactions against the queue manager
//! - [`factory`] hands a digest and item data to the queue manager instead of
//!   sending every job
//! - [`action`] holds, releases and removes jobs in bulk
//!
//! [`mock`] is an in-memory queue manager speaking the same protocol, used by
//! the test suites and by `jobsub serve`.

pub mod action;
pub mod config;
pub mod factory;
pub mod foreach;
pub mod logging;
pub mod mock;
pub mod pipeline;
pub mod queue;
pub mod signal;
pub mod submit;

pub use jobsub_ad as ad;
pub use jobsub_protocol as protocol;

pub use action::{ActionClient, ActionError, ActionReport, ActionRequest};
pub use config::EffectiveConfig;
pub use foreach::{EmptyFieldPolicy, ForeachPlan};
pub use pipeline::{prepare, PipelineError, ReportStyle, SubmitOptions, SubmitReport, Submitter};
pub use queue::{DryRunQueue, JobQueue, QueueClient, QueueClientConfig, QueueError};
pub use submit::{SubmitContext, SubmitTemplate};
