//! Submit descriptions
//!
//! Parsing of submit description files, the macro context jobs are expanded
//! in, and construction of job records.

mod context;
mod error;
mod job_ad;
mod template;

pub use context::{is_live_name, LiveVars, SubmitContext, LIVE_NAMES, MAX_MACRO_DEPTH};
pub use error::SubmitError;
pub use job_ad::{
    make_job_ad, universe_code, JobAdOptions, FACTORY_KNOBS, HOLD_CODE_SUBMITTED_ON_HOLD,
};
pub use template::{QueueStatement, SubmitTemplate, TemplateEntry};
