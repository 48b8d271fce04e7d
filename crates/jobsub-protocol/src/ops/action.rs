//! Bulk job actions: hold, release, remove.
//!
//! `act_on_jobs` stages the action and returns a result ad. When the ad's
//! `ActionResult` is true the client sends `confirm_action`; only then does the
//! queue manager apply the staged changes.

use jobsub_ad::Ad;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::job_id::JobId;

/// Result-ad attribute: did at least one job succeed.
pub const ACTION_RESULT: &str = "ActionResult";
/// Result-ad attribute: granularity of the result (see [`ResultGranularity::code`]).
pub const ACTION_RESULT_TYPE: &str = "ActionResultType";

const JOB_PREFIX: &str = "job_";
const TOTAL_PREFIX: &str = "result_total_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Hold,
    Release,
    Remove,
}

impl ActionKind {
    /// Verb as it appears in user messages ("hold", "release", "remove").
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Hold => "hold",
            Self::Release => "release",
            Self::Remove => "remove",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// How results are reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultGranularity {
    None,
    #[default]
    PerJob,
    Totals,
}

impl ResultGranularity {
    /// Value stored in `ActionResultType`.
    pub fn code(&self) -> i64 {
        match self {
            Self::None => 0,
            Self::PerJob => 1,
            Self::Totals => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::PerJob),
            2 => Some(Self::Totals),
            _ => None,
        }
    }
}

/// Per-job outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionResultCode {
    Error = 0,
    Success = 1,
    NotFound = 2,
    BadStatus = 3,
    AlreadyDone = 4,
    PermissionDenied = 5,
}

impl ActionResultCode {
    pub const ALL: [ActionResultCode; 6] = [
        Self::Error,
        Self::Success,
        Self::NotFound,
        Self::BadStatus,
        Self::AlreadyDone,
        Self::PermissionDenied,
    ];

    pub fn code(&self) -> i64 {
        *self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.code() == code)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Success => "success",
            Self::NotFound => "not found",
            Self::BadStatus => "bad status",
            Self::AlreadyDone => "already done",
            Self::PermissionDenied => "permission denied",
        }
    }
}

/// Per-job result attribute name, `job_<cluster>_<proc>`.
pub fn job_result_attr(id: JobId) -> String {
    format!("{}{}_{}", JOB_PREFIX, id.cluster, id.proc)
}

/// Inverse of [`job_result_attr`]; case-insensitive like every attribute name.
pub fn parse_job_result_attr(name: &str) -> Option<JobId> {
    let prefix = name.get(..JOB_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(JOB_PREFIX) {
        return None;
    }
    let (c, p) = name[JOB_PREFIX.len()..].split_once('_')?;
    Some(JobId::new(c.parse().ok()?, p.parse().ok()?))
}

/// Totals attribute name, `result_total_<code>`.
pub fn total_attr(code: ActionResultCode) -> String {
    format!("{}{}", TOTAL_PREFIX, code.code())
}

pub fn parse_total_attr(name: &str) -> Option<ActionResultCode> {
    let prefix = name.get(..TOTAL_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(TOTAL_PREFIX) {
        return None;
    }
    ActionResultCode::from_code(name[TOTAL_PREFIX.len()..].parse().ok()?)
}

/// Jobs an action applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum JobSelector {
    Ids(Vec<JobId>),
    Constraint(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActOnJobsRequest {
    pub action: ActionKind,
    pub selector: JobSelector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub result_type: ResultGranularity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActOnJobsResponse {
    pub result: Ad,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfirmActionRequest {
    /// Tell the scheduler that job states changed.
    #[serde(default)]
    pub notify: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfirmActionResponse {
    /// Jobs whose state changed.
    pub applied: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_attr_names() {
        let id = JobId::new(42, 7);
        assert_eq!(job_result_attr(id), "job_42_7");
        assert_eq!(parse_job_result_attr("job_42_7"), Some(id));
        assert_eq!(parse_job_result_attr("JOB_42_7"), Some(id));
        assert_eq!(parse_job_result_attr("job_42"), None);
        assert_eq!(parse_job_result_attr("jobs"), None);

        assert_eq!(total_attr(ActionResultCode::AlreadyDone), "result_total_4");
        assert_eq!(parse_total_attr("result_total_5"), Some(ActionResultCode::PermissionDenied));
        assert_eq!(parse_total_attr("result_total_9"), None);
    }

    #[test]
    fn test_selector_wire_shape() {
        let sel = JobSelector::Constraint("Owner == \"alice\"".into());
        let json = serde_json::to_value(&sel).unwrap();
        assert_eq!(json["kind"], "constraint");
        let sel = JobSelector::Ids(vec![JobId::new(1, 0)]);
        let json = serde_json::to_value(&sel).unwrap();
        assert_eq!(json["value"][0]["cluster"], 1);
    }

    #[test]
    fn test_codes() {
        for code in ActionResultCode::ALL {
            assert_eq!(ActionResultCode::from_code(code.code()), Some(code));
        }
        assert_eq!(ResultGranularity::from_code(2), Some(ResultGranularity::Totals));
    }
}
