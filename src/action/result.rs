//! Reading action result ads and rendering them for people.
//!
//! Three reply shapes exist. Totals carry `result_total_<code>` counters,
//! per-job replies carry `job_<c>_<p>` codes, and the legacy shape is a bare
//! `ActionResult` boolean. The shape is detected from the attributes present.

use std::collections::BTreeMap;

use jobsub_ad::Ad;
use jobsub_protocol::ops::action::{
    parse_job_result_attr, parse_total_attr, ACTION_RESULT,
};
use jobsub_protocol::ops::{ActionKind, ActionResultCode, JobSelector};
use jobsub_protocol::JobId;

use super::error::ActionError;

/// Result of one job. `None` means the reply did not mention it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOutcome {
    pub job: JobId,
    pub code: Option<ActionResultCode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    PerJob(Vec<JobOutcome>),
    Totals(BTreeMap<ActionResultCode, u64>),
    /// Legacy reply to a constraint: only whether anything succeeded.
    Summary { constraint: String, succeeded: bool },
}

/// Decode a result ad for a request that used `selector`.
pub fn parse_result(ad: &Ad, selector: &JobSelector) -> Result<ActionOutcome, ActionError> {
    let mut totals = BTreeMap::new();
    let mut per_job = BTreeMap::new();
    for name in ad.names() {
        if let Some(code) = parse_total_attr(name) {
            let count = ad.lookup_int(name).unwrap_or(0).max(0) as u64;
            totals.insert(code, count);
        } else if let Some(job) = parse_job_result_attr(name) {
            let code = ad
                .lookup_int(name)
                .and_then(ActionResultCode::from_code)
                .unwrap_or(ActionResultCode::Error);
            per_job.insert(job, code);
        }
    }

    if !totals.is_empty() {
        for code in ActionResultCode::ALL {
            totals.entry(code).or_insert(0);
        }
        return Ok(ActionOutcome::Totals(totals));
    }

    let requested: &[JobId] = match selector {
        JobSelector::Ids(ids) => ids,
        JobSelector::Constraint(_) => &[],
    };

    if !per_job.is_empty() {
        let mut outcomes: Vec<JobOutcome> = requested
            .iter()
            .map(|job| JobOutcome {
                job: *job,
                code: per_job.remove(job),
            })
            .collect();
        outcomes.extend(per_job.into_iter().map(|(job, code)| JobOutcome {
            job,
            code: Some(code),
        }));
        return Ok(ActionOutcome::PerJob(outcomes));
    }

    let Some(succeeded) = ad.lookup_bool(ACTION_RESULT) else {
        return Err(ActionError::MissingResult(describe(selector)));
    };
    tracing::debug!(succeeded, "legacy action result");
    Ok(match selector {
        JobSelector::Ids(ids) => {
            let code = if succeeded {
                ActionResultCode::Success
            } else {
                ActionResultCode::Error
            };
            ActionOutcome::PerJob(
                ids.iter()
                    .map(|job| JobOutcome {
                        job: *job,
                        code: Some(code),
                    })
                    .collect(),
            )
        }
        JobSelector::Constraint(c) => ActionOutcome::Summary {
            constraint: c.clone(),
            succeeded,
        },
    })
}

fn describe(selector: &JobSelector) -> String {
    match selector {
        JobSelector::Ids(ids) => {
            let ids: Vec<String> = ids.iter().map(JobId::to_string).collect();
            format!("jobs {}", ids.join(" "))
        }
        JobSelector::Constraint(c) => format!("constraint ({})", c),
    }
}

fn done_phrase(action: ActionKind) -> &'static str {
    match action {
        ActionKind::Hold => "held",
        ActionKind::Release => "released",
        ActionKind::Remove => "marked for removal",
    }
}

/// The message printed for one job.
pub fn job_message(action: ActionKind, outcome: &JobOutcome) -> String {
    let job = outcome.job;
    let Some(code) = outcome.code else {
        return format!("No result found for job {}", job);
    };
    match (code, action) {
        (ActionResultCode::Success, _) => format!("Job {} {}", job, done_phrase(action)),
        (ActionResultCode::NotFound, _) => format!("Job {} not found", job),
        (ActionResultCode::PermissionDenied, _) => {
            format!("Permission denied to {} job {}", action.verb(), job)
        }
        (ActionResultCode::BadStatus, ActionKind::Release) => {
            format!("Job {} not held to be released", job)
        }
        (ActionResultCode::BadStatus, _) => {
            format!("Job {} is finished and cannot be {}", job, done_phrase(action))
        }
        (ActionResultCode::AlreadyDone, _) => format!("Job {} already {}", job, done_phrase(action)),
        (ActionResultCode::Error, _) => format!("Failed to {} job {}", action.verb(), job),
    }
}

/// Outcome of one action invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionReport {
    pub action: ActionKind,
    pub outcome: ActionOutcome,
    /// Jobs the queue manager applied the action to, once confirmed.
    pub applied: u32,
}

impl ActionReport {
    /// Lines to print, one per job or per non-zero counter.
    pub fn messages(&self) -> Vec<String> {
        match &self.outcome {
            ActionOutcome::PerJob(outcomes) => outcomes
                .iter()
                .map(|o| job_message(self.action, o))
                .collect(),
            ActionOutcome::Totals(totals) => totals
                .iter()
                .filter(|(_, n)| **n > 0)
                .map(|(code, n)| {
                    let what = match code {
                        ActionResultCode::Success => done_phrase(self.action),
                        other => other.label(),
                    };
                    format!("{} job(s) {}", n, what)
                })
                .collect(),
            ActionOutcome::Summary {
                constraint,
                succeeded: true,
            } => vec![format!(
                "All jobs matching constraint ({}) have been {}",
                constraint,
                done_phrase(self.action)
            )],
            ActionOutcome::Summary {
                constraint,
                succeeded: false,
            } => vec![format!(
                "Couldn't find/{} all jobs matching constraint ({})",
                self.action.verb(),
                constraint
            )],
        }
    }

    /// True when nothing failed. Already-done jobs count as success, and a
    /// constraint that matched nothing is not a failure.
    pub fn all_ok(&self) -> bool {
        let ok = |code: &ActionResultCode| {
            matches!(code, ActionResultCode::Success | ActionResultCode::AlreadyDone)
        };
        match &self.outcome {
            ActionOutcome::PerJob(outcomes) => outcomes.iter().all(|o| o.code.as_ref().is_some_and(ok)),
            ActionOutcome::Totals(totals) => totals.iter().all(|(code, n)| ok(code) || *n == 0),
            ActionOutcome::Summary { succeeded, .. } => *succeeded,
        }
    }

    /// Count of jobs reported for `code`.
    pub fn count(&self, code: ActionResultCode) -> u64 {
        match &self.outcome {
            ActionOutcome::PerJob(outcomes) => {
                outcomes.iter().filter(|o| o.code == Some(code)).count() as u64
            }
            ActionOutcome::Totals(totals) => totals.get(&code).copied().unwrap_or(0),
            ActionOutcome::Summary { .. } => 0,
        }
    }
}
