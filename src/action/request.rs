//! Building action requests from command-line targets.

use std::str::FromStr;
use std::sync::OnceLock;

use regex_lite::Regex;

use jobsub_protocol::ops::{ActionKind, JobSelector, ResultGranularity};
use jobsub_protocol::JobId;

use super::error::ActionError;

/// One hold, release or remove request.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub action: ActionKind,
    pub selector: JobSelector,
    pub reason: Option<String>,
    pub granularity: ResultGranularity,
    /// Ask the queue manager to notify the scheduler once applied.
    pub notify: bool,
}

impl ActionRequest {
    pub fn for_ids(action: ActionKind, ids: Vec<JobId>) -> Self {
        Self::new(action, JobSelector::Ids(ids))
    }

    pub fn for_constraint(action: ActionKind, constraint: impl Into<String>) -> Self {
        Self::new(action, JobSelector::Constraint(constraint.into()))
    }

    fn new(action: ActionKind, selector: JobSelector) -> Self {
        Self {
            action,
            selector,
            reason: None,
            granularity: ResultGranularity::PerJob,
            notify: true,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_granularity(mut self, granularity: ResultGranularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_notify(mut self, notify: bool) -> Self {
        self.notify = notify;
        self
    }

    /// Ids named explicitly, if the selector is an id list.
    pub fn ids(&self) -> &[JobId] {
        match &self.selector {
            JobSelector::Ids(ids) => ids,
            JobSelector::Constraint(_) => &[],
        }
    }
}

/// A parsed command-line target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Job(JobId),
    Cluster(i32),
    User(String),
}

/// `c.p`, `c` or a user name.
fn target_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:(\d+)\.(\d+)|(\d+)|([A-Za-z_][A-Za-z0-9_.@-]*))$").expect("valid regex")
    })
}

impl FromStr for Target {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ActionError::InvalidTarget(s.to_string());
        let caps = target_re().captures(s).ok_or_else(invalid)?;
        if let (Some(c), Some(p)) = (caps.get(1), caps.get(2)) {
            let cluster = c.as_str().parse().map_err(|_| invalid())?;
            let proc = p.as_str().parse().map_err(|_| invalid())?;
            return Ok(Self::Job(JobId::new(cluster, proc)));
        }
        if let Some(c) = caps.get(3) {
            return c.as_str().parse().map(Self::Cluster).map_err(|_| invalid());
        }
        if let Some(user) = caps.get(4) {
            return Ok(Self::User(user.as_str().to_string()));
        }
        Err(invalid())
    }
}

impl Target {
    fn constraint_term(&self) -> String {
        match self {
            Self::Job(id) => format!("(ClusterId == {} && ProcId == {})", id.cluster, id.proc),
            Self::Cluster(c) => format!("ClusterId == {}", c),
            Self::User(name) => format!("Owner == \"{}\"", name.replace('"', "\\\"")),
        }
    }
}

/// Turn targets and an optional constraint into a selector.
///
/// Only `c.p` targets with no constraint stay an id list. Anything else
/// becomes one constraint, the terms joined with `||`.
pub fn selector_for(targets: &[String], constraint: Option<&str>) -> Result<JobSelector, ActionError> {
    let parsed = targets
        .iter()
        .map(|t| t.parse::<Target>())
        .collect::<Result<Vec<_>, _>>()?;
    let constraint = constraint.map(str::trim).filter(|c| !c.is_empty());

    if parsed.is_empty() && constraint.is_none() {
        return Err(ActionError::NoTargets);
    }

    let ids: Option<Vec<JobId>> = parsed
        .iter()
        .map(|t| match t {
            Target::Job(id) => Some(*id),
            _ => None,
        })
        .collect();
    if let (Some(ids), None) = (&ids, constraint) {
        return Ok(JobSelector::Ids(ids.clone()));
    }

    let mut terms: Vec<String> = parsed.iter().map(Target::constraint_term).collect();
    if let Some(c) = constraint {
        if terms.is_empty() {
            return Ok(JobSelector::Constraint(c.to_string()));
        }
        terms.push(format!("({})", c));
    }
    Ok(JobSelector::Constraint(terms.join(" || ")))
}

/// Parse `none`, `per_job` or `totals`.
pub fn parse_granularity(text: &str) -> Result<ResultGranularity, ActionError> {
    match text.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "none" => Ok(ResultGranularity::None),
        "per_job" | "perjob" | "long" => Ok(ResultGranularity::PerJob),
        "totals" => Ok(ResultGranularity::Totals),
        _ => Err(ActionError::InvalidGranularity(text.to_string())),
    }
}
