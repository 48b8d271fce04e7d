//! Job identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A `(cluster, proc)` pair. `proc == -1` names the cluster record itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId {
    pub cluster: i32,
    pub proc: i32,
}

impl JobId {
    pub fn new(cluster: i32, proc: i32) -> Self {
        Self { cluster, proc }
    }

    /// The cluster-level record of `cluster`.
    pub fn cluster_record(cluster: i32) -> Self {
        Self { cluster, proc: -1 }
    }

    pub fn is_cluster_record(&self) -> bool {
        self.proc < 0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.cluster, self.proc)
    }
}

impl FromStr for JobId {
    type Err = String;

    /// Parse `c.p`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (c, p) = s
            .split_once('.')
            .ok_or_else(|| format!("job id '{}' is not of the form cluster.proc", s))?;
        let cluster = c
            .parse::<i32>()
            .map_err(|_| format!("invalid cluster id in '{}'", s))?;
        let proc = p
            .parse::<i32>()
            .map_err(|_| format!("invalid proc id in '{}'", s))?;
        if cluster <= 0 || proc < 0 {
            return Err(format!("job id '{}' is out of range", s));
        }
        Ok(Self { cluster, proc })
    }
}
