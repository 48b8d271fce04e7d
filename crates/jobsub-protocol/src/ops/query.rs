//! Job queries.

use jobsub_ad::Ad;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryJobsRequest {
    /// Constraint text; absent means every job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
}

/// Committed process records, each flattened over its cluster record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryJobsResponse {
    pub jobs: Vec<Ad>,
}
