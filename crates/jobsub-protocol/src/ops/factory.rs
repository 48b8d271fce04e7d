//! Late materialization: item data and factory registration.

use serde::{Deserialize, Serialize};

/// One foreach item. `index` is the item's position in the unsliced source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub index: u32,
    pub text: String,
}

/// Send the item list for a cluster. Must precede `set_job_factory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendItemDataRequest {
    pub cluster_id: i32,
    pub items: Vec<ItemRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendItemDataResponse {
    /// Number of records stored; the client checks it against what it sent.
    pub accepted: u32,
}

/// Register a digest for on-demand materialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetJobFactoryRequest {
    pub cluster_id: i32,
    /// Cap on live (idle, running or held) factory jobs.
    pub max_materialize: i32,
    pub digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetJobFactoryResponse {
    /// Jobs the digest describes in total.
    pub total_jobs: u32,
}
