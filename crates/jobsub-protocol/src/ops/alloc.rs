//! Identifier allocation and rollback.

use serde::{Deserialize, Serialize};

/// New-cluster request payload (empty).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewClusterRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClusterResponse {
    pub cluster_id: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProcRequest {
    pub cluster_id: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProcResponse {
    pub proc_id: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestroyClusterRequest {
    pub cluster_id: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestroyClusterResponse {
    /// Number of process records removed with the cluster.
    pub destroyed_procs: u32,
}
