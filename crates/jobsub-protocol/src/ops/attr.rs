//! Attribute assignment.

use serde::{Deserialize, Serialize};

use crate::job_id::JobId;

/// Flags modifying an assignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetAttributeFlags {
    /// Do not send a response. A failure abandons the whole transaction.
    #[serde(default)]
    pub no_ack: bool,
}

/// Assign one attribute. `job.proc == -1` targets the cluster record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetAttributeRequest {
    pub job: JobId,
    pub name: String,
    /// Expression text.
    pub value: String,
    #[serde(default)]
    pub flags: SetAttributeFlags,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetAttributeResponse {}

/// Assign one attribute on every committed job matching `constraint`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetAttributeByConstraintRequest {
    pub constraint: String,
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub flags: SetAttributeFlags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetAttributeByConstraintResponse {
    /// Jobs the assignment touched.
    pub matched: u32,
}
