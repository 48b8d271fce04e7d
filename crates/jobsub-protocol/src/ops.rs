//! Command-specific payload types.

pub mod action;
pub mod alloc;
pub mod attr;
pub mod factory;
pub mod query;
pub mod session;

pub use action::{
    ActOnJobsRequest, ActOnJobsResponse, ActionKind, ActionResultCode, ConfirmActionRequest,
    ConfirmActionResponse, JobSelector, ResultGranularity,
};
pub use alloc::{
    DestroyClusterRequest, DestroyClusterResponse, NewClusterRequest, NewClusterResponse,
    NewProcRequest, NewProcResponse,
};
pub use attr::{
    SetAttributeByConstraintRequest, SetAttributeByConstraintResponse, SetAttributeFlags,
    SetAttributeRequest, SetAttributeResponse,
};
pub use factory::{ItemRecord, SendItemDataRequest, SendItemDataResponse, SetJobFactoryRequest, SetJobFactoryResponse};
pub use query::{QueryJobsRequest, QueryJobsResponse};
pub use session::{BeginRequest, BeginResponse, CommitRequest, CommitResponse, DisconnectResponse};
