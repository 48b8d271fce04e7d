//! Queue transaction client.
//!
//! [`JobQueue`] is the capability set submission needs from a queue manager.
//! [`QueueClient`] implements it over a [`Transport`]; the dry-run recorder
//! in [`super::dry_run`] implements it without one.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use jobsub_ad::Ad;
use jobsub_protocol::ops::{
    CommitRequest, CommitResponse, DestroyClusterRequest, DestroyClusterResponse,
    DisconnectResponse, ItemRecord, NewClusterRequest, NewClusterResponse, NewProcRequest,
    NewProcResponse, QueryJobsRequest, QueryJobsResponse, SendItemDataRequest,
    SendItemDataResponse, SetAttributeByConstraintRequest, SetAttributeByConstraintResponse,
    SetAttributeFlags, SetAttributeRequest, SetAttributeResponse, SetJobFactoryRequest,
    SetJobFactoryResponse,
};
use jobsub_protocol::{Command, JobId};

use super::channel::QmgmtChannel;
use super::error::{Ceiling, QueueError};
use super::routing::RoutedAd;
use super::transport::Transport;

/// Transaction state.
///
/// `Closed -> Open -> (Allocating | Assigning)* -> Committed | Aborted`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPhase {
    Closed,
    Open,
    Allocating,
    Assigning,
    Committed,
    Aborted,
}

impl TxPhase {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open | Self::Allocating | Self::Assigning)
    }
}

impl fmt::Display for TxPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::Allocating => "allocating",
            Self::Assigning => "assigning",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        })
    }
}

/// What a successful commit reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    pub warnings: Vec<String>,
    pub clusters: Vec<i32>,
}

impl From<CommitResponse> for CommitOutcome {
    fn from(r: CommitResponse) -> Self {
        Self {
            warnings: r.warnings,
            clusters: r.clusters,
        }
    }
}

/// Operations submission performs against a queue manager.
pub trait JobQueue {
    /// Open a transaction. A no-op while one is open.
    fn begin(&mut self) -> Result<(), QueueError>;

    fn phase(&self) -> TxPhase;

    /// Capability advertised by the queue manager at begin.
    fn has_feature(&self, feature: &str) -> bool;

    fn allocate_cluster(&mut self) -> Result<i32, QueueError>;

    fn allocate_process(&mut self, cluster_id: i32) -> Result<i32, QueueError>;

    /// Send every attribute of `ad` for `job`, in order.
    fn assign(&mut self, job: JobId, ad: &Ad, flags: SetAttributeFlags) -> Result<(), QueueError>;

    fn destroy_cluster(&mut self, cluster_id: i32) -> Result<(), QueueError>;

    /// Register item records for a factory cluster. Returns the accepted count.
    fn send_item_data(&mut self, cluster_id: i32, items: &[ItemRecord]) -> Result<u32, QueueError>;

    /// Register a factory. Returns the number of jobs it will produce.
    fn set_job_factory(
        &mut self,
        cluster_id: i32,
        max_materialize: i32,
        digest: &str,
    ) -> Result<u32, QueueError>;

    fn commit(&mut self, discard: bool) -> Result<CommitOutcome, QueueError>;

    /// Send a routed job: its cluster record first, when present.
    fn assign_routed(
        &mut self,
        job: JobId,
        routed: &RoutedAd,
        flags: SetAttributeFlags,
    ) -> Result<(), QueueError> {
        if let Some(cluster) = &routed.cluster {
            self.assign(JobId::cluster_record(job.cluster), cluster, flags)?;
        }
        self.assign(job, &routed.proc, flags)
    }
}

/// Queue client configuration
#[derive(Debug, Clone, Default)]
pub struct QueueClientConfig {
    pub owner: String,
    pub token: Option<String>,
    /// Client-side process ceiling per cluster (0 = unlimited)
    pub max_procs_per_cluster: u32,
}

/// Networked [`JobQueue`].
pub struct QueueClient {
    channel: QmgmtChannel,
    config: QueueClientConfig,
    phase: TxPhase,
    procs: HashMap<i32, u32>,
}

impl QueueClient {
    pub fn new(transport: Arc<dyn Transport>, config: QueueClientConfig) -> Self {
        Self {
            channel: QmgmtChannel::new(transport),
            config,
            phase: TxPhase::Closed,
            procs: HashMap::new(),
        }
    }

    pub fn config(&self) -> &QueueClientConfig {
        &self.config
    }

    pub fn channel(&self) -> &QmgmtChannel {
        &self.channel
    }

    fn require_open(&self, command: Command) -> Result<(), QueueError> {
        if self.phase.is_open() {
            Ok(())
        } else {
            Err(QueueError::Protocol(format!(
                "{} needs an open transaction (transaction is {})",
                command, self.phase
            )))
        }
    }

    /// Update attribute `name` on every committed job matching `constraint`.
    pub fn set_attribute_by_constraint(
        &mut self,
        constraint: &str,
        name: &str,
        value: &str,
    ) -> Result<u32, QueueError> {
        self.require_open(Command::SetAttributeByConstraint)?;
        self.phase = TxPhase::Assigning;
        let resp: SetAttributeByConstraintResponse = self.channel.call(
            Command::SetAttributeByConstraint,
            &SetAttributeByConstraintRequest {
                constraint: constraint.to_string(),
                name: name.to_string(),
                value: value.to_string(),
                flags: SetAttributeFlags::default(),
            },
        )?;
        Ok(resp.matched)
    }

    /// Committed jobs matching `constraint`, each flattened over its cluster.
    pub fn query_jobs(&mut self, constraint: Option<&str>) -> Result<Vec<Ad>, QueueError> {
        if self.channel.negotiated_version().is_none() {
            self.begin()?;
        }
        let resp: QueryJobsResponse = self.channel.call(
            Command::QueryJobs,
            &QueryJobsRequest {
                constraint: constraint.map(str::to_string),
            },
        )?;
        Ok(resp.jobs)
    }

    /// End the session. Returns true if an open transaction was discarded.
    pub fn disconnect(&mut self) -> Result<bool, QueueError> {
        if self.channel.negotiated_version().is_none() {
            return Ok(false);
        }
        let resp: DisconnectResponse = self.channel.call(Command::Disconnect, &())?;
        if self.phase.is_open() {
            self.phase = TxPhase::Aborted;
        }
        Ok(resp.discarded)
    }
}

impl JobQueue for QueueClient {
    fn begin(&mut self) -> Result<(), QueueError> {
        if self.phase.is_open() {
            return Ok(());
        }
        let token = self.config.token.clone();
        self.channel.begin(&self.config.owner, token.as_deref())?;
        self.phase = TxPhase::Open;
        self.procs.clear();
        Ok(())
    }

    fn phase(&self) -> TxPhase {
        self.phase
    }

    fn has_feature(&self, feature: &str) -> bool {
        self.channel.has_feature(feature)
    }

    fn allocate_cluster(&mut self) -> Result<i32, QueueError> {
        self.require_open(Command::NewCluster)?;
        self.phase = TxPhase::Allocating;
        let resp: NewClusterResponse = self.channel.call(Command::NewCluster, &NewClusterRequest {})?;
        tracing::debug!(cluster_id = resp.cluster_id, "allocated cluster");
        self.procs.insert(resp.cluster_id, 0);
        Ok(resp.cluster_id)
    }

    fn allocate_process(&mut self, cluster_id: i32) -> Result<i32, QueueError> {
        self.require_open(Command::NewProc)?;
        let limit = self.config.max_procs_per_cluster;
        let allocated = self.procs.get(&cluster_id).copied().unwrap_or(0);
        if limit > 0 && allocated >= limit {
            return Err(QueueError::Ceiling {
                kind: Ceiling::MaxProcsPerCluster,
                limit: Some(u64::from(limit)),
                message: format!("cluster {} already has {} procs", cluster_id, allocated),
            });
        }

        self.phase = TxPhase::Allocating;
        let resp: NewProcResponse = self
            .channel
            .call(Command::NewProc, &NewProcRequest { cluster_id })?;
        tracing::trace!(cluster_id, proc_id = resp.proc_id, "allocated proc");
        self.procs.insert(cluster_id, allocated + 1);
        Ok(resp.proc_id)
    }

    fn assign(&mut self, job: JobId, ad: &Ad, flags: SetAttributeFlags) -> Result<(), QueueError> {
        self.require_open(Command::SetAttribute)?;
        self.phase = TxPhase::Assigning;
        for (name, expr) in ad.iter() {
            let request = SetAttributeRequest {
                job,
                name: name.to_string(),
                value: expr.to_string(),
                flags,
            };
            if flags.no_ack {
                self.channel.send(Command::SetAttribute, &request)?;
            } else {
                let _: SetAttributeResponse = self.channel.call(Command::SetAttribute, &request)?;
            }
        }
        Ok(())
    }

    fn destroy_cluster(&mut self, cluster_id: i32) -> Result<(), QueueError> {
        self.require_open(Command::DestroyCluster)?;
        let resp: DestroyClusterResponse = self
            .channel
            .call(Command::DestroyCluster, &DestroyClusterRequest { cluster_id })?;
        tracing::debug!(cluster_id, procs = resp.destroyed_procs, "destroyed cluster");
        self.procs.remove(&cluster_id);
        Ok(())
    }

    fn send_item_data(&mut self, cluster_id: i32, items: &[ItemRecord]) -> Result<u32, QueueError> {
        self.require_open(Command::SendItemData)?;
        self.phase = TxPhase::Assigning;
        let resp: SendItemDataResponse = self.channel.call(
            Command::SendItemData,
            &SendItemDataRequest {
                cluster_id,
                items: items.to_vec(),
            },
        )?;
        Ok(resp.accepted)
    }

    fn set_job_factory(
        &mut self,
        cluster_id: i32,
        max_materialize: i32,
        digest: &str,
    ) -> Result<u32, QueueError> {
        self.require_open(Command::SetJobFactory)?;
        self.phase = TxPhase::Assigning;
        let resp: SetJobFactoryResponse = self.channel.call(
            Command::SetJobFactory,
            &SetJobFactoryRequest {
                cluster_id,
                max_materialize,
                digest: digest.to_string(),
            },
        )?;
        Ok(resp.total_jobs)
    }

    fn commit(&mut self, discard: bool) -> Result<CommitOutcome, QueueError> {
        self.require_open(Command::Commit)?;
        let result: Result<CommitResponse, QueueError> =
            self.channel.call(Command::Commit, &CommitRequest { discard });
        match result {
            Ok(resp) => {
                self.phase = if discard {
                    TxPhase::Aborted
                } else {
                    TxPhase::Committed
                };
                for warning in &resp.warnings {
                    tracing::warn!("{}", warning);
                }
                Ok(resp.into())
            }
            Err(e) => {
                self.phase = TxPhase::Aborted;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSchedd;
    use crate::queue::transport::MockTransport;

    fn client(schedd: &MockSchedd, max_procs: u32) -> QueueClient {
        QueueClient::new(
            Arc::new(MockTransport::new(schedd)),
            QueueClientConfig {
                owner: "alice".to_string(),
                token: None,
                max_procs_per_cluster: max_procs,
            },
        )
    }

    fn simple_ad() -> Ad {
        let mut ad = Ad::new();
        ad.insert_value("Cmd", "/bin/true");
        ad
    }

    #[test]
    fn test_phases() {
        let schedd = MockSchedd::new();
        let mut q = client(&schedd, 0);
        assert_eq!(q.phase(), TxPhase::Closed);
        assert!(q.allocate_cluster().is_err());

        q.begin().unwrap();
        assert_eq!(q.phase(), TxPhase::Open);
        q.begin().unwrap();

        let c = q.allocate_cluster().unwrap();
        assert_eq!(q.phase(), TxPhase::Allocating);
        let p = q.allocate_process(c).unwrap();
        q.assign(JobId::new(c, p), &simple_ad(), SetAttributeFlags::default())
            .unwrap();
        assert_eq!(q.phase(), TxPhase::Assigning);

        let outcome = q.commit(false).unwrap();
        assert_eq!(outcome.clusters, vec![c]);
        assert_eq!(q.phase(), TxPhase::Committed);
        assert!(q.allocate_cluster().is_err());

        q.begin().unwrap();
        assert_eq!(q.phase(), TxPhase::Open);
        q.commit(true).unwrap();
        assert_eq!(q.phase(), TxPhase::Aborted);
    }

    #[test]
    fn test_client_side_proc_ceiling() {
        let schedd = MockSchedd::new();
        let mut q = client(&schedd, 2);
        q.begin().unwrap();
        let c = q.allocate_cluster().unwrap();
        assert_eq!(q.allocate_process(c).unwrap(), 0);
        assert_eq!(q.allocate_process(c).unwrap(), 1);
        let err = q.allocate_process(c).unwrap_err();
        assert_eq!(err.ceiling(), Some(Ceiling::MaxProcsPerCluster));
    }

    #[test]
    fn test_query_and_set_by_constraint() {
        let schedd = MockSchedd::new();
        let mut q = client(&schedd, 0);
        q.begin().unwrap();
        let c = q.allocate_cluster().unwrap();
        for _ in 0..2 {
            let p = q.allocate_process(c).unwrap();
            q.assign(JobId::new(c, p), &simple_ad(), SetAttributeFlags::default())
                .unwrap();
        }
        q.commit(false).unwrap();

        q.begin().unwrap();
        let touched = q
            .set_attribute_by_constraint("ProcId == 1", "Tag", "\"second\"")
            .unwrap();
        assert_eq!(touched, 1);
        q.commit(false).unwrap();

        let jobs = q.query_jobs(Some("Tag == \"second\"")).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].lookup_int("ProcId"), Some(1));
        assert_eq!(jobs[0].lookup_str("Cmd").as_deref(), Some("/bin/true"));
    }

    #[test]
    fn test_disconnect_discards_open_transaction() {
        let schedd = MockSchedd::new();
        let mut q = client(&schedd, 0);
        q.begin().unwrap();
        let c = q.allocate_cluster().unwrap();
        let p = q.allocate_process(c).unwrap();
        q.assign(JobId::new(c, p), &simple_ad(), SetAttributeFlags::default())
            .unwrap();
        assert!(q.disconnect().unwrap());
        assert_eq!(q.phase(), TxPhase::Aborted);
        assert!(schedd.committed_jobs().is_empty());
    }
}
