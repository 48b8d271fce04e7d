//! In-memory [`JobQueue`] that records what would be sent.

use std::collections::HashMap;

use jobsub_ad::Ad;
use jobsub_protocol::features;
use jobsub_protocol::ops::{ItemRecord, SetAttributeFlags};
use jobsub_protocol::JobId;

use super::client::{CommitOutcome, JobQueue, TxPhase};
use super::error::QueueError;

/// Records every operation as a line of text. Ids are invented locally,
/// starting at cluster 1.
#[derive(Debug)]
pub struct DryRunQueue {
    phase: TxPhase,
    next_cluster: i32,
    procs: HashMap<i32, i32>,
    open_clusters: Vec<i32>,
    item_counts: HashMap<i32, usize>,
    late_materialization: bool,
    transcript: Vec<String>,
}

impl Default for DryRunQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DryRunQueue {
    pub fn new() -> Self {
        Self {
            phase: TxPhase::Closed,
            next_cluster: 1,
            procs: HashMap::new(),
            open_clusters: Vec::new(),
            item_counts: HashMap::new(),
            late_materialization: true,
            transcript: Vec::new(),
        }
    }

    /// Pretend the queue manager cannot do late materialization.
    pub fn without_late_materialization(mut self) -> Self {
        self.late_materialization = false;
        self
    }

    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    pub fn into_transcript(self) -> Vec<String> {
        self.transcript
    }

    fn record(&mut self, line: String) {
        tracing::trace!("{}", line);
        self.transcript.push(line);
    }

    fn require_open(&self, what: &str) -> Result<(), QueueError> {
        if self.phase.is_open() {
            Ok(())
        } else {
            Err(QueueError::Protocol(format!(
                "{} needs an open transaction (transaction is {})",
                what, self.phase
            )))
        }
    }
}

impl JobQueue for DryRunQueue {
    fn begin(&mut self) -> Result<(), QueueError> {
        if !self.phase.is_open() {
            self.phase = TxPhase::Open;
            self.open_clusters.clear();
            self.record("begin".to_string());
        }
        Ok(())
    }

    fn phase(&self) -> TxPhase {
        self.phase
    }

    fn has_feature(&self, feature: &str) -> bool {
        match feature {
            features::LATE_MATERIALIZATION => self.late_materialization,
            features::GRANULAR_ACTION_RESULTS => true,
            _ => false,
        }
    }

    fn allocate_cluster(&mut self) -> Result<i32, QueueError> {
        self.require_open("new_cluster")?;
        self.phase = TxPhase::Allocating;
        let cluster = self.next_cluster;
        self.next_cluster += 1;
        self.procs.insert(cluster, 0);
        self.open_clusters.push(cluster);
        self.record(format!("new_cluster -> {}", cluster));
        Ok(cluster)
    }

    fn allocate_process(&mut self, cluster_id: i32) -> Result<i32, QueueError> {
        self.require_open("new_proc")?;
        self.phase = TxPhase::Allocating;
        let next = self.procs.entry(cluster_id).or_insert(0);
        let proc_id = *next;
        *next += 1;
        self.record(format!("new_proc {} -> {}", cluster_id, proc_id));
        Ok(proc_id)
    }

    fn assign(&mut self, job: JobId, ad: &Ad, flags: SetAttributeFlags) -> Result<(), QueueError> {
        self.require_open("set_attribute")?;
        self.phase = TxPhase::Assigning;
        let suffix = if flags.no_ack { " (no ack)" } else { "" };
        for (name, expr) in ad.iter() {
            self.record(format!("set_attribute {} {} = {}{}", job, name, expr, suffix));
        }
        Ok(())
    }

    fn destroy_cluster(&mut self, cluster_id: i32) -> Result<(), QueueError> {
        self.require_open("destroy_cluster")?;
        self.open_clusters.retain(|c| *c != cluster_id);
        self.record(format!("destroy_cluster {}", cluster_id));
        Ok(())
    }

    fn send_item_data(&mut self, cluster_id: i32, items: &[ItemRecord]) -> Result<u32, QueueError> {
        self.require_open("send_item_data")?;
        self.phase = TxPhase::Assigning;
        self.record(format!("send_item_data {} ({} items)", cluster_id, items.len()));
        self.item_counts.insert(cluster_id, items.len());
        for item in items {
            self.record(format!("  [{}] {}", item.index, item.text));
        }
        Ok(items.len() as u32)
    }

    fn set_job_factory(
        &mut self,
        cluster_id: i32,
        max_materialize: i32,
        digest: &str,
    ) -> Result<u32, QueueError> {
        self.require_open("set_job_factory")?;
        self.phase = TxPhase::Assigning;
        self.record(format!(
            "set_job_factory {} max_materialize={}",
            cluster_id, max_materialize
        ));
        for line in digest.lines() {
            self.record(format!("  {}", line));
        }
        let items = self.item_counts.get(&cluster_id).copied().unwrap_or(0);
        let digest = crate::factory::parse_digest(digest)
            .map_err(|e| QueueError::Protocol(e.to_string()))?;
        Ok(digest.total_jobs(items).min(u64::from(u32::MAX)) as u32)
    }

    fn commit(&mut self, discard: bool) -> Result<CommitOutcome, QueueError> {
        self.require_open("commit")?;
        self.record(format!("commit discard={}", discard));
        let clusters = std::mem::take(&mut self.open_clusters);
        if discard {
            self.phase = TxPhase::Aborted;
            Ok(CommitOutcome::default())
        } else {
            self.phase = TxPhase::Committed;
            Ok(CommitOutcome {
                warnings: Vec::new(),
                clusters,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_operations() {
        let mut q = DryRunQueue::new();
        q.begin().unwrap();
        let c = q.allocate_cluster().unwrap();
        assert_eq!(c, 1);
        let p = q.allocate_process(c).unwrap();
        let mut ad = Ad::new();
        ad.insert_value("Args", "x");
        q.assign(JobId::new(c, p), &ad, SetAttributeFlags { no_ack: true })
            .unwrap();
        let outcome = q.commit(false).unwrap();
        assert_eq!(outcome.clusters, vec![1]);
        assert_eq!(
            q.transcript(),
            &[
                "begin".to_string(),
                "new_cluster -> 1".to_string(),
                "new_proc 1 -> 0".to_string(),
                "set_attribute 1.0 Args = \"x\" (no ack)".to_string(),
                "commit discard=false".to_string(),
            ]
        );
    }

    #[test]
    fn test_feature_toggle() {
        let q = DryRunQueue::new().without_late_materialization();
        assert!(!q.has_feature(features::LATE_MATERIALIZATION));
    }
}
