//! Queue state for the in-memory queue manager
//!
//! Committed records live in [`QueueStore`]. A session stages its writes in a
//! [`Transaction`]: new clusters and processes are held there, and edits to
//! already committed records are journaled. Commit merges the transaction
//! into the store; discard drops it.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use jobsub_ad::{attrs, status, Ad, Chained, Expr};
use jobsub_protocol::ops::ItemRecord;
use jobsub_protocol::JobId;

use crate::factory::JobDigest;
use crate::foreach::Binding;
use crate::queue::route_job_ad;
use crate::submit::{make_job_ad, JobAdOptions, SubmitError};

/// Late-materialization state of one cluster.
#[derive(Debug, Clone)]
pub struct Factory {
    pub digest: JobDigest,
    pub bindings: Vec<Binding>,
    pub max_materialize: i32,
    /// Jobs materialized so far.
    pub produced: usize,
}

impl Factory {
    pub fn total_jobs(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.produced >= self.bindings.len()
    }

    /// Build the complete record of job `ordinal` the way a submitter would.
    pub fn job_ad(
        &self,
        ordinal: usize,
        cluster_id: i32,
        proc_id: i32,
        owner: &str,
        now: i64,
    ) -> Result<Ad, SubmitError> {
        let mut ctx = self.digest.context();
        ctx.set_default(attrs::OWNER, owner);
        ctx.set_cluster(Some(cluster_id));
        ctx.set_process(Some(proc_id));
        if let Some(binding) = self.bindings.get(ordinal) {
            ctx.bind(binding);
        }
        make_job_ad(
            &ctx,
            &JobAdOptions {
                owner: owner.to_string(),
                base_dir: PathBuf::from("/"),
                now,
            },
        )
    }
}

#[derive(Debug, Clone)]
pub struct ClusterRecord {
    pub owner: String,
    pub ad: Ad,
    /// Next process id to hand out.
    pub next_proc: i32,
    pub factory: Option<Factory>,
}

impl ClusterRecord {
    pub fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            ad: Ad::new(),
            next_proc: 0,
            factory: None,
        }
    }
}

/// A journaled assignment to a committed record.
#[derive(Debug, Clone)]
pub struct Edit {
    pub job: JobId,
    pub name: String,
    pub value: Expr,
}

/// Work staged by one session.
#[derive(Debug, Default)]
pub struct Transaction {
    /// Clusters created in this transaction.
    pub clusters: BTreeMap<i32, ClusterRecord>,
    /// Processes created in this transaction, in any cluster.
    pub procs: BTreeMap<JobId, Ad>,
    /// Next process id of committed clusters extended here.
    pub next_proc: HashMap<i32, i32>,
    pub journal: Vec<Edit>,
    pub items: HashMap<i32, Vec<ItemRecord>>,
    /// Set when an unacknowledged assignment failed.
    pub abandoned: Option<String>,
}

impl Transaction {
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty() && self.procs.is_empty() && self.journal.is_empty()
    }

    pub fn owner_procs(&self, owner: &str, store: &QueueStore) -> usize {
        self.procs
            .keys()
            .filter(|id| {
                self.clusters
                    .get(&id.cluster)
                    .or_else(|| store.clusters.get(&id.cluster))
                    .is_some_and(|c| c.owner == owner)
            })
            .count()
    }
}

/// What a commit made durable.
#[derive(Debug, Default)]
pub struct Applied {
    pub clusters: Vec<i32>,
    pub warnings: Vec<String>,
}

/// Committed queue contents.
#[derive(Debug)]
pub struct QueueStore {
    pub clusters: BTreeMap<i32, ClusterRecord>,
    pub procs: BTreeMap<JobId, Ad>,
    next_cluster: i32,
}

impl Default for QueueStore {
    fn default() -> Self {
        Self {
            clusters: BTreeMap::new(),
            procs: BTreeMap::new(),
            next_cluster: 1,
        }
    }
}

fn is_live(status_code: Option<i64>) -> bool {
    matches!(
        status_code,
        Some(status::IDLE) | Some(status::RUNNING) | Some(status::HELD)
    )
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_cluster_id(&self) -> i32 {
        self.next_cluster
    }

    pub fn allocate_cluster_id(&mut self) -> i32 {
        let id = self.next_cluster;
        self.next_cluster += 1;
        id
    }

    pub fn job_count(&self) -> usize {
        self.procs.len()
    }

    pub fn owner_job_count(&self, owner: &str) -> usize {
        self.procs
            .keys()
            .filter(|id| self.owner_of(**id).is_some_and(|o| o == owner))
            .count()
    }

    pub fn owner_of(&self, id: JobId) -> Option<&str> {
        self.clusters.get(&id.cluster).map(|c| c.owner.as_str())
    }

    /// A committed process record flattened over its cluster record.
    pub fn flattened(&self, id: JobId) -> Option<Ad> {
        let proc = self.procs.get(&id)?;
        let cluster = self.clusters.get(&id.cluster).map(|c| &c.ad);
        Some(Chained::new(proc, cluster).flatten())
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        self.procs.keys().copied().collect()
    }

    /// Live (idle, running or held) jobs in `cluster_id`.
    pub fn live_count(&self, cluster_id: i32) -> usize {
        self.procs
            .range(JobId::new(cluster_id, 0)..=JobId::new(cluster_id, i32::MAX))
            .filter(|(_, ad)| is_live(ad.lookup_int(attrs::JOB_STATUS)))
            .count()
    }

    /// Merge a transaction. Clusters left without jobs or a factory are
    /// dropped with a warning.
    pub fn apply(&mut self, tx: Transaction, now: i64) -> Applied {
        let mut applied = Applied::default();
        let Transaction {
            clusters,
            procs,
            next_proc,
            journal,
            ..
        } = tx;

        for (id, cluster) in clusters {
            let has_procs = procs.keys().any(|j| j.cluster == id);
            if !has_procs && cluster.factory.is_none() {
                applied
                    .warnings
                    .push(format!("cluster {} has no jobs and was discarded", id));
                continue;
            }
            self.clusters.insert(id, cluster);
            applied.clusters.push(id);
        }
        for (id, next) in next_proc {
            if let Some(cluster) = self.clusters.get_mut(&id) {
                cluster.next_proc = cluster.next_proc.max(next);
            }
        }
        for (id, ad) in procs {
            if self.clusters.contains_key(&id.cluster) {
                self.procs.insert(id, ad);
                applied.clusters.push(id.cluster);
            }
        }
        for edit in journal {
            let target = if edit.job.is_cluster_record() {
                self.clusters.get_mut(&edit.job.cluster).map(|c| &mut c.ad)
            } else {
                self.procs.get_mut(&edit.job)
            };
            if let Some(ad) = target {
                ad.insert(edit.name, edit.value);
            }
        }

        applied.clusters.sort_unstable();
        applied.clusters.dedup();
        for id in applied.clusters.clone() {
            self.materialize(id, now);
        }
        applied
    }

    /// Materialize factory jobs of `cluster_id` while fewer than
    /// `max_materialize` are live. Returns how many were created.
    pub fn materialize(&mut self, cluster_id: i32, now: i64) -> usize {
        let mut made = 0;
        loop {
            let live = self.live_count(cluster_id);
            let Some(cluster) = self.clusters.get_mut(&cluster_id) else {
                break;
            };
            let Some(factory) = cluster.factory.as_ref() else {
                break;
            };
            if factory.is_exhausted() || live >= factory.max_materialize.max(1) as usize {
                break;
            }

            let proc_id = cluster.next_proc;
            let ad = match factory.job_ad(factory.produced, cluster_id, proc_id, &cluster.owner, now) {
                Ok(ad) => ad,
                Err(e) => {
                    tracing::warn!(cluster_id, proc_id, error = %e, "factory stopped");
                    if let Some(factory) = cluster.factory.as_mut() {
                        factory.produced = factory.total_jobs();
                    }
                    break;
                }
            };
            let routed = route_job_ad(&ad, Some(&cluster.ad));
            cluster.next_proc += 1;
            if let Some(factory) = cluster.factory.as_mut() {
                factory.produced += 1;
            }
            self.procs.insert(JobId::new(cluster_id, proc_id), routed.proc);
            made += 1;
        }
        if made > 0 {
            tracing::debug!(cluster_id, jobs = made, "materialized factory jobs");
        }
        made
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proc_ad(status_code: i64) -> Ad {
        let mut ad = Ad::new();
        ad.insert_value(attrs::JOB_STATUS, status_code);
        ad
    }

    #[test]
    fn test_apply_merges_and_drops_empty_clusters() {
        let mut store = QueueStore::new();
        let mut tx = Transaction::default();
        let a = store.allocate_cluster_id();
        let b = store.allocate_cluster_id();
        tx.clusters.insert(a, ClusterRecord::new("alice"));
        tx.clusters.insert(b, ClusterRecord::new("alice"));
        tx.procs.insert(JobId::new(a, 0), proc_ad(status::IDLE));

        let applied = store.apply(tx, 0);
        assert_eq!(applied.clusters, vec![a]);
        assert_eq!(applied.warnings.len(), 1);
        assert_eq!(store.job_count(), 1);
        assert_eq!(store.owner_job_count("alice"), 1);
        assert_eq!(store.next_cluster_id(), 3);
    }

    #[test]
    fn test_journal_edits_committed_records() {
        let mut store = QueueStore::new();
        let mut tx = Transaction::default();
        let c = store.allocate_cluster_id();
        let mut cluster = ClusterRecord::new("bob");
        cluster.ad.insert_value("Cmd", "/bin/true");
        tx.clusters.insert(c, cluster);
        tx.procs.insert(JobId::new(c, 0), proc_ad(status::IDLE));
        store.apply(tx, 0);

        let mut tx = Transaction::default();
        tx.journal.push(Edit {
            job: JobId::new(c, 0),
            name: "Tag".to_string(),
            value: Expr::parse("\"x\"").unwrap(),
        });
        assert!(!tx.is_empty());
        store.apply(tx, 0);

        let job = store.flattened(JobId::new(c, 0)).unwrap();
        assert_eq!(job.lookup_str("Tag").as_deref(), Some("x"));
        assert_eq!(job.lookup_str("Cmd").as_deref(), Some("/bin/true"));
    }

    #[test]
    fn test_live_count_ignores_finished_jobs() {
        let mut store = QueueStore::new();
        let mut tx = Transaction::default();
        let c = store.allocate_cluster_id();
        tx.clusters.insert(c, ClusterRecord::new("alice"));
        tx.procs.insert(JobId::new(c, 0), proc_ad(status::IDLE));
        tx.procs.insert(JobId::new(c, 1), proc_ad(status::HELD));
        tx.procs.insert(JobId::new(c, 2), proc_ad(status::COMPLETED));
        tx.procs.insert(JobId::new(c, 3), proc_ad(status::REMOVED));
        store.apply(tx, 0);
        assert_eq!(store.live_count(c), 2);
        assert_eq!(store.live_count(c + 1), 0);
    }
}
