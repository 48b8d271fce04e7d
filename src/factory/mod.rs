//! Job Factory Protocol
//!
//! Instead of sending every job, the submitter hands the queue manager a
//! cluster record, the selected items and a digest, and the queue manager
//! materializes jobs from them on its own schedule.

mod digest;
mod error;
mod policy;

pub use digest::{
    digest_queue_args, fingerprint, item_records, parse_digest, render_digest, JobDigest,
};
pub use error::FactoryError;
pub use policy::{choose, max_materialize, resolve, FactoryChoice, FactoryMode};

use jobsub_ad::Ad;
use jobsub_protocol::ops::SetAttributeFlags;
use jobsub_protocol::JobId;

use crate::foreach::ForeachPlan;
use crate::queue::JobQueue;

/// Everything needed to register one factory cluster.
#[derive(Debug)]
pub struct FactoryInstall<'a> {
    pub cluster_id: i32,
    /// Attributes shared by every job, sent on the cluster record.
    pub cluster_ad: &'a Ad,
    pub plan: &'a ForeachPlan,
    pub digest: &'a str,
    pub max_materialize: i32,
}

/// Send the cluster record, the item data (when the digest uses it) and the
/// digest. Returns the job count the queue manager reports.
pub fn install(queue: &mut dyn JobQueue, setup: &FactoryInstall<'_>) -> Result<u32, FactoryError> {
    let cluster = setup.cluster_id;
    queue.assign(
        JobId::cluster_record(cluster),
        setup.cluster_ad,
        SetAttributeFlags { no_ack: true },
    )?;

    let parsed = parse_digest(setup.digest)?;
    if parsed.uses_item_data() {
        let records = item_records(setup.plan)?;
        let sent = records.len() as u32;
        let accepted = queue.send_item_data(cluster, &records)?;
        if accepted != sent {
            return Err(FactoryError::ItemCountMismatch { sent, accepted });
        }
        tracing::debug!(cluster_id = cluster, items = sent, "sent item data");
    }

    let total = queue.set_job_factory(cluster, setup.max_materialize, setup.digest)?;
    tracing::info!(
        cluster_id = cluster,
        total_jobs = total,
        max_materialize = setup.max_materialize,
        digest = %fingerprint(setup.digest),
        "installed job factory"
    );
    Ok(total)
}
