//! Shared helpers for the integration suites
//!
//! Each suite includes this module with `mod fixtures;` and drives the
//! library against an in-memory queue manager.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use jobsub::ad::Ad;
use jobsub::mock::MockSchedd;
use jobsub::pipeline::{prepare, SubmitOptions, SubmitReport, Submitter};
use jobsub::protocol::JobId;
use jobsub::queue::{MockTransport, QueueClient, QueueClientConfig};
use jobsub::signal::SignalState;
use jobsub::submit::SubmitTemplate;

pub const OWNER: &str = "alice";

/// Queue client for `owner` on a fresh session of `schedd`.
pub fn client_for(schedd: &MockSchedd, owner: &str) -> QueueClient {
    QueueClient::new(
        Arc::new(MockTransport::new(schedd)),
        QueueClientConfig {
            owner: owner.to_string(),
            token: None,
            max_procs_per_cluster: 0,
        },
    )
}

pub fn options(base_dir: &Path) -> SubmitOptions {
    SubmitOptions::new(OWNER, base_dir)
}

/// Prepare and submit `text` as `options.owner`. Preparation errors panic.
pub fn submit(schedd: &MockSchedd, text: &str, options: &SubmitOptions) -> SubmitReport {
    let template = SubmitTemplate::parse(text).expect("description parses");
    let prepared = prepare(&template, options, &mut io::empty()).expect("description prepares");
    let mut client = client_for(schedd, &options.owner);
    let signals = SignalState::new();
    Submitter::new(&mut client, options, &signals)
        .keep_ads(true)
        .submit(prepared)
}

/// Committed jobs of one cluster, keyed by process id.
pub fn cluster_jobs(schedd: &MockSchedd, cluster_id: i32) -> BTreeMap<i32, Ad> {
    schedd
        .committed_jobs()
        .into_iter()
        .filter(|ad| ad.lookup_int("ClusterId") == Some(i64::from(cluster_id)))
        .filter_map(|ad| Some((ad.lookup_int("ProcId")? as i32, ad)))
        .collect()
}

/// Attribute text by name, minus the names listed in `skip`.
pub fn attr_map(ad: &Ad, skip: &[&str]) -> BTreeMap<String, String> {
    ad.iter()
        .filter(|(name, _)| !skip.iter().any(|s| s.eq_ignore_ascii_case(name)))
        .map(|(name, expr)| (name.to_string(), expr.to_string()))
        .collect()
}

pub fn job(cluster: i32, proc: i32) -> JobId {
    JobId::new(cluster, proc)
}
