//! Queue transactions: visibility, rollback, routing and ceilings.

mod fixtures;

use std::path::Path;

use fixtures::{client_for, cluster_jobs, job, options, submit, OWNER};
use jobsub::ad::{attrs, Ad};
use jobsub::mock::{FailureConfig, MockLimits, MockSchedd};
use jobsub::pipeline::PipelineError;
use jobsub::protocol::ops::SetAttributeFlags;
use jobsub::protocol::{Command, ErrorCode, JobId};
use jobsub::queue::{route_job_ad, Ceiling, DryRunQueue, JobQueue, QueueError, TxPhase};
use jobsub::signal::SignalState;
use jobsub::submit::SubmitTemplate;
use jobsub::{prepare, Submitter};

fn sleep_ad(args: &str) -> Ad {
    let mut ad = Ad::new();
    ad.insert_value(attrs::CMD, "/bin/sleep");
    ad.insert_value(attrs::ARGS, args);
    ad
}

#[test]
fn test_uncommitted_work_is_invisible_to_other_sessions() {
    let schedd = MockSchedd::new();
    let mut writer = client_for(&schedd, OWNER);
    let mut reader = client_for(&schedd, "bob");

    writer.begin().unwrap();
    let c = writer.allocate_cluster().unwrap();
    let p = writer.allocate_process(c).unwrap();
    writer
        .assign(JobId::new(c, p), &sleep_ad("5"), SetAttributeFlags::default())
        .unwrap();
    assert!(reader.query_jobs(None).unwrap().is_empty());

    writer.commit(false).unwrap();
    assert_eq!(writer.phase(), TxPhase::Committed);
    let seen = reader.query_jobs(None).unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].lookup_str(attrs::ARGS).as_deref(), Some("5"));
}

#[test]
fn test_discard_leaves_no_jobs() {
    let schedd = MockSchedd::new();
    let mut q = client_for(&schedd, OWNER);
    q.begin().unwrap();
    let c = q.allocate_cluster().unwrap();
    for _ in 0..3 {
        let p = q.allocate_process(c).unwrap();
        q.assign(JobId::new(c, p), &sleep_ad("1"), SetAttributeFlags { no_ack: true })
            .unwrap();
    }
    q.commit(true).unwrap();
    assert_eq!(q.phase(), TxPhase::Aborted);

    let mut other = client_for(&schedd, OWNER);
    let constraint = format!("ClusterId == {}", c);
    assert!(other.query_jobs(Some(&constraint)).unwrap().is_empty());
    assert!(schedd.job(job(c, 0)).is_none());
}

#[test]
fn test_dropped_session_discards_open_transaction() {
    let schedd = MockSchedd::new();
    {
        let mut q = client_for(&schedd, OWNER);
        q.begin().unwrap();
        let c = q.allocate_cluster().unwrap();
        let p = q.allocate_process(c).unwrap();
        q.assign(JobId::new(c, p), &sleep_ad("1"), SetAttributeFlags::default())
            .unwrap();
        assert_eq!(schedd.session_count(), 1);
    }
    assert_eq!(schedd.session_count(), 0);
    assert!(schedd.committed_jobs().is_empty());
}

#[test]
fn test_forced_attributes_land_on_their_records() {
    let schedd = MockSchedd::new();
    let report = submit(
        &schedd,
        "executable = /bin/true\nhold = true\n+User = \"alice@site\"\nqueue 2\n",
        &options(Path::new("/work")),
    );
    assert!(report.error.is_none(), "{:?}", report.error);
    let c = report.clusters[0].cluster_id;

    let cluster = schedd.cluster_record(c).unwrap();
    for name in [attrs::OWNER, attrs::CLUSTER_ID, attrs::JOB_UNIVERSE, attrs::Q_DATE, attrs::USER] {
        assert!(cluster.contains(name), "cluster record lacks {}", name);
    }
    for name in [
        attrs::PROC_ID,
        attrs::JOB_STATUS,
        attrs::HOLD_REASON,
        attrs::HOLD_REASON_CODE,
        attrs::ENTERED_CURRENT_STATUS,
    ] {
        assert!(!cluster.contains(name), "cluster record has {}", name);
    }

    for p in 0..2 {
        let proc = schedd.proc_record(job(c, p)).unwrap();
        for name in [
            attrs::PROC_ID,
            attrs::JOB_STATUS,
            attrs::HOLD_REASON,
            attrs::HOLD_REASON_CODE,
            attrs::ENTERED_CURRENT_STATUS,
        ] {
            assert!(proc.contains(name), "proc {} lacks {}", p, name);
        }
        for name in [attrs::OWNER, attrs::CLUSTER_ID, attrs::JOB_UNIVERSE, attrs::Q_DATE, attrs::USER] {
            assert!(!proc.contains(name), "proc {} has {}", p, name);
        }
    }
}

#[test]
fn test_cluster_record_is_sent_before_first_proc() {
    let template = SubmitTemplate::parse("executable = /bin/true\nqueue 2\n").unwrap();
    let opts = options(Path::new("/work"));
    let prepared = prepare(&template, &opts, &mut std::io::empty()).unwrap();
    let mut q = DryRunQueue::new();
    let signals = SignalState::new();
    let report = Submitter::new(&mut q, &opts, &signals).submit(prepared);
    assert!(report.error.is_none());

    let sets: Vec<&String> = q
        .transcript()
        .iter()
        .filter(|l| l.starts_with("set_attribute"))
        .collect();
    assert!(sets[0].starts_with("set_attribute 1.-1 ClusterId = 1"), "{}", sets[0]);
    assert!(sets[1].starts_with("set_attribute 1.-1 Owner = "), "{}", sets[1]);
    let first_proc = sets.iter().position(|l| l.starts_with("set_attribute 1.0 ")).unwrap();
    let last_cluster = sets.iter().rposition(|l| l.starts_with("set_attribute 1.-1 ")).unwrap();
    assert!(last_cluster < first_proc);
    assert!(sets[first_proc].starts_with("set_attribute 1.0 ProcId = 0"));
    assert!(!sets.iter().any(|l| l.starts_with("set_attribute 1.1 Cmd")));
}

#[test]
fn test_routing_keeps_only_differences_on_later_procs() {
    let mut first = sleep_ad("a");
    first.insert_value(attrs::OWNER, OWNER);
    first.insert_value(attrs::PROC_ID, 0);
    let routed = route_job_ad(&first, None);
    let cluster = routed.cluster.unwrap();

    let mut second = sleep_ad("b");
    second.insert_value(attrs::OWNER, OWNER);
    second.insert_value(attrs::PROC_ID, 1);
    let later = route_job_ad(&second, Some(&cluster));
    assert!(later.cluster.is_none());
    let names: Vec<&str> = later.proc.names().collect();
    assert_eq!(names, vec![attrs::PROC_ID, attrs::ARGS]);
}

#[test]
fn test_ceiling_rolls_back_only_failing_statement() {
    let schedd = MockSchedd::new();
    schedd.set_limits(MockLimits {
        max_procs_per_cluster: Some(2),
        ..MockLimits::default()
    });
    let report = submit(
        &schedd,
        "executable = /bin/a\nqueue 2\nexecutable = /bin/b\nqueue 3\n",
        &options(Path::new("/work")),
    );
    match &report.error {
        Some(PipelineError::Queue(QueueError::Ceiling { kind, limit, .. })) => {
            assert_eq!(*kind, Ceiling::MaxProcsPerCluster);
            assert_eq!(*limit, Some(2));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(report.clusters.len(), 1);
    let kept = report.clusters[0].cluster_id;
    assert_eq!(cluster_jobs(&schedd, kept).len(), 2);
    assert_eq!(schedd.committed_jobs().len(), 2);
    assert!(schedd.cluster_record(kept + 1).is_none());
}

#[test]
fn test_failed_unacknowledged_assignment_is_fatal() {
    let schedd = MockSchedd::new();
    schedd.inject_failure(
        Command::SetAttribute,
        FailureConfig::error(ErrorCode::AttributeRejected, "refused").with_fail_count(1),
    );
    let report = submit(&schedd, "executable = /bin/true\nqueue 3\n", &options(Path::new("/work")));
    match &report.error {
        Some(PipelineError::Queue(QueueError::Abandoned(reason))) => {
            assert!(reason.contains("refused"), "{}", reason)
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(report.clusters.is_empty());
    assert!(schedd.committed_jobs().is_empty());
}

#[test]
fn test_server_ids_are_unique_across_sessions() {
    let schedd = MockSchedd::new();
    let mut a = client_for(&schedd, OWNER);
    let mut b = client_for(&schedd, "bob");
    a.begin().unwrap();
    b.begin().unwrap();
    let ca = a.allocate_cluster().unwrap();
    let cb = b.allocate_cluster().unwrap();
    assert_ne!(ca, cb);
    assert_eq!(a.allocate_process(ca).unwrap(), 0);
    assert_eq!(b.allocate_process(cb).unwrap(), 0);
    assert_eq!(a.allocate_process(ca).unwrap(), 1);
}

#[test]
fn test_submitted_proc_id_must_match_allocation() {
    let schedd = MockSchedd::new();
    let report = submit(
        &schedd,
        "executable = /bin/true\n+ProcId = 7\nqueue 2\n",
        &options(Path::new("/work")),
    );
    match &report.error {
        Some(PipelineError::Queue(QueueError::Abandoned(reason))) => {
            assert!(reason.contains("ProcId"), "{}", reason)
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(schedd.committed_jobs().is_empty());
}

#[test]
fn test_submitter_cannot_give_jobs_away() {
    let schedd = MockSchedd::new();
    let report = submit(
        &schedd,
        "executable = /bin/true\n+Owner = \"bob\"\nqueue 1\n",
        &options(Path::new("/work")),
    );
    match &report.error {
        Some(PipelineError::Queue(QueueError::Abandoned(reason))) => {
            assert!(reason.contains("Owner"), "{}", reason)
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(schedd.committed_jobs().is_empty());
}

#[test]
fn test_acknowledged_identity_edits_are_refused() {
    let schedd = MockSchedd::new();
    let mut q = client_for(&schedd, OWNER);
    q.begin().unwrap();
    let c = q.allocate_cluster().unwrap();
    let p = q.allocate_process(c).unwrap();
    let acked = SetAttributeFlags::default();

    let mut ad = Ad::new();
    ad.insert_value(attrs::PROC_ID, p + 7);
    let err = q.assign(job(c, p), &ad, acked).unwrap_err();
    assert_eq!(err.server_code(), Some(ErrorCode::AttributeRejected), "{:?}", err);

    let mut ad = Ad::new();
    ad.insert_value(attrs::CLUSTER_ID, c + 1);
    let err = q.assign(JobId::cluster_record(c), &ad, acked).unwrap_err();
    assert_eq!(err.server_code(), Some(ErrorCode::AttributeRejected), "{:?}", err);

    let mut ad = Ad::new();
    ad.insert_value(attrs::OWNER, "bob");
    let err = q.assign(JobId::cluster_record(c), &ad, acked).unwrap_err();
    assert_eq!(err.server_code(), Some(ErrorCode::PermissionDenied), "{:?}", err);

    // Matching values are accepted and the transaction still commits.
    let mut ad = Ad::new();
    ad.insert_value(attrs::OWNER, OWNER);
    ad.insert_value(attrs::CLUSTER_ID, c);
    q.assign(JobId::cluster_record(c), &ad, acked).unwrap();
    let mut ad = sleep_ad("1");
    ad.insert_value(attrs::PROC_ID, p);
    q.assign(job(c, p), &ad, acked).unwrap();
    q.commit(false).unwrap();
    assert_eq!(cluster_jobs(&schedd, c).len(), 1);
}

#[test]
fn test_superuser_may_submit_for_another_owner() {
    let schedd = MockSchedd::new();
    schedd.add_superuser("root");
    let mut q = client_for(&schedd, "root");
    q.begin().unwrap();
    let c = q.allocate_cluster().unwrap();
    let p = q.allocate_process(c).unwrap();
    let mut cluster = Ad::new();
    cluster.insert_value(attrs::OWNER, "bob");
    q.assign(JobId::cluster_record(c), &cluster, SetAttributeFlags::default())
        .unwrap();
    q.assign(job(c, p), &sleep_ad("1"), SetAttributeFlags::default())
        .unwrap();
    q.commit(false).unwrap();
    let jobs = cluster_jobs(&schedd, c);
    assert_eq!(jobs[&0].lookup_str(attrs::OWNER).as_deref(), Some("bob"));
}

#[test]
fn test_owner_ceiling_refuses_cluster_before_allocation() {
    let schedd = MockSchedd::new();
    schedd.set_limits(MockLimits {
        max_jobs_per_owner: Some(2),
        ..MockLimits::default()
    });
    schedd.seed_jobs(OWNER, 2);
    let next = schedd.next_cluster_id();

    let report = submit(&schedd, "executable = /bin/true\nqueue 1\n", &options(Path::new("/work")));
    match &report.error {
        Some(PipelineError::Queue(QueueError::Ceiling { kind, limit, .. })) => {
            assert_eq!(*kind, Ceiling::MaxJobsPerOwner);
            assert_eq!(*limit, Some(2));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(schedd.next_cluster_id(), next);
    assert_eq!(schedd.committed_jobs().len(), 2);
}
