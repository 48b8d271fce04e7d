//! End-to-end submissions against the in-memory queue manager.

mod fixtures;

use std::path::Path;

use fixtures::{attr_map, cluster_jobs, options, submit};
use jobsub::mock::MockSchedd;
use jobsub::pipeline::{PipelineError, ReportStyle};
use jobsub::queue::{Ceiling, QueueError};

#[test]
fn test_plain_count_makes_identical_jobs() {
    let schedd = MockSchedd::new();
    let report = submit(
        &schedd,
        "executable = /bin/sleep\narguments = 60\nqueue 3\n",
        &options(Path::new("/work")),
    );
    assert!(report.error.is_none(), "{:?}", report.error);
    assert_eq!(report.clusters.len(), 1);
    assert_eq!(report.exit_code(), 0);

    let jobs = cluster_jobs(&schedd, report.clusters[0].cluster_id);
    assert_eq!(jobs.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
    let first = attr_map(&jobs[&0], &["ProcId"]);
    for ad in jobs.values() {
        assert_eq!(attr_map(ad, &["ProcId"]), first);
    }
    assert_eq!(jobs[&2].lookup_str("Args").as_deref(), Some("60"));
}

#[test]
fn test_inline_items_bind_in_order() {
    let schedd = MockSchedd::new();
    let report = submit(
        &schedd,
        "executable = /bin/echo\narguments = $(var)\n+ItemIndex = $(ItemIndex)\n\
         queue var from (\na\nb\nc\n)\n",
        &options(Path::new("/work")),
    );
    assert!(report.error.is_none(), "{:?}", report.error);

    let jobs = cluster_jobs(&schedd, report.clusters[0].cluster_id);
    let bound: Vec<(String, i64)> = jobs
        .values()
        .map(|ad| {
            (
                ad.lookup_str("Args").unwrap_or_default(),
                ad.lookup_int("ItemIndex").unwrap_or(-1),
            )
        })
        .collect();
    assert_eq!(
        bound,
        vec![
            ("a".to_string(), 0),
            ("b".to_string(), 1),
            ("c".to_string(), 2)
        ]
    );
}

#[test]
fn test_sliced_items_skip_unselected() {
    let schedd = MockSchedd::new();
    let report = submit(
        &schedd,
        "executable = /bin/echo\narguments = $(var)\n+ItemIndex = $(ItemIndex)\n\
         queue var from [0:3:2] (\na\nb\nc\nd\ne\n)\n",
        &options(Path::new("/work")),
    );
    assert!(report.error.is_none(), "{:?}", report.error);

    let jobs = cluster_jobs(&schedd, report.clusters[0].cluster_id);
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[&0].lookup_str("Args").as_deref(), Some("a"));
    assert_eq!(jobs[&0].lookup_int("ItemIndex"), Some(0));
    assert_eq!(jobs[&1].lookup_str("Args").as_deref(), Some("c"));
    assert_eq!(jobs[&1].lookup_int("ItemIndex"), Some(2));
}

#[test]
fn test_disabled_owner_is_fatal_and_consumes_no_id() {
    let schedd = MockSchedd::new();
    schedd.disable_owner("alice");
    let before = schedd.next_cluster_id();

    let report = submit(&schedd, "executable = /bin/true\nqueue 1\n", &options(Path::new("/work")));
    match &report.error {
        Some(PipelineError::Queue(QueueError::Ceiling { kind, .. })) => {
            assert_eq!(*kind, Ceiling::OwnerDisabled)
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(
        report.error.as_ref().and_then(PipelineError::ceiling),
        Some(Ceiling::OwnerDisabled)
    );
    assert_eq!(report.exit_code(), 1);
    assert!(report.clusters.is_empty());
    assert_eq!(schedd.next_cluster_id(), before);
    assert!(schedd.committed_jobs().is_empty());
}

#[test]
fn test_statements_share_cluster_until_executable_changes() {
    let schedd = MockSchedd::new();
    let report = submit(
        &schedd,
        "executable = /bin/a\nqueue 2\narguments = again\nqueue 2\n\
         executable = /bin/b\nqueue 1\n",
        &options(Path::new("/work")),
    );
    assert!(report.error.is_none(), "{:?}", report.error);
    assert_eq!(report.clusters.len(), 2);

    let first = cluster_jobs(&schedd, report.clusters[0].cluster_id);
    assert_eq!(first.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    assert_eq!(first[&1].lookup_str("Args"), None);
    assert_eq!(first[&3].lookup_str("Args").as_deref(), Some("again"));

    let second = cluster_jobs(&schedd, report.clusters[1].cluster_id);
    assert_eq!(second.len(), 1);
    assert_eq!(second[&0].lookup_str("Cmd").as_deref(), Some("/bin/b"));
    assert_eq!(
        report.render(ReportStyle::Terse),
        "1.0 - 1.3\n2.0 - 2.0\n"
    );
}

#[test]
fn test_process_ids_have_no_gaps() {
    let schedd = MockSchedd::new();
    let report = submit(
        &schedd,
        "executable = /bin/a\nqueue 2 x from (\n1\n2\n)\nqueue 0\nqueue 3\n",
        &options(Path::new("/work")),
    );
    assert!(report.error.is_none(), "{:?}", report.error);
    for cluster in &report.clusters {
        let procs: Vec<i32> = cluster_jobs(&schedd, cluster.cluster_id)
            .keys()
            .copied()
            .collect();
        let expected: Vec<i32> = (0..procs.len() as i32).collect();
        assert_eq!(procs, expected);
        assert!(procs.contains(&0));
    }
    assert_eq!(report.total_jobs(), 7);
}

#[test]
fn test_items_from_file_and_matching() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("items.txt"), "alpha 1\nbeta 2\n").unwrap();
    std::fs::write(dir.path().join("one.dat"), "").unwrap();
    std::fs::write(dir.path().join("two.dat"), "").unwrap();
    std::fs::write(dir.path().join("skip.txt"), "").unwrap();

    let schedd = MockSchedd::new();
    let report = submit(
        &schedd,
        "executable = /bin/echo\narguments = $(name) $(n)\nqueue name,n from items.txt\n\
         arguments = $(f)\nqueue f matching *.dat\n",
        &options(dir.path()),
    );
    assert!(report.error.is_none(), "{:?}", report.error);

    let jobs = cluster_jobs(&schedd, report.clusters[0].cluster_id);
    let args: Vec<String> = jobs
        .values()
        .filter_map(|ad| ad.lookup_str("Args"))
        .collect();
    assert_eq!(args, vec!["alpha 1", "beta 2", "one.dat", "two.dat"]);
}

#[test]
fn test_attribute_error_rolls_back_statement() {
    let schedd = MockSchedd::new();
    let report = submit(
        &schedd,
        "executable = /bin/a\nqueue 1\nexecutable = /bin/b\nrequest_cpus = $(n)\n\
         queue n from (\n2\nlots\n)\n",
        &options(Path::new("/work")),
    );
    assert!(matches!(report.error, Some(PipelineError::Submit(_))));
    assert_eq!(report.clusters.len(), 1);

    let committed = schedd.committed_jobs();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].lookup_str("Cmd").as_deref(), Some("/bin/a"));
}
