//! Submit and act on jobs over a real TCP connection to the mock queue manager.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use jobsub::action::{ActionClient, ActionRequest};
use jobsub::ad::{attrs, status};
use jobsub::mock::{self, FailureConfig, MockConfig, MockSchedd};
use jobsub::pipeline::{prepare, PipelineError, SubmitOptions, Submitter};
use jobsub::protocol::ops::{ActionKind, ActionResultCode, ResultGranularity};
use jobsub::protocol::Command;
use jobsub::queue::{
    JobQueue, QueueClient, QueueClientConfig, QueueError, TcpConfig, TcpTransport, Transport,
    TransportError, TxPhase,
};
use jobsub::signal::SignalState;
use jobsub::submit::SubmitTemplate;

fn transport(address: &str) -> Arc<dyn Transport> {
    transport_with_timeout(address, Duration::from_secs(5))
}

fn transport_with_timeout(address: &str, io_timeout: Duration) -> Arc<dyn Transport> {
    let config = TcpConfig {
        address: address.to_string(),
        connect_timeout: Duration::from_secs(5),
        io_timeout,
    };
    Arc::new(TcpTransport::connect(config).unwrap())
}

fn queue_client(address: &str, token: Option<&str>) -> QueueClient {
    client_over(transport(address), token)
}

fn client_over(transport: Arc<dyn Transport>, token: Option<&str>) -> QueueClient {
    QueueClient::new(
        transport,
        QueueClientConfig {
            owner: "alice".to_string(),
            token: token.map(str::to_string),
            max_procs_per_cluster: 0,
        },
    )
}

#[test]
fn test_submit_then_hold_over_tcp() {
    let schedd = MockSchedd::new();
    let address = mock::spawn(schedd.clone(), "127.0.0.1:0").unwrap().to_string();

    let template = SubmitTemplate::parse(
        "executable = /bin/echo\narguments = $(word)\nqueue word in red, green, blue\n",
    )
    .unwrap();
    let options = SubmitOptions::new("alice", Path::new("/work"));
    let prepared = prepare(&template, &options, &mut io::empty()).unwrap();

    let mut client = queue_client(&address, None);
    let signals = SignalState::new();
    let report = Submitter::new(&mut client, &options, &signals).submit(prepared);
    assert!(report.error.is_none(), "{:?}", report.error);
    client.disconnect().unwrap();

    let cluster_id = report.clusters[0].cluster_id;
    let args: Vec<String> = schedd
        .committed_jobs()
        .iter()
        .filter_map(|ad| ad.lookup_str(attrs::ARGS))
        .collect();
    assert_eq!(args, vec!["red", "green", "blue"]);

    let mut actions = ActionClient::new(transport(&address), "alice", None);
    let request = ActionRequest::for_constraint(ActionKind::Hold, format!("ClusterId == {}", cluster_id))
        .with_granularity(ResultGranularity::Totals);
    let held = actions.act(&request).unwrap();
    assert_eq!(held.count(ActionResultCode::Success), 3);
    assert_eq!(held.applied, 3);

    let statuses: Vec<Option<i64>> = schedd
        .committed_jobs()
        .iter()
        .map(|ad| ad.lookup_int(attrs::JOB_STATUS))
        .collect();
    assert_eq!(statuses, vec![Some(status::HELD); 3]);
}

#[test]
fn test_wrong_token_is_refused_over_tcp() {
    let schedd = MockSchedd::with_config(MockConfig {
        token: Some("s3cret".to_string()),
        ..MockConfig::default()
    });
    let address = mock::spawn(schedd.clone(), "127.0.0.1:0").unwrap().to_string();

    let template = SubmitTemplate::parse("executable = /bin/true\nqueue 2\n").unwrap();
    let options = SubmitOptions::new("alice", Path::new("/work"));
    let signals = SignalState::new();

    let prepared = prepare(&template, &options, &mut io::empty()).unwrap();
    let mut refused = queue_client(&address, Some("guess"));
    let report = Submitter::new(&mut refused, &options, &signals).submit(prepared);
    assert!(matches!(
        report.error,
        Some(PipelineError::Queue(QueueError::Authentication(_)))
    ));
    assert!(schedd.committed_jobs().is_empty());

    let prepared = prepare(&template, &options, &mut io::empty()).unwrap();
    let mut accepted = queue_client(&address, Some("s3cret"));
    let report = Submitter::new(&mut accepted, &options, &signals).submit(prepared);
    assert!(report.error.is_none(), "{:?}", report.error);
    assert_eq!(schedd.committed_jobs().len(), 2);
}

#[test]
fn test_timed_out_request_drops_the_connection() {
    let schedd = MockSchedd::new();
    let address = mock::spawn(schedd.clone(), "127.0.0.1:0").unwrap().to_string();
    schedd.inject_failure(
        Command::NewProc,
        FailureConfig::stall(Duration::from_millis(600)).with_fail_count(1),
    );

    let template = SubmitTemplate::parse("executable = /bin/true\nqueue 1\n").unwrap();
    let options = SubmitOptions::new("alice", Path::new("/work"));
    let signals = SignalState::new();

    let prepared = prepare(&template, &options, &mut io::empty()).unwrap();
    let mut client = client_over(transport_with_timeout(&address, Duration::from_millis(200)), None);
    let report = Submitter::new(&mut client, &options, &signals).submit(prepared);
    match &report.error {
        Some(PipelineError::Queue(QueueError::Indeterminate { command, .. })) => {
            assert_eq!(*command, Command::NewProc);
        }
        other => panic!("expected an indeterminate new_proc, got {:?}", other),
    }
    assert_eq!(client.phase(), TxPhase::Aborted);

    // The late reply must never be read as the answer to a later request.
    assert!(matches!(
        client.begin(),
        Err(QueueError::Transport(TransportError::Closed))
    ));

    let deadline = Instant::now() + Duration::from_secs(2);
    while schedd.session_count() > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(schedd.session_count(), 0);
    assert!(schedd.committed_jobs().is_empty());

    let prepared = prepare(&template, &options, &mut io::empty()).unwrap();
    let mut fresh = queue_client(&address, None);
    let report = Submitter::new(&mut fresh, &options, &signals).submit(prepared);
    assert!(report.error.is_none(), "{:?}", report.error);
    assert_eq!(schedd.committed_jobs().len(), 1);
}
