//! Two-phase action exchange with the queue manager.

use std::sync::Arc;

use jobsub_protocol::ops::action::ACTION_RESULT;
use jobsub_protocol::ops::{
    ActOnJobsRequest, ActOnJobsResponse, ConfirmActionRequest, ConfirmActionResponse,
    DisconnectResponse, ResultGranularity,
};
use jobsub_protocol::{features, Command};

use crate::queue::{QmgmtChannel, Transport};

use super::error::ActionError;
use super::request::ActionRequest;
use super::result::{parse_result, ActionReport};

/// Sends hold, release and remove requests.
pub struct ActionClient {
    channel: QmgmtChannel,
    owner: String,
    token: Option<String>,
}

impl ActionClient {
    pub fn new(transport: Arc<dyn Transport>, owner: impl Into<String>, token: Option<String>) -> Self {
        Self {
            channel: QmgmtChannel::new(transport),
            owner: owner.into(),
            token,
        }
    }

    /// Run one action: `begin`, `act_on_jobs`, then `confirm_action` when the
    /// reply says at least one job succeeded. The session is always closed
    /// with `disconnect`; unconfirmed changes are dropped by the queue manager.
    pub fn act(&mut self, request: &ActionRequest) -> Result<ActionReport, ActionError> {
        let token = self.token.clone();
        self.channel.begin(&self.owner, token.as_deref())?;

        let result = self.exchange(request);
        let closed: Result<DisconnectResponse, _> = self.channel.call(Command::Disconnect, &());
        match result {
            Ok(report) => {
                closed?;
                tracing::info!(action = %request.action, applied = report.applied, "action finished");
                Ok(report)
            }
            Err(err) => {
                if let Err(e) = closed {
                    tracing::debug!(error = %e, "disconnect after failed action");
                }
                Err(err)
            }
        }
    }

    fn exchange(&mut self, request: &ActionRequest) -> Result<ActionReport, ActionError> {
        if request.granularity != ResultGranularity::None
            && !self.channel.has_feature(features::GRANULAR_ACTION_RESULTS)
        {
            tracing::debug!("queue manager reports only a boolean action result");
        }

        let resp: ActOnJobsResponse = self.channel.call(
            Command::ActOnJobs,
            &ActOnJobsRequest {
                action: request.action,
                selector: request.selector.clone(),
                reason: request.reason.clone(),
                result_type: request.granularity,
            },
        )?;
        let outcome = parse_result(&resp.result, &request.selector)?;

        let mut applied = 0;
        if resp.result.lookup_bool(ACTION_RESULT) == Some(true) {
            let confirm: ConfirmActionResponse = self.channel.call(
                Command::ConfirmAction,
                &ConfirmActionRequest {
                    notify: request.notify,
                },
            )?;
            applied = confirm.applied;
        }
        Ok(ActionReport {
            action: request.action,
            outcome,
            applied,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::result::ActionOutcome;
    use crate::mock::{MockConfig, MockSchedd};
    use crate::queue::MockTransport;
    use jobsub_ad::{attrs, status};
    use jobsub_protocol::ops::{ActionKind, ActionResultCode};
    use jobsub_protocol::ErrorCode;

    fn client(schedd: &MockSchedd, owner: &str) -> ActionClient {
        ActionClient::new(Arc::new(MockTransport::new(schedd)), owner, None)
    }

    #[test]
    fn test_failed_action_still_disconnects() {
        let schedd = MockSchedd::new();
        let ids = schedd.seed_jobs("alice", 1);
        let transport = Arc::new(MockTransport::new(&schedd));
        let session = transport.session();
        let mut c = ActionClient::new(transport.clone(), "alice", None);

        schedd.inject_error(Command::ConfirmAction, ErrorCode::Internal, "boom");
        let err = c
            .act(&ActionRequest::for_ids(ActionKind::Hold, ids.clone()))
            .unwrap_err();
        assert!(err.to_string().contains("boom"), "{}", err);
        assert!(!schedd.session_begun(session));
        assert!(!schedd.has_staged_action(session));

        schedd.clear_failures();
        schedd.inject_error(Command::ActOnJobs, ErrorCode::Internal, "boom");
        assert!(c.act(&ActionRequest::for_ids(ActionKind::Hold, ids.clone())).is_err());
        assert!(!schedd.session_begun(session));
        assert_eq!(
            schedd.job(ids[0]).unwrap().lookup_int(attrs::JOB_STATUS),
            Some(status::IDLE)
        );
    }

    #[test]
    fn test_hold_then_hold_again() {
        let schedd = MockSchedd::new();
        let ids = schedd.seed_jobs("alice", 2);
        let mut c = client(&schedd, "alice");

        let report = c
            .act(&ActionRequest::for_ids(ActionKind::Hold, ids.clone()))
            .unwrap();
        assert_eq!(report.applied, 2);
        assert!(report.all_ok());
        assert_eq!(
            schedd.job(ids[0]).unwrap().lookup_int(attrs::JOB_STATUS),
            Some(status::HELD)
        );

        let report = c.act(&ActionRequest::for_ids(ActionKind::Hold, ids)).unwrap();
        assert_eq!(report.applied, 0);
        assert_eq!(report.count(ActionResultCode::AlreadyDone), 2);
        assert!(report.all_ok());
    }

    #[test]
    fn test_release_unheld_is_bad_status() {
        let schedd = MockSchedd::new();
        let ids = schedd.seed_jobs("alice", 1);
        let report = client(&schedd, "alice")
            .act(&ActionRequest::for_ids(ActionKind::Release, ids))
            .unwrap();
        assert_eq!(report.messages(), vec!["Job 1.0 not held to be released"]);
        assert!(!report.all_ok());
    }

    #[test]
    fn test_legacy_server() {
        let schedd = MockSchedd::with_config(MockConfig {
            granular_action_results: false,
            ..MockConfig::default()
        });
        let ids = schedd.seed_jobs("alice", 2);
        let report = client(&schedd, "alice")
            .act(
                &ActionRequest::for_ids(ActionKind::Remove, ids.clone())
                    .with_granularity(ResultGranularity::Totals),
            )
            .unwrap();
        match &report.outcome {
            ActionOutcome::PerJob(outcomes) => assert_eq!(outcomes.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(report.applied, 2);
        assert_eq!(
            schedd.job(ids[1]).unwrap().lookup_int(attrs::JOB_STATUS),
            Some(status::REMOVED)
        );
    }

    #[test]
    fn test_reason_is_recorded() {
        let schedd = MockSchedd::new();
        let ids = schedd.seed_jobs("alice", 1);
        client(&schedd, "alice")
            .act(&ActionRequest::for_ids(ActionKind::Hold, ids.clone()).with_reason("maintenance"))
            .unwrap();
        let job = schedd.job(ids[0]).unwrap();
        assert_eq!(job.lookup_str(attrs::HOLD_REASON).as_deref(), Some("maintenance"));
        assert_eq!(job.lookup_int(attrs::LAST_JOB_STATUS), Some(status::IDLE));
    }
}
