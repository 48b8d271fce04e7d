//! In-memory queue manager
//!
//! Serves the queue-management protocol from a [`QueueStore`]. Each client
//! connection is a session with at most one open transaction; closing the
//! session discards whatever it had not committed.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use serde::Serialize;

use jobsub_ad::{attrs, matches, status, Ad, Expr, Value};
use jobsub_protocol::ops::action::{job_result_attr, total_attr, ACTION_RESULT, ACTION_RESULT_TYPE};
use jobsub_protocol::ops::{
    ActOnJobsRequest, ActOnJobsResponse, ActionKind, ActionResultCode, BeginRequest,
    BeginResponse, CommitRequest, CommitResponse, ConfirmActionRequest, ConfirmActionResponse,
    DestroyClusterRequest, DestroyClusterResponse, DisconnectResponse, JobSelector,
    NewClusterResponse, NewProcRequest, NewProcResponse, QueryJobsRequest, QueryJobsResponse,
    ResultGranularity, SendItemDataRequest, SendItemDataResponse, SetAttributeByConstraintRequest,
    SetAttributeByConstraintResponse, SetAttributeRequest, SetAttributeResponse,
    SetJobFactoryRequest, SetJobFactoryResponse,
};
use jobsub_protocol::{
    features, Command, ErrorCode, JobId, QmgmtError, QmgmtRequest, QmgmtResponse, PROTOCOL_MAX,
    PROTOCOL_MIN, PROTOCOL_VERSION_PROBE,
};

use crate::factory::{parse_digest, FactoryError};
use crate::foreach::{Binding, EmptyFieldPolicy};

use super::failure::{FailureConfig, FailureInjector, Fault};
use super::state::{ClusterRecord, Edit, Factory, QueueStore, Transaction};

/// Handle of one client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

/// Queue ceilings. `None` means unlimited.
#[derive(Debug, Clone, Default)]
pub struct MockLimits {
    pub max_jobs_submitted: Option<u64>,
    pub max_jobs_per_owner: Option<u64>,
    /// Jobs one transaction may create.
    pub max_jobs_per_submission: Option<u64>,
    pub max_procs_per_cluster: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub name: String,
    pub limits: MockLimits,
    /// Shared secret `begin` must present, if set.
    pub token: Option<String>,
    /// Owners allowed to act on anyone's jobs.
    pub superusers: Vec<String>,
    /// Owners refused at `new_cluster`.
    pub disabled_owners: Vec<String>,
    pub late_materialization: bool,
    /// When false, action results carry only the boolean `ActionResult`.
    pub granular_action_results: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: "mock-schedd".to_string(),
            limits: MockLimits::default(),
            token: None,
            superusers: Vec::new(),
            disabled_owners: Vec::new(),
            late_materialization: true,
            granular_action_results: true,
        }
    }
}

impl MockConfig {
    fn features(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.late_materialization {
            out.push(features::LATE_MATERIALIZATION.to_string());
        }
        if self.granular_action_results {
            out.push(features::GRANULAR_ACTION_RESULTS.to_string());
        }
        out
    }

    fn is_superuser(&self, owner: &str) -> bool {
        self.superusers.iter().any(|s| s == owner)
    }
}

/// An action evaluated by `act_on_jobs`, applied by `confirm_action`.
#[derive(Debug)]
struct StagedAction {
    action: ActionKind,
    reason: String,
    targets: Vec<JobId>,
}

#[derive(Debug, Default)]
struct Session {
    owner: String,
    version: Option<i32>,
    tx: Option<Transaction>,
    /// Last cluster allocated; later transactions may add procs to it.
    active_cluster: Option<i32>,
    staged: Option<StagedAction>,
}

#[derive(Debug)]
struct Inner {
    config: MockConfig,
    store: QueueStore,
    sessions: HashMap<SessionId, Session>,
    next_session: u64,
    notifications: u32,
}

/// In-process queue manager. Clones share state.
#[derive(Clone)]
pub struct MockSchedd {
    inner: Arc<Mutex<Inner>>,
    failures: Arc<Mutex<FailureInjector>>,
}

impl Default for MockSchedd {
    fn default() -> Self {
        Self::new()
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn reply<T: Serialize>(payload: T) -> Result<serde_json::Value, QmgmtError> {
    serde_json::to_value(payload).map_err(|e| QmgmtError::internal(e.to_string()))
}

fn parse_constraint(text: &str) -> Result<Expr, QmgmtError> {
    Expr::parse(text).map_err(|e| QmgmtError::constraint_invalid(text, e.to_string()))
}

/// Identity attributes are fixed by the queue manager: `ProcId` and
/// `ClusterId` must name the record they are set on, and only a superuser
/// may give a job to another owner.
fn check_identity(job: JobId, name: &str, value: &Expr, owner: &str, superuser: bool) -> Result<(), QmgmtError> {
    let literal = value.eval(&Ad::new());
    if name.eq_ignore_ascii_case(attrs::PROC_ID) {
        if job.is_cluster_record() || literal != Value::Int(i64::from(job.proc)) {
            return Err(QmgmtError::attribute_rejected(
                name,
                format!("job {} cannot have {} = {}", job, name, value),
            ));
        }
    } else if name.eq_ignore_ascii_case(attrs::CLUSTER_ID) {
        if literal != Value::Int(i64::from(job.cluster)) {
            return Err(QmgmtError::attribute_rejected(
                name,
                format!("job {} cannot have {} = {}", job, name, value),
            ));
        }
    } else if name.eq_ignore_ascii_case(attrs::OWNER) && !superuser {
        match literal {
            Value::Str(s) if s == owner => {}
            _ => {
                return Err(QmgmtError::permission_denied(format!(
                    "{} may not set {} = {} on job {}",
                    owner, name, value, job
                )))
            }
        }
    }
    Ok(())
}

/// Outcome of `action` on a job whose status is `current`.
fn classify(action: ActionKind, current: i64) -> ActionResultCode {
    match (action, current) {
        (ActionKind::Hold, status::HELD) => ActionResultCode::AlreadyDone,
        (ActionKind::Hold, status::REMOVED | status::COMPLETED) => ActionResultCode::BadStatus,
        (ActionKind::Release, status::HELD) => ActionResultCode::Success,
        (ActionKind::Release, _) => ActionResultCode::BadStatus,
        (ActionKind::Remove, status::REMOVED) => ActionResultCode::AlreadyDone,
        (ActionKind::Remove, status::COMPLETED) => ActionResultCode::BadStatus,
        _ => ActionResultCode::Success,
    }
}

fn apply_action(ad: &mut Ad, action: ActionKind, reason: &str, now: i64) {
    let previous = ad.lookup_int(attrs::JOB_STATUS).unwrap_or(status::IDLE);
    ad.insert_value(attrs::LAST_JOB_STATUS, previous);
    ad.insert_value(attrs::ENTERED_CURRENT_STATUS, now);
    match action {
        ActionKind::Hold => {
            ad.insert_value(attrs::JOB_STATUS, status::HELD);
            ad.insert_value(attrs::HOLD_REASON, reason);
            ad.insert_value(attrs::HOLD_REASON_CODE, 1i64);
        }
        ActionKind::Release => {
            ad.insert_value(attrs::JOB_STATUS, status::IDLE);
            ad.remove(attrs::HOLD_REASON);
            ad.remove(attrs::HOLD_REASON_CODE);
            ad.insert_value(attrs::RELEASE_REASON, reason);
        }
        ActionKind::Remove => {
            ad.insert_value(attrs::JOB_STATUS, status::REMOVED);
            ad.insert_value(attrs::REMOVE_REASON, reason);
        }
    }
}

fn digest_error(err: FactoryError) -> QmgmtError {
    match err {
        FactoryError::Digest { line, reason } => QmgmtError::digest_invalid(line, reason),
        other => QmgmtError::digest_invalid(0, other.to_string()),
    }
}

impl MockSchedd {
    pub fn new() -> Self {
        Self::with_config(MockConfig::default())
    }

    pub fn with_config(config: MockConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                config,
                store: QueueStore::new(),
                sessions: HashMap::new(),
                next_session: 1,
                notifications: 0,
            })),
            failures: Arc::new(Mutex::new(FailureInjector::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // === Test configuration ===

    pub fn config(&self) -> MockConfig {
        self.lock().config.clone()
    }

    pub fn disable_owner(&self, owner: &str) {
        self.lock().config.disabled_owners.push(owner.to_string());
    }

    pub fn add_superuser(&self, owner: &str) {
        self.lock().config.superusers.push(owner.to_string());
    }

    pub fn set_limits(&self, limits: MockLimits) {
        self.lock().config.limits = limits;
    }

    pub fn inject_failure(&self, command: Command, config: FailureConfig) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .inject(command, config);
    }

    pub fn inject_error(&self, command: Command, code: ErrorCode, message: &str) {
        self.inject_failure(command, FailureConfig::error(code, message));
    }

    pub fn clear_failures(&self) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Commit `count` idle jobs for `owner` in a fresh cluster.
    pub fn seed_jobs(&self, owner: &str, count: usize) -> Vec<JobId> {
        let mut inner = self.lock();
        let now = now();
        let cluster_id = inner.store.allocate_cluster_id();
        let mut tx = Transaction::default();
        let mut cluster = ClusterRecord::new(owner);
        cluster.ad.insert_value(attrs::OWNER, owner);
        cluster.ad.insert_value(attrs::CLUSTER_ID, cluster_id);
        cluster.ad.insert_value(attrs::CMD, "/bin/sleep");
        cluster.ad.insert_value(attrs::Q_DATE, now);

        let mut ids = Vec::with_capacity(count);
        for proc_id in 0..count as i32 {
            let mut ad = Ad::new();
            ad.insert_value(attrs::PROC_ID, proc_id);
            ad.insert_value(attrs::JOB_STATUS, status::IDLE);
            ad.insert_value(attrs::ENTERED_CURRENT_STATUS, now);
            let id = JobId::new(cluster_id, proc_id);
            tx.procs.insert(id, ad);
            ids.push(id);
        }
        cluster.next_proc = count as i32;
        tx.clusters.insert(cluster_id, cluster);
        inner.store.apply(tx, now);
        ids
    }

    // === Inspection ===

    /// Every committed job, flattened over its cluster record, in id order.
    pub fn committed_jobs(&self) -> Vec<Ad> {
        let inner = self.lock();
        inner
            .store
            .job_ids()
            .into_iter()
            .filter_map(|id| inner.store.flattened(id))
            .collect()
    }

    pub fn job(&self, id: JobId) -> Option<Ad> {
        self.lock().store.flattened(id)
    }

    /// The process record as stored, without inherited attributes.
    pub fn proc_record(&self, id: JobId) -> Option<Ad> {
        self.lock().store.procs.get(&id).cloned()
    }

    pub fn cluster_record(&self, cluster_id: i32) -> Option<Ad> {
        self.lock().store.clusters.get(&cluster_id).map(|c| c.ad.clone())
    }

    /// `(materialized, total)` for a factory cluster.
    pub fn factory_progress(&self, cluster_id: i32) -> Option<(usize, usize)> {
        let inner = self.lock();
        let factory = inner.store.clusters.get(&cluster_id)?.factory.as_ref()?;
        Some((factory.produced, factory.total_jobs()))
    }

    pub fn next_cluster_id(&self) -> i32 {
        self.lock().store.next_cluster_id()
    }

    /// Scheduler notifications requested by confirmed actions.
    pub fn notifications(&self) -> u32 {
        self.lock().notifications
    }

    /// Move a committed job to `status_code`. Factories refill freed slots.
    pub fn set_job_status(&self, id: JobId, status_code: i64) -> bool {
        let mut inner = self.lock();
        let now = now();
        let Some(ad) = inner.store.procs.get_mut(&id) else {
            return false;
        };
        let previous = ad.lookup_int(attrs::JOB_STATUS).unwrap_or(status::IDLE);
        ad.insert_value(attrs::LAST_JOB_STATUS, previous);
        ad.insert_value(attrs::JOB_STATUS, status_code);
        ad.insert_value(attrs::ENTERED_CURRENT_STATUS, now);
        inner.store.materialize(id.cluster, now);
        true
    }

    /// Mark every live job in `cluster_id` completed until its factory (if
    /// any) is exhausted. Returns the number of jobs completed.
    pub fn drain_cluster(&self, cluster_id: i32) -> usize {
        let mut completed = 0;
        loop {
            let live: Vec<JobId> = {
                let inner = self.lock();
                inner
                    .store
                    .procs
                    .iter()
                    .filter(|(id, ad)| {
                        id.cluster == cluster_id
                            && matches!(
                                ad.lookup_int(attrs::JOB_STATUS),
                                Some(status::IDLE | status::RUNNING)
                            )
                    })
                    .map(|(id, _)| *id)
                    .collect()
            };
            if live.is_empty() {
                return completed;
            }
            for id in live {
                if self.set_job_status(id, status::COMPLETED) {
                    completed += 1;
                }
            }
        }
    }

    // === Sessions ===

    pub fn open_session(&self) -> SessionId {
        let mut inner = self.lock();
        let id = SessionId(inner.next_session);
        inner.next_session += 1;
        inner.sessions.insert(id, Session::default());
        id
    }

    /// Drop a session and anything it had not committed.
    pub fn close_session(&self, session: SessionId) {
        let mut inner = self.lock();
        if let Some(s) = inner.sessions.remove(&session) {
            if s.tx.as_ref().is_some_and(|tx| !tx.is_empty()) {
                tracing::debug!(owner = %s.owner, "session closed, discarding open transaction");
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// True between a `begin` on `session` and its `disconnect`.
    pub fn session_begun(&self, session: SessionId) -> bool {
        self.lock()
            .sessions
            .get(&session)
            .is_some_and(|s| s.version.is_some())
    }

    pub fn has_staged_action(&self, session: SessionId) -> bool {
        self.lock()
            .sessions
            .get(&session)
            .is_some_and(|s| s.staged.is_some())
    }

    // === Request handling ===

    /// Handle one request. Unacknowledged assignments produce no response;
    /// if one fails, the session's transaction is abandoned.
    pub fn handle_request(
        &self,
        session: SessionId,
        request: &QmgmtRequest,
    ) -> Option<QmgmtResponse> {
        let result = self.process(session, request);
        let version = request.protocol_version;
        let request_id = request.request_id.clone();

        if !request.expects_response() {
            if let Err(error) = result {
                tracing::debug!(%error, "unacknowledged assignment failed");
                let mut inner = self.lock();
                if let Some(tx) = inner
                    .sessions
                    .get_mut(&session)
                    .and_then(|s| s.tx.as_mut())
                {
                    tx.abandoned.get_or_insert(error.message);
                }
            }
            return None;
        }

        Some(match result {
            Ok(payload) => QmgmtResponse::success(version, request_id, payload),
            Err(error) => QmgmtResponse::error(version, request_id, error),
        })
    }

    /// Handle one JSON line, returning the JSON response line, if any.
    pub fn handle_json(&self, session: SessionId, line: &str) -> Option<String> {
        let response = match serde_json::from_str::<QmgmtRequest>(line) {
            Ok(request) => self.handle_request(session, &request)?,
            Err(e) => QmgmtResponse::error(
                PROTOCOL_VERSION_PROBE,
                String::new(),
                QmgmtError::invalid_request(format!("malformed request: {}", e)),
            ),
        };
        serde_json::to_string(&response).ok()
    }

    fn check_failure(&self, command: Command) -> Option<Fault> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .check(command)
    }

    fn process(
        &self,
        session: SessionId,
        request: &QmgmtRequest,
    ) -> Result<serde_json::Value, QmgmtError> {
        match self.check_failure(request.command) {
            Some(Fault::Stall(delay)) => thread::sleep(delay),
            Some(Fault::Reject { code, message }) => return Err(QmgmtError::new(code, message)),
            None => {}
        }

        let mut inner = self.lock();
        inner.validate_version(session, request)?;
        inner.dispatch(session, request)
    }
}

impl Inner {
    fn validate_version(&self, id: SessionId, request: &QmgmtRequest) -> Result<(), QmgmtError> {
        if request.command == Command::Begin {
            if request.protocol_version != PROTOCOL_VERSION_PROBE {
                return Err(QmgmtError::unsupported_protocol(
                    request.protocol_version,
                    PROTOCOL_VERSION_PROBE,
                    PROTOCOL_VERSION_PROBE,
                ));
            }
            return Ok(());
        }
        match self.sessions.get(&id).and_then(|s| s.version) {
            Some(v) if v == request.protocol_version => Ok(()),
            _ => Err(QmgmtError::unsupported_protocol(
                request.protocol_version,
                PROTOCOL_MIN,
                PROTOCOL_MAX,
            )),
        }
    }

    fn dispatch(
        &mut self,
        id: SessionId,
        request: &QmgmtRequest,
    ) -> Result<serde_json::Value, QmgmtError> {
        let command = request.command;
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| QmgmtError::internal("unknown session"))?;

        if command.requires_transaction() {
            let tx = session
                .tx
                .as_ref()
                .ok_or_else(|| QmgmtError::no_transaction(command.as_str()))?;
            if let Some(reason) = tx.abandoned.clone() {
                if command == Command::Commit {
                    session.tx = None;
                }
                return Err(QmgmtError::transaction_abandoned(&reason));
            }
        }

        match command {
            Command::Begin => self.begin(id, request),
            Command::NewCluster => self.new_cluster(id),
            Command::NewProc => self.new_proc(id, request.payload_as()?),
            Command::SetAttribute => self.set_attribute(id, request.payload_as()?),
            Command::SetAttributeByConstraint => {
                self.set_attribute_by_constraint(id, request.payload_as()?)
            }
            Command::DestroyCluster => self.destroy_cluster(id, request.payload_as()?),
            Command::Commit => self.commit(id, request.payload_as()?),
            Command::Disconnect => self.disconnect(id),
            Command::SendItemData => self.send_item_data(id, request.payload_as()?),
            Command::SetJobFactory => self.set_job_factory(id, request.payload_as()?),
            Command::QueryJobs => self.query_jobs(request.payload_as()?),
            Command::ActOnJobs => self.act_on_jobs(id, request.payload_as()?),
            Command::ConfirmAction => self.confirm_action(id, request.payload_as()?),
        }
    }

    fn session(&mut self, id: SessionId) -> Result<&mut Session, QmgmtError> {
        self.sessions
            .get_mut(&id)
            .ok_or_else(|| QmgmtError::internal("unknown session"))
    }

    fn begin(&mut self, id: SessionId, request: &QmgmtRequest) -> Result<serde_json::Value, QmgmtError> {
        let req: BeginRequest = request.payload_as()?;
        if let Some(token) = &self.config.token {
            if req.token.as_deref() != Some(token.as_str()) {
                return Err(QmgmtError::authentication_failed());
            }
        }
        if req.owner.is_empty() {
            return Err(QmgmtError::invalid_request("begin requires an owner"));
        }
        let version = req.protocol_max.min(PROTOCOL_MAX);
        if version < req.protocol_min.max(PROTOCOL_MIN) {
            return Err(QmgmtError::unsupported_protocol(
                req.protocol_max,
                PROTOCOL_MIN,
                PROTOCOL_MAX,
            ));
        }

        let response = BeginResponse {
            protocol_version: version,
            features: self.config.features(),
            schedd_name: self.config.name.clone(),
        };
        let session = self.session(id)?;
        session.owner = req.owner;
        session.version = Some(version);
        if session.tx.is_none() {
            session.tx = Some(Transaction::default());
        }
        reply(response)
    }

    fn new_cluster(&mut self, id: SessionId) -> Result<serde_json::Value, QmgmtError> {
        let Inner {
            config,
            store,
            sessions,
            ..
        } = self;
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| QmgmtError::internal("unknown session"))?;
        let tx = session
            .tx
            .as_mut()
            .ok_or_else(|| QmgmtError::no_transaction("new_cluster"))?;

        if config.disabled_owners.iter().any(|o| *o == session.owner) {
            return Err(QmgmtError::owner_disabled(&session.owner));
        }
        if let Some(limit) = config.limits.max_jobs_submitted {
            if (store.job_count() + tx.procs.len()) as u64 >= limit {
                return Err(QmgmtError::ceiling(ErrorCode::MaxJobsSubmitted, limit));
            }
        }
        if let Some(limit) = config.limits.max_jobs_per_owner {
            let owned = store.owner_job_count(&session.owner) + tx.owner_procs(&session.owner, store);
            if owned as u64 >= limit {
                return Err(QmgmtError::ceiling(ErrorCode::MaxJobsPerOwner, limit));
            }
        }

        let cluster_id = store.allocate_cluster_id();
        let mut cluster = ClusterRecord::new(&session.owner);
        cluster.ad.insert_value(attrs::CLUSTER_ID, cluster_id);
        tx.clusters.insert(cluster_id, cluster);
        session.active_cluster = Some(cluster_id);
        tracing::debug!(cluster_id, owner = %session.owner, "new cluster");
        reply(NewClusterResponse { cluster_id })
    }

    fn new_proc(&mut self, id: SessionId, req: NewProcRequest) -> Result<serde_json::Value, QmgmtError> {
        let Inner {
            config,
            store,
            sessions,
            ..
        } = self;
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| QmgmtError::internal("unknown session"))?;
        let owner = session.owner.clone();
        let active = session.active_cluster;
        let tx = session
            .tx
            .as_mut()
            .ok_or_else(|| QmgmtError::no_transaction("new_proc"))?;
        let cluster_id = req.cluster_id;

        let next = if let Some(cluster) = tx.clusters.get(&cluster_id) {
            cluster.next_proc
        } else {
            match store.clusters.get(&cluster_id) {
                Some(c) if active == Some(cluster_id) && c.owner == owner && c.factory.is_none() => {
                    tx.next_proc.get(&cluster_id).copied().unwrap_or(c.next_proc)
                }
                _ => return Err(QmgmtError::cluster_not_found(cluster_id)),
            }
        };

        let limits = &config.limits;
        if let Some(limit) = limits.max_jobs_submitted {
            if (store.job_count() + tx.procs.len()) as u64 >= limit {
                return Err(QmgmtError::ceiling(ErrorCode::MaxJobsSubmitted, limit));
            }
        }
        if let Some(limit) = limits.max_jobs_per_owner {
            if (store.owner_job_count(&owner) + tx.owner_procs(&owner, store)) as u64 >= limit {
                return Err(QmgmtError::ceiling(ErrorCode::MaxJobsPerOwner, limit));
            }
        }
        if let Some(limit) = limits.max_jobs_per_submission {
            if tx.procs.len() as u64 >= limit {
                return Err(QmgmtError::ceiling(ErrorCode::MaxJobsPerSubmission, limit));
            }
        }
        if let Some(limit) = limits.max_procs_per_cluster {
            if next as u64 >= limit {
                return Err(QmgmtError::ceiling(ErrorCode::MaxProcsPerCluster, limit));
            }
        }

        let mut ad = Ad::new();
        ad.insert_value(attrs::PROC_ID, next);
        tx.procs.insert(JobId::new(cluster_id, next), ad);
        match tx.clusters.get_mut(&cluster_id) {
            Some(cluster) => cluster.next_proc = next + 1,
            None => {
                tx.next_proc.insert(cluster_id, next + 1);
            }
        }
        reply(NewProcResponse { proc_id: next })
    }

    fn set_attribute(
        &mut self,
        id: SessionId,
        req: SetAttributeRequest,
    ) -> Result<serde_json::Value, QmgmtError> {
        let Inner {
            config,
            store,
            sessions,
            ..
        } = self;
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| QmgmtError::internal("unknown session"))?;
        let superuser = config.is_superuser(&session.owner);
        let owner = session.owner.clone();
        let tx = session
            .tx
            .as_mut()
            .ok_or_else(|| QmgmtError::no_transaction("set_attribute"))?;

        let value = Expr::parse(&req.value)
            .map_err(|e| QmgmtError::attribute_rejected(&req.name, e.to_string()))?;
        let job = req.job;
        check_identity(job, &req.name, &value, &owner, superuser)?;

        let staged = if job.is_cluster_record() {
            tx.clusters.get_mut(&job.cluster).map(|c| &mut c.ad)
        } else {
            tx.procs.get_mut(&job)
        };
        if let Some(ad) = staged {
            ad.insert(req.name, value);
            return reply(SetAttributeResponse {});
        }

        let committed = job.is_cluster_record() || store.procs.contains_key(&job);
        if committed && store.owner_of(job) == Some(owner.as_str()) {
            tx.journal.push(Edit {
                job,
                name: req.name,
                value,
            });
            return reply(SetAttributeResponse {});
        }
        if store.clusters.contains_key(&job.cluster) || tx.clusters.contains_key(&job.cluster) {
            Err(QmgmtError::attribute_rejected(
                &req.name,
                format!("job {} is not writable in this session", job),
            ))
        } else {
            Err(QmgmtError::cluster_not_found(job.cluster))
        }
    }

    fn set_attribute_by_constraint(
        &mut self,
        id: SessionId,
        req: SetAttributeByConstraintRequest,
    ) -> Result<serde_json::Value, QmgmtError> {
        let Inner {
            config,
            store,
            sessions,
            ..
        } = self;
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| QmgmtError::internal("unknown session"))?;
        let superuser = config.is_superuser(&session.owner);
        let owner = session.owner.clone();
        let tx = session
            .tx
            .as_mut()
            .ok_or_else(|| QmgmtError::no_transaction("set_attribute_by_constraint"))?;

        let constraint = parse_constraint(&req.constraint)?;
        let value = Expr::parse(&req.value)
            .map_err(|e| QmgmtError::attribute_rejected(&req.name, e.to_string()))?;

        let mut matched = 0u32;
        for job in store.job_ids() {
            let Some(ad) = store.flattened(job) else {
                continue;
            };
            if !matches(&constraint, &ad) {
                continue;
            }
            if !superuser && store.owner_of(job) != Some(owner.as_str()) {
                continue;
            }
            check_identity(job, &req.name, &value, &owner, superuser)?;
            tx.journal.push(Edit {
                job,
                name: req.name.clone(),
                value: value.clone(),
            });
            matched += 1;
        }
        reply(SetAttributeByConstraintResponse { matched })
    }

    fn destroy_cluster(
        &mut self,
        id: SessionId,
        req: DestroyClusterRequest,
    ) -> Result<serde_json::Value, QmgmtError> {
        let session = self.session(id)?;
        let tx = session
            .tx
            .as_mut()
            .ok_or_else(|| QmgmtError::no_transaction("destroy_cluster"))?;
        let cluster_id = req.cluster_id;
        if tx.clusters.remove(&cluster_id).is_none() {
            return Err(QmgmtError::cluster_not_found(cluster_id));
        }
        let before = tx.procs.len();
        tx.procs.retain(|job, _| job.cluster != cluster_id);
        let destroyed_procs = (before - tx.procs.len()) as u32;
        tx.items.remove(&cluster_id);
        if session.active_cluster == Some(cluster_id) {
            session.active_cluster = None;
        }
        tracing::debug!(cluster_id, destroyed_procs, "destroyed cluster");
        reply(DestroyClusterResponse { destroyed_procs })
    }

    fn commit(&mut self, id: SessionId, req: CommitRequest) -> Result<serde_json::Value, QmgmtError> {
        let Inner { store, sessions, .. } = self;
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| QmgmtError::internal("unknown session"))?;
        let tx = session
            .tx
            .take()
            .ok_or_else(|| QmgmtError::no_transaction("commit"))?;

        let response = if req.discard {
            tracing::debug!(owner = %session.owner, "transaction discarded");
            CommitResponse::default()
        } else {
            let applied = store.apply(tx, now());
            for warning in &applied.warnings {
                tracing::warn!("{}", warning);
            }
            CommitResponse {
                warnings: applied.warnings,
                clusters: applied.clusters,
            }
        };
        if let Some(active) = session.active_cluster {
            if !store.clusters.contains_key(&active) {
                session.active_cluster = None;
            }
        }
        reply(response)
    }

    fn disconnect(&mut self, id: SessionId) -> Result<serde_json::Value, QmgmtError> {
        let session = self.session(id)?;
        let discarded = session.tx.take().is_some_and(|tx| !tx.is_empty());
        session.staged = None;
        session.version = None;
        session.active_cluster = None;
        reply(DisconnectResponse { discarded })
    }

    fn send_item_data(
        &mut self,
        id: SessionId,
        req: SendItemDataRequest,
    ) -> Result<serde_json::Value, QmgmtError> {
        if !self.config.late_materialization {
            return Err(QmgmtError::feature_missing(features::LATE_MATERIALIZATION));
        }
        let session = self.session(id)?;
        let tx = session
            .tx
            .as_mut()
            .ok_or_else(|| QmgmtError::no_transaction("send_item_data"))?;
        if !tx.clusters.contains_key(&req.cluster_id) {
            return Err(QmgmtError::cluster_not_found(req.cluster_id));
        }
        let accepted = req.items.len() as u32;
        tx.items.insert(req.cluster_id, req.items);
        reply(SendItemDataResponse { accepted })
    }

    fn set_job_factory(
        &mut self,
        id: SessionId,
        req: SetJobFactoryRequest,
    ) -> Result<serde_json::Value, QmgmtError> {
        if !self.config.late_materialization {
            return Err(QmgmtError::feature_missing(features::LATE_MATERIALIZATION));
        }
        if req.max_materialize < 1 {
            return Err(QmgmtError::invalid_request("max_materialize must be at least 1"));
        }
        let session = self.session(id)?;
        let owner = session.owner.clone();
        let tx = session
            .tx
            .as_mut()
            .ok_or_else(|| QmgmtError::no_transaction("set_job_factory"))?;
        let cluster_id = req.cluster_id;
        let items = tx.items.get(&cluster_id).cloned();
        let Some(cluster) = tx.clusters.get_mut(&cluster_id) else {
            return Err(QmgmtError::cluster_not_found(cluster_id));
        };
        if cluster.factory.is_some() {
            return Err(QmgmtError::invalid_request(format!(
                "cluster {} already has a factory",
                cluster_id
            )));
        }

        let digest = parse_digest(&req.digest).map_err(digest_error)?;
        let items = match items {
            Some(items) => items,
            None if digest.uses_item_data() => {
                return Err(QmgmtError::new(
                    ErrorCode::ItemDataMismatch,
                    format!("digest refers to item data but none was sent for cluster {}", cluster_id),
                ))
            }
            None => Vec::new(),
        };
        let bindings: Vec<Binding> = digest
            .plan(&items)
            .bindings(EmptyFieldPolicy::Ignore)
            .collect::<Result<_, _>>()
            .map_err(|e| QmgmtError::digest_invalid(digest.queue_line(), e.to_string()))?;
        let queue_line = digest.queue_line();
        let factory = Factory {
            digest,
            bindings,
            max_materialize: req.max_materialize,
            produced: 0,
        };
        if factory.total_jobs() > 0 {
            factory
                .job_ad(0, cluster_id, cluster.next_proc, &owner, now())
                .map_err(|e| QmgmtError::digest_invalid(queue_line, e.to_string()))?;
        }

        let total_jobs = factory.total_jobs() as u32;
        cluster.factory = Some(factory);
        tracing::debug!(cluster_id, total_jobs, max_materialize = req.max_materialize, "factory registered");
        reply(SetJobFactoryResponse { total_jobs })
    }

    fn query_jobs(&self, req: QueryJobsRequest) -> Result<serde_json::Value, QmgmtError> {
        let constraint = req.constraint.as_deref().map(parse_constraint).transpose()?;
        let jobs: Vec<Ad> = self
            .store
            .job_ids()
            .into_iter()
            .filter_map(|id| self.store.flattened(id))
            .filter(|ad| constraint.as_ref().map_or(true, |c| matches(c, ad)))
            .collect();
        reply(QueryJobsResponse { jobs })
    }

    fn act_on_jobs(
        &mut self,
        id: SessionId,
        req: ActOnJobsRequest,
    ) -> Result<serde_json::Value, QmgmtError> {
        let Inner {
            config,
            store,
            sessions,
            ..
        } = self;
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| QmgmtError::internal("unknown session"))?;
        let superuser = config.is_superuser(&session.owner);

        let candidates: Vec<JobId> = match &req.selector {
            JobSelector::Ids(ids) => ids.clone(),
            JobSelector::Constraint(text) => {
                let constraint = parse_constraint(text)?;
                store
                    .job_ids()
                    .into_iter()
                    .filter(|job| {
                        store
                            .flattened(*job)
                            .is_some_and(|ad| matches(&constraint, &ad))
                    })
                    .collect()
            }
        };

        let mut outcomes = Vec::with_capacity(candidates.len());
        for job in candidates {
            let code = match store.procs.get(&job) {
                None => ActionResultCode::NotFound,
                Some(_) if !superuser && store.owner_of(job) != Some(session.owner.as_str()) => {
                    ActionResultCode::PermissionDenied
                }
                Some(ad) => classify(
                    req.action,
                    ad.lookup_int(attrs::JOB_STATUS).unwrap_or(status::IDLE),
                ),
            };
            outcomes.push((job, code));
        }

        let successes: Vec<JobId> = outcomes
            .iter()
            .filter(|(_, code)| *code == ActionResultCode::Success)
            .map(|(job, _)| *job)
            .collect();

        let mut result = Ad::new();
        if config.granular_action_results {
            result.insert_value(ACTION_RESULT_TYPE, req.result_type.code());
            match req.result_type {
                ResultGranularity::PerJob => {
                    for (job, code) in &outcomes {
                        result.insert_value(job_result_attr(*job), code.code());
                    }
                }
                ResultGranularity::Totals => {
                    for code in ActionResultCode::ALL {
                        let count = outcomes.iter().filter(|(_, c)| *c == code).count();
                        result.insert_value(total_attr(code), count as i64);
                    }
                }
                ResultGranularity::None => {}
            }
        }
        result.insert_value(ACTION_RESULT, !successes.is_empty());

        let reason = req.reason.unwrap_or_else(|| {
            format!("via jobsub {} (by user {})", req.action.verb(), session.owner)
        });
        tracing::debug!(
            action = %req.action,
            matched = outcomes.len(),
            succeeded = successes.len(),
            "action staged"
        );
        session.staged = Some(StagedAction {
            action: req.action,
            reason,
            targets: successes,
        });
        reply(ActOnJobsResponse { result })
    }

    fn confirm_action(
        &mut self,
        id: SessionId,
        req: ConfirmActionRequest,
    ) -> Result<serde_json::Value, QmgmtError> {
        let staged = self
            .session(id)?
            .staged
            .take()
            .ok_or_else(|| QmgmtError::invalid_request("no staged action to confirm"))?;

        let now = now();
        let mut applied = 0u32;
        let mut touched = BTreeSet::new();
        for job in &staged.targets {
            if let Some(ad) = self.store.procs.get_mut(job) {
                // Another session may have acted since the job was staged.
                let current = ad.lookup_int(attrs::JOB_STATUS).unwrap_or(status::IDLE);
                if classify(staged.action, current) != ActionResultCode::Success {
                    tracing::debug!(%job, action = %staged.action, current, "staged target no longer eligible");
                    continue;
                }
                apply_action(ad, staged.action, &staged.reason, now);
                applied += 1;
                touched.insert(job.cluster);
            }
        }
        if req.notify && applied > 0 {
            self.notifications += 1;
        }
        for cluster_id in touched {
            self.store.materialize(cluster_id, now);
        }
        tracing::info!(action = %staged.action, applied, "action applied");
        reply(ConfirmActionResponse { applied })
    }
}
