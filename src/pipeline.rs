//! Submission pipeline
//!
//! Drives a submit description through the foreach engine and into the
//! queue manager:
//! - Parse the description and prepare every queue statement (items,
//!   bindings, job counts) before any network traffic
//! - Submit each statement in its own transaction, eagerly or as a factory
//! - Roll back the failing transaction and report what was committed

use std::io::{self, BufRead};
use std::path::PathBuf;

use thiserror::Error;

use jobsub_ad::Ad;
use jobsub_protocol::ops::SetAttributeFlags;
use jobsub_protocol::{features, JobId};

use crate::config::EffectiveConfig;
use crate::factory::{
    choose, install, max_materialize, render_digest, resolve, FactoryError, FactoryInstall,
    FactoryMode,
};
use crate::foreach::{
    load_items, parse_queue_args, Binding, EmptyFieldPolicy, ForeachError, ForeachPlan,
    ItemLoadOptions, QueueArgs,
};
use crate::queue::{route_job_ad, Ceiling, JobQueue, QueueError};
use crate::signal::SignalState;
use crate::submit::{
    make_job_ad, JobAdOptions, SubmitContext, SubmitError, SubmitTemplate, TemplateEntry,
    FACTORY_KNOBS,
};

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Factory(#[from] FactoryError),

    #[error("submission would queue {total} jobs, more than the limit of {limit}; nothing submitted")]
    TooManyJobs { total: u64, limit: u64 },

    #[error("queue statement at line {line} needs a new cluster but only one cluster is allowed")]
    SingleCluster { line: usize },

    #[error("interrupted")]
    Interrupted,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl PipelineError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// Allocation ceiling behind this failure, if any.
    pub fn ceiling(&self) -> Option<Ceiling> {
        match self {
            Self::Queue(e) => e.ceiling(),
            Self::Factory(FactoryError::Queue(e)) => e.ceiling(),
            _ => None,
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Submission settings.
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub owner: String,
    /// Directory relative paths resolve against.
    pub base_dir: PathBuf,
    pub factory: FactoryMode,
    /// `submit.default_max_materialize`; 0 means all jobs.
    pub default_max_materialize: u32,
    pub empty_field: EmptyFieldPolicy,
    pub allow_duplicate_matches: bool,
    pub warn_empty_matches: bool,
    /// `-maxjobs`: refuse the whole submission above this many jobs.
    pub max_jobs: Option<u64>,
    pub single_cluster: bool,
    /// `-a KEY=VALUE` lines appended to the description.
    pub appended: Vec<String>,
}

impl SubmitOptions {
    pub fn new(owner: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            owner: owner.into(),
            base_dir: base_dir.into(),
            factory: FactoryMode::Auto,
            default_max_materialize: 0,
            empty_field: EmptyFieldPolicy::Ignore,
            allow_duplicate_matches: false,
            warn_empty_matches: true,
            max_jobs: None,
            single_cluster: false,
            appended: Vec::new(),
        }
    }

    /// Defaults taken from the `submit.*` configuration keys.
    pub fn from_config(config: &EffectiveConfig, base_dir: impl Into<PathBuf>) -> PipelineResult<Self> {
        let mut options = Self::new(config.get_str("submit.owner").unwrap_or_default(), base_dir);
        if let Some(mode) = config.get_str("submit.factory") {
            options.factory = mode.parse().map_err(PipelineError::Config)?;
        }
        if let Some(policy) = config.get_str("submit.empty_field") {
            options.empty_field = policy.parse().map_err(PipelineError::Config)?;
        }
        if let Some(n) = config.get_u64("submit.default_max_materialize") {
            options.default_max_materialize = n.min(u64::from(u32::MAX)) as u32;
        }
        if let Some(b) = config.get_bool("submit.allow_duplicate_matches") {
            options.allow_duplicate_matches = b;
        }
        if let Some(b) = config.get_bool("submit.warn_empty_matches") {
            options.warn_empty_matches = b;
        }
        Ok(options)
    }

    fn load_options(&self) -> ItemLoadOptions {
        ItemLoadOptions {
            base_dir: self.base_dir.clone(),
            allow_duplicate_matches: self.allow_duplicate_matches,
            warn_empty_matches: self.warn_empty_matches,
        }
    }
}

/// One queue statement, ready to submit.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub line: usize,
    pub ctx: SubmitContext,
    pub args: QueueArgs,
    pub plan: ForeachPlan,
    pub bindings: Vec<Binding>,
    pub warnings: Vec<String>,
}

impl PreparedStatement {
    pub fn total_jobs(&self) -> u64 {
        self.bindings.len() as u64
    }

    fn has_factory_knob(&self) -> bool {
        FACTORY_KNOBS
            .iter()
            .any(|k| self.ctx.lookup_macro(k).is_some())
    }

    fn has_max_idle(&self) -> bool {
        ["max_idle", "materialize_max_idle"]
            .iter()
            .any(|k| self.ctx.lookup_macro(k).is_some())
    }
}

/// Entries for `-a` lines, each parsed like a description line.
fn appended_entries(lines: &[String]) -> PipelineResult<Vec<TemplateEntry>> {
    if lines.is_empty() {
        return Ok(Vec::new());
    }
    let extra = SubmitTemplate::parse(&lines.join("\n"))?;
    Ok(extra.entries().to_vec())
}

/// Parse, expand and count everything before talking to the queue manager.
pub fn prepare(
    template: &SubmitTemplate,
    options: &SubmitOptions,
    stdin: &mut dyn BufRead,
) -> PipelineResult<Vec<PreparedStatement>> {
    if template.statements().is_empty() {
        return Err(SubmitError::NoQueueStatement.into());
    }
    let appended = appended_entries(&options.appended)?;
    let load = options.load_options();

    let mut prepared = Vec::with_capacity(template.statements().len());
    for statement in template.statements() {
        let line = statement.line;
        let wrap = |source: ForeachError| SubmitError::Queue { line, source };

        let mut entries = template.visible_to(statement);
        entries.extend(appended.iter().cloned());
        let mut ctx = SubmitContext::new(&entries);
        ctx.set_default(jobsub_ad::attrs::OWNER, &options.owner);

        let args = parse_queue_args(&statement.args).map_err(wrap)?;
        let loaded = load_items(&args.source, &load, stdin).map_err(wrap)?;
        let plan = ForeachPlan::new(&args, loaded.items);

        let mut warnings = loaded.warnings;
        warnings.extend(plan.warnings().iter().cloned());
        if !args.vars.is_empty() {
            for var in ctx.unused_loop_vars(&args.vars) {
                let warning = format!("line {}: loop variable {} is never used", line, var);
                tracing::warn!("{}", warning);
                warnings.push(warning);
            }
        }

        let bindings: Vec<Binding> = plan
            .bindings(options.empty_field)
            .collect::<Result<_, _>>()
            .map_err(wrap)?;
        for binding in &bindings {
            warnings.extend(binding.warnings.iter().map(|w| format!("line {}: {}", line, w)));
        }

        tracing::debug!(line, jobs = bindings.len(), "prepared queue statement");
        prepared.push(PreparedStatement {
            line,
            ctx,
            args,
            plan,
            bindings,
            warnings,
        });
    }

    if let Some(limit) = options.max_jobs.filter(|n| *n > 0) {
        let total: u64 = prepared.iter().map(PreparedStatement::total_jobs).sum();
        if total > limit {
            return Err(PipelineError::TooManyJobs { total, limit });
        }
    }
    Ok(prepared)
}

/// Jobs submitted to one cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterReport {
    pub cluster_id: i32,
    pub first_proc: i32,
    /// Processes created, or jobs the factory will produce.
    pub jobs: u64,
    pub factory: bool,
    /// Job records as built by the submitter (eager jobs only).
    pub ads: Vec<Ad>,
}

/// How much of a report to print.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportStyle {
    Terse,
    #[default]
    Normal,
    Verbose,
}

/// What a submission did.
#[derive(Debug, Default)]
pub struct SubmitReport {
    pub clusters: Vec<ClusterReport>,
    pub warnings: Vec<String>,
    /// The failure that stopped the submission, after rollback.
    pub error: Option<PipelineError>,
}

impl SubmitReport {
    pub fn total_jobs(&self) -> u64 {
        self.clusters.iter().map(|c| c.jobs).sum()
    }

    pub fn exit_code(&self) -> i32 {
        self.error.as_ref().map_or(0, PipelineError::exit_code)
    }

    fn record(&mut self, cluster_id: i32, first_proc: i32, jobs: u64, factory: bool, ads: Vec<Ad>) {
        if let Some(last) = self.clusters.last_mut() {
            if last.cluster_id == cluster_id && !factory && !last.factory {
                last.jobs += jobs;
                last.ads.extend(ads);
                return;
            }
        }
        self.clusters.push(ClusterReport {
            cluster_id,
            first_proc,
            jobs,
            factory,
            ads,
        });
    }

    /// Text for stdout.
    pub fn render(&self, style: ReportStyle) -> String {
        let mut out = String::new();
        match style {
            ReportStyle::Terse => {
                for c in &self.clusters {
                    let last = c.first_proc + c.jobs.saturating_sub(1) as i32;
                    out.push_str(&format!(
                        "{}.{} - {}.{}\n",
                        c.cluster_id, c.first_proc, c.cluster_id, last
                    ));
                }
            }
            ReportStyle::Normal | ReportStyle::Verbose => {
                out.push_str("Submitting job(s)");
                out.push_str(&".".repeat(self.total_jobs().min(64) as usize));
                out.push('\n');
                for c in &self.clusters {
                    if style == ReportStyle::Verbose {
                        for ad in &c.ads {
                            out.push_str(&ad.to_long_form());
                            out.push('\n');
                        }
                    }
                    let factory = if c.factory { " (late materialization)" } else { "" };
                    out.push_str(&format!(
                        "{} job(s) submitted to cluster {}{}.\n",
                        c.jobs, c.cluster_id, factory
                    ));
                }
            }
        }
        out
    }
}

/// Submission state carried from one statement to the next.
#[derive(Debug, Default)]
struct Carry {
    cluster_id: Option<i32>,
    /// Cluster record sent for `cluster_id`.
    cluster_ad: Option<Ad>,
    executable: Option<String>,
    last_was_factory: bool,
}

/// Submits prepared statements through a [`JobQueue`].
pub struct Submitter<'a> {
    queue: &'a mut dyn JobQueue,
    options: &'a SubmitOptions,
    signals: &'a SignalState,
    keep_ads: bool,
}

impl<'a> Submitter<'a> {
    pub fn new(queue: &'a mut dyn JobQueue, options: &'a SubmitOptions, signals: &'a SignalState) -> Self {
        Self {
            queue,
            options,
            signals,
            keep_ads: false,
        }
    }

    /// Keep every eager job record in the report.
    pub fn keep_ads(mut self, keep: bool) -> Self {
        self.keep_ads = keep;
        self
    }

    /// Submit every statement, one transaction each. Stops at the first
    /// failure; statements committed before it stay committed.
    pub fn submit(mut self, statements: Vec<PreparedStatement>) -> SubmitReport {
        let mut report = SubmitReport::default();
        let mut carry = Carry::default();

        for mut statement in statements {
            report.warnings.append(&mut statement.warnings);
            if statement.bindings.is_empty() {
                tracing::info!(line = statement.line, "queue statement produces no jobs");
                continue;
            }
            if self.signals.is_interrupted() {
                report.error = Some(PipelineError::Interrupted);
                break;
            }

            let mut allocated = None;
            let result = self.submit_statement(&mut statement, &mut carry, &mut allocated, &mut report);
            if let Err(error) = result {
                self.roll_back(allocated);
                tracing::error!(line = statement.line, error = %error, "submission failed");
                report.error = Some(error);
                break;
            }
        }
        report
    }

    fn roll_back(&mut self, allocated: Option<i32>) {
        if !self.queue.phase().is_open() {
            return;
        }
        if let Some(cluster_id) = allocated {
            if let Err(e) = self.queue.destroy_cluster(cluster_id) {
                tracing::warn!(cluster_id, error = %e, "could not destroy cluster");
            }
        }
        if let Err(e) = self.queue.commit(true) {
            tracing::warn!(error = %e, "could not discard transaction");
        }
    }

    fn submit_statement(
        &mut self,
        statement: &mut PreparedStatement,
        carry: &mut Carry,
        allocated: &mut Option<i32>,
        report: &mut SubmitReport,
    ) -> PipelineResult<()> {
        self.queue.begin()?;

        let total = statement.total_jobs();
        let choice = choose(self.options.factory, statement.has_factory_knob(), total);
        let factory = resolve(choice, self.queue.has_feature(features::LATE_MATERIALIZATION))?;

        let executable = statement.ctx.expanded("executable")?;
        let need_new = carry.cluster_id.is_none()
            || factory
            || carry.last_was_factory
            || executable != carry.executable;
        if need_new && carry.cluster_id.is_some() && self.options.single_cluster {
            return Err(PipelineError::SingleCluster {
                line: statement.line,
            });
        }

        let cluster_id = match carry.cluster_id {
            Some(id) if !need_new => id,
            _ => {
                let id = self.queue.allocate_cluster()?;
                *allocated = Some(id);
                carry.cluster_id = Some(id);
                carry.cluster_ad = None;
                id
            }
        };
        carry.executable = executable;
        carry.last_was_factory = factory;
        statement.ctx.set_cluster(Some(cluster_id));

        if factory {
            let jobs = self.submit_factory(statement, cluster_id)?;
            let outcome = self.queue.commit(false)?;
            report.warnings.extend(outcome.warnings);
            report.record(cluster_id, 0, jobs, true, Vec::new());
        } else {
            let (first_proc, ads) = self.submit_eager(statement, cluster_id, carry)?;
            let outcome = self.queue.commit(false)?;
            report.warnings.extend(outcome.warnings);
            report.record(cluster_id, first_proc, statement.total_jobs(), false, ads);
        }
        *allocated = None;
        Ok(())
    }

    fn job_options(&self) -> JobAdOptions {
        JobAdOptions {
            owner: self.options.owner.clone(),
            base_dir: self.options.base_dir.clone(),
            now: chrono::Utc::now().timestamp(),
        }
    }

    fn submit_eager(
        &mut self,
        statement: &mut PreparedStatement,
        cluster_id: i32,
        carry: &mut Carry,
    ) -> PipelineResult<(i32, Vec<Ad>)> {
        let job_options = self.job_options();
        let flags = SetAttributeFlags { no_ack: true };
        let mut first_proc = None;
        let mut ads = Vec::new();

        for binding in &statement.bindings {
            if self.signals.is_interrupted() {
                return Err(PipelineError::Interrupted);
            }
            let proc_id = self.queue.allocate_process(cluster_id)?;
            first_proc.get_or_insert(proc_id);

            let ctx = &mut statement.ctx;
            ctx.set_process(Some(proc_id));
            ctx.bind(binding);
            let ad = make_job_ad(ctx, &job_options)?;

            let routed = route_job_ad(&ad, carry.cluster_ad.as_ref());
            self.queue
                .assign_routed(JobId::new(cluster_id, proc_id), &routed, flags)?;
            if let Some(cluster_ad) = routed.cluster {
                carry.cluster_ad = Some(cluster_ad);
            }
            tracing::trace!(cluster_id, proc_id, "queued job");
            if self.keep_ads {
                ads.push(ad);
            }
        }
        statement.ctx.unbind();
        statement.ctx.set_process(None);
        Ok((first_proc.unwrap_or(0), ads))
    }

    fn submit_factory(&mut self, statement: &mut PreparedStatement, cluster_id: i32) -> PipelineResult<u64> {
        let job_options = self.job_options();
        let ctx = &mut statement.ctx;

        let cluster_ad = match statement.bindings.first() {
            Some(first) => {
                ctx.set_process(Some(0));
                ctx.bind(first);
                let ad = make_job_ad(ctx, &job_options);
                ctx.unbind();
                ctx.set_process(None);
                route_job_ad(&ad?, None).cluster.unwrap_or_default()
            }
            None => Ad::new(),
        };

        let digest = render_digest(ctx, &statement.args, &statement.plan, &self.options.base_dir)?;
        let limit = match ctx.expanded("max_materialize")? {
            Some(text) => Some(text.trim().parse::<i64>().map_err(|_| {
                SubmitError::attribute("max_materialize", format!("'{}' is not an integer", text))
            })?),
            None => None,
        };
        let cap = max_materialize(
            limit,
            statement.has_max_idle(),
            self.options.default_max_materialize,
            statement.total_jobs(),
        );

        let total = install(
            &mut *self.queue,
            &FactoryInstall {
                cluster_id,
                cluster_ad: &cluster_ad,
                plan: &statement.plan,
                digest: &digest,
                max_materialize: cap,
            },
        )?;
        Ok(u64::from(total))
    }
}
