//! jobsub CLI
//!
//! Entry point for the `jobsub` command-line tool.

use std::io::{self, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde_json::{json, Map, Value};

use jobsub::action::{parse_granularity, selector_for, ActionClient, ActionRequest};
use jobsub::config::EffectiveConfig;
use jobsub::factory::FactoryMode;
use jobsub::mock::{self, MockConfig, MockLimits, MockSchedd};
use jobsub::pipeline::{prepare, ReportStyle, SubmitOptions, SubmitReport, Submitter};
use jobsub::protocol::ops::{ActionKind, ResultGranularity};
use jobsub::queue::{DryRunQueue, QueueClient, QueueClientConfig, TcpConfig, TcpTransport, Transport};
use jobsub::signal::SignalHandler;
use jobsub::logging;
use jobsub::submit::SubmitTemplate;

#[derive(Parser)]
#[command(name = "jobsub")]
#[command(about = "Submit and manage batch jobs", version)]
struct Cli {
    /// Path to config file (default: $JOBSUB_CONFIG or ~/.config/jobsub/config.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "jobsub=debug" (overrides log.level)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit the jobs described in a submit file
    Submit {
        /// Submit description file
        file: PathBuf,

        /// Queue manager address (host:port)
        #[arg(long)]
        schedd: Option<String>,

        /// Submit as this owner
        #[arg(long)]
        owner: Option<String>,

        /// Refuse the submission if it would queue more than N jobs
        #[arg(long)]
        maxjobs: Option<u64>,

        /// Fail instead of creating a second cluster
        #[arg(long)]
        single_cluster: bool,

        /// Always use late materialization
        #[arg(long, conflicts_with = "no_factory")]
        factory: bool,

        /// Never use late materialization
        #[arg(long)]
        no_factory: bool,

        /// Print what would be sent instead of contacting the queue manager
        #[arg(long)]
        dry_run: bool,

        /// Print only job id ranges
        #[arg(long, conflicts_with = "verbose")]
        terse: bool,

        /// Print every job record
        #[arg(long, short = 'v')]
        verbose: bool,

        /// Extra description line, e.g. -a request_memory=2G (repeatable)
        #[arg(long = "append", short = 'a', value_name = "KEY=VALUE")]
        append: Vec<String>,
    },

    /// Put jobs on hold
    Hold(ActionArgs),

    /// Release held jobs
    Release(ActionArgs),

    /// Remove jobs from the queue
    Rm(ActionArgs),

    /// Run an in-memory queue manager
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:9618")]
        listen: String,

        /// Total jobs the queue may hold
        #[arg(long)]
        max_jobs_submitted: Option<u64>,

        /// Jobs each owner may have queued
        #[arg(long)]
        max_jobs_per_owner: Option<u64>,

        /// Jobs one transaction may create
        #[arg(long)]
        max_jobs_per_submission: Option<u64>,

        /// Processes one cluster may hold
        #[arg(long)]
        max_procs_per_cluster: Option<u64>,

        /// Token clients must present at begin
        #[arg(long)]
        token: Option<String>,

        /// Owner allowed to act on anyone's jobs (repeatable)
        #[arg(long)]
        superuser: Vec<String>,

        /// Do not advertise late materialization
        #[arg(long)]
        no_late_materialization: bool,

        /// Report action results as a single boolean
        #[arg(long)]
        legacy_action_results: bool,
    },
}

#[derive(Args)]
struct ActionArgs {
    /// Job ids (cluster.proc), cluster ids or user names
    targets: Vec<String>,

    /// Select jobs matching this expression
    #[arg(long)]
    constraint: Option<String>,

    /// Reason recorded with the action
    #[arg(long)]
    reason: Option<String>,

    /// Report counts per result instead of per job
    #[arg(long, conflicts_with = "long")]
    totals: bool,

    /// Report one line per job
    #[arg(long)]
    long: bool,

    /// Queue manager address (host:port)
    #[arg(long)]
    schedd: Option<String>,

    /// Act as this owner
    #[arg(long)]
    owner: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Submit {
            file,
            schedd,
            owner,
            maxjobs,
            single_cluster,
            factory,
            no_factory,
            dry_run,
            terse,
            verbose,
            append,
        } => {
            let config = load_config(cli.config.as_deref(), schedd, owner, cli.log_level);
            let style = if terse {
                ReportStyle::Terse
            } else if verbose {
                ReportStyle::Verbose
            } else {
                ReportStyle::Normal
            };
            let factory = if factory {
                Some(FactoryMode::Always)
            } else if no_factory {
                Some(FactoryMode::Never)
            } else {
                None
            };
            run_submit(
                &config,
                &file,
                SubmitFlags {
                    maxjobs,
                    single_cluster,
                    factory,
                    dry_run,
                    style,
                    append,
                },
            )
        }
        Commands::Hold(args) => run_action(ActionKind::Hold, args, cli.config, cli.log_level),
        Commands::Release(args) => run_action(ActionKind::Release, args, cli.config, cli.log_level),
        Commands::Rm(args) => run_action(ActionKind::Remove, args, cli.config, cli.log_level),
        Commands::Serve {
            listen,
            max_jobs_submitted,
            max_jobs_per_owner,
            max_jobs_per_submission,
            max_procs_per_cluster,
            token,
            superuser,
            no_late_materialization,
            legacy_action_results,
        } => {
            load_config(cli.config.as_deref(), None, None, cli.log_level);
            run_serve(
                &listen,
                MockConfig {
                    limits: MockLimits {
                        max_jobs_submitted,
                        max_jobs_per_owner,
                        max_jobs_per_submission,
                        max_procs_per_cluster,
                    },
                    token,
                    superusers: superuser,
                    late_materialization: !no_late_materialization,
                    granular_action_results: !legacy_action_results,
                    ..MockConfig::default()
                },
            )
        }
    };
    process::exit(code);
}

/// Load the layered config with command-line overrides and start logging.
fn load_config(
    path: Option<&Path>,
    schedd: Option<String>,
    owner: Option<String>,
    log_level: Option<String>,
) -> EffectiveConfig {
    let mut overrides = Map::new();
    if let Some(address) = schedd {
        overrides.insert("schedd".to_string(), json!({ "address": address }));
    }
    if let Some(owner) = owner {
        overrides.insert("submit".to_string(), json!({ "owner": owner }));
    }
    if let Some(level) = log_level {
        overrides.insert("log".to_string(), json!({ "level": level }));
    }
    let overrides = (!overrides.is_empty()).then_some(Value::Object(overrides));

    let config = match EffectiveConfig::load(path, overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(1);
        }
    };
    logging::init(config.get_str("log.level").unwrap_or("warn"));
    config
}

/// Owner from config, else the login name.
fn resolve_owner(config: &EffectiveConfig) -> Option<String> {
    config
        .get_str("submit.owner")
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .or_else(|| std::env::var("USER").ok().filter(|u| !u.is_empty()))
}

fn tcp_config(config: &EffectiveConfig) -> TcpConfig {
    let defaults = TcpConfig::default();
    TcpConfig {
        address: config
            .get_str("schedd.address")
            .map_or(defaults.address, str::to_string),
        connect_timeout: config
            .get_u64("schedd.connect_timeout_seconds")
            .map_or(defaults.connect_timeout, Duration::from_secs),
        io_timeout: config
            .get_u64("schedd.io_timeout_seconds")
            .map_or(defaults.io_timeout, Duration::from_secs),
    }
}

fn connect(config: &EffectiveConfig) -> Result<Arc<dyn Transport>, String> {
    let tcp = tcp_config(config);
    let address = tcp.address.clone();
    TcpTransport::connect(tcp)
        .map(|t| Arc::new(t) as Arc<dyn Transport>)
        .map_err(|e| format!("cannot reach queue manager at {}: {}", address, e))
}

struct SubmitFlags {
    maxjobs: Option<u64>,
    single_cluster: bool,
    factory: Option<FactoryMode>,
    dry_run: bool,
    style: ReportStyle,
    append: Vec<String>,
}

fn run_submit(config: &EffectiveConfig, file: &Path, flags: SubmitFlags) -> i32 {
    let Some(owner) = resolve_owner(config) else {
        eprintln!("ERROR: no owner configured; pass --owner or set submit.owner");
        return 1;
    };
    let base_dir = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("ERROR: cannot determine the current directory: {}", e);
            return 1;
        }
    };

    let mut options = match SubmitOptions::from_config(config, base_dir) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return 1;
        }
    };
    options.owner = owner.clone();
    options.max_jobs = flags.maxjobs;
    options.single_cluster = flags.single_cluster;
    options.appended = flags.append;
    if let Some(mode) = flags.factory {
        options.factory = mode;
    }

    let template = match SubmitTemplate::from_file(file) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return 1;
        }
    };
    let prepared = {
        let stdin = io::stdin();
        let mut lock = stdin.lock();
        match prepare(&template, &options, &mut lock) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("ERROR: {}", e);
                return e.exit_code();
            }
        }
    };

    let handler = SignalHandler::new();
    if let Err(e) = handler.install() {
        tracing::warn!(error = %e, "could not install interrupt handler");
    }
    let signals = handler.state();
    let keep_ads = flags.style == ReportStyle::Verbose;

    let report = if flags.dry_run {
        let mut queue = DryRunQueue::new();
        let report = Submitter::new(&mut queue, &options, &signals)
            .keep_ads(keep_ads)
            .submit(prepared);
        let stdout = io::stdout();
        let mut out = stdout.lock();
        for line in queue.transcript() {
            let _ = writeln!(out, "{}", line);
        }
        report
    } else {
        let transport = match connect(config) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("ERROR: {}", e);
                return 1;
            }
        };
        let max_procs = config
            .get_u64("submit.max_procs_per_cluster")
            .unwrap_or(0)
            .min(u64::from(u32::MAX)) as u32;
        let mut client = QueueClient::new(
            transport,
            QueueClientConfig {
                owner,
                token: config.get_str("schedd.token").map(str::to_string),
                max_procs_per_cluster: max_procs,
            },
        );
        let report = Submitter::new(&mut client, &options, &signals)
            .keep_ads(keep_ads)
            .submit(prepared);
        if let Err(e) = client.disconnect() {
            tracing::debug!(error = %e, "disconnect failed");
        }
        report
    };

    print_submit_report(&report, flags.style)
}

fn print_submit_report(report: &SubmitReport, style: ReportStyle) -> i32 {
    for warning in &report.warnings {
        eprintln!("WARNING: {}", warning);
    }
    print!("{}", report.render(style));
    if let Some(error) = &report.error {
        eprintln!("ERROR: {}", error);
        if let Some(ceiling) = error.ceiling() {
            eprintln!("  {} ({})", ceiling.describe(), ceiling);
        }
        if !report.clusters.is_empty() {
            eprintln!(
                "  {} job(s) in {} cluster(s) were committed before the failure",
                report.total_jobs(),
                report.clusters.len()
            );
        }
    }
    report.exit_code()
}

fn run_action(
    action: ActionKind,
    args: ActionArgs,
    config_path: Option<PathBuf>,
    log_level: Option<String>,
) -> i32 {
    let config = load_config(config_path.as_deref(), args.schedd, args.owner, log_level);
    let Some(owner) = resolve_owner(&config) else {
        eprintln!("ERROR: no owner configured; pass --owner or set submit.owner");
        return 1;
    };

    let selector = match selector_for(&args.targets, args.constraint.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return 1;
        }
    };
    let granularity = if args.totals {
        ResultGranularity::Totals
    } else if args.long {
        ResultGranularity::PerJob
    } else {
        match parse_granularity(config.get_str("action.result_granularity").unwrap_or("per_job")) {
            Ok(g) => g,
            Err(e) => {
                eprintln!("ERROR: {}", e);
                return 1;
            }
        }
    };
    let request = ActionRequest {
        action,
        selector,
        reason: args.reason,
        granularity,
        notify: config.get_bool("action.notify_scheduler").unwrap_or(true),
    };

    let transport = match connect(&config) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return 1;
        }
    };
    let token = config.get_str("schedd.token").map(str::to_string);
    let mut client = ActionClient::new(transport, owner, token);
    match client.act(&request) {
        Ok(report) => {
            for message in report.messages() {
                println!("{}", message);
            }
            if report.all_ok() {
                0
            } else {
                1
            }
        }
        Err(e) => {
            eprintln!("ERROR: {}", e);
            1
        }
    }
}

fn run_serve(listen: &str, config: MockConfig) -> i32 {
    let listener = match TcpListener::bind(listen) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("ERROR: cannot listen on {}: {}", listen, e);
            return 1;
        }
    };
    match listener.local_addr() {
        Ok(addr) => println!("queue manager listening on {}", addr),
        Err(_) => println!("queue manager listening on {}", listen),
    }
    tracing::info!(address = %listen, name = %config.name, "serving in-memory queue");

    match mock::serve(listener, MockSchedd::with_config(config)) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            1
        }
    }
}
