//! Building a job record from an expanded submit context.

use std::path::{Path, PathBuf};

use jobsub_ad::{attrs, status, Ad, Expr, Value};

use super::context::SubmitContext;
use super::error::SubmitError;

/// `HoldReasonCode` for jobs submitted on hold.
pub const HOLD_CODE_SUBMITTED_ON_HOLD: i64 = 15;

/// Submit commands that set the materialization knobs.
pub const FACTORY_KNOBS: &[&str] = &["max_materialize", "max_idle", "materialize_max_idle"];

#[derive(Debug, Clone, Copy)]
enum Kind {
    Str,
    Path,
    Expr,
    Int,
    /// Size in the attribute's unit, with an optional K/M/G/T suffix.
    Size { unit_kib: i64 },
}

/// Plain submit command to attribute mappings.
const COMMANDS: &[(&str, &str, Kind)] = &[
    ("arguments", attrs::ARGS, Kind::Str),
    ("input", "In", Kind::Str),
    ("output", "Out", Kind::Str),
    ("error", "Err", Kind::Str),
    ("log", "UserLog", Kind::Path),
    ("environment", "Environment", Kind::Str),
    ("requirements", "Requirements", Kind::Expr),
    ("request_cpus", "RequestCpus", Kind::Int),
    ("request_memory", "RequestMemory", Kind::Size { unit_kib: 1024 }),
    ("request_disk", "RequestDisk", Kind::Size { unit_kib: 1 }),
    ("priority", "JobPrio", Kind::Int),
    ("batch_name", "JobBatchName", Kind::Str),
    ("max_materialize", attrs::JOB_MATERIALIZE_LIMIT, Kind::Int),
    ("max_idle", attrs::JOB_MATERIALIZE_MAX_IDLE, Kind::Int),
    ("materialize_max_idle", attrs::JOB_MATERIALIZE_MAX_IDLE, Kind::Int),
];

const UNIVERSES: &[(&str, i64)] = &[
    ("standard", 1),
    ("vanilla", 5),
    ("scheduler", 7),
    ("grid", 9),
    ("java", 10),
    ("parallel", 11),
    ("local", 12),
    ("vm", 13),
    ("container", 5),
    ("docker", 5),
];

/// Universe number for a universe name.
pub fn universe_code(name: &str) -> Option<i64> {
    UNIVERSES
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, c)| *c)
}

/// Fixed inputs that do not come from the template.
#[derive(Debug, Clone)]
pub struct JobAdOptions {
    pub owner: String,
    /// Directory relative paths resolve against.
    pub base_dir: PathBuf,
    /// Submission time, seconds since the epoch.
    pub now: i64,
}

fn absolute(dir: &Path, value: &str) -> String {
    let path = Path::new(value);
    if path.is_absolute() {
        value.to_string()
    } else {
        dir.join(path).display().to_string()
    }
}

fn parse_int(name: &str, text: &str) -> Result<Value, SubmitError> {
    let expr = Expr::parse(text).map_err(|e| SubmitError::attribute(name, e))?;
    match expr.eval(&Ad::new()) {
        Value::Int(i) => Ok(Value::Int(i)),
        Value::Real(r) if r.fract() == 0.0 => Ok(Value::Int(r as i64)),
        other => Err(SubmitError::attribute(
            name,
            format!("expected an integer, got {}", other.type_name()),
        )),
    }
}

fn parse_size(name: &str, text: &str, unit_kib: i64) -> Result<Value, SubmitError> {
    let trimmed = text.trim();
    let lower = trimmed.to_ascii_lowercase();
    let number = lower.trim_end_matches('b');
    let (digits, scale_kib) = match number.chars().last() {
        Some('k') => (&number[..number.len() - 1], 1),
        Some('m') => (&number[..number.len() - 1], 1024),
        Some('g') => (&number[..number.len() - 1], 1024 * 1024),
        Some('t') => (&number[..number.len() - 1], 1024 * 1024 * 1024),
        _ => return parse_int(name, trimmed),
    };
    let amount: f64 = digits
        .trim()
        .parse()
        .map_err(|_| SubmitError::attribute(name, format!("invalid size '{}'", text)))?;
    let kib = amount * scale_kib as f64;
    Ok(Value::Int((kib / unit_kib as f64).ceil() as i64))
}

fn truthy(text: &str) -> bool {
    matches!(
        text.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "t" | "y" | "1"
    )
}

fn notification_code(text: &str) -> Option<i64> {
    match text.trim().to_ascii_lowercase().as_str() {
        "never" => Some(0),
        "always" => Some(1),
        "complete" => Some(2),
        "error" => Some(3),
        _ => None,
    }
}

/// Build the complete job record for the job currently bound in `ctx`.
pub fn make_job_ad(ctx: &SubmitContext, options: &JobAdOptions) -> Result<Ad, SubmitError> {
    let mut ad = Ad::new();
    let live = ctx.live();
    ad.insert_value(attrs::CLUSTER_ID, live.cluster.unwrap_or(0));
    ad.insert_value(attrs::PROC_ID, live.process.unwrap_or(0));
    ad.insert_value(attrs::OWNER, options.owner.as_str());
    ad.insert_value(attrs::Q_DATE, options.now);
    ad.insert_value(attrs::JOB_STATUS, status::IDLE);
    ad.insert_value(attrs::ENTERED_CURRENT_STATUS, options.now);

    let iwd = match ctx.expanded("initialdir")? {
        Some(dir) if !dir.is_empty() => absolute(&options.base_dir, &dir),
        _ => options.base_dir.display().to_string(),
    };
    let iwd_path = PathBuf::from(&iwd);

    let universe = ctx.expanded("universe")?.unwrap_or_default();
    let universe = if universe.is_empty() {
        "vanilla".to_string()
    } else {
        universe
    };
    let code = universe_code(&universe).ok_or(SubmitError::UnknownUniverse(universe))?;
    ad.insert_value(attrs::JOB_UNIVERSE, code);

    let executable = match ctx.expanded("executable")? {
        Some(exe) if !exe.is_empty() => exe,
        _ => return Err(SubmitError::MissingExecutable),
    };
    ad.insert_value(attrs::CMD, absolute(&iwd_path, &executable));
    ad.insert_value(attrs::IWD, iwd.as_str());

    for (command, attr, kind) in COMMANDS {
        let Some(text) = ctx.expanded(command)? else {
            continue;
        };
        let value = match kind {
            Kind::Str => Value::Str(text),
            Kind::Path => Value::Str(absolute(&iwd_path, &text)),
            Kind::Int => parse_int(attr, &text)?,
            Kind::Size { unit_kib } => parse_size(attr, &text, *unit_kib)?,
            Kind::Expr => {
                let expr = Expr::parse(&text).map_err(|e| SubmitError::attribute(attr, e))?;
                ad.insert(*attr, expr);
                continue;
            }
        };
        ad.insert_value(*attr, value);
    }

    if let Some(text) = ctx.expanded("notification")? {
        let code = notification_code(&text).ok_or_else(|| {
            SubmitError::attribute("JobNotification", format!("unknown notification '{}'", text))
        })?;
        ad.insert_value("JobNotification", code);
    }

    if ctx.expanded("hold")?.is_some_and(|h| truthy(&h)) {
        ad.insert_value(attrs::JOB_STATUS, status::HELD);
        ad.insert_value(attrs::HOLD_REASON, "submitted on hold at user's request");
        ad.insert_value(attrs::HOLD_REASON_CODE, HOLD_CODE_SUBMITTED_ON_HOLD);
    }

    for (name, raw) in ctx.custom_attrs() {
        let text = ctx.expand(raw)?;
        let expr = Expr::parse(&text).map_err(|e| SubmitError::attribute(name, e))?;
        ad.insert(name.as_str(), expr);
    }

    Ok(ad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submit::template::SubmitTemplate;

    fn options() -> JobAdOptions {
        JobAdOptions {
            owner: "alice".to_string(),
            base_dir: PathBuf::from("/home/alice/work"),
            now: 1_700_000_000,
        }
    }

    fn build(text: &str) -> Result<Ad, SubmitError> {
        let t = SubmitTemplate::parse(text).unwrap();
        let mut ctx = SubmitContext::new(t.entries());
        ctx.set_cluster(Some(7));
        ctx.set_process(Some(2));
        make_job_ad(&ctx, &options())
    }

    #[test]
    fn test_fixed_attributes() {
        let ad = build("executable = run.sh\n").unwrap();
        assert_eq!(ad.lookup_int("ClusterId"), Some(7));
        assert_eq!(ad.lookup_int("ProcId"), Some(2));
        assert_eq!(ad.lookup_str("Owner").as_deref(), Some("alice"));
        assert_eq!(ad.lookup_int("QDate"), Some(1_700_000_000));
        assert_eq!(ad.lookup_int("JobStatus"), Some(status::IDLE));
        assert_eq!(ad.lookup_int("JobUniverse"), Some(5));
        assert_eq!(ad.lookup_str("Cmd").as_deref(), Some("/home/alice/work/run.sh"));
        assert_eq!(ad.lookup_str("Iwd").as_deref(), Some("/home/alice/work"));
    }

    #[test]
    fn test_mapped_commands() {
        let ad = build(
            "executable = /bin/sleep\narguments = 10\ninitialdir = sub\nlog = job.log\n\
             request_memory = 2GB\nrequest_disk = 1024\nrequest_cpus = 2\npriority = -3\n\
             requirements = Memory > 1024\nnotification = complete\nbatch_name = nightly\n\
             universe = local\n",
        )
        .unwrap();
        assert_eq!(ad.lookup_str("Cmd").as_deref(), Some("/bin/sleep"));
        assert_eq!(ad.lookup_str("Iwd").as_deref(), Some("/home/alice/work/sub"));
        assert_eq!(ad.lookup_str("UserLog").as_deref(), Some("/home/alice/work/sub/job.log"));
        assert_eq!(ad.lookup_str("Args").as_deref(), Some("10"));
        assert_eq!(ad.lookup_int("RequestMemory"), Some(2048));
        assert_eq!(ad.lookup_int("RequestDisk"), Some(1024));
        assert_eq!(ad.lookup_int("RequestCpus"), Some(2));
        assert_eq!(ad.lookup_int("JobPrio"), Some(-3));
        assert_eq!(ad.get("Requirements").unwrap().to_string(), "Memory > 1024");
        assert_eq!(ad.lookup_int("JobNotification"), Some(2));
        assert_eq!(ad.lookup_str("JobBatchName").as_deref(), Some("nightly"));
        assert_eq!(ad.lookup_int("JobUniverse"), Some(12));
    }

    #[test]
    fn test_hold_sets_status() {
        let ad = build("executable = x\nhold = true\n").unwrap();
        assert_eq!(ad.lookup_int("JobStatus"), Some(status::HELD));
        assert_eq!(ad.lookup_int("HoldReasonCode"), Some(HOLD_CODE_SUBMITTED_ON_HOLD));
        assert!(ad.contains("HoldReason"));
    }

    #[test]
    fn test_custom_attributes_use_macros() {
        let ad = build("executable = x\nname = run$(ProcId)\n+Tag = \"$(name)\"\n+Weight = 2 * 3\n")
            .unwrap();
        assert_eq!(ad.lookup_str("Tag").as_deref(), Some("run2"));
        assert_eq!(ad.lookup_int("Weight"), Some(6));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(build("arguments = 1\n"), Err(SubmitError::MissingExecutable)));
        assert!(matches!(
            build("executable = x\nuniverse = quantum\n"),
            Err(SubmitError::UnknownUniverse(_))
        ));
        let err = build("executable = x\n+Bad = (1 +\n").unwrap_err();
        assert!(err.to_string().starts_with("attribute Bad:"));
        let err = build("executable = x\nrequest_cpus = lots\n").unwrap_err();
        assert!(err.to_string().contains("RequestCpus"));
    }

    #[test]
    fn test_materialize_knobs() {
        let ad = build("executable = x\nmax_materialize = 4\nmax_idle = 2\n").unwrap();
        assert_eq!(ad.lookup_int("JobMaterializeLimit"), Some(4));
        assert_eq!(ad.lookup_int("JobMaterializeMaxIdle"), Some(2));
    }
}
