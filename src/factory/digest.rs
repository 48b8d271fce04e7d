//! Submit digests: the text a queue manager materializes jobs from.
//!
//! A digest is the submit template rendered as `key=value` lines followed by
//! one normalized queue line. Items travel separately as item data and the
//! queue line refers to them as `<itemdata>`.

use std::path::{Path, PathBuf};

use sha2::{Digest as _, Sha256};

use jobsub_protocol::ops::ItemRecord;

use crate::foreach::{
    parse_queue_args, ForeachMode, ForeachPlan, ItemSource, QueueArgs, Slice, DEFAULT_ITEM_VAR,
};
use crate::submit::{is_live_name, SubmitContext, SubmitError, SubmitTemplate};

use super::error::FactoryError;

/// Template keys that never go into a digest.
const OMITTED_KEYS: &[&str] = &["getenv"];

fn is_cluster_name(name: &str) -> bool {
    name.eq_ignore_ascii_case("Cluster") || name.eq_ignore_ascii_case("ClusterId")
}

/// Render the digest for one queue statement.
///
/// Per-job names (live bindings, loop variables and `Item`) are left
/// unexpanded, and so is the cluster id while it is unknown. `executable`
/// and `initialdir` become absolute paths, and `initialdir` is always emitted.
pub fn render_digest(
    ctx: &SubmitContext,
    args: &QueueArgs,
    plan: &ForeachPlan,
    base_dir: &Path,
) -> Result<String, FactoryError> {
    let loop_vars = plan.loop_vars();
    let cluster_known = ctx.live().cluster.is_some();
    let keep = |name: &str| {
        (is_live_name(name) && !(cluster_known && is_cluster_name(name)))
            || name.eq_ignore_ascii_case(DEFAULT_ITEM_VAR)
            || loop_vars.iter().any(|v| v.eq_ignore_ascii_case(name))
    };

    let iwd = match ctx.lookup_macro("initialdir") {
        Some(raw) => {
            let dir = ctx.expand_except(raw, &keep)?;
            absolute(base_dir, &dir)
        }
        None => base_dir.to_path_buf(),
    };

    let mut out = String::new();
    for (key, raw) in ctx.macros() {
        if key.starts_with('$') || OMITTED_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key)) {
            continue;
        }
        let mut value = ctx.expand_except(raw, &keep)?;
        if key.eq_ignore_ascii_case("executable") && !value.is_empty() {
            value = absolute(&iwd, &value).display().to_string();
        } else if key.eq_ignore_ascii_case("initialdir") {
            value = iwd.display().to_string();
        }
        out.push_str(&format!("{}={}\n", key, value));
    }
    if ctx.lookup_macro("initialdir").is_none() {
        out.push_str(&format!("initialdir={}\n", iwd.display()));
    }
    for (name, raw) in ctx.custom_attrs() {
        let value = ctx.expand_except(raw, &keep)?;
        out.push_str(&format!("+{}={}\n", name, value));
    }

    out.push_str(&format!("Queue {}\n", digest_queue_args(args, plan)));
    Ok(out)
}

/// The normalized queue statement of a digest.
pub fn digest_queue_args(args: &QueueArgs, plan: &ForeachPlan) -> QueueArgs {
    if !args.has_item_source() {
        return QueueArgs::with_count(args.count);
    }
    QueueArgs {
        count: args.count,
        vars: plan.loop_vars().to_vec(),
        mode: ForeachMode::From,
        slice: Some(Slice::default()),
        source: ItemSource::ItemData,
    }
}

fn absolute(dir: &Path, value: &str) -> PathBuf {
    let path = Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}

/// Item data records for a plan: the selected items with their source indices.
pub fn item_records(plan: &ForeachPlan) -> Result<Vec<ItemRecord>, FactoryError> {
    plan.selected_items()
        .iter()
        .map(|(index, text)| {
            let index = u32::try_from(*index).map_err(|_| FactoryError::ItemIndexOutOfRange(*index))?;
            Ok(ItemRecord {
                index,
                text: text.clone(),
            })
        })
        .collect()
}

/// Short SHA-256 fingerprint of a digest, for logs.
pub fn fingerprint(digest: &str) -> String {
    let hash = hex::encode(Sha256::digest(digest.as_bytes()));
    hash[..12].to_string()
}

/// A parsed digest.
#[derive(Debug, Clone)]
pub struct JobDigest {
    template: SubmitTemplate,
    args: QueueArgs,
    line: usize,
}

fn digest_error(err: SubmitError) -> FactoryError {
    let line = match &err {
        SubmitError::Syntax { line, .. }
        | SubmitError::UnterminatedQueue { line }
        | SubmitError::Queue { line, .. } => *line,
        _ => 0,
    };
    FactoryError::Digest {
        line,
        reason: err.to_string(),
    }
}

/// Parse digest text. Exactly one queue statement, on the last line.
pub fn parse_digest(text: &str) -> Result<JobDigest, FactoryError> {
    let template = SubmitTemplate::parse(text).map_err(digest_error)?;
    let statement = match template.statements() {
        [only] => only.clone(),
        [] => {
            return Err(FactoryError::Digest {
                line: text.lines().count(),
                reason: "missing queue line".to_string(),
            })
        }
        [_, second, ..] => {
            return Err(FactoryError::Digest {
                line: second.line,
                reason: "more than one queue line".to_string(),
            })
        }
    };
    if let Some(late) = template.entries().get(statement.defined) {
        return Err(FactoryError::Digest {
            line: late.line,
            reason: "assignment after the queue line".to_string(),
        });
    }

    let args = parse_queue_args(&statement.args).map_err(|e| FactoryError::Digest {
        line: statement.line,
        reason: e.to_string(),
    })?;
    match args.source {
        ItemSource::None | ItemSource::Inline(_) | ItemSource::ItemData => {}
        _ => {
            return Err(FactoryError::Digest {
                line: statement.line,
                reason: "items must be inline or sent as item data".to_string(),
            })
        }
    }

    Ok(JobDigest {
        template,
        args,
        line: statement.line,
    })
}

impl JobDigest {
    pub fn args(&self) -> &QueueArgs {
        &self.args
    }

    /// Line number of the queue statement.
    pub fn queue_line(&self) -> usize {
        self.line
    }

    pub fn uses_item_data(&self) -> bool {
        self.args.source == ItemSource::ItemData
    }

    /// A fresh context holding the digest's assignments.
    pub fn context(&self) -> SubmitContext {
        SubmitContext::new(self.template.entries())
    }

    /// Plan over `items` (ignored unless the digest uses item data).
    pub fn plan(&self, items: &[ItemRecord]) -> ForeachPlan {
        match &self.args.source {
            ItemSource::ItemData => {
                let positions: Vec<usize> = match &self.args.slice {
                    Some(slice) => slice.indices(items.len()),
                    None => (0..items.len()).collect(),
                };
                let selected = positions
                    .into_iter()
                    .filter_map(|i| items.get(i))
                    .map(|r| (r.index as usize, r.text.clone()))
                    .collect();
                ForeachPlan::from_selected(self.args.count, self.args.loop_vars(), selected)
            }
            ItemSource::Inline(inline) => ForeachPlan::new(&self.args, inline.clone()),
            _ => ForeachPlan::new(&self.args, Vec::new()),
        }
    }

    /// Jobs the digest describes given `item_count` item records.
    pub fn total_jobs(&self, item_count: usize) -> u64 {
        let selected = match &self.args.source {
            ItemSource::None => 1,
            ItemSource::Inline(items) => self
                .args
                .slice
                .map_or(items.len(), |s| s.len_for(items.len())),
            _ => self
                .args
                .slice
                .map_or(item_count, |s| s.len_for(item_count)),
        };
        u64::from(self.args.count) * selected as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foreach::EmptyFieldPolicy;

    fn setup(text: &str) -> (SubmitContext, QueueArgs, ForeachPlan) {
        let t = SubmitTemplate::parse(text).unwrap();
        let stmt = &t.statements()[0];
        let ctx = SubmitContext::new(&t.visible_to(stmt));
        let args = parse_queue_args(&stmt.args).unwrap();
        let items = match &args.source {
            ItemSource::Inline(items) => items.clone(),
            _ => Vec::new(),
        };
        let plan = ForeachPlan::new(&args, items);
        (ctx, args, plan)
    }

    #[test]
    fn test_render_keeps_per_job_names() {
        let (mut ctx, args, plan) = setup(
            "executable = run.sh\nout = $(name)_$(Process).out\noutput = $(out)\ngetenv = true\n\
             +Tag = \"$(Cluster)\"\nqueue 2 name from (\na\nb\n)\n",
        );
        let text = render_digest(&ctx, &args, &plan, Path::new("/work")).unwrap();
        assert_eq!(
            text,
            "executable=/work/run.sh\nout=$(name)_$(Process).out\noutput=$(name)_$(Process).out\n\
             initialdir=/work\n+Tag=\"$(Cluster)\"\nQueue 2 name from [:] <itemdata>\n"
        );

        ctx.set_cluster(Some(44));
        let text = render_digest(&ctx, &args, &plan, Path::new("/work")).unwrap();
        assert!(text.contains("+Tag=\"44\"\n"));
    }

    #[test]
    fn test_render_plain_count() {
        let (ctx, args, plan) = setup("executable = /bin/true\ninitialdir = jobs\nqueue 5\n");
        let text = render_digest(&ctx, &args, &plan, Path::new("/work")).unwrap();
        assert_eq!(text, "executable=/bin/true\ninitialdir=/work/jobs\nQueue 5\n");
    }

    #[test]
    fn test_parse_round_trip_plan() {
        let (ctx, args, plan) =
            setup("executable = /bin/echo\narguments = $(x)\nqueue x from [1:] (\na\nb\nc\n)\n");
        let text = render_digest(&ctx, &args, &plan, Path::new("/")).unwrap();
        let digest = parse_digest(&text).unwrap();
        assert!(digest.uses_item_data());

        let records = item_records(&plan).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].index, 1);
        assert_eq!(digest.total_jobs(records.len()), 2);

        let server_plan = digest.plan(&records);
        let bindings: Vec<_> = server_plan
            .bindings(EmptyFieldPolicy::Ignore)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(bindings[0].item_index, 1);
        assert_eq!(bindings[1].value("x"), Some("c"));
        assert_eq!(digest.context().lookup_macro("arguments"), Some("$(x)"));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_item_index_beyond_record_range() {
        let far = u32::MAX as usize + 1;
        let plan = ForeachPlan::from_selected(
            1,
            vec!["x".to_string()],
            vec![(0, "a".to_string()), (far, "b".to_string())],
        );
        match item_records(&plan) {
            Err(FactoryError::ItemIndexOutOfRange(index)) => assert_eq!(index, far),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors_name_line() {
        match parse_digest("executable=/bin/true\nbogus line\nQueue 1\n") {
            Err(FactoryError::Digest { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
        match parse_digest("executable=/bin/true\n") {
            Err(FactoryError::Digest { reason, .. }) => assert!(reason.contains("missing")),
            other => panic!("unexpected {:?}", other),
        }
        match parse_digest("Queue 1\nQueue 2\n") {
            Err(FactoryError::Digest { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
        match parse_digest("Queue 1\nexecutable=/bin/true\n") {
            Err(FactoryError::Digest { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
        match parse_digest("Queue x from items.txt\n") {
            Err(FactoryError::Digest { line, .. }) => assert_eq!(line, 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_fingerprint_is_short_hex() {
        let f = fingerprint("Queue 1\n");
        assert_eq!(f.len(), 12);
        assert!(f.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
