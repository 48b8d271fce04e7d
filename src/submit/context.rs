//! Submission context: template macros, defaults and live bindings.
//!
//! `$(name)` and `$(name:default)` are expanded recursively. `$$(...)` is
//! left for the queue manager. Names are resolved against the live bindings
//! first, then loop variables, then the template, then built-in defaults.
//! Unknown names expand to nothing.

use std::collections::HashSet;

use crate::foreach::Binding;

use super::error::SubmitError;
use super::template::TemplateEntry;

/// Deepest macro nesting accepted before expansion fails.
pub const MAX_MACRO_DEPTH: usize = 32;

/// Names bound per job rather than defined in the template.
pub const LIVE_NAMES: &[&str] = &[
    "Cluster",
    "ClusterId",
    "Process",
    "ProcId",
    "Step",
    "ItemIndex",
    "Row",
];

pub fn is_live_name(name: &str) -> bool {
    LIVE_NAMES.iter().any(|n| n.eq_ignore_ascii_case(name))
}

/// Values that change from job to job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveVars {
    pub cluster: Option<i32>,
    pub process: Option<i32>,
    pub step: Option<u32>,
    pub item_index: Option<usize>,
    pub row: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct SubmitContext {
    macros: Vec<(String, String)>,
    custom: Vec<(String, String)>,
    defaults: Vec<(String, String)>,
    loop_vars: Vec<(String, String)>,
    live: LiveVars,
}

fn find<'a>(table: &'a [(String, String)], name: &str) -> Option<&'a str> {
    table
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn upsert(table: &mut Vec<(String, String)>, name: &str, value: &str) {
    match table.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
        Some(slot) => slot.1 = value.to_string(),
        None => table.push((name.to_string(), value.to_string())),
    }
}

impl SubmitContext {
    pub fn new(entries: &[TemplateEntry]) -> Self {
        let mut ctx = Self::default();
        for entry in entries {
            if entry.custom {
                upsert(&mut ctx.custom, &entry.key, &entry.value);
            } else {
                upsert(&mut ctx.macros, &entry.key, &entry.value);
            }
        }
        ctx
    }

    pub fn set_default(&mut self, name: &str, value: &str) {
        upsert(&mut self.defaults, name, value);
    }

    /// Define or override a template macro.
    pub fn set_macro(&mut self, name: &str, value: &str) {
        upsert(&mut self.macros, name, value);
    }

    /// Raw, unexpanded template value.
    pub fn lookup_macro(&self, name: &str) -> Option<&str> {
        find(&self.macros, name)
    }

    pub fn macros(&self) -> &[(String, String)] {
        &self.macros
    }

    /// `+Attr` assignments, unexpanded.
    pub fn custom_attrs(&self) -> &[(String, String)] {
        &self.custom
    }

    pub fn live(&self) -> &LiveVars {
        &self.live
    }

    pub fn set_cluster(&mut self, cluster: Option<i32>) {
        self.live.cluster = cluster;
    }

    pub fn set_process(&mut self, process: Option<i32>) {
        self.live.process = process;
    }

    /// Bind the per-item values of one job.
    pub fn bind(&mut self, binding: &Binding) {
        self.live.step = Some(binding.step);
        self.live.item_index = Some(binding.item_index);
        self.live.row = Some(binding.row);
        self.loop_vars.clone_from(&binding.values);
    }

    /// Forget all per-job values.
    pub fn unbind(&mut self) {
        self.live = LiveVars {
            cluster: self.live.cluster,
            ..LiveVars::default()
        };
        self.loop_vars.clear();
    }

    fn live_value(&self, name: &str) -> Option<String> {
        let lower = name.to_ascii_lowercase();
        match lower.as_str() {
            "cluster" | "clusterid" => self.live.cluster.map(|c| c.to_string()),
            "process" | "procid" => self.live.process.map(|p| p.to_string()),
            "step" => self.live.step.map(|s| s.to_string()),
            "itemindex" => self.live.item_index.map(|i| i.to_string()),
            "row" => self.live.row.map(|r| r.to_string()),
            _ => None,
        }
    }

    fn lookup(&self, name: &str) -> Option<String> {
        self.live_value(name)
            .or_else(|| find(&self.loop_vars, name).map(str::to_string))
            .or_else(|| find(&self.macros, name).map(str::to_string))
            .or_else(|| find(&self.defaults, name).map(str::to_string))
    }

    pub fn expand(&self, text: &str) -> Result<String, SubmitError> {
        self.expand_except(text, &|_| false)
    }

    /// Expand `text`, leaving references to names for which `keep` is true
    /// untouched.
    pub fn expand_except(
        &self,
        text: &str,
        keep: &dyn Fn(&str) -> bool,
    ) -> Result<String, SubmitError> {
        self.expand_at(text, keep, 0)
    }

    /// Expanded value of a template macro, if defined.
    pub fn expanded(&self, name: &str) -> Result<Option<String>, SubmitError> {
        match find(&self.macros, name) {
            Some(raw) => self.expand(raw).map(Some),
            None => Ok(None),
        }
    }

    fn expand_at(
        &self,
        text: &str,
        keep: &dyn Fn(&str) -> bool,
        depth: usize,
    ) -> Result<String, SubmitError> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(pos) = rest.find("$(") {
            if rest[..pos].ends_with('$') {
                // `$$(...)`: copy through the closing paren untouched.
                let close = matching_paren(&rest[pos + 1..]).map_or(rest.len(), |c| pos + 2 + c);
                out.push_str(&rest[..close]);
                rest = &rest[close..];
                continue;
            }

            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            let Some(close) = matching_paren(after) else {
                out.push_str(&rest[pos..]);
                return Ok(out);
            };
            let body = &after[1..close];
            let reference = &rest[pos..pos + 2 + close];
            rest = &after[close + 1..];

            let (name, default) = match body.split_once(':') {
                Some((n, d)) => (n.trim(), Some(d)),
                None => (body.trim(), None),
            };
            if !is_macro_name(name) || keep(name) {
                out.push_str(reference);
                continue;
            }
            if depth >= MAX_MACRO_DEPTH {
                return Err(SubmitError::MacroDepth(name.to_string()));
            }

            match self.lookup(name) {
                Some(value) => out.push_str(&self.expand_at(&value, keep, depth + 1)?),
                None => {
                    if let Some(default) = default {
                        out.push_str(&self.expand_at(default, keep, depth + 1)?);
                    }
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Loop variables from `vars` that no template value refers to.
    pub fn unused_loop_vars(&self, vars: &[String]) -> Vec<String> {
        let mut referenced = HashSet::new();
        for (_, value) in self.macros.iter().chain(self.custom.iter()) {
            collect_references(value, &mut referenced);
        }
        vars.iter()
            .filter(|v| !referenced.contains(&v.to_ascii_lowercase()))
            .cloned()
            .collect()
    }
}

fn is_macro_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Offset of the `)` closing the `(` at the start of `s`.
fn matching_paren(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn collect_references(text: &str, out: &mut HashSet<String>) {
    let mut rest = text;
    while let Some(pos) = rest.find("$(") {
        rest = &rest[pos + 2..];
        let end = rest
            .find(|c: char| c == ')' || c == ':')
            .unwrap_or(rest.len());
        out.insert(rest[..end].trim().to_ascii_lowercase());
    }
}
