//! Submit description parsing.
//!
//! A description is a list of `key = value` assignments interleaved with
//! `queue` statements. Each queue statement sees the assignments made before
//! it; a later assignment to the same key overrides the earlier one.

use std::fs;
use std::path::Path;

use super::error::SubmitError;

/// One assignment in a submit description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateEntry {
    pub key: String,
    pub value: String,
    /// 1-based line of the assignment.
    pub line: usize,
    /// `+Attr` or `MY.Attr`: `key` holds the bare attribute name.
    pub custom: bool,
}

/// A `queue` statement and the assignments visible to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatement {
    pub line: usize,
    /// Text after the `queue` keyword, including any multi-line item list.
    pub args: String,
    /// Number of template entries defined before this statement.
    pub defined: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitTemplate {
    entries: Vec<TemplateEntry>,
    statements: Vec<QueueStatement>,
}

impl SubmitTemplate {
    pub fn from_file(path: &Path) -> Result<Self, SubmitError> {
        let text = fs::read_to_string(path).map_err(|source| SubmitError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, SubmitError> {
        let mut template = Self::default();
        let lines = logical_lines(text);
        let mut iter = lines.into_iter();

        while let Some((line, content)) = iter.next() {
            let trimmed = content.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            if let Some(args) = queue_args(trimmed) {
                let mut args = args.to_string();
                if opens_list(&args) {
                    let mut closed = false;
                    for (_, next) in iter.by_ref() {
                        let next = next.trim();
                        args.push('\n');
                        args.push_str(next);
                        if next == ")" {
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        return Err(SubmitError::UnterminatedQueue { line });
                    }
                }
                template.statements.push(QueueStatement {
                    line,
                    args,
                    defined: template.entries.len(),
                });
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(SubmitError::Syntax {
                    line,
                    text: trimmed.to_string(),
                });
            };
            let key = key.trim();
            let (key, custom) = if let Some(rest) = key.strip_prefix('+') {
                (rest, true)
            } else if key.len() > 3 && key.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("my.")) {
                (&key[3..], true)
            } else {
                (key, false)
            };
            if key.is_empty() || key.contains(char::is_whitespace) {
                return Err(SubmitError::Syntax {
                    line,
                    text: trimmed.to_string(),
                });
            }
            template.entries.push(TemplateEntry {
                key: key.to_string(),
                value: value.trim().to_string(),
                line,
                custom,
            });
        }

        Ok(template)
    }

    pub fn entries(&self) -> &[TemplateEntry] {
        &self.entries
    }

    pub fn statements(&self) -> &[QueueStatement] {
        &self.statements
    }

    /// Assignments visible to `statement`, last definition of a key winning.
    pub fn visible_to(&self, statement: &QueueStatement) -> Vec<TemplateEntry> {
        let mut visible: Vec<TemplateEntry> = Vec::new();
        for entry in &self.entries[..statement.defined.min(self.entries.len())] {
            match visible
                .iter_mut()
                .find(|e| e.custom == entry.custom && e.key.eq_ignore_ascii_case(&entry.key))
            {
                Some(existing) => *existing = entry.clone(),
                None => visible.push(entry.clone()),
            }
        }
        visible
    }
}

/// Join `\`-continued lines, keeping the number of the first physical line.
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (i, raw) in text.lines().enumerate() {
        let raw = raw.trim_end_matches('\r');
        let (start, mut buf) = pending.take().unwrap_or((i + 1, String::new()));
        match raw.trim_end().strip_suffix('\\') {
            Some(head) => {
                buf.push_str(head);
                pending = Some((start, buf));
            }
            None => {
                buf.push_str(raw);
                out.push((start, buf));
            }
        }
    }
    if let Some(last) = pending {
        out.push(last);
    }
    out
}

fn queue_args(line: &str) -> Option<&str> {
    let word_end = line
        .find(|c: char| c.is_whitespace() || c == '(')
        .unwrap_or(line.len());
    if !line[..word_end].eq_ignore_ascii_case("queue") {
        return None;
    }
    let rest = &line[word_end..];
    if rest.trim_start().starts_with('=') {
        return None;
    }
    Some(rest.trim())
}

/// True when `args` opens a parenthesised list it does not close.
fn opens_list(args: &str) -> bool {
    match args.rfind('(') {
        Some(open) => !args[open..].contains(')'),
        None => false,
    }
}
