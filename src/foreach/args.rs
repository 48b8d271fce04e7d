//! Queue statement argument parsing.
//!
//! `[count] [vars] [in|from|matching [files|dirs|any] [slice] items]`
//!
//! The foreach keyword anchors the parse: the loop variables are the
//! identifiers immediately before it and whatever precedes them is the count.

use std::fmt;
use std::path::PathBuf;

use jobsub_ad::{Ad, Expr, Value};

use super::error::ForeachError;
use super::slice::Slice;

/// Placeholder naming item data held by the queue manager.
pub const ITEMDATA_SOURCE: &str = "<itemdata>";

/// Default loop variable when items are given without variable names.
pub const DEFAULT_ITEM_VAR: &str = "Item";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeachMode {
    None,
    In,
    From,
    Matching,
}

impl ForeachMode {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::In => "in",
            Self::From => "from",
            Self::Matching => "matching",
        }
    }
}

/// What `matching` patterns may select.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchKind {
    #[default]
    Any,
    Files,
    Dirs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemSource {
    /// Plain `queue N`.
    None,
    /// Items written in the statement itself.
    Inline(Vec<String>),
    File(PathBuf),
    Stdin,
    Matching { kind: MatchKind, patterns: Vec<String> },
    /// Items were sent separately to the queue manager.
    ItemData,
}

/// A parsed queue statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueArgs {
    pub count: u32,
    pub vars: Vec<String>,
    pub mode: ForeachMode,
    pub slice: Option<Slice>,
    pub source: ItemSource,
}

impl QueueArgs {
    /// `queue <count>` with no items.
    pub fn with_count(count: u32) -> Self {
        Self {
            count,
            vars: Vec::new(),
            mode: ForeachMode::None,
            slice: None,
            source: ItemSource::None,
        }
    }

    pub fn has_item_source(&self) -> bool {
        self.source != ItemSource::None
    }

    /// Names bound per item. Items without declared names bind `Item`.
    pub fn loop_vars(&self) -> Vec<String> {
        if self.vars.is_empty() && self.has_item_source() {
            vec![DEFAULT_ITEM_VAR.to_string()]
        } else {
            self.vars.clone()
        }
    }
}

impl fmt::Display for QueueArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.count)?;
        if !self.vars.is_empty() {
            write!(f, " {}", self.vars.join(","))?;
        }
        if self.mode == ForeachMode::None {
            return Ok(());
        }
        write!(f, " {}", self.mode.keyword())?;
        if let ItemSource::Matching { kind, .. } = &self.source {
            match kind {
                MatchKind::Any => {}
                MatchKind::Files => f.write_str(" files")?,
                MatchKind::Dirs => f.write_str(" dirs")?,
            }
        }
        if let Some(slice) = &self.slice {
            write!(f, " {}", slice)?;
        }
        match &self.source {
            ItemSource::None => Ok(()),
            ItemSource::Inline(items) if self.mode == ForeachMode::From => {
                f.write_str(" (\n")?;
                for item in items {
                    writeln!(f, "{}", item)?;
                }
                f.write_str(")")
            }
            ItemSource::Inline(items) => write!(f, " ({})", items.join(" ")),
            ItemSource::File(path) => write!(f, " {}", path.display()),
            ItemSource::Stdin => f.write_str(" -"),
            ItemSource::Matching { patterns, .. } => write!(f, " {}", patterns.join(" ")),
            ItemSource::ItemData => write!(f, " {}", ITEMDATA_SOURCE),
        }
    }
}

/// Parse the text that follows `queue`.
///
/// A parenthesised item list may span lines; the caller passes the whole
/// block including the closing `)`.
pub fn parse_queue_args(text: &str) -> Result<QueueArgs, ForeachError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(QueueArgs::with_count(1));
    }

    let Some((kw_start, kw_end, mode)) = find_keyword(text) else {
        let count = parse_count(text)?;
        return Ok(QueueArgs::with_count(count));
    };

    let (count_text, vars) = split_vars(&text[..kw_start])?;
    let count = if count_text.is_empty() {
        1
    } else {
        parse_count(count_text)?
    };

    let mut rest = text[kw_end..].trim_start();
    let mut slice = None;
    let mut kind = MatchKind::Any;
    while !rest.starts_with('(') && !rest.is_empty() {
        if rest.starts_with('[') {
            let close = rest
                .find(']')
                .ok_or_else(|| ForeachError::bad_slice(rest, "missing ']'"))?;
            if slice.is_some() {
                return Err(ForeachError::bad_slice(&rest[..=close], "only one slice is allowed"));
            }
            slice = Some(Slice::parse(&rest[..=close])?);
            rest = rest[close + 1..].trim_start();
            continue;
        }
        let word_len = rest
            .find(|c: char| c.is_whitespace() || c == '(' || c == '[')
            .unwrap_or(rest.len());
        let word = &rest[..word_len];
        let qualifier = match word.to_ascii_lowercase().as_str() {
            "files" => MatchKind::Files,
            "dirs" => MatchKind::Dirs,
            "any" => MatchKind::Any,
            _ => break,
        };
        if mode != ForeachMode::Matching {
            return Err(ForeachError::UnexpectedKeyword(word.to_string()));
        }
        kind = qualifier;
        rest = rest[word_len..].trim_start();
    }

    let source = parse_items(mode, kind, rest)?;
    Ok(QueueArgs {
        count,
        vars,
        mode,
        slice,
        source,
    })
}

/// Locate the first foreach keyword before any `(`: `(start, end, mode)`.
fn find_keyword(text: &str) -> Option<(usize, usize, ForeachMode)> {
    let limit = text.find('(').unwrap_or(text.len());
    let scan = &text[..limit];
    let mut words = Vec::new();
    let mut word_start = None;
    for (i, c) in scan.char_indices() {
        match (c.is_whitespace(), word_start) {
            (true, Some(s)) => {
                words.push((s, &scan[s..i]));
                word_start = None;
            }
            (false, None) => word_start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = word_start {
        words.push((s, &scan[s..]));
    }

    for (start, word) in words {
        let core_len = word.find('[').unwrap_or(word.len());
        let core = &word[..core_len];
        let mode = match core.to_ascii_lowercase().as_str() {
            "in" => ForeachMode::In,
            "from" => ForeachMode::From,
            "matching" => ForeachMode::Matching,
            _ => continue,
        };
        // The keyword must stand alone or run directly into '(' or '['.
        let end = start + core_len;
        let next = text[end..].chars().next();
        if next.map_or(true, |c| c.is_whitespace() || c == '(' || c == '[') {
            return Some((start, end, mode));
        }
    }
    None
}

fn is_identifier(token: &str) -> bool {
    let mut chars = token.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Split the text before the keyword into the count text and the variable list.
fn split_vars(pre: &str) -> Result<(&str, Vec<String>), ForeachError> {
    let pre = pre.trim_end();
    let mut cut = pre.len();
    let mut vars = Vec::new();
    loop {
        let head = pre[..cut].trim_end_matches(|c: char| c.is_whitespace() || c == ',');
        let token_start = head
            .char_indices()
            .rev()
            .find(|&(_, c)| c.is_whitespace() || c == ',')
            .map_or(0, |(i, c)| i + c.len_utf8());
        let token = &head[token_start..];
        if token.is_empty() || !is_identifier(token) {
            break;
        }
        vars.push(token.to_string());
        cut = token_start;
    }
    vars.reverse();

    for (i, var) in vars.iter().enumerate() {
        if vars[..i].iter().any(|v| v.eq_ignore_ascii_case(var)) {
            return Err(ForeachError::DuplicateVariable(var.clone()));
        }
    }
    Ok((pre[..cut].trim(), vars))
}

/// Evaluate the count expression.
fn parse_count(text: &str) -> Result<u32, ForeachError> {
    let expr = match Expr::parse(text) {
        Ok(expr) => expr,
        Err(_) => {
            let mut words = text.splitn(2, char::is_whitespace);
            let first = words.next().unwrap_or_default();
            if first.parse::<i64>().is_ok() {
                let rest = words.next().unwrap_or_default().trim();
                return Err(ForeachError::TextAfterCount(rest.to_string()));
            }
            return Err(ForeachError::InvalidCount(text.to_string()));
        }
    };
    let value = match expr.eval(&Ad::new()) {
        Value::Int(n) => n,
        Value::Real(r) if r.fract() == 0.0 => r as i64,
        _ => return Err(ForeachError::InvalidCount(text.to_string())),
    };
    if value < 0 || value >= i64::from(i32::MAX) {
        return Err(ForeachError::CountOutOfRange(value));
    }
    Ok(value as u32)
}

fn split_list(text: &str) -> Vec<String> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_items(mode: ForeachMode, kind: MatchKind, rest: &str) -> Result<ItemSource, ForeachError> {
    if let Some(open) = rest.strip_prefix('(') {
        let close = open.rfind(')').ok_or(ForeachError::UnterminatedList)?;
        let trailing = open[close + 1..].trim();
        if !trailing.is_empty() {
            return Err(ForeachError::TextAfterList(trailing.to_string()));
        }
        let body = &open[..close];
        return Ok(match mode {
            ForeachMode::From => ItemSource::Inline(
                body.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            ForeachMode::Matching => ItemSource::Matching {
                kind,
                patterns: split_list(body),
            },
            _ => ItemSource::Inline(split_list(body)),
        });
    }

    let rest = rest.trim();
    if rest.is_empty() {
        return Err(ForeachError::MissingItems(mode.keyword().to_string()));
    }
    Ok(match mode {
        ForeachMode::From if rest == "-" => ItemSource::Stdin,
        ForeachMode::From if rest == ITEMDATA_SOURCE => ItemSource::ItemData,
        ForeachMode::From => ItemSource::File(PathBuf::from(rest)),
        ForeachMode::Matching => ItemSource::Matching {
            kind,
            patterns: rest.split_whitespace().map(str::to_string).collect(),
        },
        _ => ItemSource::Inline(split_list(rest)),
    })
}
