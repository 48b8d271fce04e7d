//! Loading foreach items from their source.

use std::collections::HashSet;
use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use globset::GlobBuilder;
use walkdir::WalkDir;

use super::args::{ItemSource, MatchKind};
use super::error::ForeachError;

/// Settings that affect how items are gathered.
#[derive(Debug, Clone)]
pub struct ItemLoadOptions {
    /// Directory relative paths and `matching` patterns resolve against.
    pub base_dir: PathBuf,
    pub allow_duplicate_matches: bool,
    pub warn_empty_matches: bool,
}

impl ItemLoadOptions {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            allow_duplicate_matches: false,
            warn_empty_matches: true,
        }
    }
}

/// Items in source order plus any non-fatal diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedItems {
    pub items: Vec<String>,
    pub warnings: Vec<String>,
}

/// Read the items named by `source`. `stdin` serves `from -`.
pub fn load_items(
    source: &ItemSource,
    options: &ItemLoadOptions,
    stdin: &mut dyn BufRead,
) -> Result<LoadedItems, ForeachError> {
    match source {
        ItemSource::None => Ok(LoadedItems::default()),
        ItemSource::Inline(items) => Ok(LoadedItems {
            items: items.clone(),
            warnings: Vec::new(),
        }),
        ItemSource::File(path) => {
            let path = if path.is_absolute() {
                path.clone()
            } else {
                options.base_dir.join(path)
            };
            let text = fs::read_to_string(&path).map_err(|source| ForeachError::Io {
                path: path.clone(),
                source,
            })?;
            Ok(LoadedItems {
                items: non_blank_lines(text.lines()),
                warnings: Vec::new(),
            })
        }
        ItemSource::Stdin => {
            let mut lines = Vec::new();
            for line in stdin.lines() {
                lines.push(line.map_err(|source| ForeachError::Io {
                    path: PathBuf::from("-"),
                    source,
                })?);
            }
            Ok(LoadedItems {
                items: non_blank_lines(lines.iter().map(String::as_str)),
                warnings: Vec::new(),
            })
        }
        ItemSource::Matching { kind, patterns } => match_patterns(*kind, patterns, options),
        ItemSource::ItemData => Err(ForeachError::ItemDataUnavailable),
    }
}

fn non_blank_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<String> {
    lines
        .map(|l| l.trim_end_matches('\r').trim())
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn match_patterns(
    kind: MatchKind,
    patterns: &[String],
    options: &ItemLoadOptions,
) -> Result<LoadedItems, ForeachError> {
    let mut loaded = LoadedItems::default();
    let mut seen = HashSet::new();

    for pattern in patterns {
        let matcher = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| ForeachError::Pattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?
            .compile_matcher();

        let mut walker = WalkDir::new(&options.base_dir).min_depth(1).sort_by_file_name();
        if !pattern.contains("**") {
            walker = walker.max_depth(pattern.split('/').count());
        }

        let mut matched = Vec::new();
        for entry in walker.into_iter().filter_map(Result::ok) {
            let Some(rel) = relative_name(&options.base_dir, entry.path()) else {
                continue;
            };
            let is_dir = entry.file_type().is_dir();
            let wanted = match kind {
                MatchKind::Any => true,
                MatchKind::Files => !is_dir,
                MatchKind::Dirs => is_dir,
            };
            if wanted && matcher.is_match(&rel) {
                matched.push(rel);
            }
        }
        matched.sort();

        if matched.is_empty() && options.warn_empty_matches {
            let warning = format!("matching pattern '{}' did not match anything", pattern);
            tracing::warn!(pattern = %pattern, "{}", warning);
            loaded.warnings.push(warning);
        }

        for name in matched {
            if options.allow_duplicate_matches || seen.insert(name.clone()) {
                loaded.items.push(name);
            }
        }
    }
    Ok(loaded)
}

/// `/`-separated path of `path` below `base`.
fn relative_name(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}
