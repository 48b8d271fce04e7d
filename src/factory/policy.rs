//! Choosing between eager and late materialization.

use std::fmt;
use std::str::FromStr;

use super::error::FactoryError;

/// Configured factory behaviour (`submit.factory`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FactoryMode {
    /// Factory only when the template sets a materialization knob.
    #[default]
    Auto,
    Never,
    Always,
    /// Factory whenever a statement expands to more than one job.
    Smart,
}

impl FromStr for FactoryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "never" => Ok(Self::Never),
            "always" => Ok(Self::Always),
            "smart" => Ok(Self::Smart),
            other => Err(format!("unknown factory mode '{}'", other)),
        }
    }
}

impl fmt::Display for FactoryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Never => "never",
            Self::Always => "always",
            Self::Smart => "smart",
        })
    }
}

/// How strongly one queue statement wants a factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryChoice {
    Eager,
    /// Use a factory if the queue manager can, else materialize eagerly.
    Preferred,
    Mandatory,
}

/// Decide for one statement. `has_knob` is true when the template sets
/// `max_materialize`, `max_idle` or `materialize_max_idle`.
pub fn choose(mode: FactoryMode, has_knob: bool, total_jobs: u64) -> FactoryChoice {
    match mode {
        FactoryMode::Never => FactoryChoice::Eager,
        FactoryMode::Always => FactoryChoice::Mandatory,
        FactoryMode::Auto if has_knob => FactoryChoice::Preferred,
        FactoryMode::Auto => FactoryChoice::Eager,
        FactoryMode::Smart if has_knob || total_jobs > 1 => FactoryChoice::Preferred,
        FactoryMode::Smart => FactoryChoice::Eager,
    }
}

/// Settle a choice against what the queue manager supports. Returns true
/// for factory mode.
pub fn resolve(choice: FactoryChoice, supported: bool) -> Result<bool, FactoryError> {
    match (choice, supported) {
        (FactoryChoice::Eager, _) => Ok(false),
        (_, true) => Ok(true),
        (FactoryChoice::Preferred, false) => {
            tracing::warn!("queue manager lacks late materialization, submitting jobs directly");
            Ok(false)
        }
        (FactoryChoice::Mandatory, false) => Err(FactoryError::Unsupported),
    }
}

/// Live-job cap sent with the factory, clamped to `[1, total_jobs]`.
///
/// An explicit limit wins. A max-idle knob alone means no limit. Otherwise
/// `default` applies, 0 meaning all jobs.
pub fn max_materialize(
    limit: Option<i64>,
    has_max_idle: bool,
    default: u32,
    total_jobs: u64,
) -> i32 {
    let total = total_jobs.min(i32::MAX as u64) as i64;
    let requested = match limit {
        Some(n) => n,
        None if has_max_idle => i64::from(i32::MAX),
        None if default == 0 => total,
        None => i64::from(default),
    };
    requested.clamp(1, total.max(1)) as i32
}
