//! The foreach iteration engine.
//!
//! A [`ForeachPlan`] holds the selected items of one queue statement. Its
//! [`Bindings`] iterator yields one [`Binding`] per job-to-be, ordered by
//! item and then by step. Iteration is lazy and can be restarted by calling
//! [`ForeachPlan::bindings`] again.

use std::fmt;
use std::str::FromStr;

use super::args::QueueArgs;
use super::error::ForeachError;
use super::split::split_item;

/// What to do when a loop variable is bound to an empty value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmptyFieldPolicy {
    #[default]
    Ignore,
    Warn,
    Fail,
}

impl FromStr for EmptyFieldPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ignore" => Ok(Self::Ignore),
            "warn" => Ok(Self::Warn),
            "fail" => Ok(Self::Fail),
            other => Err(format!("unknown empty field policy '{}'", other)),
        }
    }
}

impl fmt::Display for EmptyFieldPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ignore => "ignore",
            Self::Warn => "warn",
            Self::Fail => "fail",
        })
    }
}

/// Variable values for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Position of the item in the unsliced source.
    pub item_index: usize,
    /// Repeat number within the item, `0..count`.
    pub step: u32,
    /// Position of the item among the selected items.
    pub row: usize,
    pub values: Vec<(String, String)>,
    /// Empty-field warnings, attached to the first step of an item.
    pub warnings: Vec<String>,
}

impl Binding {
    pub fn value(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Items selected by one queue statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeachPlan {
    count: u32,
    vars: Vec<String>,
    /// `(original index, text)` after slicing.
    entries: Vec<(usize, String)>,
    warnings: Vec<String>,
}

impl ForeachPlan {
    /// Select items for `args`.
    ///
    /// A statement with no item source gets one synthetic empty item, so
    /// `queue N` still yields N jobs. An explicit source that produced no
    /// items yields nothing.
    pub fn new(args: &QueueArgs, items: Vec<String>) -> Self {
        let mut warnings = Vec::new();
        let items = if args.has_item_source() {
            if items.is_empty() && args.count > 0 {
                let warning = format!("queue {} has an empty item list, no jobs queued", args);
                tracing::warn!("{}", warning);
                warnings.push(warning);
            }
            items
        } else {
            vec![String::new()]
        };

        let indices: Vec<usize> = match &args.slice {
            Some(slice) => slice.indices(items.len()),
            None => (0..items.len()).collect(),
        };
        let mut items: Vec<Option<String>> = items.into_iter().map(Some).collect();
        let entries = indices
            .into_iter()
            .filter_map(|i| items.get_mut(i).and_then(Option::take).map(|text| (i, text)))
            .collect();

        Self {
            count: args.count,
            vars: args.loop_vars(),
            entries,
            warnings,
        }
    }

    /// Plan over items that were already selected, keeping their indices.
    pub fn from_selected(count: u32, vars: Vec<String>, entries: Vec<(usize, String)>) -> Self {
        Self {
            count,
            vars,
            entries,
            warnings: Vec::new(),
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn loop_vars(&self) -> &[String] {
        &self.vars
    }

    /// Original indices of the selected items.
    pub fn selected(&self) -> Vec<usize> {
        self.entries.iter().map(|(i, _)| *i).collect()
    }

    pub fn selected_items(&self) -> &[(usize, String)] {
        &self.entries
    }

    pub fn total_jobs(&self) -> u64 {
        u64::from(self.count) * self.entries.len() as u64
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn bindings(&self, policy: EmptyFieldPolicy) -> Bindings<'_> {
        Bindings {
            plan: self,
            policy,
            row: 0,
            step: 0,
            current: None,
            failed: false,
        }
    }
}

/// Lazy sequence of bindings for a plan.
pub struct Bindings<'a> {
    plan: &'a ForeachPlan,
    policy: EmptyFieldPolicy,
    row: usize,
    step: u32,
    current: Option<Vec<(String, String)>>,
    failed: bool,
}

impl Bindings<'_> {
    fn bind_item(&self, item_index: usize, text: &str) -> Result<(Vec<(String, String)>, Vec<String>), ForeachError> {
        let vars = &self.plan.vars;
        let values: Vec<(String, String)> = vars
            .iter()
            .cloned()
            .zip(split_item(text, vars.len()))
            .collect();

        let empty: Vec<String> = values
            .iter()
            .filter(|(_, v)| v.is_empty())
            .map(|(n, _)| n.clone())
            .collect();

        let mut warnings = Vec::new();
        if !empty.is_empty() {
            match self.policy {
                EmptyFieldPolicy::Ignore => {}
                EmptyFieldPolicy::Warn => {
                    for var in &empty {
                        let warning = format!("empty value for {} in item {}", var, item_index);
                        tracing::warn!(item_index, var = %var, "empty foreach field");
                        warnings.push(warning);
                    }
                }
                EmptyFieldPolicy::Fail => {
                    return Err(ForeachError::EmptyField {
                        item_index,
                        vars: empty,
                    })
                }
            }
        }
        Ok((values, warnings))
    }
}

impl Iterator for Bindings<'_> {
    type Item = Result<Binding, ForeachError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.plan.count == 0 {
            return None;
        }
        let (item_index, text) = self.plan.entries.get(self.row)?;

        let mut warnings = Vec::new();
        let values = match self.current.take() {
            Some(values) => values,
            None => match self.bind_item(*item_index, text) {
                Ok((values, item_warnings)) => {
                    warnings = item_warnings;
                    values
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            },
        };

        let binding = Binding {
            item_index: *item_index,
            step: self.step,
            row: self.row,
            values: values.clone(),
            warnings,
        };

        self.step += 1;
        if self.step >= self.plan.count {
            self.step = 0;
            self.row += 1;
        } else {
            self.current = Some(values);
        }
        Some(Ok(binding))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            return (0, Some(0));
        }
        let rows_left = self.plan.entries.len().saturating_sub(self.row);
        let total = (rows_left * self.plan.count as usize).saturating_sub(self.step as usize);
        (0, Some(total))
    }
}
