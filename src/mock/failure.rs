//! Armed faults for the in-memory queue manager, keyed by command.

use std::collections::HashMap;
use std::time::Duration;

use jobsub_protocol::{Command, ErrorCode};

#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Answer with this error instead of running the command.
    Reject { code: ErrorCode, message: String },
    /// Sleep, then run the command normally.
    Stall(Duration),
}

/// A fault and how many calls it applies to.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureConfig {
    pub fault: Fault,
    /// Calls left before the fault disarms; `None` never disarms.
    pub remaining: Option<u32>,
}

impl FailureConfig {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            fault: Fault::Reject {
                code,
                message: message.into(),
            },
            remaining: None,
        }
    }

    pub fn stall(duration: Duration) -> Self {
        Self {
            fault: Fault::Stall(duration),
            remaining: None,
        }
    }

    /// Apply to the next `count` calls only.
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.remaining = Some(count);
        self
    }
}

#[derive(Debug, Default)]
pub struct FailureInjector {
    armed: HashMap<Command, FailureConfig>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `config` for `command`, replacing any earlier fault.
    pub fn inject(&mut self, command: Command, config: FailureConfig) {
        self.armed.insert(command, config);
    }

    pub fn clear(&mut self) {
        self.armed.clear();
    }

    /// Consume one use of the fault armed for `command`.
    pub fn check(&mut self, command: Command) -> Option<Fault> {
        let config = self.armed.get_mut(&command)?;
        let fault = config.fault.clone();
        if let Some(left) = config.remaining.as_mut() {
            *left = left.saturating_sub(1);
            if *left == 0 {
                self.armed.remove(&command);
            }
        }
        Some(fault)
    }
}
