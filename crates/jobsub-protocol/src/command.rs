//! Queue-management command names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Commands understood by the queue manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Open a session and negotiate the protocol version.
    Begin,
    NewCluster,
    NewProc,
    SetAttribute,
    SetAttributeByConstraint,
    DestroyCluster,
    /// Finalize (or discard) the open transaction.
    Commit,
    Disconnect,
    SetJobFactory,
    SendItemData,
    ActOnJobs,
    ConfirmAction,
    QueryJobs,
}

impl Command {
    pub const ALL: [Command; 13] = [
        Command::Begin,
        Command::NewCluster,
        Command::NewProc,
        Command::SetAttribute,
        Command::SetAttributeByConstraint,
        Command::DestroyCluster,
        Command::Commit,
        Command::Disconnect,
        Command::SetJobFactory,
        Command::SendItemData,
        Command::ActOnJobs,
        Command::ConfirmAction,
        Command::QueryJobs,
    ];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::NewCluster => "new_cluster",
            Self::NewProc => "new_proc",
            Self::SetAttribute => "set_attribute",
            Self::SetAttributeByConstraint => "set_attribute_by_constraint",
            Self::DestroyCluster => "destroy_cluster",
            Self::Commit => "commit",
            Self::Disconnect => "disconnect",
            Self::SetJobFactory => "set_job_factory",
            Self::SendItemData => "send_item_data",
            Self::ActOnJobs => "act_on_jobs",
            Self::ConfirmAction => "confirm_action",
            Self::QueryJobs => "query_jobs",
        }
    }

    /// Commands that only make sense inside an open transaction.
    pub fn requires_transaction(&self) -> bool {
        !matches!(
            self,
            Self::Begin | Self::Disconnect | Self::QueryJobs | Self::ActOnJobs | Self::ConfirmAction
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown command: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_match_serde() {
        for command in Command::ALL {
            let json = serde_json::to_value(command).unwrap();
            assert_eq!(json, serde_json::Value::String(command.as_str().to_string()));
            assert_eq!(command.as_str().parse::<Command>().unwrap(), command);
        }
    }

    #[test]
    fn test_unknown_command() {
        assert!("frobnicate".parse::<Command>().is_err());
    }
}
