//! Built-in defaults (layer 1)
//!
//! Hardcoded defaults for all configuration values.

use serde::{Deserialize, Serialize};

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Queue manager address (default: "127.0.0.1:9618")
    pub schedd_address: String,

    /// Connection timeout in seconds (default: 10)
    pub connect_timeout_seconds: u64,

    /// Per-request I/O timeout in seconds (default: 60)
    pub io_timeout_seconds: u64,

    /// Factory mode (default: "auto")
    pub factory: String,

    /// Live-job cap for factories without a knob; 0 means all jobs (default: 0)
    pub default_max_materialize: u64,

    /// Client-side process ceiling per cluster; 0 means unlimited (default: 0)
    pub max_procs_per_cluster: u64,

    /// Empty foreach field policy (default: "ignore")
    pub empty_field: String,

    /// Keep duplicate `matching` results (default: false)
    pub allow_duplicate_matches: bool,

    /// Warn when a `matching` pattern matches nothing (default: true)
    pub warn_empty_matches: bool,

    /// Action result granularity (default: "per_job")
    pub result_granularity: String,

    /// Notify the scheduler after an action (default: true)
    pub notify_scheduler: bool,

    /// Log filter (default: "warn")
    pub log_level: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            schedd_address: "127.0.0.1:9618".to_string(),
            connect_timeout_seconds: 10,
            io_timeout_seconds: 60,
            factory: "auto".to_string(),
            default_max_materialize: 0,
            max_procs_per_cluster: 0,
            empty_field: "ignore".to_string(),
            allow_duplicate_matches: false,
            warn_empty_matches: true,
            result_granularity: "per_job".to_string(),
            notify_scheduler: true,
            log_level: "warn".to_string(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "schedd": {
                "address": self.schedd_address,
                "connect_timeout_seconds": self.connect_timeout_seconds,
                "io_timeout_seconds": self.io_timeout_seconds
            },
            "submit": {
                "owner": "",
                "factory": self.factory,
                "default_max_materialize": self.default_max_materialize,
                "max_procs_per_cluster": self.max_procs_per_cluster,
                "empty_field": self.empty_field,
                "allow_duplicate_matches": self.allow_duplicate_matches,
                "warn_empty_matches": self.warn_empty_matches
            },
            "action": {
                "result_granularity": self.result_granularity,
                "notify_scheduler": self.notify_scheduler
            },
            "log": {
                "level": self.log_level
            }
        })
    }
}
