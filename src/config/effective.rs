//! The merged configuration and the layers it was built from.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;

/// Environment variable naming the user config file.
pub const CONFIG_ENV: &str = "JOBSUB_CONFIG";

/// Project config file name, looked up in the current directory.
pub const PROJECT_CONFIG_FILE: &str = ".jobsub.toml";

/// Keys whose value must be one of a fixed set of words.
const CHOICES: &[(&str, &[&str])] = &[
    ("submit.factory", &["auto", "never", "always", "smart"]),
    ("submit.empty_field", &["ignore", "warn", "fail"]),
    ("action.result_granularity", &["none", "per_job", "totals"]),
];

/// Keys holding a timeout in seconds.
const TIMEOUTS: &[&str] = &["schedd.connect_timeout_seconds", "schedd.io_timeout_seconds"];
const MAX_TIMEOUT_SECS: u64 = 3600;

/// Keys holding a count that has to fit a process id.
const COUNTS: &[&str] = &["submit.default_max_materialize", "submit.max_procs_per_cluster"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerOrigin {
    Builtin,
    User,
    Project,
    Cli,
}

/// One layer that went into the merge.
#[derive(Debug, Clone)]
pub struct Layer {
    pub origin: LayerOrigin,
    pub path: Option<PathBuf>,
    /// Hex SHA-256 of the file bytes, for file layers.
    pub sha256: Option<String>,
}

impl Layer {
    fn inline(origin: LayerOrigin) -> Self {
        Self {
            origin,
            path: None,
            sha256: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("{key} must be {expected}")]
    Invalid { key: String, expected: String },
}

/// Configuration after merging builtin defaults, the user file, the project
/// file and command-line overrides, later layers winning.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub config: Value,
    pub layers: Vec<Layer>,
}

/// `$JOBSUB_CONFIG`, else `~/.config/jobsub/config.toml`.
pub fn user_config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/jobsub/config.toml"))
}

pub fn project_config_path() -> PathBuf {
    PathBuf::from(PROJECT_CONFIG_FILE)
}

fn read_layer(path: &Path) -> Result<(Value, String), ConfigError> {
    let bytes = fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let sha256 = hex::encode(Sha256::digest(&bytes));
    let parse_error = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };
    let text = std::str::from_utf8(&bytes).map_err(|e| parse_error(e.to_string()))?;
    let value: Value = toml::from_str(text).map_err(|e| parse_error(e.to_string()))?;
    Ok((value, sha256))
}

fn lookup<'a>(config: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(config, |v, part| v.get(part))
}

fn invalid(key: &str, expected: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        expected: expected.into(),
    }
}

fn validate(config: &Value) -> Result<(), ConfigError> {
    for key in TIMEOUTS {
        if let Some(v) = lookup(config, key) {
            if !v.as_u64().is_some_and(|s| (1..=MAX_TIMEOUT_SECS).contains(&s)) {
                return Err(invalid(key, format!("between 1 and {} seconds", MAX_TIMEOUT_SECS)));
            }
        }
    }
    for (key, allowed) in CHOICES {
        if let Some(v) = lookup(config, key) {
            if !v.as_str().is_some_and(|s| allowed.contains(&s)) {
                return Err(invalid(key, format!("one of {}", allowed.join(", "))));
            }
        }
    }
    for key in COUNTS {
        if let Some(v) = lookup(config, key) {
            if !v.as_u64().is_some_and(|n| n <= i32::MAX as u64) {
                return Err(invalid(key, "a non-negative integer"));
            }
        }
    }
    Ok(())
}

impl EffectiveConfig {
    /// Merge the given layers. File layers that do not exist are skipped.
    pub fn build(
        user: Option<&Path>,
        project: Option<&Path>,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut values = vec![BuiltinDefaults::default().to_value()];
        let mut layers = vec![Layer::inline(LayerOrigin::Builtin)];

        let files = [(LayerOrigin::User, user), (LayerOrigin::Project, project)];
        for (origin, path) in files {
            let Some(path) = path.filter(|p| p.exists()) else {
                continue;
            };
            let (value, sha256) = read_layer(path)?;
            values.push(value);
            layers.push(Layer {
                origin,
                path: Some(path.to_path_buf()),
                sha256: Some(sha256),
            });
        }

        if let Some(cli) = cli_overrides {
            values.push(cli);
            layers.push(Layer::inline(LayerOrigin::Cli));
        }

        let config = merge_layers(values);
        validate(&config)?;
        for layer in &layers {
            tracing::debug!(origin = ?layer.origin, path = ?layer.path, sha256 = ?layer.sha256, "config layer");
        }
        Ok(Self { config, layers })
    }

    /// Build from the standard locations. An explicit path replaces the user
    /// layer and must exist.
    pub fn load(explicit: Option<&Path>, cli_overrides: Option<Value>) -> Result<Self, ConfigError> {
        let user = match explicit {
            Some(path) if !path.exists() => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
                })
            }
            Some(path) => Some(path.to_path_buf()),
            None => user_config_path(),
        };
        Self::build(user.as_deref(), Some(&project_config_path()), cli_overrides)
    }

    /// Value at a dotted path such as `schedd.address`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.config, path)
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path)?.as_u64()
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path)?.as_str()
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path)?.as_bool()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn with_cli(cli: Value) -> Result<EffectiveConfig, ConfigError> {
        EffectiveConfig::build(None, None, Some(cli))
    }

    #[test]
    fn test_defaults_only() {
        let config = EffectiveConfig::build(None, None, None).unwrap();

        assert_eq!(config.get_str("schedd.address"), Some("127.0.0.1:9618"));
        assert_eq!(config.get_u64("schedd.connect_timeout_seconds"), Some(10));
        assert_eq!(config.get_str("submit.factory"), Some("auto"));
        assert_eq!(config.get_bool("action.notify_scheduler"), Some(true));
        assert_eq!(config.layers.len(), 1);
        assert_eq!(config.layers[0].origin, LayerOrigin::Builtin);
    }

    #[test]
    fn test_cli_override_wins() {
        let config = with_cli(serde_json::json!({ "submit": { "factory": "smart" } })).unwrap();

        assert_eq!(config.get_str("submit.factory"), Some("smart"));
        assert_eq!(config.get_str("submit.empty_field"), Some("ignore"));
        assert_eq!(config.layers.last().unwrap().origin, LayerOrigin::Cli);
    }

    #[test]
    fn test_unknown_words_and_bad_numbers_rejected() {
        let err = with_cli(serde_json::json!({ "submit": { "factory": "sometimes" } })).unwrap_err();
        assert!(err.to_string().starts_with("submit.factory must be one of"));

        let err = with_cli(serde_json::json!({ "schedd": { "io_timeout_seconds": 0 } })).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "schedd.io_timeout_seconds"));

        let err = with_cli(serde_json::json!({ "submit": { "max_procs_per_cluster": -1 } })).unwrap_err();
        assert!(err.to_string().contains("non-negative"));
    }

    #[test]
    fn test_user_and_project_layers() {
        let mut user = NamedTempFile::new().unwrap();
        writeln!(user, "[schedd]\naddress = \"queue.example:9618\"").unwrap();
        writeln!(user, "[submit]\nempty_field = \"warn\"").unwrap();

        let mut project = NamedTempFile::new().unwrap();
        writeln!(project, "[submit]\nempty_field = \"fail\"").unwrap();

        let config = EffectiveConfig::build(Some(user.path()), Some(project.path()), None).unwrap();

        assert_eq!(config.get_str("schedd.address"), Some("queue.example:9618"));
        assert_eq!(config.get_str("submit.empty_field"), Some("fail"));
        let origins: Vec<LayerOrigin> = config.layers.iter().map(|l| l.origin).collect();
        assert_eq!(
            origins,
            vec![LayerOrigin::Builtin, LayerOrigin::User, LayerOrigin::Project]
        );
        assert_eq!(config.layers[1].sha256.as_ref().map(String::len), Some(64));
    }

    #[test]
    fn test_missing_layer_files_are_skipped() {
        let config = EffectiveConfig::build(
            Some(Path::new("/nonexistent/jobsub.toml")),
            Some(Path::new("/nonexistent/.jobsub.toml")),
            None,
        )
        .unwrap();
        assert_eq!(config.layers.len(), 1);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let err = EffectiveConfig::load(Some(Path::new("/nonexistent/jobsub.toml")), None).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[schedd").unwrap();
        let err = EffectiveConfig::build(Some(file.path()), None, None).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
