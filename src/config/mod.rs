//! Layered configuration
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. User config (`$JOBSUB_CONFIG` or `~/.config/jobsub/config.toml`)
//! 3. Project config (`./.jobsub.toml`)
//! 4. Command-line overrides

mod defaults;
mod effective;
mod merge;

pub use defaults::BuiltinDefaults;
pub use effective::{
    project_config_path, user_config_path, ConfigError, EffectiveConfig, Layer, LayerOrigin,
};
pub use merge::{deep_merge, merge_layers};
