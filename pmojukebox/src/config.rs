//! # Jukebox configuration
//!
//! The configuration is built from three layers:
//! - the embedded default (`pmojukebox.yaml`),
//! - an optional YAML file, merged over the defaults,
//! - `PMOJUKEBOX_CONFIG__*` environment variables, one per key.
//!
//! ```no_run
//! use pmojukebox::config::Config;
//!
//! let config = Config::load(None)?;
//! println!("gain = {}", config.jukebox.gain);
//! # Ok::<(), pmojukebox::errors::JukeboxError>(())
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::{info, warn};

use crate::errors::{JukeboxError, Result};

const DEFAULT_CONFIG: &str = include_str!("pmojukebox.yaml");

/// Path of the configuration file, when no explicit path is given.
pub const ENV_CONFIG_FILE: &str = "PMOJUKEBOX_CONFIG";
/// Prefix of per-key overrides, e.g. `PMOJUKEBOX_CONFIG__JUKEBOX__GAIN`.
pub const ENV_PREFIX: &str = "PMOJUKEBOX_CONFIG__";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub jukebox: JukeboxSection,
    pub logging: LoggingSection,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JukeboxSection {
    /// Initial output gain, within `[0.0, 1.0]`.
    pub gain: f32,
    pub player: PlayerConfig,
}

/// External player process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerConfig {
    pub command: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// `tracing-subscriber` filter directive, overridden by `RUST_LOG`.
    pub filter: String,
}

impl Config {
    /// Loads the configuration from `path`, or from the file named by
    /// `$PMOJUKEBOX_CONFIG`, or from the embedded defaults only, then
    /// applies the environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let from_env = env::var_os(ENV_CONFIG_FILE).map(PathBuf::from);
        let file = path.map(Path::to_path_buf).or(from_env);
        let overrides = env::vars().filter(|(key, _)| key.starts_with(ENV_PREFIX));
        Self::from_sources(file.as_deref(), overrides)
    }

    /// The embedded defaults, without file nor overrides.
    pub fn embedded() -> Result<Self> {
        Self::from_sources(None, std::iter::empty())
    }

    /// Builds the configuration from an optional file and explicit
    /// `(variable, value)` overrides.
    pub fn from_sources<I>(file: Option<&Path>, overrides: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        if let Some(file) = file {
            let data = fs::read_to_string(file).map_err(|err| {
                JukeboxError::config(format!("cannot read {}: {err}", file.display()))
            })?;
            let external: Value = serde_yaml::from_str(&data)?;
            merge_yaml(&mut value, &lower_keys(external));
            info!(config_file = %file.display(), "Loaded config file");
        }

        for (key, raw) in overrides {
            apply_override(&mut value, &key, &raw);
        }

        let config: Config = serde_yaml::from_value(value)
            .map_err(|err| JukeboxError::config(format!("invalid configuration: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let gain = self.jukebox.gain;
        if !(0.0..=1.0).contains(&gain) {
            return Err(JukeboxError::config(format!(
                "jukebox.gain must be within [0, 1], got {gain}"
            )));
        }
        if self.jukebox.player.command.as_os_str().is_empty() {
            return Err(JukeboxError::config("jukebox.player.command is empty"));
        }
        Ok(())
    }
}

/// Sets the key named by `variable` (without its prefix, `__`-separated).
///
/// Only existing keys can be overridden. String leaves keep the raw text;
/// other leaves get the value parsed as YAML.
fn apply_override(config: &mut Value, variable: &str, raw: &str) {
    let Some(stripped) = variable.strip_prefix(ENV_PREFIX) else {
        return;
    };
    let path: Vec<String> = stripped.split("__").map(str::to_lowercase).collect();

    let mut node = &mut *config;
    for key in &path {
        let next = match node {
            Value::Mapping(map) => map.get_mut(Value::String(key.clone())),
            _ => None,
        };
        match next {
            Some(next) => node = next,
            None => {
                warn!(variable, "Unknown configuration override ignored");
                return;
            }
        }
    }

    *node = match node {
        Value::String(_) => Value::String(raw.to_string()),
        _ => serde_yaml::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
    };
}

fn lower_keys(value: Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut lowered = Mapping::new();
            for (key, value) in map {
                let key = match key {
                    Value::String(s) => Value::String(s.to_lowercase()),
                    other => other,
                };
                lowered.insert(key, lower_keys(value));
            }
            Value::Mapping(lowered)
        }
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys).collect()),
        other => other,
    }
}

/// Merges `external` into `default`: mappings key by key, anything else
/// replaced.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}
