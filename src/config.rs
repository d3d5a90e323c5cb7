use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cli::Cli;
use crate::error::ConfigError;
use crate::tracer::decoder::ReportPolicy;
use crate::tracer::TraceConfig;

/// Settings loaded from ~/.watchtrace/config.toml
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchtraceConfig {
    /// Which access checks and opens to report: "read-only", "write-intent" or "all"
    pub policy: ReportPolicy,

    /// Maximum bytes read for one path argument
    pub max_path: usize,

    /// Trace children created by fork, vfork and clone
    pub follow_forks: bool,

    /// Exit with the traced command's status
    pub propagate_exit_code: bool,
}

impl Default for WatchtraceConfig {
    fn default() -> Self {
        let trace = TraceConfig::default();
        Self {
            policy: trace.policy,
            max_path: trace.max_path,
            follow_forks: trace.follow_forks,
            propagate_exit_code: false,
        }
    }
}

impl WatchtraceConfig {
    /// Command-line flags win over the file.
    pub fn merge_cli_args(&mut self, cli: &Cli) {
        if let Some(policy) = cli.policy {
            self.policy = policy.into();
        }
        if let Some(max_path) = cli.max_path {
            self.max_path = max_path;
        }
        if cli.no_follow_forks {
            self.follow_forks = false;
        }
        if cli.propagate_exit_code {
            self.propagate_exit_code = true;
        }
    }

    pub fn trace_config(&self) -> TraceConfig {
        TraceConfig {
            policy: self.policy,
            max_path: self.max_path,
            follow_forks: self.follow_forks,
        }
    }
}

/// Load the config file.
///
/// An explicit path must exist and parse. The default path is optional: when
/// it is missing defaults are used, and when it is broken a warning is logged
/// and defaults are used as well.
pub fn load_config(explicit: Option<&Path>) -> Result<WatchtraceConfig, ConfigError> {
    match explicit {
        Some(path) => read_config(&expand_tilde(path)),
        None => {
            let path = config_path();
            if !path.exists() {
                return Ok(WatchtraceConfig::default());
            }
            match read_config(&path) {
                Ok(config) => Ok(config),
                Err(e) => {
                    log::warn!("{}. Using defaults.", e);
                    Ok(WatchtraceConfig::default())
                }
            }
        }
    }
}

fn read_config(path: &Path) -> Result<WatchtraceConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.display().to_string(),
        source,
    })?;
    let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    log::info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Returns the path to ~/.watchtrace/config.toml
pub fn config_path() -> PathBuf {
    watchtrace_dir().join("config.toml")
}

/// Returns the path to ~/.watchtrace/
pub fn watchtrace_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".watchtrace")
}

/// Expand ~ to $HOME in a path
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}
