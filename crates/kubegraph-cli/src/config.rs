//! Settings for the binary: defaults, then an optional JSON file, then
//! command-line flags.

use kubegraph_core::ResourceKind;
use kubegraph_watcher::{Backoff, DEFAULT_INTERVAL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SOURCE_DIR: &str = "manifests";
pub const DEFAULT_OUTPUT: &str = "graph.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown resource kind `{0}`")]
    UnknownKind(String),

    #[error("{0}")]
    Invalid(&'static str),
}

/// The on-disk config file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub source_dir: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub emit_interval_secs: Option<u64>,
    pub backoff_initial_secs: Option<u64>,
    pub backoff_max_secs: Option<u64>,
    pub kinds: Option<Vec<String>>,
}

impl FileConfig {
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub source_dir: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub source_dir: PathBuf,
    pub output: PathBuf,
    pub emit_interval: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub kinds: Vec<ResourceKind>,
}

impl Default for Settings {
    fn default() -> Self {
        let backoff = Backoff::default();
        Self {
            source_dir: PathBuf::from(DEFAULT_SOURCE_DIR),
            output: PathBuf::from(DEFAULT_OUTPUT),
            emit_interval: DEFAULT_INTERVAL,
            backoff_initial: backoff.initial(),
            backoff_max: backoff.max(),
            kinds: ResourceKind::ALL.to_vec(),
        }
    }
}

impl Settings {
    pub fn load(config: Option<&Path>, overrides: Overrides) -> Result<Self, ConfigError> {
        let file = match config {
            Some(path) => FileConfig::read(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(file, overrides)
    }

    pub fn resolve(file: FileConfig, overrides: Overrides) -> Result<Self, ConfigError> {
        let mut settings = Settings::default();

        if let Some(dir) = overrides.source_dir.or(file.source_dir) {
            settings.source_dir = dir;
        }
        if let Some(output) = overrides.output.or(file.output) {
            settings.output = output;
        }
        if let Some(secs) = overrides.interval_secs.or(file.emit_interval_secs) {
            if secs == 0 {
                return Err(ConfigError::Invalid("emit interval must be at least one second"));
            }
            settings.emit_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = file.backoff_initial_secs {
            if secs == 0 {
                return Err(ConfigError::Invalid("initial backoff must be at least one second"));
            }
            settings.backoff_initial = Duration::from_secs(secs);
        }
        if let Some(secs) = file.backoff_max_secs {
            settings.backoff_max = Duration::from_secs(secs);
        }
        if settings.backoff_max < settings.backoff_initial {
            return Err(ConfigError::Invalid("backoff cap is below the initial backoff"));
        }

        if let Some(names) = file.kinds {
            let mut kinds = names
                .iter()
                .map(|name| name.parse().map_err(|_| ConfigError::UnknownKind(name.clone())))
                .collect::<Result<Vec<ResourceKind>, _>>()?;
            kinds.sort();
            kinds.dedup();
            if kinds.is_empty() {
                return Err(ConfigError::Invalid("at least one resource kind is required"));
            }
            settings.kinds = kinds;
        }

        Ok(settings)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff_initial, self.backoff_max)
    }
}
