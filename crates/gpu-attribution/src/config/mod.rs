//! Configuration of the CLI: command line flags layered over a YAML file.

pub mod cli;

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use gpu_attribution::metrics::encoders::MetricsFormat;
use gpu_attribution::OwnerPolicy;
use serde::Deserialize;
use thiserror::Error;

pub use self::cli::AttributeArgs;
pub use self::cli::Cli;
pub use self::cli::Commands;
pub use self::cli::DeviceArgs;
pub use self::cli::LookupArgs;
pub use self::cli::MetadataArgs;

const DEFAULT_PROC_ROOT: &str = "/proc";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file `{path}`: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file `{path}`: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// Contents of the YAML configuration file.
///
/// ```yaml
/// envKeys:
///   JOB_NAME: job
///   RANK: rank
/// ownerPolicy: first-reported
/// includeGraphicsProcesses: false
/// procRoot: /proc
/// format: json
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileConfig {
    pub env_keys: HashMap<String, String>,
    pub owner_policy: Option<OwnerPolicy>,
    pub include_graphics_processes: bool,
    pub proc_root: Option<PathBuf>,
    pub format: Option<MetricsFormat>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
        // an empty file deserializes to unit, not to an empty mapping
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Loads `path` if given, defaults otherwise.
    pub fn load_optional(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

/// Device related settings after merging flags over the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSettings {
    pub owner_policy: OwnerPolicy,
    pub include_graphics_processes: bool,
}

impl DeviceSettings {
    pub fn merge(file: &FileConfig, args: &DeviceArgs) -> Self {
        Self {
            owner_policy: args
                .owner_policy
                .or(file.owner_policy)
                .unwrap_or_default(),
            include_graphics_processes: args.include_graphics_processes
                || file.include_graphics_processes,
        }
    }
}

/// Lookup related settings after merging flags over the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupSettings {
    /// Environment variable name to output key
    pub env_keys: HashMap<String, String>,
    pub proc_root: PathBuf,
}

impl LookupSettings {
    pub fn merge(file: &FileConfig, args: &LookupArgs) -> Self {
        let mut env_keys = file.env_keys.clone();
        env_keys.extend(args.env_keys.iter().cloned());

        Self {
            env_keys,
            proc_root: args
                .proc_root
                .clone()
                .or_else(|| file.proc_root.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PROC_ROOT)),
        }
    }
}
