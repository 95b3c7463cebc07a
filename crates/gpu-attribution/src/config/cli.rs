use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use gpu_attribution::metrics::encoders::MetricsFormat;
use gpu_attribution::OwnerPolicy;
use gpu_attribution::Pid;
use utils::version;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    /// YAML configuration file
    #[arg(long, global = true, env = "GPU_ATTRIBUTION_CONFIG", value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Also write logs to a daily rotated file at this path
    #[arg(long, global = true, env = "GPU_ATTRIBUTION_LOG_FILE", value_hint = clap::ValueHint::FilePath)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the owning PID of every GPU, -1 for idle devices
    Resolve(DeviceArgs),
    /// Print selected environment variables of a process
    Metadata(MetadataArgs),
    /// Emit one attribution record per GPU, once or periodically
    Attribute(AttributeArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct DeviceArgs {
    /// How to pick one owner when a device reports several processes
    #[arg(long, env = "GPU_ATTRIBUTION_OWNER_POLICY", value_enum)]
    pub owner_policy: Option<OwnerPolicy>,

    /// Treat graphics contexts as device owners too
    #[arg(long, env = "GPU_ATTRIBUTION_INCLUDE_GRAPHICS")]
    pub include_graphics_processes: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct LookupArgs {
    /// Environment variable to report, as NAME=OUTPUT_KEY (repeatable)
    #[arg(
        long = "env-key",
        env = "GPU_ATTRIBUTION_ENV_KEYS",
        value_delimiter = ',',
        value_parser = parse_env_key
    )]
    pub env_keys: Vec<(String, String)>,

    /// Root of the proc filesystem
    #[arg(long, env = "GPU_ATTRIBUTION_PROC_ROOT", value_hint = clap::ValueHint::DirPath)]
    pub proc_root: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct MetadataArgs {
    /// Target process
    #[arg(long, allow_negative_numbers = true)]
    pub pid: Pid,

    #[command(flatten)]
    pub lookup: LookupArgs,
}

#[derive(Args, Debug, Clone)]
pub struct AttributeArgs {
    #[command(flatten)]
    pub device: DeviceArgs,

    #[command(flatten)]
    pub lookup: LookupArgs,

    /// Output format of the emitted records
    #[arg(long, env = "GPU_ATTRIBUTION_FORMAT", value_enum)]
    pub format: Option<MetricsFormat>,

    /// Repeat every N seconds instead of running once
    #[arg(long, env = "GPU_ATTRIBUTION_INTERVAL_SECS")]
    pub interval_secs: Option<u64>,

    /// Give up on a cycle that takes longer than this
    #[arg(long, env = "GPU_ATTRIBUTION_TIMEOUT_SECS", default_value_t = 10)]
    pub timeout_secs: u64,
}

/// Parses `NAME=OUTPUT_KEY`.
fn parse_env_key(s: &str) -> Result<(String, String), String> {
    let (name, key) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=OUTPUT_KEY, got `{s}`"))?;
    if name.is_empty() || key.is_empty() {
        return Err(format!("empty variable name or output key in `{s}`"));
    }
    if name.contains('\0') {
        return Err(format!("variable name must not contain NUL: `{s}`"));
    }
    Ok((name.to_string(), key.to_string()))
}
