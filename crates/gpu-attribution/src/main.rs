mod cmd;
mod config;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use utils::version;

use crate::config::Cli;
use crate::config::Commands;
use crate::config::FileConfig;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    let _guard = utils::logging::init(cli.log_file.as_deref())
        .context("Failed to initialize file logging")?;

    tracing::debug!("gpu-attribution {}", &**version::VERSION);

    let file_config = FileConfig::load_optional(cli.config.as_deref())?;

    match &cli.command {
        Commands::Resolve(args) => cmd::resolve::run(&file_config, args),
        Commands::Metadata(args) => cmd::metadata::run(&file_config, args),
        Commands::Attribute(args) => cmd::attribute::run(&file_config, args).await,
    }
}
