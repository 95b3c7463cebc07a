use anyhow::Result;

use super::build_resolver;
use crate::config::DeviceArgs;
use crate::config::DeviceSettings;
use crate::config::FileConfig;

/// Prints the device ownership sequence as a JSON array.
pub fn run(file: &FileConfig, args: &DeviceArgs) -> Result<()> {
    let settings = DeviceSettings::merge(file, args);
    let resolver = build_resolver(&settings)?;

    let owners = resolver
        .resolve_owning_processes()
        .map_err(|e| anyhow::anyhow!("Failed to resolve device owners: {e:?}"))?;

    tracing::info!(devices = owners.len(), "Resolved device owners");
    println!("{}", serde_json::to_string(&owners)?);
    Ok(())
}
