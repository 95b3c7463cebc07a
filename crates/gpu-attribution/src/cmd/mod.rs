pub mod attribute;
pub mod metadata;
pub mod resolve;

use anyhow::Result;
use gpu_attribution::NvmlDeviceSource;
use gpu_attribution::OwnershipResolver;

use crate::config::DeviceSettings;

/// Loads NVML and configures the resolver from `settings`.
pub(crate) fn build_resolver(
    settings: &DeviceSettings,
) -> Result<OwnershipResolver<NvmlDeviceSource>> {
    let source = NvmlDeviceSource::init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize NVML: {e:?}"))?
        .with_graphics_processes(settings.include_graphics_processes);

    Ok(OwnershipResolver::new(source).with_policy(settings.owner_policy))
}
