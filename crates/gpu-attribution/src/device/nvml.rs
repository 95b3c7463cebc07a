//! NVML backed [`DeviceProcessSource`].

use std::ffi::OsStr;
use std::sync::Arc;

use error_stack::Report;
use error_stack::ResultExt;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::struct_wrappers::device::ProcessInfo;
use nvml_wrapper::Nvml;
use tracing::info;
use tracing::warn;

use super::DeviceProcessSource;
use super::ResolveError;
use crate::Pid;

const NVML_LIB_PATH: &str = "libnvidia-ml.so.1";

/// Lists device bindings through the NVIDIA Management Library.
pub struct NvmlDeviceSource {
    nvml: Arc<Nvml>,
    include_graphics_processes: bool,
}

impl NvmlDeviceSource {
    /// Loads NVML and wraps it.
    ///
    /// # Errors
    ///
    /// - [`ResolveError::EnumerationUnavailable`] if the library cannot be
    ///   loaded from the default location or from `libnvidia-ml.so.1`
    pub fn init() -> Result<Self, Report<ResolveError>> {
        Ok(Self::new(Arc::new(init_nvml()?)))
    }

    pub fn new(nvml: Arc<Nvml>) -> Self {
        Self {
            nvml,
            include_graphics_processes: false,
        }
    }

    /// Also treat graphics contexts as device owners.
    ///
    /// Compute processes are still reported first.
    pub fn with_graphics_processes(mut self, include: bool) -> Self {
        self.include_graphics_processes = include;
        self
    }
}

fn init_nvml() -> Result<Nvml, Report<ResolveError>> {
    match Nvml::init() {
        Ok(nvml) => {
            info!("NVML initialized successfully");
            Ok(nvml)
        }
        Err(e) => {
            warn!(error = %e, "Standard NVML init failed, trying with explicit library path");
            let nvml = Nvml::builder()
                .lib_path(OsStr::new(NVML_LIB_PATH))
                .init()
                .change_context(ResolveError::EnumerationUnavailable)
                .attach_printable_lazy(|| format!("failed to load {NVML_LIB_PATH}"))?;
            info!("NVML initialized with explicit library path");
            Ok(nvml)
        }
    }
}

/// A process list query answering `NotFound` means nothing is running.
fn or_empty(result: Result<Vec<ProcessInfo>, NvmlError>) -> Result<Vec<ProcessInfo>, NvmlError> {
    match result {
        Err(NvmlError::NotFound) => Ok(Vec::new()),
        other => other,
    }
}

fn append_pids(pids: &mut Vec<Pid>, reported: impl IntoIterator<Item = u32>) {
    for raw in reported {
        match Pid::try_from(raw) {
            Ok(pid) if !pids.contains(&pid) => pids.push(pid),
            Ok(_) => {}
            Err(_) => warn!(pid = raw, "Driver reported a PID out of range, skipping"),
        }
    }
}

impl DeviceProcessSource for NvmlDeviceSource {
    type Error = NvmlError;

    fn device_count(&self) -> Result<u32, NvmlError> {
        self.nvml.device_count()
    }

    #[tracing::instrument(level = "trace", skip(self))]
    fn processes_on_device(&self, index: u32) -> Result<Vec<Pid>, NvmlError> {
        let device = self.nvml.device_by_index(index)?;

        let mut pids = Vec::new();
        let compute = or_empty(device.running_compute_processes())?;
        append_pids(&mut pids, compute.into_iter().map(|p| p.pid));
        if self.include_graphics_processes {
            let graphics = or_empty(device.running_graphics_processes())?;
            append_pids(&mut pids, graphics.into_iter().map(|p| p.pid));
        }

        Ok(pids)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn not_found_process_list_is_empty() {
        let result = or_empty(Err(NvmlError::NotFound)).expect("NotFound maps to empty");
        assert!(result.is_empty());
    }

    #[test]
    fn other_process_list_errors_are_kept() {
        let result = or_empty(Err(NvmlError::NoPermission));
        assert!(matches!(result, Err(NvmlError::NoPermission)));
    }

    #[test]
    fn append_pids_keeps_driver_order_and_drops_duplicates() {
        let mut pids = Vec::new();
        append_pids(&mut pids, [30, 10]);
        append_pids(&mut pids, [10, 20]);

        assert_eq!(pids, vec![30, 10, 20]);
    }

    #[test]
    fn append_pids_skips_values_outside_pid_range() {
        let mut pids = Vec::new();
        append_pids(&mut pids, [u32::MAX, 5]);

        assert_eq!(pids, vec![5]);
    }
}
