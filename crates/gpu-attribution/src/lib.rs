//! Host-level attribution of GPU devices to the processes that occupy them.
//!
//! Two independent, stateless queries make up the core:
//!
//! - [`device::OwnershipResolver`] maps every GPU index on the host to the PID
//!   currently bound to it, or [`NO_OWNER`].
//! - [`environ::MetadataExtractor`] reads selected variables out of another
//!   process's environment and renames them to caller chosen keys.
//!
//! They share no state. [`attribution::Attributor`] is the caller side glue
//! that runs one after the other for a metrics cycle.

pub mod attribution;
pub mod device;
pub mod environ;
pub mod metrics;
pub mod mock;

use std::collections::HashMap;

use error_stack::Report;

pub use crate::device::DeviceProcessSource;
pub use crate::device::NvmlDeviceSource;
pub use crate::device::OwnerPolicy;
pub use crate::device::OwnershipResolver;
pub use crate::device::ResolveError;
pub use crate::environ::EnvironmentReadError;
pub use crate::environ::EnvironmentReader;
pub use crate::environ::ExtractError;
pub use crate::environ::MetadataExtractor;
pub use crate::environ::ProcEnvironmentReader;

/// OS process identifier, as reported by the kernel.
pub type Pid = libc::pid_t;

/// Marks a device with no bound process in an ownership sequence.
pub const NO_OWNER: Pid = -1;

/// Resolves the owner of every GPU on this host through NVML.
///
/// Position `i` of the result holds the PID bound to device `i`, or
/// [`NO_OWNER`]. A host without GPUs yields an empty vector.
///
/// # Errors
///
/// - [`ResolveError::EnumerationUnavailable`] if NVML cannot be loaded or queried
pub fn resolve_owning_processes() -> Result<Vec<Pid>, Report<ResolveError>> {
    let source = NvmlDeviceSource::init()?;
    OwnershipResolver::new(source).resolve_owning_processes()
}

/// Reads the variables named in `lookup` from the environment of `pid`.
///
/// `lookup` maps environment variable names to output keys. Variables the
/// process does not have are left out of the result.
///
/// # Errors
///
/// - [`ExtractError::ProcessUnavailable`] if the process is gone or the
///   caller may not read its environment
pub fn extract_metadata(
    pid: Pid,
    lookup: &HashMap<String, String>,
) -> Result<HashMap<String, String>, Report<ExtractError>> {
    MetadataExtractor::new(ProcEnvironmentReader::default()).extract_metadata(pid, lookup)
}
