//! Device ownership resolution.
//!
//! Answers "which process owns GPU `i`" for every device on the host. The
//! driver facing part lives behind [`DeviceProcessSource`]; the reduction of
//! the reported process list to a single owner is done by
//! [`OwnershipResolver`] and does not depend on real hardware.

mod nvml;

use core::error::Error;

use derive_more::Display;
use error_stack::Context;
use error_stack::Report;
use error_stack::ResultExt;
use serde::Deserialize;
use tracing::debug;

pub use self::nvml::NvmlDeviceSource;
use crate::Pid;
use crate::NO_OWNER;

/// Errors that can occur while resolving device owners.
#[derive(Debug, Display)]
pub enum ResolveError {
    #[display("GPU device enumeration is unavailable")]
    EnumerationUnavailable,
}

impl Error for ResolveError {}

/// Source of device to process bindings, usually the GPU driver.
pub trait DeviceProcessSource: Send + Sync {
    type Error: Context;

    /// Number of GPU devices visible on the host.
    fn device_count(&self) -> Result<u32, Self::Error>;

    /// Processes currently bound to the device at `index`, in the order the
    /// driver reports them.
    fn processes_on_device(&self, index: u32) -> Result<Vec<Pid>, Self::Error>;
}

/// Picks the owner of a device when the driver reports several processes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OwnerPolicy {
    /// The first process in driver order.
    #[default]
    FirstReported,
    /// The numerically lowest PID, independent of driver order.
    LowestPid,
}

impl OwnerPolicy {
    /// Reduces the reported processes to one owner, `None` if there are none.
    pub fn select(self, pids: &[Pid]) -> Option<Pid> {
        match self {
            OwnerPolicy::FirstReported => pids.first().copied(),
            OwnerPolicy::LowestPid => pids.iter().copied().min(),
        }
    }
}

/// Resolves the owning process of every device exposed by a [`DeviceProcessSource`].
pub struct OwnershipResolver<S> {
    source: S,
    policy: OwnerPolicy,
}

impl<S: DeviceProcessSource> OwnershipResolver<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            policy: OwnerPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: OwnerPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> OwnerPolicy {
        self.policy
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Returns one entry per device index, in ascending index order.
    ///
    /// Each entry is the PID bound to that device, or [`NO_OWNER`] when the
    /// device has no process. Only one PID is kept per device, chosen by the
    /// configured [`OwnerPolicy`].
    ///
    /// # Errors
    ///
    /// - [`ResolveError::EnumerationUnavailable`] if the device count or the
    ///   process list of any device cannot be queried
    #[tracing::instrument(level = "debug", skip(self), fields(policy = ?self.policy))]
    pub fn resolve_owning_processes(&self) -> Result<Vec<Pid>, Report<ResolveError>> {
        let device_count = self
            .source
            .device_count()
            .change_context(ResolveError::EnumerationUnavailable)
            .attach_printable("failed to query device count")?;

        let mut owners = Vec::with_capacity(device_count as usize);
        for index in 0..device_count {
            let mut pids = self
                .source
                .processes_on_device(index)
                .change_context(ResolveError::EnumerationUnavailable)
                .attach_printable_lazy(|| format!("failed to list processes on device {index}"))?;

            // pid 0 is what the driver reports for processes it cannot map
            // into our pid namespace
            pids.retain(|pid| *pid > 0);

            if pids.len() > 1 {
                debug!(
                    device_index = index,
                    ?pids,
                    policy = ?self.policy,
                    "Multiple processes bound to device, keeping one"
                );
            }

            owners.push(self.policy.select(&pids).unwrap_or(NO_OWNER));
        }

        debug!(?owners, "Resolved device owners");
        Ok(owners)
    }
}
