//! Test adapters for the capability traits
//!
//! In-memory implementations of [`DeviceProcessSource`] and
//! [`EnvironmentReader`] for unit and integration tests that must not depend
//! on real GPUs or processes.

use core::error::Error;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use derive_more::Display;
use error_stack::Report;

use crate::device::DeviceProcessSource;
use crate::environ::EnvironmentReadError;
use crate::environ::EnvironmentReader;
use crate::Pid;

/// Failures injected by [`MockDeviceProcessSource`].
#[derive(Debug, Display)]
pub enum MockSourceError {
    #[display("mock driver is unavailable")]
    Unavailable,
    #[display("mock device {index} failed")]
    DeviceFailed { index: u32 },
}

impl Error for MockSourceError {}

/// Mock device source with a fixed process list per device
#[derive(Default)]
pub struct MockDeviceProcessSource {
    devices: Mutex<Vec<Vec<Pid>>>,
    error_mode: Mutex<bool>,
    failing_device: Mutex<Option<u32>>,
}

impl MockDeviceProcessSource {
    /// A host without GPUs.
    pub fn new() -> Self {
        Self::default()
    }

    /// One entry per device, holding the PIDs reported for it in order.
    pub fn with_devices(devices: Vec<Vec<Pid>>) -> Self {
        Self {
            devices: Mutex::new(devices),
            ..Self::default()
        }
    }

    pub fn set_device_processes(&self, index: u32, pids: Vec<Pid>) {
        let mut devices = self.devices.lock().unwrap();
        let index = index as usize;
        if devices.len() <= index {
            devices.resize(index + 1, Vec::new());
        }
        devices[index] = pids;
    }

    /// Enable or disable error mode for testing enumeration failures
    pub fn set_error_mode(&self, enabled: bool) {
        *self.error_mode.lock().unwrap() = enabled;
    }

    /// Make the process query of one device fail
    pub fn fail_device(&self, index: u32) {
        *self.failing_device.lock().unwrap() = Some(index);
    }
}

impl DeviceProcessSource for MockDeviceProcessSource {
    type Error = MockSourceError;

    fn device_count(&self) -> Result<u32, MockSourceError> {
        if *self.error_mode.lock().unwrap() {
            return Err(MockSourceError::Unavailable);
        }
        Ok(self.devices.lock().unwrap().len() as u32)
    }

    fn processes_on_device(&self, index: u32) -> Result<Vec<Pid>, MockSourceError> {
        if *self.error_mode.lock().unwrap() {
            return Err(MockSourceError::Unavailable);
        }
        if *self.failing_device.lock().unwrap() == Some(index) {
            return Err(MockSourceError::DeviceFailed { index });
        }
        Ok(self
            .devices
            .lock()
            .unwrap()
            .get(index as usize)
            .cloned()
            .unwrap_or_default())
    }
}

/// Mock environment reader backed by an in-memory process table
#[derive(Default)]
pub struct MockEnvironmentReader {
    environments: Mutex<HashMap<Pid, Vec<u8>>>,
    denied: Mutex<HashSet<Pid>>,
    failing: Mutex<HashSet<Pid>>,
    reads: AtomicUsize,
}

impl MockEnvironmentReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a process whose environment holds `vars` in order.
    pub fn set_environment(&self, pid: Pid, vars: &[(&str, &str)]) {
        let mut raw = Vec::new();
        for (name, value) in vars {
            raw.extend_from_slice(name.as_bytes());
            raw.push(b'=');
            raw.extend_from_slice(value.as_bytes());
            raw.push(0);
        }
        self.set_raw_environment(pid, raw);
    }

    /// Registers a process with an arbitrary environment block.
    pub fn set_raw_environment(&self, pid: Pid, raw: Vec<u8>) {
        self.environments.lock().unwrap().insert(pid, raw);
    }

    /// Simulates the process exiting.
    pub fn remove_process(&self, pid: Pid) {
        self.environments.lock().unwrap().remove(&pid);
    }

    /// Makes reads of `pid` fail as if owned by another user.
    pub fn deny(&self, pid: Pid) {
        self.denied.lock().unwrap().insert(pid);
    }

    /// Makes reads of `pid` fail with an I/O error although the process exists.
    pub fn fail_reads(&self, pid: Pid) {
        self.failing.lock().unwrap().insert(pid);
    }

    /// Number of read attempts so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl EnvironmentReader for MockEnvironmentReader {
    fn read_raw_environment(&self, pid: Pid) -> Result<Vec<u8>, Report<EnvironmentReadError>> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        if self.denied.lock().unwrap().contains(&pid) {
            return Err(Report::new(EnvironmentReadError::PermissionDenied { pid }));
        }
        if self.failing.lock().unwrap().contains(&pid) {
            return Err(Report::new(EnvironmentReadError::Io { pid }));
        }
        self.environments
            .lock()
            .unwrap()
            .get(&pid)
            .cloned()
            .ok_or_else(|| Report::new(EnvironmentReadError::NotFound { pid }))
    }
}
