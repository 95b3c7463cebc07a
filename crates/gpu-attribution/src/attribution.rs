//! One attribution step: device owners joined with their job metadata.

use std::collections::HashMap;

use error_stack::Report;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::device::DeviceProcessSource;
use crate::device::OwnershipResolver;
use crate::device::ResolveError;
use crate::environ::EnvironmentReader;
use crate::environ::MetadataExtractor;
use crate::Pid;
use crate::NO_OWNER;

/// Attribution of one GPU device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceAttribution {
    pub device_index: u32,
    /// Owning process, `None` when the device is idle
    pub pid: Option<Pid>,
    /// Metadata of the owning process. Empty when the device is idle or
    /// the owner's environment could not be read.
    pub metadata: HashMap<String, String>,
}

/// Pairs of `(device_index, pid)` for every owned device.
pub fn owned_devices(owners: &[Pid]) -> impl Iterator<Item = (u32, Pid)> + '_ {
    owners
        .iter()
        .enumerate()
        .filter(|(_, pid)| **pid != NO_OWNER)
        .map(|(index, pid)| (index as u32, *pid))
}

/// Runs the resolver and then the extractor for every owned device.
pub struct Attributor<S, R> {
    resolver: OwnershipResolver<S>,
    extractor: MetadataExtractor<R>,
}

impl<S, R> Attributor<S, R>
where
    S: DeviceProcessSource,
    R: EnvironmentReader,
{
    pub fn new(resolver: OwnershipResolver<S>, extractor: MetadataExtractor<R>) -> Self {
        Self {
            resolver,
            extractor,
        }
    }

    /// Attributes every device on the host.
    ///
    /// A process that vanished or cannot be read only loses its metadata;
    /// the device is still reported with its owner.
    ///
    /// # Errors
    ///
    /// - [`ResolveError::EnumerationUnavailable`] if device owners cannot be
    ///   resolved, in which case nothing is attributed
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn attribute(
        &self,
        lookup: &HashMap<String, String>,
    ) -> Result<Vec<DeviceAttribution>, Report<ResolveError>> {
        let owners = self.resolver.resolve_owning_processes()?;

        let mut attributions: Vec<DeviceAttribution> = owners
            .iter()
            .enumerate()
            .map(|(index, _)| DeviceAttribution {
                device_index: index as u32,
                pid: None,
                metadata: HashMap::new(),
            })
            .collect();

        for (device_index, pid) in owned_devices(&owners) {
            let attribution = &mut attributions[device_index as usize];
            attribution.pid = Some(pid);

            match self.extractor.extract_metadata(pid, lookup) {
                Ok(metadata) => attribution.metadata = metadata,
                Err(report) => {
                    warn!(
                        device_index,
                        pid,
                        error = ?report,
                        "Failed to read process metadata, reporting device without it"
                    );
                }
            }
        }

        debug!(devices = attributions.len(), "Attribution step complete");
        Ok(attributions)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::mock::MockDeviceProcessSource;
    use crate::mock::MockEnvironmentReader;

    fn job_lookup() -> HashMap<String, String> {
        HashMap::from([("JOB_NAME".to_string(), "job".to_string())])
    }

    #[test]
    fn owned_devices_skips_sentinel() {
        let pairs: Vec<_> = owned_devices(&[NO_OWNER, 12, NO_OWNER, 9]).collect();

        assert_eq!(pairs, vec![(1, 12), (3, 9)]);
    }

    #[test]
    fn attributes_owned_and_idle_devices() {
        let source = MockDeviceProcessSource::with_devices(vec![vec![1234], vec![]]);
        let reader = MockEnvironmentReader::new();
        reader.set_environment(1234, &[("JOB_NAME", "train_a")]);
        let attributor = Attributor::new(
            OwnershipResolver::new(source),
            MetadataExtractor::new(reader),
        );

        let attributions = attributor.attribute(&job_lookup()).expect("attribute");

        assert_eq!(
            attributions,
            vec![
                DeviceAttribution {
                    device_index: 0,
                    pid: Some(1234),
                    metadata: HashMap::from([("job".to_string(), "train_a".to_string())]),
                },
                DeviceAttribution {
                    device_index: 1,
                    pid: None,
                    metadata: HashMap::new(),
                },
            ]
        );
    }

    #[test]
    fn vanished_owner_keeps_device_attribution() {
        let source = MockDeviceProcessSource::with_devices(vec![vec![10], vec![20]]);
        let reader = MockEnvironmentReader::new();
        reader.set_environment(20, &[("JOB_NAME", "eval")]);
        let attributor = Attributor::new(
            OwnershipResolver::new(source),
            MetadataExtractor::new(reader),
        );

        let attributions = attributor.attribute(&job_lookup()).expect("attribute");

        assert_eq!(attributions[0].pid, Some(10));
        assert!(attributions[0].metadata.is_empty());
        assert_eq!(attributions[1].metadata["job"], "eval");
    }

    #[test]
    fn idle_devices_are_never_queried() {
        let source = MockDeviceProcessSource::with_devices(vec![vec![], vec![]]);
        let attributor = Attributor::new(
            OwnershipResolver::new(source),
            MetadataExtractor::new(MockEnvironmentReader::new()),
        );

        let attributions = attributor.attribute(&job_lookup()).expect("attribute");

        assert_eq!(attributions.len(), 2);
        assert_eq!(attributor.extractor.reader().read_count(), 0);
    }

    #[test]
    fn enumeration_failure_aborts_the_step() {
        let source = MockDeviceProcessSource::with_devices(vec![vec![1]]);
        source.set_error_mode(true);
        let attributor = Attributor::new(
            OwnershipResolver::new(source),
            MetadataExtractor::new(MockEnvironmentReader::new()),
        );

        let result = attributor.attribute(&job_lookup());

        assert!(result.is_err());
    }
}
