//! End to end behavior of the resolver and extractor against in-memory
//! device and process tables.

use std::collections::HashMap;

use gpu_attribution::attribution::Attributor;
use gpu_attribution::mock::MockDeviceProcessSource;
use gpu_attribution::mock::MockEnvironmentReader;
use gpu_attribution::ExtractError;
use gpu_attribution::MetadataExtractor;
use gpu_attribution::OwnershipResolver;
use gpu_attribution::ResolveError;
use gpu_attribution::NO_OWNER;
use similar_asserts::assert_eq;

fn lookup(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(name, key)| (name.to_string(), key.to_string()))
        .collect()
}

#[test]
fn two_devices_one_owned() {
    let resolver =
        OwnershipResolver::new(MockDeviceProcessSource::with_devices(vec![vec![1234], vec![]]));
    let reader = MockEnvironmentReader::new();
    reader.set_environment(1234, &[("HOME", "/home/trainer"), ("JOB_NAME", "train_a")]);
    let extractor = MetadataExtractor::new(reader);

    let owners = resolver.resolve_owning_processes().expect("resolve");
    assert_eq!(owners, vec![1234, NO_OWNER]);

    let metadata = extractor
        .extract_metadata(owners[0], &lookup(&[("JOB_NAME", "job")]))
        .expect("extract");
    assert_eq!(metadata, lookup(&[("job", "train_a")]));

    let report = extractor
        .extract_metadata(owners[1], &lookup(&[("JOB_NAME", "job")]))
        .expect_err("sentinel is not a process");
    assert_eq!(
        *report.current_context(),
        ExtractError::ProcessUnavailable { pid: NO_OWNER }
    );
}

#[test]
fn owner_exits_between_resolution_and_extraction() {
    let resolver = OwnershipResolver::new(MockDeviceProcessSource::with_devices(vec![vec![77]]));
    let reader = MockEnvironmentReader::new();
    reader.set_environment(77, &[("RANK", "0")]);
    let extractor = MetadataExtractor::new(reader);

    let owners = resolver.resolve_owning_processes().expect("resolve");
    extractor.reader().remove_process(77);

    let report = extractor
        .extract_metadata(owners[0], &lookup(&[("RANK", "rank")]))
        .expect_err("process is gone");
    assert_eq!(
        *report.current_context(),
        ExtractError::ProcessUnavailable { pid: 77 }
    );
}

#[test]
fn host_without_gpus_attributes_nothing() {
    let attributor = Attributor::new(
        OwnershipResolver::new(MockDeviceProcessSource::new()),
        MetadataExtractor::new(MockEnvironmentReader::new()),
    );

    let attributions = attributor
        .attribute(&lookup(&[("JOB_NAME", "job")]))
        .expect("attribute");

    assert!(attributions.is_empty());
}

#[test]
fn unreadable_owner_does_not_hide_other_devices() {
    let source = MockDeviceProcessSource::with_devices(vec![vec![10], vec![20], vec![]]);
    let reader = MockEnvironmentReader::new();
    reader.set_environment(10, &[("JOB_NAME", "secret")]);
    reader.deny(10);
    reader.set_environment(20, &[("JOB_NAME", "eval"), ("RANK", "1")]);
    let attributor = Attributor::new(OwnershipResolver::new(source), MetadataExtractor::new(reader));

    let attributions = attributor
        .attribute(&lookup(&[("JOB_NAME", "job"), ("RANK", "rank")]))
        .expect("attribute");

    assert_eq!(attributions.len(), 3);
    assert_eq!(attributions[0].pid, Some(10));
    assert!(attributions[0].metadata.is_empty());
    assert_eq!(attributions[1].pid, Some(20));
    assert_eq!(attributions[1].metadata, lookup(&[("job", "eval"), ("rank", "1")]));
    assert_eq!(attributions[2].pid, None);
}

#[test]
fn driver_outage_surfaces_as_enumeration_error() {
    let source = MockDeviceProcessSource::with_devices(vec![vec![1]]);
    source.set_error_mode(true);
    let resolver = OwnershipResolver::new(source);

    let report = resolver
        .resolve_owning_processes()
        .expect_err("driver is down");

    assert!(matches!(
        report.current_context(),
        ResolveError::EnumerationUnavailable
    ));
}

#[test]
fn device_list_changes_are_picked_up_without_caching() {
    let source = MockDeviceProcessSource::with_devices(vec![vec![1], vec![]]);
    let resolver = OwnershipResolver::new(source);

    assert_eq!(
        resolver.resolve_owning_processes().expect("resolve"),
        vec![1, NO_OWNER]
    );

    // a new job lands on device 1 and device 2 appears
    resolver.source().set_device_processes(1, vec![2]);
    resolver.source().set_device_processes(2, vec![]);

    assert_eq!(
        resolver.resolve_owning_processes().expect("resolve"),
        vec![1, 2, NO_OWNER]
    );
}
