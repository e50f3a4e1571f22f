//! Discovery runs against an in-memory registry.

mod common;

use common::{mapping_csv, EveryAddressAnswers};
use omnia_discovery::{
    AdminAddressing, BmcDiscovery, DiscoveryError, DiscoveryRun, MappingDiscovery, MAX_BMC_NODES,
};
use omnia_registry::{DiscoveryMechanism, MemoryRegistry, NodeFilter, NodeRegistry};
use std::io::Write;
use std::sync::Arc;

#[tokio::test]
async fn test_duplicate_mapping_rows_yield_one_entry() {
    let csv = mapping_csv(&[
        ("node1", "aa:bb:cc:dd:ee:01", Some("10.3.0.1")),
        ("node1", "aa:bb:cc:dd:ee:01", Some("10.3.0.1")),
        ("node2", "aa:bb:cc:dd:ee:02", None),
    ]);
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(csv.as_bytes()).unwrap();

    let registry = Arc::new(MemoryRegistry::new());
    let run = DiscoveryRun::new(registry.clone());
    let source = MappingDiscovery::from_path(file.path()).unwrap();
    let report = run.execute(source.into()).await.unwrap();

    assert_eq!(report.inserted.len(), 2);
    assert_eq!(report.updated.len(), 1);
    assert!(report.cross_mechanism.is_empty());
    assert_eq!(registry.list(&NodeFilter::all()).len(), 2);
}

#[tokio::test]
async fn test_bmc_run_fails_on_registration_past_capacity() {
    let registry = Arc::new(MemoryRegistry::new());
    let prober = Arc::new(EveryAddressAnswers::new());
    // 10.3.0.1 - 10.3.3.233 is exactly 1001 addresses
    let bmc = BmcDiscovery::new(
        "grp0",
        "10.3.0.1-10.3.3.233".parse().unwrap(),
        AdminAddressing::new("10.5.0.1-10.5.7.255".parse().unwrap(), true),
        prober.clone(),
    )
    .with_parallelism(64);

    let err = DiscoveryRun::new(registry.clone())
        .execute(bmc.into())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DiscoveryError::CapacityExceeded {
            mechanism: DiscoveryMechanism::Bmc,
            limit: MAX_BMC_NODES
        }
    ));
    assert_eq!(registry.list(&NodeFilter::all()).len(), MAX_BMC_NODES);
    assert!(prober.probes() > MAX_BMC_NODES);
}

#[tokio::test]
async fn test_bmc_run_at_capacity_succeeds() {
    let registry = Arc::new(MemoryRegistry::new());
    let bmc = BmcDiscovery::new(
        "grp0",
        "10.3.0.1-10.3.3.232".parse().unwrap(),
        AdminAddressing::new("10.5.0.1-10.5.7.255".parse().unwrap(), true),
        Arc::new(EveryAddressAnswers::new()),
    );
    let report = DiscoveryRun::new(registry.clone())
        .execute(bmc.into())
        .await
        .unwrap();
    assert_eq!(report.inserted.len(), MAX_BMC_NODES);
}

#[tokio::test]
async fn test_cross_mechanism_rediscovery_replaces_fields() {
    let registry = Arc::new(MemoryRegistry::new());
    let bmc = BmcDiscovery::new(
        "grp0",
        "10.3.0.1-10.3.0.2".parse().unwrap(),
        AdminAddressing::new("10.5.0.1-10.5.0.2".parse().unwrap(), true),
        Arc::new(EveryAddressAnswers::new()),
    );
    let run = DiscoveryRun::new(registry.clone());
    run.execute(bmc.into()).await.unwrap();

    // Same MAC as the BMC responder at 10.3.0.1
    let csv = mapping_csv(&[("mapped1", "02:00:0a:03:00:01", Some("10.3.0.50"))]);
    let source = MappingDiscovery::from_reader(csv.as_bytes()).unwrap();
    let report = run.execute(source.into()).await.unwrap();

    assert_eq!(report.cross_mechanism.len(), 1);
    let node = registry.get(report.cross_mechanism[0]).unwrap();
    assert_eq!(node.identity.mechanism, DiscoveryMechanism::Mapping);
    assert_eq!(node.name(), "mapped1");
    assert_eq!(node.identity.bmc_mode, None);
    assert_eq!(registry.list(&NodeFilter::all()).len(), 2);
}
