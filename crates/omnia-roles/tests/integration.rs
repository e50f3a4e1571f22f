//! End-to-end tests: load a roles document from disk and resolve registry
//! nodes against it.

use omnia_registry::{
    DiscoveryMechanism, MacAddr, MemoryRegistry, NodeFilter, NodeIdentity, NodeRegistry,
};
use omnia_roles::{resolve, service_node_plan, validate, RolesConfig, RolesError};
use std::io::Write;
use tempfile::NamedTempFile;

const ROLES_YAML: &str = r#"
Roles:
  - name: service_node
    groups: [svc]
  - name: slurm_control_node
    groups: [ctl]
  - name: slurm_node
    groups: [rack1, rack2]
Groups:
  svc:
    location_id: SU-1.RACK-0
    bmc_details:
      static_range: 10.3.0.1-10.3.0.20
  ctl:
    location_id: SU-1.RACK-0
  rack1:
    location_id: SU-1.RACK-1
    parent: SVC01
    resource_mgr_id: rm1
    switch_details:
      ip: 10.1.1.1
      ports: 1-24
    bmc_details:
      static_range: 10.3.1.1-10.3.1.24
  rack2:
    location_id: SU-1.RACK-2
    parent: SVC01
    resource_mgr_id: rm2
    switch_details:
      ip: 10.1.1.1
      ports: 25-48
    bmc_details:
      static_range: 10.3.2.1-10.3.2.24
"#;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::with_suffix(".yml").unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn add(registry: &MemoryRegistry, name: &str, last: u8, group: &str) {
    registry
        .upsert(
            NodeIdentity::new(name, MacAddr::new([0xaa, 0, 0, 0, 0, last]), DiscoveryMechanism::Mapping)
                .with_group(group),
        )
        .unwrap();
}

#[test]
fn test_resolve_and_apply_from_file() {
    let file = write_config(ROLES_YAML);
    let config = RolesConfig::from_path(file.path()).unwrap();
    assert!(validate(&config).unwrap().is_empty());

    let registry = MemoryRegistry::new();
    add(&registry, "svc1", 1, "svc");
    add(&registry, "ctl1", 2, "ctl");
    add(&registry, "cn001", 3, "rack1");
    add(&registry, "cn002", 4, "rack2");
    add(&registry, "stray", 5, "lab");

    let nodes = registry.list(&NodeFilter::all());
    let assignment = resolve(&config, &nodes).unwrap();
    assert_eq!(assignment.nodes("slurm_node").len(), 2);
    assert_eq!(assignment.unassigned.len(), 1);
    assert_eq!(assignment.apply(&registry).unwrap(), 4);

    let workers = registry.list(&NodeFilter::all().with_role("slurm_node"));
    let names: Vec<_> = workers.iter().map(|n| n.name().to_string()).collect();
    assert_eq!(names, vec!["cn001", "cn002"]);
}

#[test]
fn test_layer_conflict_blocks_resolution() {
    let broken = ROLES_YAML.replace("groups: [ctl]", "groups: [rack1]");
    let config = RolesConfig::from_yaml_str(&broken).unwrap();
    let err = resolve(&config, &[]).unwrap_err();
    assert!(matches!(err, RolesError::LayerConflict { ref group, .. } if group == "rack1"));
    assert!(err.is_validation());
}

#[test]
fn test_hierarchy_needs_booted_service_node() {
    let config = RolesConfig::from_yaml_str(ROLES_YAML).unwrap();
    let registry = MemoryRegistry::new();
    let id = registry
        .upsert(
            NodeIdentity::new("svc1", MacAddr::new([0xaa, 0, 0, 0, 0, 1]), DiscoveryMechanism::Mapping)
                .with_service_tag("SVC01")
                .with_group("svc"),
        )
        .unwrap()
        .id();
    let nodes = registry.list(&NodeFilter::all());
    resolve(&config, &nodes).unwrap().apply(&registry).unwrap();

    let err = service_node_plan(&config, &registry.list(&NodeFilter::all())).unwrap_err();
    assert!(matches!(err, RolesError::ParentNotReady { .. }));

    let mut node = registry.get(id).unwrap();
    node.status = omnia_registry::NodeStatus::Booted;
    let plans = service_node_plan(&config, &[node]).unwrap();
    assert_eq!(plans["svc1"].child_groups, vec!["rack1", "rack2"]);
}
