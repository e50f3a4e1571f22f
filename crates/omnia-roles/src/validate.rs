//! Fail-fast validation of a roles document.
//!
//! Checks run in a fixed order and the first failure is returned, so the
//! same document always produces the same error. Nothing here touches the
//! registry; a run only starts mutating nodes after [`validate`] succeeds.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;

use omnia_registry::{Ipv4Range, PortRanges};
use tracing::{debug, warn};

use crate::config::RolesConfig;
use crate::error::{Result, RolesError};

/// Upper bound on the number of roles in one document.
pub const MAX_ROLES: usize = 100;

/// Role of nodes that provision child groups.
pub const SERVICE_NODE_ROLE: &str = "service_node";
/// Role of management nodes in an HA pair.
pub const OIM_HA_NODE_ROLE: &str = "oim_ha_node";

/// Roles whose groups may not back any other role.
pub const EXCLUSIVE_ROLES: &[&str] = &[SERVICE_NODE_ROLE, OIM_HA_NODE_ROLE];

/// Roles running cluster control and user-facing services.
pub const MANAGEMENT_ROLES: &[&str] = &[
    "service_node",
    "login",
    "auth_server",
    "compiler_node",
    "kube_control_plane",
    "etcd",
    "slurm_control_node",
    "service_kube_control_plane",
    "service_etcd",
    "service_kube_node",
];

/// Roles running user workloads.
pub const COMPUTE_ROLES: &[&str] = &["kube_node", "slurm_node", "default"];

/// Roles whose groups must carry a `resource_mgr_id`.
pub const WORKER_ROLES: &[&str] = &["slurm_node", "kube_node", "service_kube_node"];

/// Roles whose groups must name the cluster they join.
pub const CLUSTER_NAME_ROLES: &[&str] = &[
    "service_kube_control_plane",
    "service_etcd",
    "service_kube_node",
    "kube_control_plane",
    "etcd",
    "kube_node",
];

/// Role sets that must be defined completely or not at all.
pub const ROLE_SETS: &[(&str, &[&str])] = &[
    (
        "service cluster",
        &["service_etcd", "service_kube_control_plane", "service_kube_node"],
    ),
    ("kubernetes cluster", &["etcd", "kube_control_plane", "kube_node"]),
    ("slurm cluster", &["slurm_control_node", "slurm_node"]),
];

/// Non-fatal findings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationWarning {
    /// A group no role references; its nodes will stay unassigned.
    UnusedGroup { group: String },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationWarning::UnusedGroup { group } => {
                write!(f, "group {} is not associated with any role", group)
            }
        }
    }
}

/// Validates the whole document, returning warnings on success.
pub fn validate(config: &RolesConfig) -> Result<Vec<ValidationWarning>> {
    check_structure(config)?;
    check_role_references(config)?;
    check_exclusive_groups(config)?;
    check_layers(config)?;
    check_ambiguous_groups(config)?;
    check_role_sets(config)?;
    check_cluster_names(config)?;
    check_switches(config)?;
    check_bmc_ranges(config)?;
    check_resource_manager_ids(config)?;

    let used: HashSet<&str> = config
        .roles
        .iter()
        .flat_map(|r| r.groups.iter().map(String::as_str))
        .collect();
    let warnings: Vec<_> = config
        .groups
        .keys()
        .filter(|g| !used.contains(g.as_str()))
        .map(|g| ValidationWarning::UnusedGroup { group: g.clone() })
        .collect();
    for warning in &warnings {
        warn!(%warning, "roles configuration warning");
    }
    debug!(
        roles = config.roles.len(),
        groups = config.groups.len(),
        "roles configuration validated"
    );
    Ok(warnings)
}

fn check_structure(config: &RolesConfig) -> Result<()> {
    if config.roles.is_empty() {
        return Err(RolesError::NoRoles);
    }
    if config.groups.is_empty() {
        return Err(RolesError::NoGroups);
    }
    if config.roles.len() > MAX_ROLES {
        return Err(RolesError::TooManyRoles {
            count: config.roles.len(),
            limit: MAX_ROLES,
        });
    }
    let mut seen = HashSet::new();
    for role in &config.roles {
        if !seen.insert(role.name.as_str()) {
            return Err(RolesError::DuplicateRole {
                role: role.name.clone(),
            });
        }
    }
    Ok(())
}

fn check_role_references(config: &RolesConfig) -> Result<()> {
    for role in &config.roles {
        if role.groups.iter().all(|g| g.trim().is_empty()) {
            return Err(RolesError::EmptyRole {
                role: role.name.clone(),
            });
        }
        for group in &role.groups {
            if config.groups.contains_key(group) {
                continue;
            }
            if config.role(group).is_some() {
                return Err(RolesError::NestedRole {
                    role: role.name.clone(),
                    nested: group.clone(),
                });
            }
            return Err(RolesError::UndefinedGroup {
                role: role.name.clone(),
                group: group.clone(),
            });
        }
    }
    Ok(())
}

fn check_exclusive_groups(config: &RolesConfig) -> Result<()> {
    for exclusive in EXCLUSIVE_ROLES {
        let Some(role) = config.role(exclusive) else {
            continue;
        };
        for group in &role.groups {
            if let Some(other) = config
                .roles_of_group(group)
                .into_iter()
                .find(|r| r != exclusive)
            {
                return Err(RolesError::ExclusiveGroup {
                    group: group.clone(),
                    exclusive_role: exclusive.to_string(),
                    other_role: other.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn check_layers(config: &RolesConfig) -> Result<()> {
    // group -> (management roles, compute roles)
    let mut layers: BTreeMap<&str, (Vec<&str>, Vec<&str>)> = BTreeMap::new();
    for role in &config.roles {
        let name = role.name.as_str();
        let management = MANAGEMENT_ROLES.contains(&name);
        if !management && !COMPUTE_ROLES.contains(&name) {
            continue;
        }
        for group in &role.groups {
            let entry = layers.entry(group.as_str()).or_default();
            if management {
                entry.0.push(name);
            } else {
                entry.1.push(name);
            }
        }
    }
    for (group, (mut management, mut compute)) in layers {
        if !management.is_empty() && !compute.is_empty() {
            management.sort_unstable();
            compute.sort_unstable();
            return Err(RolesError::LayerConflict {
                group: group.to_string(),
                management: management.join(", "),
                compute: compute.join(", "),
            });
        }
    }
    Ok(())
}

fn check_ambiguous_groups(config: &RolesConfig) -> Result<()> {
    for group in config.groups.keys() {
        let roles = config.roles_of_group(group);
        if roles.len() > 1 {
            return Err(RolesError::AmbiguousRoleAssignment {
                group: group.clone(),
                roles: roles.into_iter().map(str::to_string).collect(),
            });
        }
    }
    Ok(())
}

fn check_role_sets(config: &RolesConfig) -> Result<()> {
    for (set, members) in ROLE_SETS {
        let missing: Vec<&str> = members
            .iter()
            .copied()
            .filter(|m| config.role(m).is_none())
            .collect();
        if !missing.is_empty() && missing.len() < members.len() {
            return Err(RolesError::IncompleteRoleSet {
                set: set.to_string(),
                missing: missing.join(", "),
            });
        }
    }
    Ok(())
}

fn check_cluster_names(config: &RolesConfig) -> Result<()> {
    for role in &config.roles {
        if !CLUSTER_NAME_ROLES.contains(&role.name.as_str()) {
            continue;
        }
        for group in &role.groups {
            let named = config
                .groups
                .get(group)
                .and_then(|g| g.cluster_name())
                .is_some();
            if !named {
                return Err(RolesError::MissingClusterName {
                    group: group.clone(),
                    role: role.name.clone(),
                });
            }
        }
    }
    Ok(())
}

fn check_switches(config: &RolesConfig) -> Result<()> {
    // switch ip -> groups already claiming ports on it
    let mut claimed: BTreeMap<Ipv4Addr, Vec<(&str, PortRanges)>> = BTreeMap::new();
    for (name, group) in &config.groups {
        let (ip, ports) = match (group.switch_ip(), group.switch_ports()) {
            (None, None) => continue,
            (Some(ip), Some(ports)) => (ip, ports),
            _ => {
                return Err(RolesError::SwitchIncomplete {
                    group: name.clone(),
                })
            }
        };
        let switch: Ipv4Addr = ip.parse().map_err(|_| RolesError::InvalidSwitch {
            group: name.clone(),
            reason: format!("switch ip {:?} is not an IPv4 address", ip),
        })?;
        let ports: PortRanges = ports.parse().map_err(|e| RolesError::InvalidSwitch {
            group: name.clone(),
            reason: format!("{}", e),
        })?;
        if ports.has_internal_overlap() {
            return Err(RolesError::InvalidSwitch {
                group: name.clone(),
                reason: format!("port ranges {} overlap each other", ports),
            });
        }
        if group.bmc_static_range().is_none() {
            return Err(RolesError::SwitchWithoutBmcRange {
                group: name.clone(),
            });
        }
        let others = claimed.entry(switch).or_default();
        if let Some((other, _)) = others.iter().find(|(_, p)| p.overlaps(&ports)) {
            return Err(RolesError::SwitchPortOverlap {
                group: name.clone(),
                other: other.to_string(),
                switch: switch.to_string(),
            });
        }
        others.push((name.as_str(), ports));
    }
    Ok(())
}

fn check_bmc_ranges(config: &RolesConfig) -> Result<()> {
    let mut seen: Vec<(&str, Ipv4Range)> = Vec::new();
    for (name, group) in &config.groups {
        let Some(raw) = group.bmc_static_range() else {
            continue;
        };
        let range: Ipv4Range = raw.parse().map_err(|e| RolesError::InvalidBmcRange {
            group: name.clone(),
            range: raw.to_string(),
            reason: format!("{}", e),
        })?;
        if let Some((other, _)) = seen.iter().find(|(_, r)| r.overlaps(&range)) {
            return Err(RolesError::BmcRangeOverlap {
                group: name.clone(),
                other: other.to_string(),
            });
        }
        seen.push((name.as_str(), range));
    }
    Ok(())
}

fn check_resource_manager_ids(config: &RolesConfig) -> Result<()> {
    let workers: HashSet<&str> = config
        .roles
        .iter()
        .filter(|r| WORKER_ROLES.contains(&r.name.as_str()))
        .flat_map(|r| r.groups.iter().map(String::as_str))
        .collect();
    for (name, group) in &config.groups {
        match (workers.contains(name.as_str()), group.resource_mgr_id()) {
            (true, None) => {
                return Err(RolesError::ResourceManagerId {
                    group: name.clone(),
                    reason: "required for worker groups".to_string(),
                })
            }
            (false, Some(_)) => {
                return Err(RolesError::ResourceManagerId {
                    group: name.clone(),
                    reason: "only worker groups may set it".to_string(),
                })
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BmcDetails, GroupDef, RoleDef, SwitchDetails};

    fn group() -> GroupDef {
        GroupDef {
            cluster_name: Some("c1".to_string()),
            ..GroupDef::default()
        }
    }

    fn worker_group() -> GroupDef {
        GroupDef {
            resource_mgr_id: Some("rm".to_string()),
            ..group()
        }
    }

    fn config(roles: Vec<RoleDef>, groups: Vec<(&str, GroupDef)>) -> RolesConfig {
        RolesConfig {
            roles,
            groups: groups
                .into_iter()
                .map(|(n, g)| (n.to_string(), g))
                .collect(),
        }
    }

    fn switch(ip: &str, ports: &str, bmc: &str) -> GroupDef {
        GroupDef {
            switch_details: Some(SwitchDetails {
                ip: Some(ip.to_string()),
                ports: Some(ports.to_string()),
            }),
            bmc_details: Some(BmcDetails {
                static_range: Some(bmc.to_string()),
            }),
            ..group()
        }
    }

    #[test]
    fn test_valid_config_reports_unused_groups() {
        let cfg = config(
            vec![RoleDef::new("login", &["grp0"])],
            vec![("grp0", group()), ("spare", group())],
        );
        let warnings = validate(&cfg).unwrap();
        assert_eq!(
            warnings,
            vec![ValidationWarning::UnusedGroup {
                group: "spare".to_string()
            }]
        );
    }

    #[test]
    fn test_empty_sections() {
        assert!(matches!(
            validate(&RolesConfig::default()),
            Err(RolesError::NoRoles)
        ));
        let cfg = config(vec![RoleDef::new("login", &["grp0"])], vec![]);
        assert!(matches!(validate(&cfg), Err(RolesError::NoGroups)));
    }

    #[test]
    fn test_too_many_roles() {
        let roles = (0..=MAX_ROLES)
            .map(|i| RoleDef::new(format!("r{}", i), &["grp0"]))
            .collect();
        let cfg = config(roles, vec![("grp0", group())]);
        assert!(matches!(
            validate(&cfg),
            Err(RolesError::TooManyRoles { count: 101, limit: 100 })
        ));
    }

    #[test]
    fn test_duplicate_role_name() {
        let cfg = config(
            vec![RoleDef::new("login", &["a"]), RoleDef::new("login", &["b"])],
            vec![("a", group()), ("b", group())],
        );
        assert!(matches!(validate(&cfg), Err(RolesError::DuplicateRole { role }) if role == "login"));
    }

    #[test]
    fn test_nested_and_undefined_references() {
        let cfg = config(
            vec![
                RoleDef::new("login", &["a"]),
                RoleDef::new("compiler_node", &["login"]),
            ],
            vec![("a", group())],
        );
        assert!(matches!(
            validate(&cfg),
            Err(RolesError::NestedRole { role, nested }) if role == "compiler_node" && nested == "login"
        ));

        let cfg = config(vec![RoleDef::new("login", &["ghost"])], vec![("a", group())]);
        assert!(matches!(
            validate(&cfg),
            Err(RolesError::UndefinedGroup { group, .. }) if group == "ghost"
        ));

        let cfg = config(vec![RoleDef::new("login", &[])], vec![("a", group())]);
        assert!(matches!(validate(&cfg), Err(RolesError::EmptyRole { .. })));
    }

    #[test]
    fn test_exclusive_group_beats_layer_check() {
        let cfg = config(
            vec![
                RoleDef::new("service_node", &["svc"]),
                RoleDef::new("slurm_node", &["svc"]),
            ],
            vec![("svc", worker_group())],
        );
        assert!(matches!(
            validate(&cfg),
            Err(RolesError::ExclusiveGroup { exclusive_role, other_role, .. })
                if exclusive_role == "service_node" && other_role == "slurm_node"
        ));
    }

    #[test]
    fn test_layer_conflict() {
        let cfg = config(
            vec![
                RoleDef::new("login", &["mixed"]),
                RoleDef::new("slurm_node", &["mixed"]),
            ],
            vec![("mixed", worker_group())],
        );
        assert!(matches!(
            validate(&cfg),
            Err(RolesError::LayerConflict { group, management, compute })
                if group == "mixed" && management == "login" && compute == "slurm_node"
        ));
    }

    #[test]
    fn test_same_layer_shared_group_is_ambiguous() {
        let cfg = config(
            vec![
                RoleDef::new("login", &["front"]),
                RoleDef::new("compiler_node", &["front"]),
            ],
            vec![("front", group())],
        );
        match validate(&cfg) {
            Err(RolesError::AmbiguousRoleAssignment { group, roles }) => {
                assert_eq!(group, "front");
                assert_eq!(roles, vec!["login", "compiler_node"]);
            }
            other => panic!("expected ambiguity, got {:?}", other),
        }
    }

    #[test]
    fn test_incomplete_role_set() {
        let cfg = config(
            vec![RoleDef::new("slurm_control_node", &["ctl"])],
            vec![("ctl", group())],
        );
        assert!(matches!(
            validate(&cfg),
            Err(RolesError::IncompleteRoleSet { missing, .. }) if missing == "slurm_node"
        ));
    }

    #[test]
    fn test_kubernetes_roles_need_cluster_name() {
        let cfg = config(
            vec![
                RoleDef::new("kube_control_plane", &["kcp"]),
                RoleDef::new("etcd", &["etcd"]),
                RoleDef::new("kube_node", &["kn"]),
            ],
            vec![
                ("kcp", group()),
                ("etcd", GroupDef::default()),
                ("kn", worker_group()),
            ],
        );
        assert!(matches!(
            validate(&cfg),
            Err(RolesError::MissingClusterName { group, role }) if group == "etcd" && role == "etcd"
        ));
    }

    #[test]
    fn test_switch_checks() {
        let mut incomplete = switch("10.1.1.1", "1-4", "10.3.0.1-10.3.0.9");
        incomplete.switch_details.as_mut().unwrap().ports = None;
        let cfg = config(vec![RoleDef::new("login", &["a"])], vec![("a", incomplete)]);
        assert!(matches!(validate(&cfg), Err(RolesError::SwitchIncomplete { .. })));

        let cfg = config(
            vec![RoleDef::new("login", &["a"])],
            vec![("a", switch("10.1.1.1", "9-2", "10.3.0.1-10.3.0.9"))],
        );
        assert!(matches!(validate(&cfg), Err(RolesError::InvalidSwitch { .. })));

        let mut no_bmc = switch("10.1.1.1", "1-4", "x");
        no_bmc.bmc_details = None;
        let cfg = config(vec![RoleDef::new("login", &["a"])], vec![("a", no_bmc)]);
        assert!(matches!(validate(&cfg), Err(RolesError::SwitchWithoutBmcRange { .. })));

        let cfg = config(
            vec![
                RoleDef::new("login", &["a"]),
                RoleDef::new("compiler_node", &["b"]),
            ],
            vec![
                ("a", switch("10.1.1.1", "1-10", "10.3.0.1-10.3.0.9")),
                ("b", switch("10.1.1.1", "10-20", "10.3.1.1-10.3.1.9")),
            ],
        );
        assert!(matches!(
            validate(&cfg),
            Err(RolesError::SwitchPortOverlap { group, other, .. }) if group == "b" && other == "a"
        ));
    }

    #[test]
    fn test_same_ports_on_different_switches_are_fine() {
        let cfg = config(
            vec![
                RoleDef::new("login", &["a"]),
                RoleDef::new("compiler_node", &["b"]),
            ],
            vec![
                ("a", switch("10.1.1.1", "1-10", "10.3.0.1-10.3.0.9")),
                ("b", switch("10.1.1.2", "1-10", "10.3.1.1-10.3.1.9")),
            ],
        );
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn test_bmc_range_checks() {
        let cfg = config(
            vec![
                RoleDef::new("login", &["a"]),
                RoleDef::new("compiler_node", &["b"]),
            ],
            vec![
                ("a", switch("10.1.1.1", "1-10", "10.3.0.1-10.3.0.100")),
                ("b", switch("10.1.1.1", "11-20", "10.3.0.50-10.3.0.60")),
            ],
        );
        assert!(matches!(
            validate(&cfg),
            Err(RolesError::BmcRangeOverlap { group, other }) if group == "b" && other == "a"
        ));

        let mut bad = group();
        bad.bmc_details = Some(BmcDetails {
            static_range: Some("10.3.0.9-10.3.0.1".to_string()),
        });
        let cfg = config(vec![RoleDef::new("login", &["a"])], vec![("a", bad)]);
        assert!(matches!(validate(&cfg), Err(RolesError::InvalidBmcRange { .. })));
    }

    #[test]
    fn test_resource_manager_id_rules() {
        let cfg = config(
            vec![
                RoleDef::new("slurm_control_node", &["ctl"]),
                RoleDef::new("slurm_node", &["work"]),
            ],
            vec![("ctl", group()), ("work", group())],
        );
        assert!(matches!(
            validate(&cfg),
            Err(RolesError::ResourceManagerId { group, .. }) if group == "work"
        ));

        let cfg = config(
            vec![
                RoleDef::new("slurm_control_node", &["ctl"]),
                RoleDef::new("slurm_node", &["work"]),
            ],
            vec![("ctl", worker_group()), ("work", worker_group())],
        );
        assert!(matches!(
            validate(&cfg),
            Err(RolesError::ResourceManagerId { group, .. }) if group == "ctl"
        ));
    }
}
