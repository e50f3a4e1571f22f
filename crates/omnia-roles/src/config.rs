//! The roles configuration document: `Roles` referencing `Groups`.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use omnia_registry::Placement;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RolesError};

/// A named function referencing one or more groups.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDef {
    /// Role name.
    pub name: String,
    /// Groups the role applies to.
    #[serde(default)]
    pub groups: Vec<String>,
}

impl RoleDef {
    /// A role over `groups`.
    pub fn new(name: impl Into<String>, groups: &[&str]) -> Self {
        Self {
            name: name.into(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }
}

/// BMC discovery parameters of a group.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BmcDetails {
    /// `start-end` static BMC range.
    #[serde(default)]
    pub static_range: Option<String>,
}

/// Switch discovery parameters of a group.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchDetails {
    /// Switch management address.
    #[serde(default)]
    pub ip: Option<String>,
    /// Port list such as `1-24,30`.
    #[serde(default)]
    pub ports: Option<String>,
}

/// Physical placement and discovery parameters shared by a set of nodes.
///
/// Addresses and port lists are kept as written so validation can report
/// the exact value that failed to parse.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDef {
    /// Physical location.
    #[serde(default)]
    pub location_id: Option<String>,
    /// Service tag of the service node provisioning the group.
    #[serde(default)]
    pub parent: Option<String>,
    /// Cluster the group belongs to.
    #[serde(default)]
    pub cluster_name: Option<String>,
    /// CPU architecture.
    #[serde(default)]
    pub architecture: Option<String>,
    /// BMC discovery parameters.
    #[serde(default)]
    pub bmc_details: Option<BmcDetails>,
    /// Switch discovery parameters.
    #[serde(default)]
    pub switch_details: Option<SwitchDetails>,
    /// Resource manager controller of the group.
    #[serde(default)]
    pub resource_mgr_id: Option<String>,
}

/// Treats blank strings like missing values.
pub(crate) fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl GroupDef {
    /// `parent`, ignoring blanks.
    pub fn parent(&self) -> Option<&str> {
        present(&self.parent)
    }

    /// `cluster_name`, ignoring blanks.
    pub fn cluster_name(&self) -> Option<&str> {
        present(&self.cluster_name)
    }

    /// Static BMC range as written.
    pub fn bmc_static_range(&self) -> Option<&str> {
        self.bmc_details.as_ref().and_then(|b| present(&b.static_range))
    }

    /// Switch address as written.
    pub fn switch_ip(&self) -> Option<&str> {
        self.switch_details.as_ref().and_then(|s| present(&s.ip))
    }

    /// Switch port list as written.
    pub fn switch_ports(&self) -> Option<&str> {
        self.switch_details.as_ref().and_then(|s| present(&s.ports))
    }

    /// `resource_mgr_id`, ignoring blanks.
    pub fn resource_mgr_id(&self) -> Option<&str> {
        present(&self.resource_mgr_id)
    }

    /// Placement columns for nodes of group `name`.
    pub fn placement(&self, name: &str) -> Placement {
        let owned = |v: Option<&str>| v.map(str::to_string);
        Placement {
            group_name: Some(name.to_string()),
            cluster_name: owned(self.cluster_name()),
            parent: owned(self.parent()),
            location_id: owned(present(&self.location_id)),
            architecture: owned(present(&self.architecture)),
        }
    }
}

/// Top-level roles document.
///
/// Groups are kept in a sorted map so validation visits them in a stable
/// order regardless of how the file was written.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolesConfig {
    /// `Roles` list.
    #[serde(rename = "Roles", default)]
    pub roles: Vec<RoleDef>,
    /// `Groups` by name.
    #[serde(rename = "Groups", default)]
    pub groups: BTreeMap<String, GroupDef>,
}

impl RolesConfig {
    /// Loads a document, choosing JSON for `.json` files and YAML otherwise.
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| RolesError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&contents),
            _ => Self::from_yaml_str(&contents),
        }
    }

    /// Parses YAML; an empty document has no roles or groups.
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        // An empty document deserializes to null rather than an empty map.
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Parses JSON.
    pub fn from_json_str(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// The role named `name`.
    pub fn role(&self, name: &str) -> Option<&RoleDef> {
        self.roles.iter().find(|r| r.name == name)
    }

    /// Names of every role referencing `group`, in definition order.
    pub fn roles_of_group(&self, group: &str) -> Vec<&str> {
        self.roles
            .iter()
            .filter(|r| r.groups.iter().any(|g| g == group))
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Group placements for stamping discovered nodes.
    pub fn placements(&self) -> HashMap<String, Placement> {
        self.groups
            .iter()
            .map(|(name, group)| (name.clone(), group.placement(name)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
Roles:
  - name: kube_control_plane
    groups: [grp0]
  - name: kube_node
    groups: [grp1, grp2]
Groups:
  grp0:
    location_id: SU-1.RACK-1
    parent: ""
    cluster_name: k8s1
    architecture: x86_64
    bmc_details:
      static_range: 10.3.0.1-10.3.0.50
  grp1:
    location_id: SU-1.RACK-2
    cluster_name: k8s1
    switch_details:
      ip: 10.1.1.1
      ports: 1-20,25
    bmc_details:
      static_range: 10.3.1.1-10.3.1.50
    resource_mgr_id: rm1
  grp2:
    cluster_name: k8s1
    resource_mgr_id: rm2
"#;

    #[test]
    fn test_parse_yaml_document() {
        let config = RolesConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.roles.len(), 2);
        assert_eq!(config.roles[1].groups, vec!["grp1", "grp2"]);
        let grp1 = &config.groups["grp1"];
        assert_eq!(grp1.switch_ip(), Some("10.1.1.1"));
        assert_eq!(grp1.switch_ports(), Some("1-20,25"));
        assert_eq!(grp1.bmc_static_range(), Some("10.3.1.1-10.3.1.50"));
        assert_eq!(config.groups["grp0"].parent(), None);
    }

    #[test]
    fn test_empty_document_is_empty_config() {
        let config = RolesConfig::from_yaml_str("  \n").unwrap();
        assert!(config.roles.is_empty());
        assert!(config.groups.is_empty());
    }

    #[test]
    fn test_from_path_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        write!(
            file,
            r#"{{"Roles": [{{"name": "login", "groups": ["grp9"]}}], "Groups": {{"grp9": {{"cluster_name": "c"}}}}}}"#
        )
        .unwrap();
        let config = RolesConfig::from_path(file.path()).unwrap();
        assert_eq!(config.role("login").unwrap().groups, vec!["grp9"]);
    }

    #[test]
    fn test_from_path_missing_file() {
        let err = RolesConfig::from_path(Path::new("/nonexistent/roles_config.yml")).unwrap_err();
        assert!(matches!(err, RolesError::Read { .. }));
        assert!(!err.is_validation());
    }

    #[test]
    fn test_placements_skip_blank_fields() {
        let config = RolesConfig::from_yaml_str(SAMPLE).unwrap();
        let placements = config.placements();
        let grp0 = &placements["grp0"];
        assert_eq!(grp0.group_name.as_deref(), Some("grp0"));
        assert_eq!(grp0.parent, None);
        assert_eq!(grp0.location_id.as_deref(), Some("SU-1.RACK-1"));
        assert_eq!(placements["grp2"].architecture, None);
    }

    #[test]
    fn test_roles_of_group() {
        let config = RolesConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.roles_of_group("grp2"), vec!["kube_node"]);
        assert!(config.roles_of_group("grp9").is_empty());
    }
}
