//! Role resolution: which nodes play which role.

use std::collections::{BTreeMap, HashMap};

use omnia_registry::{Node, NodeFilter, NodeId, NodeRegistry};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::RolesConfig;
use crate::error::Result;
use crate::validate::{validate, ValidationWarning};

/// Result of resolving a validated configuration against a node set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RoleAssignment {
    /// Node ids per role, in role definition order of their groups.
    pub by_role: BTreeMap<String, Vec<NodeId>>,
    /// Nodes whose group no role references, or with no group at all.
    pub unassigned: Vec<NodeId>,
    /// Non-fatal findings of validation.
    #[serde(skip)]
    pub warnings: Vec<ValidationWarning>,
    #[serde(skip)]
    role_of: HashMap<NodeId, String>,
}

impl RoleAssignment {
    /// The single role a node resolved to.
    pub fn role_of(&self, node: NodeId) -> Option<&str> {
        self.role_of.get(&node).map(String::as_str)
    }

    /// Nodes resolved to `role`.
    pub fn nodes(&self, role: &str) -> &[NodeId] {
        self.by_role.get(role).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of nodes holding a role.
    pub fn assigned_count(&self) -> usize {
        self.role_of.len()
    }

    /// Writes the resolved roles into the registry, clearing the role of
    /// unassigned nodes. Returns the number of nodes whose role changed.
    pub fn apply(&self, registry: &dyn NodeRegistry) -> Result<usize> {
        let mut changed = 0;
        for node in registry.list(&NodeFilter::all()) {
            let wanted = self.role_of(node.id).map(str::to_string);
            if node.role != wanted
                && (wanted.is_some() || self.unassigned.contains(&node.id))
            {
                registry.set_role(node.id, wanted)?;
                changed += 1;
            }
        }
        info!(changed, "role assignment applied");
        Ok(changed)
    }
}

/// Validates `config`, then assigns each node the role referencing its group.
///
/// Validation guarantees each group backs at most one role, so every node
/// resolves to zero or one role.
pub fn resolve(config: &RolesConfig, nodes: &[Node]) -> Result<RoleAssignment> {
    let warnings = validate(config)?;

    let role_by_group: HashMap<&str, &str> = config
        .roles
        .iter()
        .flat_map(|r| r.groups.iter().map(move |g| (g.as_str(), r.name.as_str())))
        .collect();

    let mut assignment = RoleAssignment {
        warnings,
        ..RoleAssignment::default()
    };
    for role in &config.roles {
        assignment.by_role.entry(role.name.clone()).or_default();
    }
    for node in nodes {
        match node.group().and_then(|g| role_by_group.get(g)) {
            Some(role) => {
                assignment
                    .by_role
                    .entry(role.to_string())
                    .or_default()
                    .push(node.id);
                assignment.role_of.insert(node.id, role.to_string());
            }
            None => {
                debug!(node = %node.id, name = node.name(), "node has no role");
                assignment.unassigned.push(node.id);
            }
        }
    }
    Ok(assignment)
}
