//! Hierarchical provisioning: groups served by a service node instead of
//! the management node.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use omnia_registry::{Node, NodeStatus};
use serde::Serialize;
use tracing::info;

use crate::config::RolesConfig;
use crate::error::{Result, RolesError};
use crate::validate::SERVICE_NODE_ROLE;

/// A service node and the groups it provisions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServiceNodePlan {
    /// Service node name.
    pub node: String,
    /// Its service tag.
    pub service_tag: String,
    /// Its admin address.
    pub admin_ip: Option<Ipv4Addr>,
    /// Groups it provisions.
    pub child_groups: Vec<String>,
}

/// Maps every group with a `parent` to the service node carrying that
/// service tag, keyed by service node name.
///
/// The parent must already be `booted` and hold the service node role;
/// otherwise the first offending group (in name order) is reported with
/// [`RolesError::ParentNotReady`]. Groups without a parent are served by
/// the management node and do not appear in the result.
pub fn service_node_plan(
    config: &RolesConfig,
    nodes: &[Node],
) -> Result<BTreeMap<String, ServiceNodePlan>> {
    let mut plans: BTreeMap<String, ServiceNodePlan> = BTreeMap::new();
    for (group, def) in &config.groups {
        let Some(parent) = def.parent() else {
            continue;
        };
        let not_ready = |reason: &str| RolesError::ParentNotReady {
            group: group.clone(),
            parent: parent.to_string(),
            reason: reason.to_string(),
        };
        let node = nodes
            .iter()
            .find(|n| n.identity.service_tag.as_deref() == Some(parent))
            .ok_or_else(|| not_ready("no node with this service tag"))?;
        if node.role.as_deref() != Some(SERVICE_NODE_ROLE) {
            return Err(not_ready("node does not hold the service_node role"));
        }
        if node.status != NodeStatus::Booted {
            return Err(not_ready(&format!("node is {}, not booted", node.status)));
        }
        plans
            .entry(node.name().to_string())
            .or_insert_with(|| ServiceNodePlan {
                node: node.name().to_string(),
                service_tag: parent.to_string(),
                admin_ip: node.identity.admin_ip,
                child_groups: Vec::new(),
            })
            .child_groups
            .push(group.clone());
    }
    if !plans.is_empty() {
        info!(service_nodes = plans.len(), "hierarchical provisioning required");
    }
    Ok(plans)
}
