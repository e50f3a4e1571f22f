//! Read-only views of the registry for operators.

use std::collections::BTreeMap;
use std::io::Write;
use std::net::Ipv4Addr;

use omnia_registry::{
    BmcMode, CpuVendor, DiscoveryMechanism, GpuVendor, MacAddr, Node, NodeId, NodeStatus,
};
use serde::Serialize;

/// `<nodename>: <status>` for every node, in registry order.
pub fn status_lines(nodes: &[Node]) -> Vec<String> {
    nodes
        .iter()
        .map(|n| format!("{}: {}", n.name(), n.status))
        .collect()
}

/// Number of nodes per status, in lifecycle order, omitting empty statuses.
pub fn status_counts(nodes: &[Node]) -> Vec<(NodeStatus, usize)> {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for node in nodes {
        let rank = NodeStatus::ALL
            .iter()
            .position(|s| *s == node.status)
            .unwrap_or(NodeStatus::ALL.len());
        *counts.entry(rank).or_default() += 1;
    }
    counts
        .into_iter()
        .filter_map(|(rank, n)| NodeStatus::ALL.get(rank).map(|s| (*s, n)))
        .collect()
}

/// One `nodeinfo` row with every column flattened.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeInfoRow {
    /// Registry id.
    pub id: NodeId,
    /// Vendor service tag.
    pub service_tag: Option<String>,
    /// Short node name.
    pub node: String,
    /// Fully qualified hostname.
    pub hostname: String,
    /// PXE interface MAC.
    pub admin_mac: MacAddr,
    /// Admin network address.
    pub admin_ip: Option<Ipv4Addr>,
    /// BMC address.
    pub bmc_ip: Option<Ipv4Addr>,
    /// Current status.
    pub status: NodeStatus,
    /// Mechanism that found the node.
    pub discovery_mechanism: DiscoveryMechanism,
    /// BMC address mode.
    pub bmc_mode: Option<BmcMode>,
    /// Switch address, for switch-based rows.
    pub switch_ip: Option<Ipv4Addr>,
    /// Switch name.
    pub switch_name: Option<String>,
    /// Switch port.
    pub switch_port: Option<u16>,
    /// CPU vendor.
    pub cpu: Option<CpuVendor>,
    /// GPU vendor.
    pub gpu: Option<GpuVendor>,
    /// CPU count.
    pub cpu_count: u32,
    /// GPU count.
    pub gpu_count: u32,
    /// Placement group.
    pub group_name: Option<String>,
    /// Comma-separated roles.
    pub role: Option<String>,
    /// Cluster of the group.
    pub cluster_name: Option<String>,
    /// Service tag of the provisioning service node.
    pub parent: Option<String>,
    /// Physical location.
    pub location_id: Option<String>,
    /// CPU architecture.
    pub architecture: Option<String>,
}

impl From<&Node> for NodeInfoRow {
    fn from(node: &Node) -> Self {
        let identity = &node.identity;
        let placement = &identity.placement;
        Self {
            id: node.id,
            service_tag: identity.service_tag.clone(),
            node: identity.node.clone(),
            hostname: identity.hostname.clone(),
            admin_mac: identity.admin_mac,
            admin_ip: identity.admin_ip,
            bmc_ip: identity.bmc_ip,
            status: node.status,
            discovery_mechanism: identity.mechanism,
            bmc_mode: identity.bmc_mode,
            switch_ip: identity.switch.as_ref().map(|s| s.ip),
            switch_name: identity.switch.as_ref().map(|s| s.name.clone()),
            switch_port: identity.switch.as_ref().map(|s| s.port),
            cpu: node.hardware.cpu,
            gpu: node.hardware.gpu,
            cpu_count: node.hardware.cpu_count,
            gpu_count: node.hardware.gpu_count,
            group_name: placement.group_name.clone(),
            role: node.role.clone(),
            cluster_name: placement.cluster_name.clone(),
            parent: placement.parent.clone(),
            location_id: placement.location_id.clone(),
            architecture: placement.architecture.clone(),
        }
    }
}

/// Writes rows as CSV with a header line.
pub fn write_csv<W: Write>(nodes: &[Node], out: W) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for node in nodes {
        writer.serialize(NodeInfoRow::from(node))?;
    }
    writer.flush()?;
    Ok(())
}

/// Fixed-width table of the most used columns.
pub fn render_table(nodes: &[Node]) -> String {
    let mut out = format!(
        "{:<6} {:<16} {:<18} {:<16} {:<16} {:<14} {:<14} {:<12}\n",
        "ID", "NODE", "ADMIN MAC", "ADMIN IP", "BMC IP", "STATUS", "MECHANISM", "ROLE"
    );
    out.push_str(&"-".repeat(118));
    out.push('\n');
    let dash = || "-".to_string();
    for node in nodes {
        let identity = &node.identity;
        out.push_str(&format!(
            "{:<6} {:<16} {:<18} {:<16} {:<16} {:<14} {:<14} {:<12}\n",
            node.id.to_string(),
            node.name(),
            identity.admin_mac.to_string(),
            identity.admin_ip.map(|ip| ip.to_string()).unwrap_or_else(dash),
            identity.bmc_ip.map(|ip| ip.to_string()).unwrap_or_else(dash),
            node.status.as_str(),
            identity.mechanism.as_str(),
            node.role.clone().unwrap_or_else(dash),
        ));
    }
    out
}
