//! Ansible inventory files derived from the registry.
//!
//! Nodes holding a hostname and a role are listed under one `[role]` section
//! per role in `cluster_layout`, or in `<cluster>_cluster_layout` when their
//! group belongs to a named cluster. `cluster_layout` is always produced.
//! Hardware facts additionally populate the `compute_cpu_*`, `compute_gpu_*`
//! and `compute_hostname_ip` files.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::types::{CpuVendor, GpuVendor, Node};

/// First line of every generated file.
pub const INVENTORY_HEADER: &str = "# This file is generated by omnia, and should not be edited";

/// Default cluster layout file name.
pub const CLUSTER_LAYOUT: &str = "cluster_layout";

const SERVICE_PREFIXED: [&str; 3] = ["service_etcd", "service_kube_node", "service_kube_control_plane"];

/// Rendered inventory files, keyed by file name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Inventory {
    files: BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,
}

impl Inventory {
    /// Builds the inventory for `nodes`.
    pub fn from_nodes<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> Self {
        let mut inventory = Inventory::default();
        inventory.files.entry(CLUSTER_LAYOUT.to_string()).or_default();

        for node in nodes {
            let hostname = node.identity.hostname.trim();
            if hostname.is_empty() {
                continue;
            }
            if let Some(roles) = node.role.as_deref() {
                let file = layout_file_name(node.identity.placement.cluster_name.as_deref());
                for role in roles.split(',').map(str::trim) {
                    if role.is_empty() || role == "default" {
                        continue;
                    }
                    inventory.add(&file, inventory_role(role), hostname.to_string());
                }
            }
            inventory.add_hardware(node, hostname);
        }
        inventory
    }

    fn add(&mut self, file: &str, section: &str, entry: String) {
        self.files
            .entry(file.to_string())
            .or_default()
            .entry(section.to_string())
            .or_default()
            .insert(entry);
    }

    fn add_hardware(&mut self, node: &Node, hostname: &str) {
        let cpu_file = match node.hardware.cpu {
            Some(CpuVendor::Intel) => Some("compute_cpu_intel"),
            Some(CpuVendor::Amd) => Some("compute_cpu_amd"),
            None => None,
        };
        if let Some(file) = cpu_file {
            self.add(file, file, hostname.to_string());
            if let Some(ip) = node.identity.admin_ip {
                self.add(
                    "compute_hostname_ip",
                    "compute_hostname_ip",
                    format!("{} ansible_host={}", hostname, ip),
                );
            }
        }
        let gpu_file = match node.hardware.gpu {
            Some(GpuVendor::Nvidia) => Some("compute_gpu_nvidia"),
            Some(GpuVendor::Amd) => Some("compute_gpu_amd"),
            Some(GpuVendor::Intel) => Some("compute_gpu_intel"),
            None => None,
        };
        if let Some(file) = gpu_file {
            self.add(file, file, hostname.to_string());
        }
    }

    /// File names in sorted order.
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Hosts listed under `section` of `file`.
    pub fn hosts(&self, file: &str, section: &str) -> Vec<&str> {
        self.files
            .get(file)
            .and_then(|sections| sections.get(section))
            .map(|hosts| hosts.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// INI text of one file, or `None` if it is not part of the inventory.
    pub fn render(&self, file: &str) -> Option<String> {
        let sections = self.files.get(file)?;
        let mut out = String::new();
        out.push_str(INVENTORY_HEADER);
        out.push('\n');
        for (section, hosts) in sections {
            out.push_str(&format!("[{}]\n", section));
            for host in hosts {
                out.push_str(host);
                out.push('\n');
            }
            out.push('\n');
        }
        Some(out)
    }

    /// Writes every file into `dir` and marks them read-only.
    pub fn write_to(&self, dir: &Path) -> std::io::Result<Vec<String>> {
        fs::create_dir_all(dir)?;
        let mut written = Vec::new();
        for name in self.files.keys() {
            let path = dir.join(name);
            if let Ok(meta) = fs::metadata(&path) {
                let mut perms = meta.permissions();
                #[allow(clippy::permissions_set_readonly_false)]
                perms.set_readonly(false);
                fs::set_permissions(&path, perms)?;
            }
            let text = self.render(name).unwrap_or_default();
            fs::write(&path, text)?;
            let mut perms = fs::metadata(&path)?.permissions();
            perms.set_readonly(true);
            fs::set_permissions(&path, perms)?;
            debug!(file = %path.display(), "inventory file written");
            written.push(name.clone());
        }
        Ok(written)
    }
}

/// `cluster_layout` or `<cluster>_cluster_layout`.
pub fn layout_file_name(cluster: Option<&str>) -> String {
    match cluster.map(str::trim).filter(|c| !c.is_empty()) {
        Some(cluster) => format!("{}_{}", cluster, CLUSTER_LAYOUT),
        None => CLUSTER_LAYOUT.to_string(),
    }
}

/// Inventory section name for a role.
pub fn inventory_role(role: &str) -> &str {
    if SERVICE_PREFIXED.contains(&role) {
        &role["service_".len()..]
    } else {
        role
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::MacAddr;
    use crate::types::{DiscoveryMechanism, HardwareFacts, NodeId, NodeIdentity, NodeStatus};
    use chrono::Utc;
    use std::net::Ipv4Addr;
    use tempfile::TempDir;

    fn node(id: u64, host: &str, role: Option<&str>, cluster: Option<&str>) -> Node {
        let mac = MacAddr::new([0, 0, 0, 0, 0, id as u8]);
        let mut identity = NodeIdentity::new(format!("node{}", id), mac, DiscoveryMechanism::Bmc)
            .with_hostname(host)
            .with_admin_ip(Ipv4Addr::new(10, 5, 0, id as u8));
        identity.placement.cluster_name = cluster.map(str::to_string);
        let mut n = Node::new(NodeId::new(id), identity, NodeStatus::Booted, Utc::now());
        n.role = role.map(str::to_string);
        n
    }

    #[test]
    fn test_roles_grouped_by_cluster() {
        let nodes = vec![
            node(1, "login1.omnia.test", Some("login"), None),
            node(2, "kcp.omnia.test", Some("service_kube_control_plane,default"), Some("svc")),
            node(3, "c1.omnia.test", Some("slurm_node"), None),
            node(4, "orphan.omnia.test", None, None),
        ];
        let inv = Inventory::from_nodes(&nodes);
        assert_eq!(
            inv.file_names().collect::<Vec<_>>(),
            vec!["cluster_layout", "svc_cluster_layout"]
        );
        assert_eq!(inv.hosts("cluster_layout", "login"), vec!["login1.omnia.test"]);
        assert_eq!(
            inv.hosts("svc_cluster_layout", "kube_control_plane"),
            vec!["kcp.omnia.test"]
        );
        assert!(inv.hosts("svc_cluster_layout", "default").is_empty());
    }

    #[test]
    fn test_render_has_header_and_sections() {
        let nodes = vec![node(1, "c1", Some("slurm_node"), None)];
        let text = Inventory::from_nodes(&nodes).render("cluster_layout").unwrap();
        assert!(text.starts_with(INVENTORY_HEADER));
        assert!(text.contains("[slurm_node]\nc1\n"));
    }

    #[test]
    fn test_hardware_inventories() {
        let mut n = node(1, "c1", None, None);
        n.hardware = HardwareFacts {
            cpu: Some(CpuVendor::Amd),
            gpu: Some(GpuVendor::Nvidia),
            cpu_count: 2,
            gpu_count: 8,
        };
        let inv = Inventory::from_nodes([&n]);
        assert_eq!(inv.hosts("compute_cpu_amd", "compute_cpu_amd"), vec!["c1"]);
        assert_eq!(inv.hosts("compute_gpu_nvidia", "compute_gpu_nvidia"), vec!["c1"]);
        assert_eq!(
            inv.hosts("compute_hostname_ip", "compute_hostname_ip"),
            vec!["c1 ansible_host=10.5.0.1"]
        );
    }

    #[test]
    fn test_write_to_overwrites_read_only_files() {
        let dir = TempDir::new().unwrap();
        let nodes = vec![node(1, "c1", Some("login"), None)];
        let inv = Inventory::from_nodes(&nodes);
        inv.write_to(dir.path()).unwrap();
        let written = inv.write_to(dir.path()).unwrap();
        assert_eq!(written, vec!["cluster_layout".to_string()]);
        let text = std::fs::read_to_string(dir.path().join("cluster_layout")).unwrap();
        assert!(text.contains("[login]"));
    }
}
