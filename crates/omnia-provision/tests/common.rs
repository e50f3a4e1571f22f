//! Common test utilities and fixtures for integration tests.

use async_trait::async_trait;
use omnia_provision::{ClusterScheduler, ProvisionError, ProvisioningTool, Result};
use omnia_registry::{DiscoveryMechanism, MacAddr, MemoryRegistry, Node, NodeId, NodeIdentity, NodeRegistry};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::Duration;

/// Tool whose behavior is scripted per node name.
#[derive(Default)]
pub struct ScriptedTool {
    pub failing: HashSet<String>,
    pub hanging: HashSet<String>,
    pub booted: Mutex<Vec<String>>,
}

impl ScriptedTool {
    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn hanging(mut self, name: &str) -> Self {
        self.hanging.insert(name.to_string());
        self
    }

    pub fn booted(&self) -> Vec<String> {
        self.booted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProvisioningTool for ScriptedTool {
    async fn request_boot(&self, node: &Node) -> Result<()> {
        if self.hanging.contains(node.name()) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.failing.contains(node.name()) {
            return Err(ProvisionError::Tool {
                node: node.id,
                reason: "PXE boot request rejected".to_string(),
            });
        }
        self.booted.lock().unwrap().push(node.name().to_string());
        Ok(())
    }

    async fn power_off(&self, _node: &Node) -> Result<()> {
        Ok(())
    }
}

/// Scheduler that records deregistered node names.
#[derive(Default)]
pub struct RecordingScheduler {
    pub removed: Mutex<Vec<String>>,
}

#[async_trait]
impl ClusterScheduler for RecordingScheduler {
    async fn deregister(&self, node: &Node) -> Result<()> {
        self.removed.lock().unwrap().push(node.name().to_string());
        Ok(())
    }
}

/// Registers `node<NNN>` with a BMC and an admin IP of `10.5.0.<last>`.
pub fn add_node(registry: &MemoryRegistry, last: u8) -> NodeId {
    let identity = NodeIdentity::new(
        format!("node{:03}", last),
        MacAddr::new([0x52, 0x54, 0, 0, 0, last]),
        DiscoveryMechanism::Bmc,
    )
    .with_bmc_ip(Ipv4Addr::new(10, 3, 0, last))
    .with_admin_ip(Ipv4Addr::new(10, 5, 0, last));
    registry.upsert(identity).unwrap().id()
}
