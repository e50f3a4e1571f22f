//! Common test utilities and fixtures for integration tests.

use async_trait::async_trait;
use omnia_ha::{
    HaActions, HaConfig, HaError, HaPairConfig, LivenessConfig, LivenessProbe, LivenessReport,
    PassiveNodes, Result,
};
use omnia_registry::{
    DiscoveryMechanism, MacAddr, MemoryRegistry, Node, NodeId, NodeIdentity, NodeRegistry,
    Placement,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::Duration;

pub const VIP: Ipv4Addr = Ipv4Addr::new(10, 5, 0, 250);

/// Probe whose answers are set per service tag; unknown tags are unreachable.
/// Queued answers are consumed first, one per check.
#[derive(Default)]
pub struct ScriptedProbe {
    answers: Mutex<HashMap<String, LivenessReport>>,
    queued: Mutex<HashMap<String, VecDeque<LivenessReport>>>,
}

impl ScriptedProbe {
    pub fn queue(&self, tag: &str, reports: &[(bool, bool)]) {
        self.queued.lock().unwrap().entry(tag.to_string()).or_default().extend(
            reports.iter().map(|&(reachable, claims_active)| LivenessReport {
                reachable,
                claims_active,
            }),
        );
    }

    pub fn set(&self, tag: &str, reachable: bool, claims_active: bool) {
        self.answers.lock().unwrap().insert(
            tag.to_string(),
            LivenessReport {
                reachable,
                claims_active,
            },
        );
    }
}

#[async_trait]
impl LivenessProbe for ScriptedProbe {
    async fn check(&self, node: &Node) -> LivenessReport {
        let tag = node.identity.service_tag.clone().unwrap_or_default();
        if let Some(report) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&tag)
            .and_then(VecDeque::pop_front)
        {
            return report;
        }
        self.answers
            .lock()
            .unwrap()
            .get(&tag)
            .copied()
            .unwrap_or_default()
    }
}

/// Records every action as `step:node`; actions named in `hang` never finish.
#[derive(Default)]
pub struct RecordingActions {
    pub log: Mutex<Vec<String>>,
    pub hang: HashSet<&'static str>,
    pub fail: HashSet<&'static str>,
}

impl RecordingActions {
    pub fn hanging(mut self, step: &'static str) -> Self {
        self.hang.insert(step);
        self
    }

    pub fn failing(mut self, step: &'static str) -> Self {
        self.fail.insert(step);
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    async fn record(&self, step: &'static str, entry: String) -> Result<()> {
        if self.hang.contains(step) {
            tokio::time::sleep(Duration::from_secs(86_400)).await;
        }
        if self.fail.contains(step) {
            return Err(HaError::Action {
                pair: "test".to_string(),
                step: step.to_string(),
                service_tag: entry,
                reason: "injected".to_string(),
            });
        }
        self.log.lock().unwrap().push(format!("{}:{}", step, entry));
        Ok(())
    }
}

#[async_trait]
impl HaActions for RecordingActions {
    async fn disable_boot(&self, node: &Node) -> Result<()> {
        self.record("disable-boot", node.name().to_string()).await
    }

    async fn reboot(&self, node: &Node) -> Result<()> {
        self.record("reboot", node.name().to_string()).await
    }

    async fn assign_virtual_ip(&self, node: &Node, vip: Ipv4Addr) -> Result<()> {
        self.record("assign-vip", format!("{}:{}", node.name(), vip)).await
    }
}

pub fn liveness() -> LivenessConfig {
    LivenessConfig {
        interval_ms: 5_000,
        failure_threshold: 3,
        check_timeout_ms: 1_000,
        step_timeout_ms: 30_000,
    }
}

/// One pair: `SVCA` active, `SVCB` passive.
pub fn ha_config() -> HaConfig {
    HaConfig {
        enabled: true,
        liveness: Some(liveness()),
        pairs: vec![HaPairConfig {
            name: "service_node_ha".to_string(),
            virtual_ip: VIP,
            active_node_service_tag: "SVCA".to_string(),
            passive_nodes: vec![PassiveNodes {
                node_service_tags: vec!["SVCB".to_string()],
            }],
        }],
    }
}

pub fn add_member(registry: &MemoryRegistry, name: &str, tag: &str, last: u8) -> NodeId {
    registry
        .upsert(
            NodeIdentity::new(name, MacAddr::new([0x52, 0x54, 0, 0, 1, last]), DiscoveryMechanism::Mapping)
                .with_service_tag(tag)
                .with_admin_ip(Ipv4Addr::new(10, 5, 0, last)),
        )
        .unwrap()
        .id()
}

/// A compute node provisioned through the service node with `parent` tag.
pub fn add_dependent(registry: &MemoryRegistry, name: &str, parent: &str, last: u8) -> NodeId {
    registry
        .upsert(
            NodeIdentity::new(name, MacAddr::new([0x52, 0x54, 0, 0, 2, last]), DiscoveryMechanism::Mapping)
                .with_placement(Placement {
                    group_name: Some("grp1".to_string()),
                    parent: Some(parent.to_string()),
                    ..Placement::default()
                }),
        )
        .unwrap()
        .id()
}
