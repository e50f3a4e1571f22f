//! Drives registry nodes through the provisioning state machine.
//!
//! All status writes for one node go through that node's async mutex, so boot
//! events, provisioning requests, stuck sweeps and removal never interleave
//! for the same node. Different nodes proceed concurrently.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use omnia_registry::{Ipv4Range, Node, NodeFilter, NodeId, NodeRegistry, NodeStatus};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ProvisionError, Result};
use crate::ledger::RangeLedger;
use crate::state::{
    can_reprovision, can_transition, is_stuck_candidate, reprovision_target, BootEvent,
};

/// The external provisioning tool (PXE/BMC power control).
#[async_trait]
pub trait ProvisioningTool: Send + Sync {
    /// Asks for a network boot of `node`. Completion is reported later
    /// through boot events.
    async fn request_boot(&self, node: &Node) -> Result<()>;

    /// Powers `node` off through its BMC.
    async fn power_off(&self, node: &Node) -> Result<()>;
}

/// The workload manager that must forget removed nodes.
#[async_trait]
pub trait ClusterScheduler: Send + Sync {
    /// Drops `node` from the scheduler's configuration.
    async fn deregister(&self, node: &Node) -> Result<()>;
}

async fn bounded<T>(
    after: Duration,
    node: NodeId,
    operation: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(node = %node, operation, ?after, "external call timed out");
            Err(ProvisionError::Timeout {
                node,
                operation: operation.to_string(),
                after,
            })
        }
    }
}

/// Removes a node from the scheduler and then from the registry.
///
/// The row is checked for removability first and deleted only after the
/// scheduler confirms, so a scheduler failure leaves the row in place and
/// the call can be retried. Callers that share the registry with a
/// [`Provisioner`] should go through [`Provisioner::remove_node`], which
/// also holds the node lock.
pub async fn deregister_and_remove(
    registry: &dyn NodeRegistry,
    scheduler: Option<&dyn ClusterScheduler>,
    id: NodeId,
    timeout: Duration,
) -> Result<Node> {
    let node = registry.check_removable(id)?;
    if let Some(scheduler) = scheduler {
        bounded(timeout, id, "deregister", scheduler.deregister(&node)).await?;
        info!(node = %id, name = %node.name(), "node deregistered from scheduler");
    }
    let node = registry.remove(id)?;
    info!(node = %id, name = %node.name(), "node removed from registry");
    Ok(node)
}

/// Timeouts used by the provisioner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// Bound on every call into the provisioning tool or scheduler.
    pub tool_timeout: Duration,
    /// A node in powering-on, bmc-ready or installing longer than this is flagged.
    pub stuck_after: Duration,
    /// Registry polling period of `await_status`.
    pub poll_interval: Duration,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            tool_timeout: Duration::from_secs(120),
            stuck_after: Duration::from_secs(3600),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// A node flagged by the stuck sweep. Flagging never changes its status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StuckNode {
    /// Registry id.
    pub id: NodeId,
    /// Hostname at flag time.
    pub name: String,
    /// The in-progress status it has not left.
    pub status: NodeStatus,
    /// When it entered that status.
    pub since: DateTime<Utc>,
    /// When the sweep flagged it.
    pub flagged_at: DateTime<Utc>,
}

/// Serializes status changes per node and talks to the provisioning tool.
pub struct Provisioner {
    registry: Arc<dyn NodeRegistry>,
    tool: Arc<dyn ProvisioningTool>,
    scheduler: Option<Arc<dyn ClusterScheduler>>,
    config: ProvisionConfig,
    locks: DashMap<NodeId, Arc<Mutex<()>>>,
    stuck: DashMap<NodeId, StuckNode>,
    ledger: StdMutex<RangeLedger>,
}

impl Provisioner {
    /// A provisioner with no scheduler and an empty range ledger.
    pub fn new(
        registry: Arc<dyn NodeRegistry>,
        tool: Arc<dyn ProvisioningTool>,
        config: ProvisionConfig,
    ) -> Self {
        Self {
            registry,
            tool,
            scheduler: None,
            config,
            locks: DashMap::new(),
            stuck: DashMap::new(),
            ledger: StdMutex::new(RangeLedger::new()),
        }
    }

    /// Deregisters removed nodes from `scheduler`.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn ClusterScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Starts from a previously saved range ledger.
    pub fn with_ledger(mut self, ledger: RangeLedger) -> Self {
        self.ledger = StdMutex::new(ledger);
        self
    }

    /// The timeouts in use.
    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    fn node_lock(&self, id: NodeId) -> Arc<Mutex<()>> {
        self.locks.entry(id).or_default().clone()
    }

    async fn bounded<T>(
        &self,
        node: NodeId,
        operation: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        bounded(self.config.tool_timeout, node, operation, fut).await
    }

    /// Writes `to` if it is an edge from the node's current status.
    /// Caller holds the node lock.
    fn transition_locked(&self, node: &Node, to: NodeStatus) -> Result<()> {
        if !can_transition(node.status, to) {
            return Err(ProvisionError::InvalidTransition {
                node: node.id,
                from: node.status,
                to,
            });
        }
        self.registry.set_status(node.id, to)?;
        debug!(node = %node.id, from = %node.status, %to, "transition");
        Ok(())
    }

    /// Calls the tool's boot request; a tool error fails the node.
    /// Caller holds the node lock and has set `powering-on`.
    async fn boot_locked(&self, node: &Node) -> Result<()> {
        match self
            .bounded(node.id, "request_boot", self.tool.request_boot(node))
            .await
        {
            Ok(()) => Ok(()),
            Err(e @ ProvisionError::Timeout { .. }) => Err(e),
            Err(e) => {
                error!(node = %node.id, name = %node.name(), error = %e, "boot request failed");
                self.registry.set_status(node.id, NodeStatus::Failed)?;
                Err(e)
            }
        }
    }

    /// Moves a node through an explicit transition.
    pub async fn transition(&self, id: NodeId, to: NodeStatus) -> Result<()> {
        let lock = self.node_lock(id);
        let _guard = lock.lock().await;
        let node = self.registry.get(id)?;
        self.transition_locked(&node, to)
    }

    /// Starts provisioning: powers the node on through its BMC. Nodes without
    /// a BMC stay `standing-by` until booted by hand.
    pub async fn provision(&self, id: NodeId) -> Result<NodeStatus> {
        let lock = self.node_lock(id);
        let _guard = lock.lock().await;
        let node = self.registry.get(id)?;

        if node.identity.needs_manual_boot() && node.status == NodeStatus::StandingBy {
            info!(node = %id, name = %node.name(), "no BMC, waiting for manual PXE boot");
            return Ok(NodeStatus::StandingBy);
        }

        self.transition_locked(&node, NodeStatus::PoweringOn)?;
        self.boot_locked(&node).await?;
        info!(node = %id, name = %node.name(), "boot requested");
        Ok(NodeStatus::PoweringOn)
    }

    /// Provisions every node concurrently. A failure of one node is reported
    /// in its slot and never stops the others.
    pub async fn provision_all(&self, ids: &[NodeId]) -> Vec<(NodeId, Result<NodeStatus>)> {
        let results = futures::future::join_all(
            ids.iter()
                .map(|&id| async move { (id, self.provision(id).await) }),
        )
        .await;
        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        for (id, result) in &results {
            if let Err(e) = result {
                warn!(node = %id, error = %e, "provisioning failed for node");
            }
        }
        info!(nodes = ids.len(), failed, "provisioning batch submitted");
        results
    }

    /// Applies an external signal. Repeating the signal that produced the
    /// current status is a no-op.
    pub async fn on_boot_event(&self, id: NodeId, event: BootEvent) -> Result<NodeStatus> {
        let lock = self.node_lock(id);
        let _guard = lock.lock().await;
        let node = self.registry.get(id)?;
        let target = event.target_status();

        if node.status == target {
            debug!(node = %id, status = %target, "duplicate boot event ignored");
            return Ok(target);
        }
        if !can_transition(node.status, target) {
            warn!(node = %id, from = %node.status, to = %target, ?event, "boot event rejected");
            return Err(ProvisionError::InvalidTransition {
                node: id,
                from: node.status,
                to: target,
            });
        }

        match &event {
            BootEvent::PxeBoot {
                hardware: Some(facts),
            } => {
                self.registry.update_hardware(id, facts.clone())?;
            }
            BootEvent::Failure { reason } => {
                error!(node = %id, name = %node.name(), %reason, "node reported failure");
            }
            _ => {}
        }

        self.registry.set_status(id, target)?;
        self.stuck.remove(&id);
        debug!(node = %id, from = %node.status, to = %target, "boot event applied");
        Ok(target)
    }

    /// Re-provisions a node that finished or failed a previous run.
    pub async fn reprovision(&self, id: NodeId) -> Result<NodeStatus> {
        let lock = self.node_lock(id);
        let _guard = lock.lock().await;
        let node = self.registry.get(id)?;
        let target = reprovision_target(!node.identity.needs_manual_boot());

        if !can_reprovision(node.status) {
            return Err(ProvisionError::InvalidTransition {
                node: id,
                from: node.status,
                to: target,
            });
        }

        self.registry.set_status(id, target)?;
        self.stuck.remove(&id);
        info!(node = %id, name = %node.name(), from = %node.status, to = %target, "re-provision requested");
        if target == NodeStatus::PoweringOn {
            self.boot_locked(&node).await?;
        }
        Ok(target)
    }

    /// Powers a running node off.
    pub async fn power_off(&self, id: NodeId) -> Result<()> {
        let lock = self.node_lock(id);
        let _guard = lock.lock().await;
        let node = self.registry.get(id)?;
        self.transition_locked(&node, NodeStatus::PoweringOff)?;
        self.bounded(id, "power_off", self.tool.power_off(&node))
            .await
    }

    /// Waits until the node reaches `want`, polling the registry.
    pub async fn await_status(
        &self,
        id: NodeId,
        want: NodeStatus,
        timeout: Duration,
    ) -> Result<Node> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let node = self.registry.get(id)?;
            if node.status == want {
                return Ok(node);
            }
            if node.status == NodeStatus::Failed {
                return Err(ProvisionError::NodeFailed {
                    node: id,
                    waiting_for: want,
                });
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(ProvisionError::Timeout {
                    node: id,
                    operation: format!("waiting for {}", want),
                    after: timeout,
                });
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    /// Flags nodes that have sat in powering-on, bmc-ready or installing for
    /// longer than `stuck_after`. Flagged nodes keep their status; an
    /// operator decides what to do with them.
    pub async fn check_stuck(&self, now: DateTime<Utc>) -> Vec<StuckNode> {
        let candidates: Vec<NodeId> = self
            .registry
            .list(&NodeFilter::all())
            .into_iter()
            .filter(|n| is_stuck_candidate(n.status) || self.stuck.contains_key(&n.id))
            .map(|n| n.id)
            .collect();

        for id in candidates {
            let lock = self.node_lock(id);
            let _guard = lock.lock().await;
            let Ok(node) = self.registry.get(id) else {
                self.stuck.remove(&id);
                continue;
            };
            let waited = (now - node.status_changed_at).to_std().unwrap_or_default();
            if is_stuck_candidate(node.status) && waited > self.config.stuck_after {
                if !self.stuck.contains_key(&id) {
                    warn!(
                        node = %id,
                        name = %node.name(),
                        status = %node.status,
                        since = %node.status_changed_at,
                        "node appears stuck, manual intervention required"
                    );
                }
                self.stuck.insert(
                    id,
                    StuckNode {
                        id,
                        name: node.name().to_string(),
                        status: node.status,
                        since: node.status_changed_at,
                        flagged_at: now,
                    },
                );
            } else {
                self.stuck.remove(&id);
            }
        }
        self.stuck_nodes()
    }

    /// Nodes currently flagged as stuck, by id.
    pub fn stuck_nodes(&self) -> Vec<StuckNode> {
        let mut nodes: Vec<StuckNode> = self.stuck.iter().map(|e| e.value().clone()).collect();
        nodes.sort_by_key(|n| n.id);
        nodes
    }

    /// Deregisters an idle node from the scheduler, then removes its row.
    /// A failed deregistration leaves the row in place for a retry.
    pub async fn remove_node(&self, id: NodeId) -> Result<Node> {
        let lock = self.node_lock(id);
        let guard = lock.lock().await;
        let node = deregister_and_remove(
            self.registry.as_ref(),
            self.scheduler.as_deref(),
            id,
            self.config.tool_timeout,
        )
        .await?;
        self.stuck.remove(&id);
        drop(guard);
        self.locks.remove(&id);
        Ok(node)
    }

    /// Reserves `range` for a new provisioning run.
    pub fn begin_run(&self, range: Ipv4Range) -> Result<Uuid> {
        let nodes = self.registry.list(&NodeFilter::all());
        self.ledger
            .lock()
            .map_err(|e| ProvisionError::Ledger(e.to_string()))?
            .reserve(range, &nodes)
    }

    /// Releases a run's range after cleanup.
    pub fn release_run(&self, run_id: Uuid) -> Result<bool> {
        Ok(self
            .ledger
            .lock()
            .map_err(|e| ProvisionError::Ledger(e.to_string()))?
            .release(run_id))
    }

    /// Copy of the range ledger, for persisting.
    pub fn ledger(&self) -> Result<RangeLedger> {
        Ok(self
            .ledger
            .lock()
            .map_err(|e| ProvisionError::Ledger(e.to_string()))?
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnia_registry::{DiscoveryMechanism, MacAddr, MemoryRegistry, NodeIdentity};
    use std::net::Ipv4Addr;

    struct AcceptAll;

    #[async_trait]
    impl ProvisioningTool for AcceptAll {
        async fn request_boot(&self, _node: &Node) -> Result<()> {
            Ok(())
        }
        async fn power_off(&self, _node: &Node) -> Result<()> {
            Ok(())
        }
    }

    fn setup() -> (Arc<MemoryRegistry>, Provisioner) {
        let registry = Arc::new(MemoryRegistry::new());
        let provisioner =
            Provisioner::new(registry.clone(), Arc::new(AcceptAll), ProvisionConfig::default());
        (registry, provisioner)
    }

    fn add(registry: &MemoryRegistry, last: u8, bmc: bool) -> NodeId {
        let mut identity = NodeIdentity::new(
            format!("node{:03}", last),
            MacAddr::new([0, 0, 0, 0, 0, last]),
            DiscoveryMechanism::Mapping,
        );
        if bmc {
            identity = identity.with_bmc_ip(Ipv4Addr::new(10, 3, 0, last));
        }
        registry.upsert(identity).unwrap().id()
    }

    #[tokio::test]
    async fn test_full_boot_sequence() {
        let (registry, provisioner) = setup();
        let id = add(&registry, 1, true);
        assert_eq!(provisioner.provision(id).await.unwrap(), NodeStatus::PoweringOn);
        for event in [
            BootEvent::PowerOnAck,
            BootEvent::BmcReady,
            BootEvent::PxeBoot { hardware: None },
            BootEvent::InstallComplete,
            BootEvent::PostBootStarted,
            BootEvent::PostBootComplete,
        ] {
            provisioner.on_boot_event(id, event).await.unwrap();
        }
        assert_eq!(registry.get(id).unwrap().status, NodeStatus::Booted);
    }

    #[tokio::test]
    async fn test_booted_to_installing_rejected_without_reprovision() {
        let (registry, provisioner) = setup();
        let id = add(&registry, 1, true);
        registry.set_status(id, NodeStatus::Booted).unwrap();
        let err = provisioner
            .on_boot_event(id, BootEvent::PxeBoot { hardware: None })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::InvalidTransition {
                from: NodeStatus::Booted,
                to: NodeStatus::Installing,
                ..
            }
        ));

        assert_eq!(provisioner.reprovision(id).await.unwrap(), NodeStatus::PoweringOn);
    }

    #[tokio::test]
    async fn test_reprovision_without_bmc_parks_node() {
        let (registry, provisioner) = setup();
        let id = add(&registry, 1, false);
        assert_eq!(provisioner.provision(id).await.unwrap(), NodeStatus::StandingBy);
        provisioner
            .on_boot_event(id, BootEvent::Failure { reason: "disk".to_string() })
            .await
            .unwrap();
        assert_eq!(provisioner.reprovision(id).await.unwrap(), NodeStatus::StandingBy);
    }

    #[tokio::test]
    async fn test_duplicate_event_is_noop() {
        let (registry, provisioner) = setup();
        let id = add(&registry, 1, true);
        provisioner.provision(id).await.unwrap();
        let before = registry.get(id).unwrap().history.len();
        provisioner.on_boot_event(id, BootEvent::PowerOnAck).await.unwrap();
        assert_eq!(registry.get(id).unwrap().history.len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_status_times_out() {
        let (registry, provisioner) = setup();
        let id = add(&registry, 1, true);
        let err = provisioner
            .await_status(id, NodeStatus::Booted, Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_stuck_nodes_flagged_not_failed() {
        let (registry, provisioner) = setup();
        let id = add(&registry, 1, true);
        provisioner.provision(id).await.unwrap();

        let later = Utc::now() + chrono::Duration::hours(2);
        let stuck = provisioner.check_stuck(later).await;
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].status, NodeStatus::PoweringOn);
        assert_eq!(registry.get(id).unwrap().status, NodeStatus::PoweringOn);

        provisioner.on_boot_event(id, BootEvent::BmcReady).await.unwrap();
        assert!(provisioner.stuck_nodes().is_empty());
    }

    /// Fails the first `failures` deregistrations.
    #[derive(Default)]
    struct FlakyScheduler {
        failures: usize,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl ClusterScheduler for FlakyScheduler {
        async fn deregister(&self, node: &Node) -> Result<()> {
            let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call < self.failures {
                return Err(ProvisionError::Scheduler {
                    node: node.id,
                    reason: "slurmctld unreachable".to_string(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_deregister_keeps_row_for_retry() {
        let registry = Arc::new(MemoryRegistry::new());
        let scheduler = Arc::new(FlakyScheduler {
            failures: 1,
            ..Default::default()
        });
        let provisioner =
            Provisioner::new(registry.clone(), Arc::new(AcceptAll), ProvisionConfig::default())
                .with_scheduler(scheduler.clone());
        let id = add(&registry, 1, true);

        let err = provisioner.remove_node(id).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Scheduler { .. }));
        assert_eq!(registry.get(id).unwrap().name(), "node001");

        let removed = provisioner.remove_node(id).await.unwrap();
        assert_eq!(removed.id, id);
        assert!(registry.get(id).is_err());
        assert_eq!(scheduler.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_busy_node_never_reaches_scheduler() {
        let registry = Arc::new(MemoryRegistry::new());
        let scheduler = Arc::new(FlakyScheduler::default());
        let id = add(&registry, 1, true);
        registry.set_status(id, NodeStatus::PoweringOn).unwrap();

        let err = deregister_and_remove(
            registry.as_ref(),
            Some(scheduler.as_ref()),
            id,
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProvisionError::Registry(_)));
        assert_eq!(scheduler.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_node_refuses_busy() {
        let (registry, provisioner) = setup();
        let id = add(&registry, 1, true);
        provisioner.provision(id).await.unwrap();
        provisioner.on_boot_event(id, BootEvent::BmcReady).await.unwrap();
        provisioner
            .on_boot_event(id, BootEvent::PxeBoot { hardware: None })
            .await
            .unwrap();
        assert!(provisioner.remove_node(id).await.is_err());
        assert_eq!(registry.len(), 1);
    }
}
