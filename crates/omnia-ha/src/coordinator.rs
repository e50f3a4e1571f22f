//! Failover coordinator for active/passive management node pairs.
//!
//! Each pair is guarded by its own async mutex; a liveness round and any
//! failover it triggers run entirely under that lock, so two failovers of
//! the same pair never interleave while different pairs proceed in
//! parallel.

use std::collections::BTreeMap;
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use omnia_registry::{HaMembership, Node, NodeFilter, NodeRegistry};
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::{HaConfig, LivenessConfig};
use crate::error::{HaError, Result};
use crate::state::{FailoverEvent, Generation, PairState, PairStatus, PendingDemotion};

/// Answer to one liveness check.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LivenessReport {
    /// The member answered within the check timeout.
    pub reachable: bool,
    /// The member believes it holds the virtual IP.
    pub claims_active: bool,
}

impl LivenessReport {
    /// The report recorded for a member that did not answer.
    pub fn unreachable() -> Self {
        Self::default()
    }
}

/// Checks whether a member is alive and what it believes its role is.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// Checks one member. Slow answers are cut off by the coordinator.
    async fn check(&self, node: &Node) -> LivenessReport;
}

/// Operations the coordinator performs on members and their dependents.
#[async_trait]
pub trait HaActions: Send + Sync {
    /// Removes network boot options so the node cannot rejoin on its own.
    async fn disable_boot(&self, node: &Node) -> Result<()>;

    /// Reboots a dependent so it re-provisions from the new active.
    async fn reboot(&self, node: &Node) -> Result<()>;

    /// Moves the pair's virtual IP onto the promoted member.
    async fn assign_virtual_ip(&self, node: &Node, vip: Ipv4Addr) -> Result<()>;
}

/// Result of one liveness round for a pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PairOutcome {
    /// The active member answered.
    Healthy,
    /// The active member missed a check but the threshold is not reached.
    Degraded {
        /// Misses so far, including this round.
        consecutive_failures: u32,
    },
    /// A passive member was promoted in this round.
    FailedOver {
        /// Service tag of the member that failed.
        from: String,
        /// Service tag of the promoted member.
        to: String,
        /// Generation after promotion.
        generation: Generation,
    },
}

/// Watches every configured pair and drives failover when an active fails.
pub struct FailoverCoordinator {
    liveness: LivenessConfig,
    registry: Arc<dyn NodeRegistry>,
    actions: Arc<dyn HaActions>,
    probe: Arc<dyn LivenessProbe>,
    pairs: BTreeMap<String, Arc<Mutex<PairStatus>>>,
    events: Arc<Mutex<Vec<FailoverEvent>>>,
}

impl FailoverCoordinator {
    /// Builds a coordinator for every pair of a validated, enabled config.
    pub fn new(
        config: &HaConfig,
        registry: Arc<dyn NodeRegistry>,
        actions: Arc<dyn HaActions>,
        probe: Arc<dyn LivenessProbe>,
    ) -> Result<Self> {
        config.validate()?;
        if !config.enabled {
            return Err(HaError::InvalidConfig {
                entity: "enabled".to_string(),
                reason: "HA is disabled".to_string(),
            });
        }
        let pairs = config
            .pairs
            .iter()
            .map(|p| (p.name.clone(), Arc::new(Mutex::new(PairStatus::from_config(p)))))
            .collect();
        Ok(Self {
            liveness: config.liveness()?.clone(),
            registry,
            actions,
            probe,
            pairs,
            events: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Names of the configured pairs, sorted.
    pub fn pair_names(&self) -> Vec<String> {
        self.pairs.keys().cloned().collect()
    }

    /// Snapshot of one pair.
    pub async fn status(&self, pair: &str) -> Result<PairStatus> {
        Ok(self.slot(pair)?.lock().await.clone())
    }

    /// Snapshot of every pair in name order.
    pub async fn statuses(&self) -> Vec<PairStatus> {
        let mut out = Vec::with_capacity(self.pairs.len());
        for slot in self.pairs.values() {
            out.push(slot.lock().await.clone());
        }
        out
    }

    /// Drain and return all recorded events.
    pub async fn drain_events(&self) -> Vec<FailoverEvent> {
        std::mem::take(&mut *self.events.lock().await)
    }

    /// Writes the configured active/passive markers into the registry.
    /// Fenced members keep no marker.
    pub async fn mark_members(&self) -> Result<()> {
        for slot in self.pairs.values() {
            let status = slot.lock().await;
            let active = self.member(&status.name, &status.active)?;
            self.registry
                .set_ha_membership(active.id, Some(HaMembership::Active))?;
            for tag in status.passives.iter().filter(|t| !status.is_fenced(t)) {
                let passive = self.member(&status.name, tag)?;
                self.registry
                    .set_ha_membership(passive.id, Some(HaMembership::Passive))?;
            }
        }
        Ok(())
    }

    /// Runs one liveness round for every pair concurrently.
    pub async fn check_all(&self) -> Vec<(String, Result<PairOutcome>)> {
        let names = self.pair_names();
        let results = join_all(names.iter().map(|name| self.check_pair(name))).await;
        names.into_iter().zip(results).collect()
    }

    /// Runs one liveness round for `pair`, failing over when the active
    /// member has missed `failure_threshold` consecutive checks.
    pub async fn check_pair(&self, pair: &str) -> Result<PairOutcome> {
        let slot = self.slot(pair)?;
        let mut status = slot.lock().await;
        if status.state == PairState::SplitBrain {
            return Err(HaError::SplitBrain {
                pair: status.name.clone(),
                members: status.split_brain_members.clone(),
            });
        }

        let active = self.member(&status.name, &status.active)?;
        let passives = status
            .passives
            .iter()
            .map(|tag| self.member(&status.name, tag))
            .collect::<Result<Vec<_>>>()?;

        let active_report = self.probe_member(&active).await;
        let passive_reports = join_all(passives.iter().map(|n| self.probe_member(n))).await;

        let mut claimants = Vec::new();
        if active_report.reachable && active_report.claims_active {
            claimants.push(status.active.clone());
        }
        for (tag, report) in status.passives.iter().zip(&passive_reports) {
            if report.reachable && report.claims_active {
                claimants.push(tag.clone());
            }
        }
        if claimants.len() > 1 {
            return Err(self.enter_split_brain(&mut status, claimants).await);
        }

        if let Some(pending) = status.pending_demotion.clone() {
            match status.passives.iter().position(|t| *t == pending.service_tag) {
                Some(idx) => {
                    let report = passive_reports[idx];
                    self.progress_demotion(&mut status, &passives[idx], pending, report)
                        .await?;
                }
                None => status.pending_demotion = None,
            }
        }

        if active_report.reachable {
            status.record_success();
            return Ok(PairOutcome::Healthy);
        }

        status.record_failure();
        warn!(
            pair = %status.name,
            service_tag = %status.active,
            failures = status.consecutive_failures,
            threshold = self.liveness.failure_threshold,
            "active HA member failed liveness check"
        );
        self.emit(FailoverEvent::LivenessFailed {
            pair: status.name.clone(),
            service_tag: status.active.clone(),
            consecutive_failures: status.consecutive_failures,
        })
        .await;
        if status.consecutive_failures < self.liveness.failure_threshold {
            return Ok(PairOutcome::Degraded {
                consecutive_failures: status.consecutive_failures,
            });
        }

        let Some(candidate) = status
            .passives
            .iter()
            .zip(passives.iter().zip(&passive_reports))
            .find(|(tag, (_, report))| report.reachable && !status.is_fenced(tag))
            .map(|(_, (node, _))| node.clone())
        else {
            error!(pair = %status.name, "no reachable passive member to promote");
            return Err(HaError::NoPassiveAvailable {
                pair: status.name.clone(),
            });
        };
        self.fail_over(&mut status, &active, &candidate).await
    }

    /// Checks every pair each liveness interval until `shutdown` flips to
    /// true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.liveness.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(pairs = self.pairs.len(), interval = ?self.liveness.interval(), "HA coordinator started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for (pair, result) in self.check_all().await {
                        match result {
                            Ok(PairOutcome::FailedOver { from, to, generation }) => {
                                info!(%pair, %from, %to, generation = generation.0, "failover complete");
                            }
                            Ok(_) => {}
                            // Already reported at error level when detected.
                            Err(HaError::SplitBrain { .. }) => {}
                            Err(e) => warn!(%pair, error = %e, "HA liveness round failed"),
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("HA coordinator stopped");
    }

    /// The ordered failover pipeline. Runs with the pair lock held.
    async fn fail_over(
        &self,
        status: &mut PairStatus,
        failed: &Node,
        candidate: &Node,
    ) -> Result<PairOutcome> {
        let pair = status.name.clone();
        let vip = status.virtual_ip;
        let from = status.active.clone();
        let to = candidate
            .identity
            .service_tag
            .clone()
            .unwrap_or_else(|| candidate.name().to_string());
        transition(status, PairState::FailingOver);
        info!(%pair, %from, %to, "starting HA failover");
        self.emit(FailoverEvent::FailoverStarted {
            pair: pair.clone(),
            from: from.clone(),
            to: to.clone(),
        })
        .await;

        let dependents = self.dependents(&from);
        let dependent_names: Vec<String> = dependents.iter().map(|n| n.name().to_string()).collect();

        let prepared = async {
            self.step(&pair, "disable-boot", async {
                self.actions.disable_boot(failed).await?;
                for node in &dependents {
                    self.actions.disable_boot(node).await?;
                }
                Ok(())
            })
            .await?;
            self.emit(FailoverEvent::BootDisabled {
                pair: pair.clone(),
                service_tag: from.clone(),
                dependents: dependent_names.clone(),
            })
            .await;

            self.step(&pair, "reboot-dependents", async {
                join_all(dependents.iter().map(|n| self.actions.reboot(n)))
                    .await
                    .into_iter()
                    .collect::<Result<Vec<()>>>()
                    .map(|_| ())
            })
            .await?;
            if !dependents.is_empty() {
                self.emit(FailoverEvent::DependentsRebooted {
                    pair: pair.clone(),
                    nodes: dependent_names.clone(),
                })
                .await;
            }

            self.step(&pair, "promote", self.actions.assign_virtual_ip(candidate, vip))
                .await
        }
        .await;
        if let Err(e) = prepared {
            error!(%pair, error = %e, "HA failover aborted before promotion");
            transition(status, PairState::ActiveHealthy);
            self.emit(FailoverEvent::FailoverAborted {
                pair: pair.clone(),
                reason: e.to_string(),
            })
            .await;
            return Err(e);
        }

        // The failed member is fenced (no marker) until demotion confirms it.
        self.registry.set_ha_membership(failed.id, None)?;
        if !status.is_fenced(&from) {
            status.fenced.push(from.clone());
        }
        self.registry
            .set_ha_membership(candidate.id, Some(HaMembership::Active))?;
        status.swap_active(&to, Utc::now());
        let generation = status.generation;
        info!(%pair, service_tag = %to, generation = generation.0, "passive member promoted");
        self.emit(FailoverEvent::Promoted {
            pair: pair.clone(),
            service_tag: to.clone(),
            generation,
        })
        .await;

        let recheck = self.probe_member(failed).await;
        if recheck.reachable && recheck.claims_active {
            return Err(self
                .enter_split_brain(status, vec![from.clone(), to.clone()])
                .await);
        }
        transition(status, PairState::ActiveHealthy);
        if recheck.reachable {
            let checks_left = self.demotion_checks();
            warn!(
                %pair,
                service_tag = %from,
                checks_left,
                "prior active still reachable; it stays fenced until confirmed down"
            );
            status.pending_demotion = Some(PendingDemotion {
                service_tag: from.clone(),
                checks_left,
            });
            self.emit(FailoverEvent::DemotionDeferred {
                pair: pair.clone(),
                service_tag: from.clone(),
            })
            .await;
        } else {
            self.demote(status, failed, &from).await?;
        }

        Ok(PairOutcome::FailedOver {
            from,
            to,
            generation,
        })
    }

    /// Advances a deferred demotion with this round's answer from the
    /// fenced member.
    async fn progress_demotion(
        &self,
        status: &mut PairStatus,
        node: &Node,
        mut pending: PendingDemotion,
        report: LivenessReport,
    ) -> Result<()> {
        if !report.reachable {
            return self.demote(status, node, &pending.service_tag).await;
        }
        pending.checks_left = pending.checks_left.saturating_sub(1);
        if pending.checks_left > 0 {
            debug!(
                pair = %status.name,
                service_tag = %pending.service_tag,
                checks_left = pending.checks_left,
                "fenced prior active still reachable"
            );
            status.pending_demotion = Some(pending);
            return Ok(());
        }
        status.pending_demotion = None;
        let after = self.liveness.step_timeout();
        error!(
            pair = %status.name,
            service_tag = %pending.service_tag,
            ?after,
            "prior active never went down; it stays fenced without an HA marker"
        );
        self.emit(FailoverEvent::DemotionTimedOut {
            pair: status.name.clone(),
            service_tag: pending.service_tag.clone(),
        })
        .await;
        Err(HaError::Timeout {
            pair: status.name.clone(),
            step: "demote".to_string(),
            after,
        })
    }

    /// Marks a confirmed-down prior active as passive and lifts its fence.
    async fn demote(&self, status: &mut PairStatus, node: &Node, service_tag: &str) -> Result<()> {
        self.registry
            .set_ha_membership(node.id, Some(HaMembership::Passive))?;
        status.fenced.retain(|t| t != service_tag);
        status.pending_demotion = None;
        info!(pair = %status.name, %service_tag, "prior active demoted");
        self.emit(FailoverEvent::Demoted {
            pair: status.name.clone(),
            service_tag: service_tag.to_string(),
        })
        .await;
        Ok(())
    }

    /// Liveness rounds a reachable prior active may take to go down: the
    /// step timeout expressed in liveness intervals.
    fn demotion_checks(&self) -> u32 {
        let interval = self.liveness.interval().as_millis().max(1);
        let rounds = self.liveness.step_timeout().as_millis().div_ceil(interval);
        u32::try_from(rounds).unwrap_or(u32::MAX).max(1)
    }

    async fn enter_split_brain(&self, status: &mut PairStatus, members: Vec<String>) -> HaError {
        transition(status, PairState::SplitBrain);
        status.split_brain_members = members.clone();
        error!(
            pair = %status.name,
            members = ?members,
            "split brain detected: several members claim active; automatic failover halted, operator action required"
        );
        self.emit(FailoverEvent::SplitBrainDetected {
            pair: status.name.clone(),
            members: members.clone(),
        })
        .await;
        HaError::SplitBrain {
            pair: status.name.clone(),
            members,
        }
    }

    async fn step<F>(&self, pair: &str, step: &str, fut: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let after = self.liveness.step_timeout();
        match tokio::time::timeout(after, fut).await {
            Ok(result) => result,
            Err(_) => Err(HaError::Timeout {
                pair: pair.to_string(),
                step: step.to_string(),
                after,
            }),
        }
    }

    async fn probe_member(&self, node: &Node) -> LivenessReport {
        match tokio::time::timeout(self.liveness.check_timeout(), self.probe.check(node)).await {
            Ok(report) => report,
            Err(_) => {
                debug!(node = %node.id, name = node.name(), "liveness check timed out");
                LivenessReport::unreachable()
            }
        }
    }

    /// Nodes provisioned through the member with this service tag.
    fn dependents(&self, service_tag: &str) -> Vec<Node> {
        self.registry
            .list(&NodeFilter::all())
            .into_iter()
            .filter(|n| n.identity.placement.parent.as_deref() == Some(service_tag))
            .collect()
    }

    fn member(&self, pair: &str, service_tag: &str) -> Result<Node> {
        self.registry
            .list(&NodeFilter::all().with_service_tag(service_tag))
            .into_iter()
            .next()
            .ok_or_else(|| HaError::MemberNotRegistered {
                pair: pair.to_string(),
                service_tag: service_tag.to_string(),
            })
    }

    fn slot(&self, pair: &str) -> Result<Arc<Mutex<PairStatus>>> {
        self.pairs
            .get(pair)
            .cloned()
            .ok_or_else(|| HaError::UnknownPair {
                pair: pair.to_string(),
            })
    }

    async fn emit(&self, event: FailoverEvent) {
        self.events.lock().await.push(event);
    }
}

fn transition(status: &mut PairStatus, target: PairState) {
    if !status.state.can_transition_to(target) {
        warn!(pair = %status.name, from = %status.state, to = %target, "unexpected HA pair transition");
    }
    debug!(pair = %status.name, from = %status.state, to = %target, "HA pair state change");
    status.state = target;
}
