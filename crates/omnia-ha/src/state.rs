//! Per-pair failover state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::HaPairConfig;

/// Lifecycle of an HA pair.
///
/// `ActiveHealthy -> FailingOver -> ActiveHealthy` with the members swapped;
/// `SplitBrain` is terminal until an operator intervenes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PairState {
    /// One member holds the virtual IP.
    #[default]
    ActiveHealthy,
    /// A passive member is being promoted.
    FailingOver,
    /// Several members claim active; automatic failover is halted.
    SplitBrain,
}

impl PairState {
    /// True if `target` is an edge of the lifecycle.
    pub fn can_transition_to(&self, target: PairState) -> bool {
        matches!(
            (self, target),
            (PairState::ActiveHealthy, PairState::FailingOver)
                | (PairState::ActiveHealthy, PairState::SplitBrain)
                | (PairState::FailingOver, PairState::ActiveHealthy)
                | (PairState::FailingOver, PairState::SplitBrain)
        )
    }

    /// Kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PairState::ActiveHealthy => "active-healthy",
            PairState::FailingOver => "failing-over",
            PairState::SplitBrain => "split-brain",
        }
    }
}

impl fmt::Display for PairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monotonic failover generation of a pair; bumped on every promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Generation(pub u64);

impl Generation {
    /// The generation after a promotion.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

/// Live view of one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairStatus {
    /// Pair name.
    pub name: String,
    /// Lifecycle state.
    pub state: PairState,
    /// Virtual IP of the pair.
    pub virtual_ip: std::net::Ipv4Addr,
    /// Service tag of the member currently holding the virtual IP.
    pub active: String,
    /// Remaining members in promotion order.
    pub passives: Vec<String>,
    /// Consecutive missed checks of the active member.
    pub consecutive_failures: u32,
    /// Bumped on every promotion.
    pub generation: Generation,
    /// When the last promotion completed.
    pub last_failover: Option<DateTime<Utc>>,
    /// Members that claimed active when the pair entered split brain.
    #[serde(default)]
    pub split_brain_members: Vec<String>,
    /// Former actives that may not be promoted until confirmed down.
    #[serde(default)]
    pub fenced: Vec<String>,
    /// Demotion waiting for the prior active to go down.
    #[serde(default)]
    pub pending_demotion: Option<PendingDemotion>,
}

/// A prior active member that was still reachable after failover. It stays
/// fenced, with no HA marker, until a liveness round finds it unreachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDemotion {
    /// Service tag of the fenced member.
    pub service_tag: String,
    /// Liveness rounds left before the demotion step times out.
    pub checks_left: u32,
}

impl PairStatus {
    /// Initial status from the configured members.
    pub fn from_config(pair: &HaPairConfig) -> Self {
        Self {
            name: pair.name.clone(),
            state: PairState::ActiveHealthy,
            virtual_ip: pair.virtual_ip,
            active: pair.active_node_service_tag.clone(),
            passives: pair.passive_tags(),
            consecutive_failures: 0,
            generation: Generation::default(),
            last_failover: None,
            split_brain_members: Vec::new(),
            fenced: Vec::new(),
            pending_demotion: None,
        }
    }

    /// True if `service_tag` may not be promoted.
    pub fn is_fenced(&self, service_tag: &str) -> bool {
        self.fenced.iter().any(|t| t == service_tag)
    }

    pub(crate) fn record_failure(&mut self) {
        self.consecutive_failures += 1;
    }

    pub(crate) fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Makes `promoted` the active member; the previous active becomes the
    /// last passive.
    pub(crate) fn swap_active(&mut self, promoted: &str, at: DateTime<Utc>) {
        let previous = std::mem::replace(&mut self.active, promoted.to_string());
        self.passives.retain(|p| p != promoted);
        self.passives.push(previous);
        self.consecutive_failures = 0;
        self.generation = self.generation.next();
        self.last_failover = Some(at);
    }
}

/// Something the coordinator did or saw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum FailoverEvent {
    /// The active member missed a check.
    LivenessFailed {
        /// Pair name.
        pair: String,
        /// Active member.
        service_tag: String,
        /// Misses so far.
        consecutive_failures: u32,
    },
    /// A failover began.
    FailoverStarted {
        /// Pair name.
        pair: String,
        /// Failed active.
        from: String,
        /// Promotion candidate.
        to: String,
    },
    /// Network boot was disabled on the failed member and its dependents.
    BootDisabled {
        /// Pair name.
        pair: String,
        /// Failed active.
        service_tag: String,
        /// Dependents provisioned through it.
        dependents: Vec<String>,
    },
    /// Dependents were rebooted.
    DependentsRebooted {
        /// Pair name.
        pair: String,
        /// Rebooted nodes.
        nodes: Vec<String>,
    },
    /// A passive member now holds the virtual IP.
    Promoted {
        /// Pair name.
        pair: String,
        /// Promoted member.
        service_tag: String,
        /// Generation after promotion.
        generation: Generation,
    },
    /// The prior active was confirmed down and marked passive.
    Demoted {
        /// Pair name.
        pair: String,
        /// Prior active.
        service_tag: String,
    },
    /// The prior active was still reachable after promotion.
    DemotionDeferred {
        /// Pair name.
        pair: String,
        /// Prior active.
        service_tag: String,
    },
    /// The prior active stayed reachable past the step timeout.
    DemotionTimedOut {
        /// Pair name.
        pair: String,
        /// Prior active.
        service_tag: String,
    },
    /// A step failed before promotion; the active is unchanged.
    FailoverAborted {
        /// Pair name.
        pair: String,
        /// Step error.
        reason: String,
    },
    /// Several members claimed active.
    SplitBrainDetected {
        /// Pair name.
        pair: String,
        /// Claiming members.
        members: Vec<String>,
    },
}
