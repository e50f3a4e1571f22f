//! Provisioning state machine.
//!
//! ```text
//! unknown      -> powering-on | failed
//! standing-by  -> installing | powering-on | failed
//! powering-on  -> bmc-ready | failed
//! bmc-ready    -> installing | failed
//! installing   -> booting | failed
//! booting      -> post-booting | failed
//! post-booting -> booted | failed
//! booted       -> powering-off | ping | no-ping
//! ping         -> no-ping | powering-off
//! no-ping      -> ping | powering-off | failed
//! powering-off -> powering-on | failed
//! ```
//!
//! Re-provisioning is a separate, explicit request and is not an edge here.

use omnia_registry::{HardwareFacts, NodeStatus};
use serde::{Deserialize, Serialize};

/// Returns true if `from -> to` is an edge of the state machine.
pub fn can_transition(from: NodeStatus, to: NodeStatus) -> bool {
    use NodeStatus::*;
    matches!(
        (from, to),
        (Unknown, PoweringOn)
            | (Unknown, Failed)
            | (StandingBy, Installing)
            | (StandingBy, PoweringOn)
            | (StandingBy, Failed)
            | (PoweringOn, BmcReady)
            | (PoweringOn, Failed)
            | (BmcReady, Installing)
            | (BmcReady, Failed)
            | (Installing, Booting)
            | (Installing, Failed)
            | (Booting, PostBooting)
            | (Booting, Failed)
            | (PostBooting, Booted)
            | (PostBooting, Failed)
            | (Booted, PoweringOff)
            | (Booted, Ping)
            | (Booted, NoPing)
            | (Ping, NoPing)
            | (Ping, PoweringOff)
            | (NoPing, Ping)
            | (NoPing, PoweringOff)
            | (NoPing, Failed)
            | (PoweringOff, PoweringOn)
            | (PoweringOff, Failed)
    )
}

/// Statuses from which a re-provision may be requested.
pub fn can_reprovision(from: NodeStatus) -> bool {
    matches!(
        from,
        NodeStatus::Booted
            | NodeStatus::Ping
            | NodeStatus::NoPing
            | NodeStatus::Failed
            | NodeStatus::PoweringOff
    )
}

/// Where a re-provision sends a node: back to power-on, or to waiting for a
/// manual PXE boot when it has no BMC.
pub fn reprovision_target(has_bmc: bool) -> NodeStatus {
    if has_bmc {
        NodeStatus::PoweringOn
    } else {
        NodeStatus::StandingBy
    }
}

/// Statuses a node can be stuck in while an external step is pending.
pub fn is_stuck_candidate(status: NodeStatus) -> bool {
    matches!(
        status,
        NodeStatus::PoweringOn | NodeStatus::BmcReady | NodeStatus::Installing
    )
}

/// Signals from the provisioning tool and the node monitor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum BootEvent {
    /// The power-on command was accepted.
    PowerOnAck,
    /// The BMC answered.
    BmcReady,
    /// The node PXE booted; hardware facts are reported on this event only.
    PxeBoot {
        /// CPU and GPU facts from the console log.
        hardware: Option<HardwareFacts>,
    },
    /// The OS install finished.
    InstallComplete,
    /// Post-boot configuration began.
    PostBootStarted,
    /// Post-boot configuration finished.
    PostBootComplete,
    /// The power-off command was accepted.
    PowerOffAck,
    /// The node answered a ping.
    Ping,
    /// The node stopped answering pings.
    NoPing,
    /// The provisioning tool reported an error.
    Failure {
        /// Tool message.
        reason: String,
    },
}

impl BootEvent {
    /// Status the node moves to when this event is accepted.
    pub fn target_status(&self) -> NodeStatus {
        match self {
            BootEvent::PowerOnAck => NodeStatus::PoweringOn,
            BootEvent::BmcReady => NodeStatus::BmcReady,
            BootEvent::PxeBoot { .. } => NodeStatus::Installing,
            BootEvent::InstallComplete => NodeStatus::Booting,
            BootEvent::PostBootStarted => NodeStatus::PostBooting,
            BootEvent::PostBootComplete => NodeStatus::Booted,
            BootEvent::PowerOffAck => NodeStatus::PoweringOff,
            BootEvent::Ping => NodeStatus::Ping,
            BootEvent::NoPing => NodeStatus::NoPing,
            BootEvent::Failure { .. } => NodeStatus::Failed,
        }
    }
}
