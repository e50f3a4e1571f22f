//! Error types for provisioning.

use omnia_registry::{Ipv4Range, NodeId, NodeStatus, RegistryError};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Error variants for provisioning operations.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The requested status change is not an edge of the state machine.
    #[error("node {node}: illegal transition {from} -> {to}")]
    InvalidTransition {
        /// Node being driven.
        node: NodeId,
        /// Current status.
        from: NodeStatus,
        /// Requested status.
        to: NodeStatus,
    },

    /// An external wait did not finish in time.
    #[error("node {node}: {operation} timed out after {after:?}")]
    Timeout {
        /// Node being driven.
        node: NodeId,
        /// What was being waited for.
        operation: String,
        /// The configured bound.
        after: Duration,
    },

    /// The node reached `failed` while a caller waited for another status.
    #[error("node {node} failed while waiting for {waiting_for}")]
    NodeFailed {
        /// Node that failed.
        node: NodeId,
        /// Status that was awaited.
        waiting_for: NodeStatus,
    },

    /// A re-provision range collides with prior runs or registered nodes.
    #[error("admin range {range} conflicts: {reason}")]
    RangeConflict {
        /// The rejected range.
        range: Ipv4Range,
        /// What it collides with.
        reason: String,
    },

    /// The provisioning tool reported an error.
    #[error("node {node}: provisioning tool error: {reason}")]
    Tool {
        /// Node being driven.
        node: NodeId,
        /// Tool message.
        reason: String,
    },

    /// The cluster scheduler refused to deregister a node.
    #[error("node {node}: scheduler deregistration failed: {reason}")]
    Scheduler {
        /// Node being removed.
        node: NodeId,
        /// Scheduler message.
        reason: String,
    },

    /// Ledger file could not be read or written.
    #[error("range ledger error: {0}")]
    Ledger(String),

    /// Registry failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ProvisionError {
    /// The node the error is about, when there is one.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            ProvisionError::InvalidTransition { node, .. }
            | ProvisionError::Timeout { node, .. }
            | ProvisionError::NodeFailed { node, .. }
            | ProvisionError::Tool { node, .. }
            | ProvisionError::Scheduler { node, .. } => Some(*node),
            ProvisionError::Registry(RegistryError::NotFound { node })
            | ProvisionError::Registry(RegistryError::NodeBusy { node, .. }) => Some(*node),
            _ => None,
        }
    }
}
