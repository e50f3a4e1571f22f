//! Error types for the node registry.

use thiserror::Error;

use crate::types::{NodeId, NodeStatus};

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error variants for registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No row with this id.
    #[error("node {node} not found")]
    NotFound {
        /// The id that was looked up.
        node: NodeId,
    },

    /// The node is mid-provisioning or is the active HA member.
    #[error("node {node} ({name}) is busy: {reason}")]
    NodeBusy {
        /// The node that could not be removed.
        node: NodeId,
        /// Node name, for operator messages.
        name: String,
        /// Current status of the node.
        status: NodeStatus,
        /// What makes the node busy.
        reason: String,
    },

    /// Wraps standard I/O errors from the journal file.
    #[error("journal I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A journal record could not be encoded or decoded.
    #[error("journal serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// A journal record in the middle of the file is unreadable.
    #[error("journal corrupted at byte offset {offset}: {reason}")]
    Corrupted {
        /// Offset of the bad record header.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// An internal lock was poisoned by a panicking writer.
    #[error("registry lock poisoned: {0}")]
    Poisoned(String),
}
