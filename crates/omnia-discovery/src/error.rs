//! Error types for node discovery.

use omnia_registry::{DiscoveryMechanism, RegistryError};
use std::net::Ipv4Addr;
use thiserror::Error;

/// Result type alias for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Error variants for discovery operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The mapping file is malformed. `line` is 1-based; the header is line 1.
    #[error("mapping file line {line}: {reason}")]
    MappingFile {
        /// Offending line.
        line: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// A run tried to register more nodes than its mechanism allows.
    #[error("{mechanism} discovery exceeded its capacity of {limit} nodes")]
    CapacityExceeded {
        /// Mechanism of the run.
        mechanism: DiscoveryMechanism,
        /// Maximum registrations per run.
        limit: usize,
    },

    /// The BMC collaborator failed for one address.
    #[error("BMC probe of {bmc_ip} failed: {reason}")]
    Probe {
        /// Probed address.
        bmc_ip: Ipv4Addr,
        /// Collaborator message.
        reason: String,
    },

    /// The SNMP walk of a switch failed or timed out.
    #[error("SNMP walk of switch {switch} failed: {reason}")]
    Snmp {
        /// Switch IP address.
        switch: Ipv4Addr,
        /// Collaborator message.
        reason: String,
    },

    /// Discovery parameters are unusable (empty range, zero parallelism).
    #[error("invalid discovery configuration: {0}")]
    InvalidConfig(String),

    /// The registry rejected a write.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Reading the mapping file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
