//! Error types for HA configuration and failover.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for HA operations.
pub type Result<T> = std::result::Result<T, HaError>;

/// Error variants for HA configuration and failover.
#[derive(Debug, Error)]
pub enum HaError {
    /// The HA document could not be read.
    #[error("cannot read {path}: {source}")]
    Read {
        /// File that was opened.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// YAML syntax or shape error.
    #[error("HA config YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON syntax or shape error.
    #[error("HA config JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The document is well formed but not usable.
    #[error("invalid HA config for {entity}: {reason}")]
    InvalidConfig {
        /// Pair name, service tag or section at fault.
        entity: String,
        /// What is wrong.
        reason: String,
    },

    /// No pair with this name is configured.
    #[error("unknown HA pair {pair}")]
    UnknownPair {
        /// The requested pair.
        pair: String,
    },

    /// A pair member's service tag is not in the registry.
    #[error("HA pair {pair}: no registered node with service tag {service_tag}")]
    MemberNotRegistered {
        /// The pair being operated on.
        pair: String,
        /// The missing service tag.
        service_tag: String,
    },

    /// A failover step did not finish within the configured step timeout.
    #[error("HA pair {pair}: step {step} timed out after {after:?}")]
    Timeout {
        /// The pair failing over.
        pair: String,
        /// Pipeline step that timed out.
        step: String,
        /// The configured bound.
        after: Duration,
    },

    /// More than one member claims to be active. Never recovered automatically.
    #[error("HA pair {pair}: split brain, members {members:?} all claim active; operator action required")]
    SplitBrain {
        /// The affected pair.
        pair: String,
        /// Service tags claiming active.
        members: Vec<String>,
    },

    /// The active member failed but no passive member answered.
    #[error("HA pair {pair}: no reachable passive member to promote")]
    NoPassiveAvailable {
        /// The affected pair.
        pair: String,
    },

    /// An HA action on a member failed.
    #[error("HA pair {pair}: {step} on {service_tag} failed: {reason}")]
    Action {
        /// The pair being operated on.
        pair: String,
        /// Pipeline step.
        step: String,
        /// Member the action targeted.
        service_tag: String,
        /// Failure reported by the collaborator.
        reason: String,
    },

    /// Registry errors while updating HA membership markers.
    #[error("registry error: {0}")]
    Registry(#[from] omnia_registry::RegistryError),
}

impl HaError {
    /// Pair the error concerns, if any.
    pub fn pair(&self) -> Option<&str> {
        match self {
            HaError::UnknownPair { pair }
            | HaError::MemberNotRegistered { pair, .. }
            | HaError::Timeout { pair, .. }
            | HaError::SplitBrain { pair, .. }
            | HaError::NoPassiveAvailable { pair }
            | HaError::Action { pair, .. } => Some(pair),
            _ => None,
        }
    }
}
