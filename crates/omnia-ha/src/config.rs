//! HA configuration: which management nodes pair up and how liveness is
//! checked.
//!
//! Liveness cadence and threshold have no built-in defaults; an enabled
//! configuration must state them.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HaError, Result};

/// One passive entry, as written in the document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassiveNodes {
    /// Service tags of the standbys, in promotion order.
    pub node_service_tags: Vec<String>,
}

/// An active node and its standbys sharing one virtual IP.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaPairConfig {
    /// Pair name.
    pub name: String,
    /// Address held by whichever member is active.
    #[serde(rename = "virtual_ip_address")]
    pub virtual_ip: Ipv4Addr,
    /// Service tag of the initial active member.
    pub active_node_service_tag: String,
    /// Standby entries.
    #[serde(default)]
    pub passive_nodes: Vec<PassiveNodes>,
}

impl HaPairConfig {
    /// Passive service tags in promotion order.
    pub fn passive_tags(&self) -> Vec<String> {
        self.passive_nodes
            .iter()
            .flat_map(|p| p.node_service_tags.iter().cloned())
            .collect()
    }
}

/// How often and how patiently members are checked.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// Time between liveness rounds, in milliseconds.
    pub interval_ms: u64,
    /// Consecutive failed checks of the active member before failover.
    pub failure_threshold: u32,
    /// Bound on one member check, in milliseconds.
    pub check_timeout_ms: u64,
    /// Bound on each failover pipeline step, in milliseconds.
    pub step_timeout_ms: u64,
}

impl LivenessConfig {
    /// `interval_ms` as a duration.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// `check_timeout_ms` as a duration.
    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }

    /// `step_timeout_ms` as a duration.
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }
}

/// Top-level HA document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaConfig {
    /// HA is configured for this cluster.
    #[serde(default)]
    pub enabled: bool,
    /// Liveness parameters; required when enabled.
    #[serde(default)]
    pub liveness: Option<LivenessConfig>,
    /// Configured pairs.
    #[serde(default)]
    pub pairs: Vec<HaPairConfig>,
}

impl HaConfig {
    /// Loads a document, choosing JSON for `.json` files and YAML otherwise.
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| HaError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(serde_json::from_str(&contents)?),
            _ => Ok(serde_yaml::from_str(&contents)?),
        }
    }

    /// The pair named `name`.
    pub fn pair(&self, name: &str) -> Option<&HaPairConfig> {
        self.pairs.iter().find(|p| p.name == name)
    }

    /// Liveness parameters; required once HA is enabled.
    pub fn liveness(&self) -> Result<&LivenessConfig> {
        self.liveness.as_ref().ok_or_else(|| invalid(
            "liveness",
            "interval_ms, failure_threshold, check_timeout_ms and step_timeout_ms must be set",
        ))
    }

    /// Checks the document. A disabled configuration is always valid.
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let liveness = self.liveness()?;
        if liveness.interval_ms == 0 || liveness.check_timeout_ms == 0 || liveness.step_timeout_ms == 0 {
            return Err(invalid("liveness", "intervals and timeouts must be non-zero"));
        }
        if liveness.failure_threshold == 0 {
            return Err(invalid("liveness", "failure_threshold must be at least 1"));
        }
        if self.pairs.is_empty() {
            return Err(invalid("pairs", "HA is enabled but no pairs are defined"));
        }

        let mut names = HashSet::new();
        let mut tags = HashSet::new();
        let mut vips = HashSet::new();
        for pair in &self.pairs {
            if !names.insert(pair.name.as_str()) {
                return Err(invalid(&pair.name, "pair name is used twice"));
            }
            let passives = pair.passive_tags();
            if passives.is_empty() {
                return Err(invalid(&pair.name, "at least one passive node is required"));
            }
            if passives.contains(&pair.active_node_service_tag) {
                return Err(invalid(
                    &pair.active_node_service_tag,
                    "active node is also listed as passive",
                ));
            }
            for tag in std::iter::once(&pair.active_node_service_tag).chain(passives.iter()) {
                if tag.trim().is_empty() {
                    return Err(invalid(&pair.name, "service tags cannot be empty"));
                }
                if !tags.insert(tag.clone()) {
                    return Err(invalid(tag, "service tag appears in more than one HA role"));
                }
            }
            if !vips.insert(pair.virtual_ip) {
                return Err(invalid(
                    &pair.name,
                    &format!("virtual IP {} is already used by another pair", pair.virtual_ip),
                ));
            }
        }
        Ok(())
    }
}

fn invalid(entity: &str, reason: &str) -> HaError {
    HaError::InvalidConfig {
        entity: entity.to_string(),
        reason: reason.to_string(),
    }
}
