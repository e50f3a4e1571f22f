//! Admin ranges used by provisioning runs.
//!
//! A range stays reserved until cleanup releases it. A new run may not reuse
//! any address of a reserved range, nor an address still held by a node in
//! the registry.

use chrono::{DateTime, Utc};
use omnia_registry::{Ipv4Range, Node};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ProvisionError, Result};

/// One provisioning run's admin range.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRecord {
    /// Run the range belongs to.
    pub run_id: Uuid,
    /// Reserved admin range.
    pub range: Ipv4Range,
    /// When it was reserved.
    pub recorded_at: DateTime<Utc>,
    /// When the run released it.
    pub released_at: Option<DateTime<Utc>>,
}

impl RangeRecord {
    /// True once the run released its range.
    pub fn is_released(&self) -> bool {
        self.released_at.is_some()
    }
}

/// Admin ranges reserved by provisioning runs, saved as JSON.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeLedger {
    records: Vec<RangeRecord>,
}

impl RangeLedger {
    /// An empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a ledger saved with [`RangeLedger::save`]; a missing file is an
    /// empty ledger.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| ProvisionError::Ledger(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ProvisionError::Ledger(e.to_string())),
        }
    }

    /// Writes the ledger as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text =
            serde_json::to_string_pretty(self).map_err(|e| ProvisionError::Ledger(e.to_string()))?;
        fs::write(path, text).map_err(|e| ProvisionError::Ledger(e.to_string()))
    }

    /// Every record in reservation order.
    pub fn records(&self) -> &[RangeRecord] {
        &self.records
    }

    /// Ranges not yet released by cleanup.
    pub fn active(&self) -> impl Iterator<Item = &RangeRecord> {
        self.records.iter().filter(|r| !r.is_released())
    }

    /// Fails with `RangeConflict` if `range` overlaps an unreleased range or
    /// contains the admin IP of a node in `nodes`.
    pub fn check(&self, range: &Ipv4Range, nodes: &[Node]) -> Result<()> {
        if let Some(prior) = self.active().find(|r| r.range.overlaps(range)) {
            return Err(ProvisionError::RangeConflict {
                range: *range,
                reason: format!(
                    "overlaps range {} of run {} which has not been cleaned up",
                    prior.range, prior.run_id
                ),
            });
        }
        let holders: Vec<String> = nodes
            .iter()
            .filter(|n| n.identity.admin_ip.is_some_and(|ip| range.contains(ip)))
            .map(|n| format!("{} ({})", n.name(), n.id))
            .collect();
        if !holders.is_empty() {
            return Err(ProvisionError::RangeConflict {
                range: *range,
                reason: format!("admin IPs still held by registered nodes: {}", holders.join(", ")),
            });
        }
        Ok(())
    }

    /// Checks `range` and reserves it for a new run.
    pub fn reserve(&mut self, range: Ipv4Range, nodes: &[Node]) -> Result<Uuid> {
        self.check(&range, nodes)?;
        let run_id = Uuid::new_v4();
        self.records.push(RangeRecord {
            run_id,
            range,
            recorded_at: Utc::now(),
            released_at: None,
        });
        info!(%run_id, %range, "admin range reserved");
        Ok(run_id)
    }

    /// Releases the range of `run_id`. Returns false if the run is unknown or
    /// already released.
    pub fn release(&mut self, run_id: Uuid) -> bool {
        match self
            .records
            .iter_mut()
            .find(|r| r.run_id == run_id && !r.is_released())
        {
            Some(record) => {
                record.released_at = Some(Utc::now());
                debug!(%run_id, range = %record.range, "admin range released");
                true
            }
            None => false,
        }
    }
}
