//! Drives a discovery source into the registry.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use omnia_registry::{DiscoveryMechanism, NodeId, NodeRegistry, Placement, UpsertOutcome};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{DiscoveryError, Result};
use crate::source::DiscoverySource;

/// Outcome of one discovery run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Mechanism of the source.
    pub mechanism: DiscoveryMechanism,
    /// When the run began.
    pub started_at: DateTime<Utc>,
    /// When the source was exhausted.
    pub finished_at: DateTime<Utc>,
    /// Rows created.
    pub inserted: Vec<NodeId>,
    /// Rows whose identity was replaced.
    pub updated: Vec<NodeId>,
    /// Rows that had been registered by another mechanism before this run.
    pub cross_mechanism: Vec<NodeId>,
    /// Identities dropped because their group is not configured.
    pub skipped: usize,
}

impl DiscoveryReport {
    /// Rows written, new or updated.
    pub fn registered(&self) -> usize {
        self.inserted.len() + self.updated.len()
    }
}

/// Upserts everything a source yields.
///
/// When group placements are supplied, identities of unknown groups are
/// skipped and known groups fill in the placement columns.
pub struct DiscoveryRun {
    registry: Arc<dyn NodeRegistry>,
    placements: HashMap<String, Placement>,
}

impl DiscoveryRun {
    /// A run with no group placements.
    pub fn new(registry: Arc<dyn NodeRegistry>) -> Self {
        Self {
            registry,
            placements: HashMap::new(),
        }
    }

    /// Restricts the run to these groups and fills in their placement.
    pub fn with_placements(mut self, placements: HashMap<String, Placement>) -> Self {
        self.placements = placements;
        self
    }

    /// Runs `source` to completion. The first stream error or registry error
    /// ends the run; rows already written stay registered.
    pub async fn execute(&self, source: DiscoverySource) -> Result<DiscoveryReport> {
        let run_id = Uuid::new_v4();
        let mechanism = source.mechanism();
        let capacity = source.capacity();
        let started_at = Utc::now();
        info!(%run_id, %mechanism, group = ?source.group(), "discovery run started");

        let mut report = DiscoveryReport {
            run_id,
            mechanism,
            started_at,
            finished_at: started_at,
            inserted: Vec::new(),
            updated: Vec::new(),
            cross_mechanism: Vec::new(),
            skipped: 0,
        };

        let mut stream = source.discover();
        while let Some(item) = stream.next().await {
            let mut identity = item?;

            if !self.placements.is_empty() {
                let group = identity.placement.group_name.clone();
                match group.as_deref().and_then(|g| self.placements.get(g)) {
                    Some(placement) => {
                        identity.placement = Placement {
                            group_name: group.clone(),
                            ..placement.clone()
                        };
                    }
                    None => {
                        warn!(%run_id, node = %identity.node, group = ?group, "group not configured, skipping node");
                        report.skipped += 1;
                        continue;
                    }
                }
            }

            if let Some(limit) = capacity {
                if report.registered() >= limit {
                    warn!(%run_id, %mechanism, limit, "discovery capacity reached");
                    return Err(DiscoveryError::CapacityExceeded { mechanism, limit });
                }
            }

            match self.registry.upsert(identity)? {
                UpsertOutcome::Inserted { id } => report.inserted.push(id),
                UpsertOutcome::Updated {
                    id,
                    previous_mechanism,
                } => {
                    if previous_mechanism != mechanism {
                        report.cross_mechanism.push(id);
                    }
                    report.updated.push(id);
                }
            }
        }

        report.finished_at = Utc::now();
        info!(
            %run_id,
            %mechanism,
            inserted = report.inserted.len(),
            updated = report.updated.len(),
            cross_mechanism = report.cross_mechanism.len(),
            skipped = report.skipped,
            "discovery run finished"
        );
        Ok(report)
    }
}
