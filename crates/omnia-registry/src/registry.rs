//! The node registry: one row per physical node, keyed by admin MAC.
//!
//! [`MemoryRegistry`] keeps rows in sharded maps so that writers touching
//! different nodes do not contend. Writes for one MAC are serialized by the
//! MAC index entry lock. Every code path takes locks in the order
//! MAC index, node table, journal.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{RegistryError, RegistryResult};
use crate::journal::{JournalRecord, RegistryJournal};
use crate::net::MacAddr;
use crate::types::{
    DiscoveryMechanism, HaMembership, HardwareFacts, Node, NodeId, NodeIdentity, NodeStatus,
    StatusRecord,
};

/// Default number of status records kept per node.
pub const DEFAULT_HISTORY_LIMIT: usize = 256;

/// What an upsert did.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertOutcome {
    /// A new row was created.
    Inserted {
        /// Id of the new row.
        id: NodeId,
    },
    /// An existing row with the same admin MAC had its identity replaced.
    Updated {
        /// Id of the existing row.
        id: NodeId,
        /// Mechanism that had registered the row before this write.
        previous_mechanism: DiscoveryMechanism,
    },
}

impl UpsertOutcome {
    /// Id of the row written.
    pub fn id(&self) -> NodeId {
        match self {
            UpsertOutcome::Inserted { id } | UpsertOutcome::Updated { id, .. } => *id,
        }
    }

    /// True if a new row was created.
    pub fn is_inserted(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted { .. })
    }
}

/// Row selection for [`NodeRegistry::list`]. Unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFilter {
    /// Current status.
    pub status: Option<NodeStatus>,
    /// Placement group name.
    pub group: Option<String>,
    /// One of the comma-separated roles held by the node.
    pub role: Option<String>,
    /// Mechanism that registered the row.
    pub mechanism: Option<DiscoveryMechanism>,
    /// BMC service tag.
    pub service_tag: Option<String>,
}

impl NodeFilter {
    /// A filter matching every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts to rows with this status.
    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Restricts to rows with this group.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Restricts to rows with this role.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Restricts to rows with this mechanism.
    pub fn with_mechanism(mut self, mechanism: DiscoveryMechanism) -> Self {
        self.mechanism = Some(mechanism);
        self
    }

    /// Restricts to rows with this service tag.
    pub fn with_service_tag(mut self, tag: impl Into<String>) -> Self {
        self.service_tag = Some(tag.into());
        self
    }

    /// Returns true if `node` satisfies every set field.
    pub fn matches(&self, node: &Node) -> bool {
        if self.status.is_some_and(|s| s != node.status) {
            return false;
        }
        if let Some(group) = &self.group {
            if node.group() != Some(group.as_str()) {
                return false;
            }
        }
        if let Some(role) = &self.role {
            let holds = node
                .role
                .as_deref()
                .is_some_and(|r| r.split(',').any(|part| part.trim() == role));
            if !holds {
                return false;
            }
        }
        if self.mechanism.is_some_and(|m| m != node.identity.mechanism) {
            return false;
        }
        if let Some(tag) = &self.service_tag {
            if node.identity.service_tag.as_deref() != Some(tag.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Durable store of every node and its status.
pub trait NodeRegistry: Send + Sync {
    /// Inserts a row for a new admin MAC, or replaces the identity of the
    /// existing row. Never creates two rows for one MAC.
    fn upsert(&self, identity: NodeIdentity) -> RegistryResult<UpsertOutcome>;

    /// Records a status write stamped by the registry clock. Timestamps
    /// strictly increase per node.
    fn set_status(&self, id: NodeId, status: NodeStatus) -> RegistryResult<StatusRecord>;

    /// Records an externally observed status. Returns false, leaving the row
    /// untouched, when `observed_at` is not newer than the current status.
    fn apply_status(
        &self,
        id: NodeId,
        status: NodeStatus,
        observed_at: DateTime<Utc>,
    ) -> RegistryResult<bool>;

    /// The row with this id.
    fn get(&self, id: NodeId) -> RegistryResult<Node>;

    /// The row owning this admin MAC, if any.
    fn find_by_mac(&self, mac: &MacAddr) -> Option<Node>;

    /// Matching rows in id order.
    fn list(&self, filter: &NodeFilter) -> Vec<Node>;

    /// Deletes a row that is idle and not the active HA member.
    fn remove(&self, id: NodeId) -> RegistryResult<Node>;

    /// Returns the row if [`NodeRegistry::remove`] would currently accept
    /// it. Writes nothing.
    fn check_removable(&self, id: NodeId) -> RegistryResult<Node> {
        let node = self.get(id)?;
        ensure_removable(&node)?;
        Ok(node)
    }

    /// Replaces the hardware facts of a row.
    fn update_hardware(&self, id: NodeId, facts: HardwareFacts) -> RegistryResult<()>;

    /// Sets or clears the comma-separated role list.
    fn set_role(&self, id: NodeId, role: Option<String>) -> RegistryResult<()>;

    /// Sets or clears the HA marker.
    fn set_ha_membership(&self, id: NodeId, membership: Option<HaMembership>)
        -> RegistryResult<()>;
}

/// Refuses rows that are mid-provisioning or the active member of an HA
/// pair.
pub fn ensure_removable(node: &Node) -> RegistryResult<()> {
    let busy = |reason: String| RegistryError::NodeBusy {
        node: node.id,
        name: node.name().to_string(),
        status: node.status,
        reason,
    };
    if !node.status.is_idle() {
        return Err(busy(format!("provisioning in progress ({})", node.status)));
    }
    if node.ha == Some(HaMembership::Active) {
        return Err(busy("active member of an HA pair".to_string()));
    }
    Ok(())
}

/// Status a freshly discovered node starts in.
pub fn initial_status(identity: &NodeIdentity) -> NodeStatus {
    if identity.mechanism == DiscoveryMechanism::Mapping && identity.needs_manual_boot() {
        NodeStatus::StandingBy
    } else {
        NodeStatus::Unknown
    }
}

/// In-memory registry with an optional write-ahead journal.
pub struct MemoryRegistry {
    nodes: DashMap<NodeId, Node>,
    by_mac: DashMap<MacAddr, NodeId>,
    next_id: AtomicU64,
    journal: Option<Mutex<RegistryJournal>>,
    history_limit: usize,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRegistry {
    /// Creates an empty registry with no journal.
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            by_mac: DashMap::new(),
            next_id: AtomicU64::new(1),
            journal: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Opens a journaled registry, replaying any existing records at `path`.
    pub fn open(path: impl AsRef<Path>) -> RegistryResult<Self> {
        let (journal, records) = RegistryJournal::open(path)?;
        let mut registry = Self::new();
        let replayed = records.len();
        // Ids of removed rows are never reused.
        let mut max_id = 0;
        for record in records {
            if let JournalRecord::Upsert { node } = &record {
                max_id = max_id.max(node.id.as_u64());
            }
            registry.replay(record);
        }
        registry.next_id = AtomicU64::new(max_id + 1);
        registry.journal = Some(Mutex::new(journal));
        info!(records = replayed, nodes = registry.len(), "registry restored from journal");
        Ok(registry)
    }

    /// Caps the per-node status history. Zero keeps everything.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if no row is registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn append(&self, record: &JournalRecord) -> RegistryResult<()> {
        if let Some(journal) = &self.journal {
            journal
                .lock()
                .map_err(|e| RegistryError::Poisoned(e.to_string()))?
                .append(record)?;
        }
        Ok(())
    }

    fn replay(&mut self, record: JournalRecord) {
        match record {
            JournalRecord::Upsert { node } => {
                self.by_mac.insert(node.admin_mac(), node.id);
                self.nodes.insert(node.id, node);
            }
            JournalRecord::Identity { id, identity } => {
                if let Some(mut node) = self.nodes.get_mut(&id) {
                    let old_mac = node.admin_mac();
                    if old_mac != identity.admin_mac {
                        self.by_mac.remove(&old_mac);
                        self.by_mac.insert(identity.admin_mac, id);
                    }
                    node.identity = identity;
                }
            }
            JournalRecord::Status { id, record } => {
                if let Some(mut node) = self.nodes.get_mut(&id) {
                    node.push_status(record, self.history_limit);
                }
            }
            JournalRecord::Hardware { id, facts } => {
                if let Some(mut node) = self.nodes.get_mut(&id) {
                    node.hardware = facts;
                }
            }
            JournalRecord::Role { id, role } => {
                if let Some(mut node) = self.nodes.get_mut(&id) {
                    node.role = role;
                }
            }
            JournalRecord::Ha { id, membership } => {
                if let Some(mut node) = self.nodes.get_mut(&id) {
                    node.ha = membership;
                }
            }
            JournalRecord::Remove { id } => {
                if let Some((_, node)) = self.nodes.remove(&id) {
                    self.by_mac.remove(&node.admin_mac());
                }
            }
        }
    }

    fn with_node_mut<T>(
        &self,
        id: NodeId,
        f: impl FnOnce(&mut Node) -> RegistryResult<T>,
    ) -> RegistryResult<T> {
        let mut node = self
            .nodes
            .get_mut(&id)
            .ok_or(RegistryError::NotFound { node: id })?;
        f(&mut node)
    }
}

impl NodeRegistry for MemoryRegistry {
    fn upsert(&self, identity: NodeIdentity) -> RegistryResult<UpsertOutcome> {
        let mac = identity.admin_mac;
        match self.by_mac.entry(mac) {
            Entry::Occupied(entry) => {
                let id = *entry.get();
                let mut node = self
                    .nodes
                    .get_mut(&id)
                    .ok_or(RegistryError::NotFound { node: id })?;
                let previous_mechanism = node.identity.mechanism;
                self.append(&JournalRecord::Identity {
                    id,
                    identity: identity.clone(),
                })?;
                if previous_mechanism != identity.mechanism {
                    warn!(
                        node = %id,
                        mac = %mac,
                        previous = %previous_mechanism,
                        current = %identity.mechanism,
                        "admin MAC re-registered by a different discovery mechanism"
                    );
                }
                node.identity = identity;
                debug!(node = %id, mac = %mac, "node identity updated");
                Ok(UpsertOutcome::Updated {
                    id,
                    previous_mechanism,
                })
            }
            Entry::Vacant(entry) => {
                let id = NodeId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
                let status = initial_status(&identity);
                let node = Node::new(id, identity, status, Utc::now());
                self.append(&JournalRecord::Upsert { node: node.clone() })?;
                info!(node = %id, mac = %mac, name = %node.name(), %status, "node registered");
                self.nodes.insert(id, node);
                entry.insert(id);
                Ok(UpsertOutcome::Inserted { id })
            }
        }
    }

    fn set_status(&self, id: NodeId, status: NodeStatus) -> RegistryResult<StatusRecord> {
        self.with_node_mut(id, |node| {
            let mut at = Utc::now();
            if at <= node.status_changed_at {
                at = node.status_changed_at + Duration::microseconds(1);
            }
            let record = StatusRecord { status, at };
            self.append(&JournalRecord::Status { id, record })?;
            debug!(node = %id, from = %node.status, to = %status, "status written");
            node.push_status(record, self.history_limit);
            Ok(record)
        })
    }

    fn apply_status(
        &self,
        id: NodeId,
        status: NodeStatus,
        observed_at: DateTime<Utc>,
    ) -> RegistryResult<bool> {
        self.with_node_mut(id, |node| {
            if observed_at <= node.status_changed_at {
                debug!(
                    node = %id,
                    %status,
                    observed_at = %observed_at,
                    latest = %node.status_changed_at,
                    "stale status observation ignored"
                );
                return Ok(false);
            }
            let record = StatusRecord {
                status,
                at: observed_at,
            };
            self.append(&JournalRecord::Status { id, record })?;
            node.push_status(record, self.history_limit);
            Ok(true)
        })
    }

    fn get(&self, id: NodeId) -> RegistryResult<Node> {
        self.nodes
            .get(&id)
            .map(|n| n.value().clone())
            .ok_or(RegistryError::NotFound { node: id })
    }

    fn find_by_mac(&self, mac: &MacAddr) -> Option<Node> {
        let id = *self.by_mac.get(mac)?;
        self.nodes.get(&id).map(|n| n.value().clone())
    }

    fn list(&self, filter: &NodeFilter) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .nodes
            .iter()
            .filter(|n| filter.matches(n.value()))
            .map(|n| n.value().clone())
            .collect();
        nodes.sort_by_key(|n| n.id);
        nodes
    }

    fn remove(&self, id: NodeId) -> RegistryResult<Node> {
        let mac = self
            .nodes
            .get(&id)
            .map(|n| n.admin_mac())
            .ok_or(RegistryError::NotFound { node: id })?;

        let entry = match self.by_mac.entry(mac) {
            Entry::Occupied(entry) if *entry.get() == id => entry,
            _ => return Err(RegistryError::NotFound { node: id }),
        };

        {
            let node = self
                .nodes
                .get(&id)
                .ok_or(RegistryError::NotFound { node: id })?;
            ensure_removable(&node)?;
        }

        self.append(&JournalRecord::Remove { id })?;
        let (_, node) = self
            .nodes
            .remove(&id)
            .ok_or(RegistryError::NotFound { node: id })?;
        entry.remove();
        info!(node = %id, mac = %mac, name = %node.name(), "node removed");
        Ok(node)
    }

    fn update_hardware(&self, id: NodeId, facts: HardwareFacts) -> RegistryResult<()> {
        self.with_node_mut(id, |node| {
            self.append(&JournalRecord::Hardware {
                id,
                facts: facts.clone(),
            })?;
            node.hardware = facts;
            Ok(())
        })
    }

    fn set_role(&self, id: NodeId, role: Option<String>) -> RegistryResult<()> {
        self.with_node_mut(id, |node| {
            self.append(&JournalRecord::Role {
                id,
                role: role.clone(),
            })?;
            node.role = role;
            Ok(())
        })
    }

    fn set_ha_membership(
        &self,
        id: NodeId,
        membership: Option<HaMembership>,
    ) -> RegistryResult<()> {
        self.with_node_mut(id, |node| {
            self.append(&JournalRecord::Ha { id, membership })?;
            node.ha = membership;
            Ok(())
        })
    }
}
