//! Row types of the node registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::net::MacAddr;

/// Registry-assigned identifier of a node row (the `id` column of `nodeinfo`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Creates a NodeId from a raw u64 value
    pub fn new(id: u64) -> Self {
        NodeId(id)
    }

    /// Returns the raw u64 value of this node ID
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Discovery and provisioning status of a node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeStatus {
    /// Discovered, not yet powered on.
    Unknown,
    /// Power-on requested.
    PoweringOn,
    /// Power-off requested.
    PoweringOff,
    /// The BMC answered.
    BmcReady,
    /// Installing the OS.
    Installing,
    /// Booting the installed OS.
    Booting,
    /// Running post-boot configuration.
    PostBooting,
    /// Provisioned and up.
    Booted,
    /// Provisioning failed.
    Failed,
    /// Answering pings.
    Ping,
    /// Not answering pings.
    NoPing,
    /// Waiting for a manual PXE boot.
    StandingBy,
}

impl NodeStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [NodeStatus; 12] = [
        NodeStatus::Unknown,
        NodeStatus::StandingBy,
        NodeStatus::PoweringOn,
        NodeStatus::BmcReady,
        NodeStatus::Installing,
        NodeStatus::Booting,
        NodeStatus::PostBooting,
        NodeStatus::Booted,
        NodeStatus::Ping,
        NodeStatus::NoPing,
        NodeStatus::PoweringOff,
        NodeStatus::Failed,
    ];

    /// Kebab-case name as stored in `nodeinfo`.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Unknown => "unknown",
            NodeStatus::PoweringOn => "powering-on",
            NodeStatus::PoweringOff => "powering-off",
            NodeStatus::BmcReady => "bmc-ready",
            NodeStatus::Installing => "installing",
            NodeStatus::Booting => "booting",
            NodeStatus::PostBooting => "post-booting",
            NodeStatus::Booted => "booted",
            NodeStatus::Failed => "failed",
            NodeStatus::Ping => "ping",
            NodeStatus::NoPing => "no-ping",
            NodeStatus::StandingBy => "standing-by",
        }
    }

    /// Statuses in which no provisioning step is in flight, so the row may be removed.
    pub fn is_idle(&self) -> bool {
        matches!(
            self,
            NodeStatus::Unknown
                | NodeStatus::Booted
                | NodeStatus::Failed
                | NodeStatus::Ping
                | NodeStatus::NoPing
                | NodeStatus::StandingBy
        )
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        let status = match normalized.as_str() {
            "unknown" => NodeStatus::Unknown,
            "powering-on" => NodeStatus::PoweringOn,
            "powering-off" => NodeStatus::PoweringOff,
            "bmc-ready" | "bmcready" => NodeStatus::BmcReady,
            "installing" => NodeStatus::Installing,
            "booting" => NodeStatus::Booting,
            "post-booting" | "postbooting" => NodeStatus::PostBooting,
            "booted" => NodeStatus::Booted,
            "failed" => NodeStatus::Failed,
            "ping" => NodeStatus::Ping,
            "no-ping" | "noping" => NodeStatus::NoPing,
            "standing-by" | "standingby" => NodeStatus::StandingBy,
            _ => return Err(format!("unknown node status '{}'", s)),
        };
        Ok(status)
    }
}

/// How a node entered the registry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryMechanism {
    /// BMC range probing.
    Bmc,
    /// Switch port walk.
    SwitchBased,
    /// Mapping file.
    Mapping,
}

impl DiscoveryMechanism {
    /// Kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryMechanism::Bmc => "bmc",
            DiscoveryMechanism::SwitchBased => "switch-based",
            DiscoveryMechanism::Mapping => "mapping",
        }
    }
}

impl fmt::Display for DiscoveryMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscoveryMechanism {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "bmc" => Ok(DiscoveryMechanism::Bmc),
            "switch-based" => Ok(DiscoveryMechanism::SwitchBased),
            "mapping" => Ok(DiscoveryMechanism::Mapping),
            other => Err(format!("unknown discovery mechanism '{}'", other)),
        }
    }
}

/// BMC address assignment mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BmcMode {
    /// Address configured on the BMC.
    Static,
    /// Address leased by DHCP.
    Dynamic,
}

/// Position of a node inside a management HA pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HaMembership {
    /// Holds the virtual IP.
    Active,
    /// Standby.
    Passive,
}

/// CPU vendor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuVendor {
    /// Intel.
    Intel,
    /// AMD.
    Amd,
}

/// GPU vendor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuVendor {
    /// NVIDIA.
    Nvidia,
    /// AMD.
    Amd,
    /// Intel.
    Intel,
}

/// CPU/GPU inventory reported by the node during PXE boot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareFacts {
    /// CPU vendor, if any CPU line was seen.
    pub cpu: Option<CpuVendor>,
    /// GPU vendor; `None` when no GPU was found.
    pub gpu: Option<GpuVendor>,
    /// CPU count.
    pub cpu_count: u32,
    /// GPU count.
    pub gpu_count: u32,
}

/// Switch port a node was found on by a switch-based discovery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchLocation {
    /// Switch management address.
    pub ip: Ipv4Addr,
    /// Switch name.
    pub name: String,
    /// Port number.
    pub port: u16,
}

/// Group-derived placement columns.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    /// Group the node belongs to.
    pub group_name: Option<String>,
    /// Cluster the group belongs to.
    pub cluster_name: Option<String>,
    /// Service tag of the service node provisioning the group.
    pub parent: Option<String>,
    /// Physical location.
    pub location_id: Option<String>,
    /// CPU architecture.
    pub architecture: Option<String>,
}

/// Everything a discovery mechanism knows about a node.
///
/// `admin_mac` is the natural key: re-discovering the same MAC replaces the
/// identity of the existing row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Vendor service tag.
    pub service_tag: Option<String>,
    /// Short node name.
    pub node: String,
    /// Fully qualified hostname.
    pub hostname: String,
    /// PXE interface MAC; the natural key.
    pub admin_mac: MacAddr,
    /// Admin network address.
    pub admin_ip: Option<Ipv4Addr>,
    /// BMC address.
    pub bmc_ip: Option<Ipv4Addr>,
    /// Mechanism that found the node.
    pub mechanism: DiscoveryMechanism,
    /// BMC address mode.
    pub bmc_mode: Option<BmcMode>,
    /// Switch port, for switch-based discovery.
    pub switch: Option<SwitchLocation>,
    /// Group placement columns.
    pub placement: Placement,
}

impl NodeIdentity {
    /// An identity with the hostname set to `node`.
    pub fn new(node: impl Into<String>, admin_mac: MacAddr, mechanism: DiscoveryMechanism) -> Self {
        let node = node.into();
        Self {
            service_tag: None,
            hostname: node.clone(),
            node,
            admin_mac,
            admin_ip: None,
            bmc_ip: None,
            mechanism,
            bmc_mode: None,
            switch: None,
            placement: Placement::default(),
        }
    }

    /// Sets the service tag.
    pub fn with_service_tag(mut self, tag: impl Into<String>) -> Self {
        self.service_tag = Some(tag.into());
        self
    }

    /// Sets the hostname.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Sets the admin address.
    pub fn with_admin_ip(mut self, ip: Ipv4Addr) -> Self {
        self.admin_ip = Some(ip);
        self
    }

    /// Sets the BMC address.
    pub fn with_bmc_ip(mut self, ip: Ipv4Addr) -> Self {
        self.bmc_ip = Some(ip);
        self
    }

    /// Sets the group name.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.placement.group_name = Some(group.into());
        self
    }

    /// Replaces the placement columns.
    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    /// Sets the switch location.
    pub fn with_switch(mut self, switch: SwitchLocation) -> Self {
        self.switch = Some(switch);
        self
    }

    /// A node without a BMC address cannot be powered on remotely and waits
    /// for a manual PXE boot.
    pub fn needs_manual_boot(&self) -> bool {
        self.bmc_ip.is_none()
    }
}

/// One timestamped status write.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Status written.
    pub status: NodeStatus,
    /// Registry time of the write.
    pub at: DateTime<Utc>,
}

/// A registry row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Registry id.
    pub id: NodeId,
    /// What discovery reported.
    pub identity: NodeIdentity,
    /// Current status.
    pub status: NodeStatus,
    /// When the current status was written.
    pub status_changed_at: DateTime<Utc>,
    /// Status writes, oldest first.
    pub history: Vec<StatusRecord>,
    /// Comma-separated roles.
    pub role: Option<String>,
    /// Hardware reported at PXE boot.
    pub hardware: HardwareFacts,
    /// HA marker for management nodes.
    pub ha: Option<HaMembership>,
    /// When the row was created.
    pub created_at: DateTime<Utc>,
}

impl Node {
    /// A row whose history holds `status` at `now`.
    pub fn new(id: NodeId, identity: NodeIdentity, status: NodeStatus, now: DateTime<Utc>) -> Self {
        Self {
            id,
            identity,
            status,
            status_changed_at: now,
            history: vec![StatusRecord { status, at: now }],
            role: None,
            hardware: HardwareFacts::default(),
            ha: None,
            created_at: now,
        }
    }

    /// Short node name (the `node` column).
    pub fn name(&self) -> &str {
        &self.identity.node
    }

    /// The row's key.
    pub fn admin_mac(&self) -> MacAddr {
        self.identity.admin_mac
    }

    /// Placement group, if any.
    pub fn group(&self) -> Option<&str> {
        self.identity.placement.group_name.as_deref()
    }

    /// Appends a status write, keeping at most `limit` history entries.
    pub fn push_status(&mut self, record: StatusRecord, limit: usize) {
        self.status = record.status;
        self.status_changed_at = record.at;
        self.history.push(record);
        if limit > 0 && self.history.len() > limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
        }
    }
}
