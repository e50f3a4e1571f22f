#![warn(missing_docs)]

//! Omnia node registry: the `nodeinfo` table of every discovered server,
//! its status history, and the inventory files derived from it.

pub mod error;
pub mod inventory;
pub mod journal;
pub mod net;
pub mod registry;
pub mod types;

pub use error::{RegistryError, RegistryResult};
pub use inventory::Inventory;
pub use journal::{JournalRecord, RegistryJournal};
pub use net::{Ipv4Range, MacAddr, NetParseError, PortRanges};
pub use registry::{
    ensure_removable, initial_status, MemoryRegistry, NodeFilter, NodeRegistry, UpsertOutcome,
};
pub use types::{
    BmcMode, CpuVendor, DiscoveryMechanism, GpuVendor, HaMembership, HardwareFacts, Node, NodeId,
    NodeIdentity, NodeStatus, Placement, StatusRecord, SwitchLocation,
};
