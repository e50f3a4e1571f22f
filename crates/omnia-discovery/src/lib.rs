#![warn(missing_docs)]

//! Omnia node discovery: BMC range probing, switch port walks and static
//! mapping files, all feeding the node registry.

pub mod addressing;
pub mod bmc;
pub mod error;
pub mod mapping;
pub mod run;
pub mod source;
pub mod switch;

pub use addressing::{AdminAddressing, NodeNamer};
pub use bmc::{BmcDiscovery, BmcProbe, BmcProber, MAX_BMC_NODES};
pub use error::{DiscoveryError, Result};
pub use mapping::{parse_mapping, MappingDiscovery, MappingRow};
pub use run::{DiscoveryReport, DiscoveryRun};
pub use source::DiscoverySource;
pub use switch::{PortEntry, SnmpCredentials, SnmpWalker, SwitchDiscovery, SwitchTarget};
