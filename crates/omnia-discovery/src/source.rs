//! The closed set of discovery mechanisms.

use futures::stream::BoxStream;
use omnia_registry::{DiscoveryMechanism, NodeIdentity};

use crate::bmc::{BmcDiscovery, MAX_BMC_NODES};
use crate::error::Result;
use crate::mapping::MappingDiscovery;
use crate::switch::SwitchDiscovery;

/// A configured discovery mechanism.
pub enum DiscoverySource {
    /// Probe BMC address ranges.
    Bmc(BmcDiscovery),
    /// Walk switch port tables.
    SwitchBased(SwitchDiscovery),
    /// Read a mapping file.
    Mapping(MappingDiscovery),
}

impl DiscoverySource {
    /// Mechanism recorded on rows from this source.
    pub fn mechanism(&self) -> DiscoveryMechanism {
        match self {
            DiscoverySource::Bmc(_) => DiscoveryMechanism::Bmc,
            DiscoverySource::SwitchBased(_) => DiscoveryMechanism::SwitchBased,
            DiscoverySource::Mapping(_) => DiscoveryMechanism::Mapping,
        }
    }

    /// Most nodes a single run of this source may register, if bounded.
    pub fn capacity(&self) -> Option<usize> {
        match self {
            DiscoverySource::Bmc(_) => Some(MAX_BMC_NODES),
            DiscoverySource::SwitchBased(_) | DiscoverySource::Mapping(_) => None,
        }
    }

    /// Group the source was configured for, when it has a single one.
    pub fn group(&self) -> Option<&str> {
        match self {
            DiscoverySource::Bmc(bmc) => Some(&bmc.group),
            DiscoverySource::SwitchBased(switch) => Some(&switch.group),
            DiscoverySource::Mapping(_) => None,
        }
    }

    /// Streams identities from the configured mechanism.
    pub fn discover(self) -> BoxStream<'static, Result<NodeIdentity>> {
        match self {
            DiscoverySource::Bmc(bmc) => bmc.discover(),
            DiscoverySource::SwitchBased(switch) => switch.discover(),
            DiscoverySource::Mapping(mapping) => mapping.discover(),
        }
    }
}

impl From<BmcDiscovery> for DiscoverySource {
    fn from(source: BmcDiscovery) -> Self {
        DiscoverySource::Bmc(source)
    }
}

impl From<SwitchDiscovery> for DiscoverySource {
    fn from(source: SwitchDiscovery) -> Self {
        DiscoverySource::SwitchBased(source)
    }
}

impl From<MappingDiscovery> for DiscoverySource {
    fn from(source: MappingDiscovery) -> Self {
        DiscoverySource::Mapping(source)
    }
}
