//! Switch-based discovery: map switch ports to the MACs learned on them.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use omnia_registry::{
    BmcMode, DiscoveryMechanism, Ipv4Range, MacAddr, NodeIdentity, PortRanges, SwitchLocation,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::addressing::{fqdn, AdminAddressing, NodeNamer};
use crate::error::{DiscoveryError, Result};

/// SNMPv3 user credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct SnmpCredentials {
    /// SNMPv3 user.
    pub username: String,
    /// Authentication passphrase.
    pub auth_key: String,
    /// Privacy passphrase.
    pub priv_key: String,
}

impl fmt::Debug for SnmpCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnmpCredentials")
            .field("username", &self.username)
            .field("auth_key", &"<redacted>")
            .field("priv_key", &"<redacted>")
            .finish()
    }
}

/// A switch to walk.
#[derive(Clone, Debug)]
pub struct SwitchTarget {
    /// Management address.
    pub ip: Ipv4Addr,
    /// Switch name recorded on nodes.
    pub name: String,
    /// SNMPv3 credentials.
    pub credentials: SnmpCredentials,
}

/// One row of the switch forwarding table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortEntry {
    /// Switch port number.
    pub port: u16,
    /// MAC learned on the port.
    pub mac: MacAddr,
}

/// SNMP client that reads a switch's port to MAC table.
#[async_trait]
pub trait SnmpWalker: Send + Sync {
    /// Reads the port to MAC forwarding table.
    async fn walk_port_table(&self, switch: &SwitchTarget) -> Result<Vec<PortEntry>>;
}

/// Parameters of one switch-based run for a group.
pub struct SwitchDiscovery {
    /// Group every node is placed in.
    pub group: String,
    /// Switch to walk.
    pub switch: SwitchTarget,
    /// Ports to register nodes from.
    pub ports: PortRanges,
    /// Port connecting to the rest of the network; never registered.
    pub uplink_port: Option<u16>,
    /// BMC addresses are handed out from this range in configured port order.
    pub bmc_range: Ipv4Range,
    /// Admin IP correlation for found nodes.
    pub admin: AdminAddressing,
    /// Hostname generator.
    pub namer: NodeNamer,
    /// DNS domain appended to hostnames.
    pub domain: Option<String>,
    /// Bound on the port table walk.
    pub walk_timeout: Duration,
    walker: Arc<dyn SnmpWalker>,
}

impl SwitchDiscovery {
    /// A run with a 60 second walk timeout.
    pub fn new(
        group: impl Into<String>,
        switch: SwitchTarget,
        ports: PortRanges,
        bmc_range: Ipv4Range,
        admin: AdminAddressing,
        walker: Arc<dyn SnmpWalker>,
    ) -> Self {
        let group = group.into();
        Self {
            namer: NodeNamer::new(group.clone()),
            group,
            switch,
            ports,
            uplink_port: None,
            bmc_range,
            admin,
            domain: None,
            walk_timeout: Duration::from_secs(60),
            walker,
        }
    }

    /// Excludes `port` as the uplink.
    pub fn with_uplink(mut self, port: u16) -> Self {
        self.uplink_port = Some(port);
        self
    }

    /// Sets the DNS domain for hostnames.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Replaces the default `<group>node<NNN>` namer.
    pub fn with_namer(mut self, namer: NodeNamer) -> Self {
        self.namer = namer;
        self
    }

    /// Sets the bound on the port table walk.
    pub fn with_walk_timeout(mut self, timeout: Duration) -> Self {
        self.walk_timeout = timeout;
        self
    }

    /// Walks the switch once and yields one identity per configured,
    /// non-uplink port that has a learned MAC, in port order.
    pub fn discover(self) -> BoxStream<'static, Result<NodeIdentity>> {
        stream::once(self.collect())
            .flat_map(|result| match result {
                Ok(identities) => stream::iter(identities.into_iter().map(Ok)).boxed(),
                Err(e) => stream::once(async move { Err(e) }).boxed(),
            })
            .boxed()
    }

    async fn collect(self) -> Result<Vec<NodeIdentity>> {
        let SwitchDiscovery {
            group,
            switch,
            ports,
            uplink_port,
            bmc_range,
            mut admin,
            mut namer,
            domain,
            walk_timeout,
            walker,
        } = self;

        let entries = tokio::time::timeout(walk_timeout, walker.walk_port_table(&switch))
            .await
            .map_err(|_| DiscoveryError::Snmp {
                switch: switch.ip,
                reason: format!("walk timed out after {:?}", walk_timeout),
            })??;

        let mut by_port: BTreeMap<u16, MacAddr> = BTreeMap::new();
        for entry in entries {
            if Some(entry.port) == uplink_port || !ports.contains(entry.port) {
                continue;
            }
            if let Some(existing) = by_port.get(&entry.port) {
                warn!(
                    switch = %switch.ip,
                    port = entry.port,
                    kept = %existing,
                    ignored = %entry.mac,
                    "several MACs learned on one port, keeping the first"
                );
                continue;
            }
            by_port.insert(entry.port, entry.mac);
        }

        // Position of each port in configured order drives the BMC address.
        let port_order: Vec<u16> = ports.ports().filter(|p| Some(*p) != uplink_port).collect();

        let mut identities = Vec::with_capacity(by_port.len());
        for (port, mac) in by_port {
            let Some(position) = port_order.iter().position(|p| *p == port) else {
                continue;
            };
            let Some(bmc_ip) = bmc_range.nth(position as u64) else {
                warn!(switch = %switch.ip, port, range = %bmc_range, "BMC static range exhausted, skipping port");
                continue;
            };
            let node = namer.next_name();
            let mut identity = NodeIdentity::new(node.clone(), mac, DiscoveryMechanism::SwitchBased)
                .with_hostname(fqdn(&node, domain.as_deref()))
                .with_bmc_ip(bmc_ip)
                .with_group(group.clone())
                .with_switch(SwitchLocation {
                    ip: switch.ip,
                    name: switch.name.clone(),
                    port,
                });
            identity.bmc_mode = Some(BmcMode::Static);
            identity.admin_ip = admin.assign(&bmc_range, bmc_ip);
            debug!(node = %node, switch = %switch.ip, port, mac = %mac, "switch port mapped");
            identities.push(identity);
        }

        info!(
            switch = %switch.ip,
            group = %group,
            nodes = identities.len(),
            "switch port walk complete"
        );
        Ok(identities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TableWalker(Vec<PortEntry>);

    #[async_trait]
    impl SnmpWalker for TableWalker {
        async fn walk_port_table(&self, _switch: &SwitchTarget) -> Result<Vec<PortEntry>> {
            Ok(self.0.clone())
        }
    }

    fn target() -> SwitchTarget {
        SwitchTarget {
            ip: Ipv4Addr::new(172, 16, 0, 2),
            name: "leaf1".to_string(),
            credentials: SnmpCredentials {
                username: "omnia".to_string(),
                auth_key: "secret".to_string(),
                priv_key: "secret".to_string(),
            },
        }
    }

    fn entry(port: u16) -> PortEntry {
        PortEntry {
            port,
            mac: MacAddr::new([0xaa, 0, 0, 0, 0, port as u8]),
        }
    }

    #[tokio::test]
    async fn test_uplink_and_unconfigured_ports_excluded() {
        let walker = Arc::new(TableWalker(vec![entry(1), entry(2), entry(3), entry(48)]));
        let discovery = SwitchDiscovery::new(
            "grp3",
            target(),
            "1-4".parse().unwrap(),
            "10.3.1.1-10.3.1.10".parse().unwrap(),
            AdminAddressing::new("10.5.1.1-10.5.1.10".parse().unwrap(), true),
            walker,
        )
        .with_uplink(2);

        let found: Vec<_> = discovery
            .discover()
            .map(|r| r.unwrap())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(found.len(), 2);
        let ports: Vec<u16> = found.iter().map(|n| n.switch.as_ref().unwrap().port).collect();
        assert_eq!(ports, vec![1, 3]);
        assert_eq!(found[0].node, "grp3node001");
        assert_eq!(found[1].bmc_ip, Some(Ipv4Addr::new(10, 3, 1, 2)));
        assert_eq!(found[1].admin_ip, Some(Ipv4Addr::new(10, 5, 1, 2)));
        assert!(found
            .iter()
            .all(|n| n.bmc_mode == Some(BmcMode::Static)
                && n.mechanism == DiscoveryMechanism::SwitchBased));
    }

    #[tokio::test]
    async fn test_walk_failure_surfaces_as_error() {
        struct Failing;
        #[async_trait]
        impl SnmpWalker for Failing {
            async fn walk_port_table(&self, switch: &SwitchTarget) -> Result<Vec<PortEntry>> {
                Err(DiscoveryError::Snmp {
                    switch: switch.ip,
                    reason: "authentication failure".to_string(),
                })
            }
        }
        let discovery = SwitchDiscovery::new(
            "grp3",
            target(),
            "1-4".parse().unwrap(),
            "10.3.1.1-10.3.1.10".parse().unwrap(),
            AdminAddressing::new("10.5.1.1-10.5.1.10".parse().unwrap(), true),
            Arc::new(Failing),
        );
        let items: Vec<_> = discovery.discover().collect::<Vec<_>>().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(DiscoveryError::Snmp { .. })));
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let text = format!("{:?}", target().credentials);
        assert!(!text.contains("secret"));
    }
}
