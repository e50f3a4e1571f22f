//! BMC discovery: probe every address of the configured BMC ranges.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use omnia_registry::{BmcMode, DiscoveryMechanism, Ipv4Range, MacAddr, NodeIdentity};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::addressing::{fqdn, AdminAddressing, NodeNamer};
use crate::error::{DiscoveryError, Result};

/// Most nodes one BMC run may register.
pub const MAX_BMC_NODES: usize = 1000;

/// What a responding BMC reports.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BmcProbe {
    /// MAC of the host's admin (PXE) interface.
    pub admin_mac: MacAddr,
    /// Vendor service tag, when the BMC reports one.
    pub service_tag: Option<String>,
}

/// IPMI/Redfish client used to query one BMC address.
#[async_trait]
pub trait BmcProber: Send + Sync {
    /// `Ok(None)` when nothing answers at `bmc_ip`.
    async fn probe(&self, bmc_ip: Ipv4Addr) -> Result<Option<BmcProbe>>;
}

/// Parameters of one BMC discovery run for a group.
pub struct BmcDiscovery {
    /// Group every responder is placed in.
    pub group: String,
    /// BMC addresses assigned statically.
    pub static_range: Ipv4Range,
    /// BMC addresses handed out by DHCP, probed after the static range.
    pub dynamic_range: Option<Ipv4Range>,
    /// Admin IP correlation for responders.
    pub admin: AdminAddressing,
    /// Hostname generator.
    pub namer: NodeNamer,
    /// DNS domain appended to hostnames.
    pub domain: Option<String>,
    /// Probes in flight at once.
    pub parallelism: usize,
    /// Bound on one probe.
    pub probe_timeout: Duration,
    prober: Arc<dyn BmcProber>,
}

impl BmcDiscovery {
    /// A run over `static_range` with 32 probes in flight and a 10 second
    /// probe timeout.
    pub fn new(
        group: impl Into<String>,
        static_range: Ipv4Range,
        admin: AdminAddressing,
        prober: Arc<dyn BmcProber>,
    ) -> Self {
        let group = group.into();
        Self {
            namer: NodeNamer::new(group.clone()),
            group,
            static_range,
            dynamic_range: None,
            admin,
            domain: None,
            parallelism: 32,
            probe_timeout: Duration::from_secs(10),
            prober,
        }
    }

    /// Also probes `range`, after the static range.
    pub fn with_dynamic_range(mut self, range: Ipv4Range) -> Self {
        self.dynamic_range = Some(range);
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

    /// Sets how many probes run at once.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Sets the bound on one probe.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(DiscoveryError::InvalidConfig(
                "BMC probe parallelism must be at least 1".to_string(),
            ));
        }
        if let Some(dynamic) = &self.dynamic_range {
            if dynamic.overlaps(&self.static_range) {
                return Err(DiscoveryError::InvalidConfig(format!(
                    "BMC dynamic range {} overlaps static range {}",
                    dynamic, self.static_range
                )));
            }
        }
        Ok(())
    }

    /// Probes every address, at most `parallelism` at a time, and yields one
    /// identity per responder in address order. Probes that fail or exceed
    /// `probe_timeout` are logged and skipped.
    pub fn discover(self) -> BoxStream<'static, Result<NodeIdentity>> {
        if let Err(e) = self.validate() {
            return stream::once(async move { Err(e) }).boxed();
        }

        let BmcDiscovery {
            group,
            static_range,
            dynamic_range,
            mut admin,
            mut namer,
            domain,
            parallelism,
            probe_timeout,
            prober,
        } = self;

        // Addresses are generated as the stream pulls them.
        let targets = static_range
            .iter()
            .map(|ip| (ip, BmcMode::Static))
            .chain(
                dynamic_range
                    .into_iter()
                    .flat_map(|r| r.iter().map(|ip| (ip, BmcMode::Dynamic))),
            );

        stream::iter(targets)
            .map(move |(bmc_ip, mode)| {
                let prober = Arc::clone(&prober);
                async move {
                    match tokio::time::timeout(probe_timeout, prober.probe(bmc_ip)).await {
                        Ok(Ok(Some(found))) => Some((bmc_ip, mode, found)),
                        Ok(Ok(None)) => None,
                        Ok(Err(e)) => {
                            warn!(bmc_ip = %bmc_ip, error = %e, "BMC probe failed, skipping");
                            None
                        }
                        Err(_) => {
                            warn!(bmc_ip = %bmc_ip, timeout = ?probe_timeout, "BMC probe timed out, skipping");
                            None
                        }
                    }
                }
            })
            .buffered(parallelism)
            .filter_map(|found| async move { found })
            .map(move |(bmc_ip, mode, found)| {
                let node = namer.next_name();
                let correlation_range = match mode {
                    BmcMode::Static => static_range,
                    BmcMode::Dynamic => dynamic_range.unwrap_or(static_range),
                };
                let mut identity =
                    NodeIdentity::new(node.clone(), found.admin_mac, DiscoveryMechanism::Bmc)
                        .with_hostname(fqdn(&node, domain.as_deref()))
                        .with_bmc_ip(bmc_ip)
                        .with_group(group.clone());
                identity.bmc_mode = Some(mode);
                identity.service_tag = found.service_tag;
                match admin.assign(&correlation_range, bmc_ip) {
                    Some(admin_ip) => identity.admin_ip = Some(admin_ip),
                    None => warn!(node = %node, "admin range exhausted, node has no admin IP"),
                }
                debug!(node = %node, bmc_ip = %bmc_ip, mac = %identity.admin_mac, "BMC responder");
                Ok(identity)
            })
            .boxed()
    }
}
