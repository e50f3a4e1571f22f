//! Common test utilities and fixtures for integration tests.

use async_trait::async_trait;
use omnia_discovery::{BmcProbe, BmcProber, Result};
use omnia_registry::MacAddr;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A BMC prober where every address answers with a MAC derived from the IP.
pub struct EveryAddressAnswers {
    probes: AtomicUsize,
}

impl EveryAddressAnswers {
    pub fn new() -> Self {
        Self {
            probes: AtomicUsize::new(0),
        }
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BmcProber for EveryAddressAnswers {
    async fn probe(&self, bmc_ip: Ipv4Addr) -> Result<Option<BmcProbe>> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let [a, b, c, d] = bmc_ip.octets();
        Ok(Some(BmcProbe {
            admin_mac: MacAddr::new([0x02, 0x00, a, b, c, d]),
            service_tag: Some(format!("SVC{:03}{:03}", c, d)),
        }))
    }
}

/// Mapping file text with a row per `(hostname, mac, bmc_ip)`.
pub fn mapping_csv(rows: &[(&str, &str, Option<&str>)]) -> String {
    let mut text = String::from("GROUP_NAME,SERVICE_TAG,HOSTNAME,ADMIN_MAC,ADMIN_IP,BMC_IP\n");
    for (i, (host, mac, bmc)) in rows.iter().enumerate() {
        text.push_str(&format!(
            "grp1,TAG{},{},{},10.5.0.{},{}\n",
            i,
            host,
            mac,
            i + 1,
            bmc.unwrap_or("")
        ));
    }
    text
}
