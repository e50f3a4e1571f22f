//! Mapping-file discovery.
//!
//! The mapping file is a CSV with the exact, case-sensitive header
//! `SERVICE_TAG,HOSTNAME,ADMIN_MAC,ADMIN_IP,BMC_IP`, optionally with a leading
//! `GROUP_NAME` column. An empty `BMC_IP` marks a node that will be PXE
//! booted by hand.

use futures::stream::{self, BoxStream, StreamExt};
use omnia_registry::{DiscoveryMechanism, MacAddr, NodeIdentity};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::{debug, info};

use crate::addressing::fqdn;
use crate::error::{DiscoveryError, Result};

const COLUMNS: [&str; 5] = ["SERVICE_TAG", "HOSTNAME", "ADMIN_MAC", "ADMIN_IP", "BMC_IP"];
const GROUP_COLUMN: &str = "GROUP_NAME";

/// One data row of a mapping file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRow {
    /// 1-based line number in the file.
    pub line: u64,
    /// `GROUP_NAME` column, when present.
    pub group_name: Option<String>,
    /// Vendor service tag.
    pub service_tag: Option<String>,
    /// Short hostname; becomes the node name.
    pub hostname: String,
    /// PXE interface MAC.
    pub admin_mac: MacAddr,
    /// Fixed admin address.
    pub admin_ip: Option<Ipv4Addr>,
    /// BMC address; rows without one wait for a manual boot.
    pub bmc_ip: Option<Ipv4Addr>,
}

/// Parses a mapping file. Any malformed header or row fails the whole file.
pub fn parse_mapping<R: Read>(reader: R) -> Result<Vec<MappingRow>> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(false)
        .from_reader(reader);

    let header = csv.headers().map_err(|e| DiscoveryError::MappingFile {
        line: 1,
        reason: e.to_string(),
    })?;
    let fields: Vec<&str> = header.iter().collect();
    let has_group = if fields.as_slice() == COLUMNS.as_slice() {
        false
    } else if fields.first() == Some(&GROUP_COLUMN) && &fields[1..] == COLUMNS.as_slice() {
        true
    } else {
        return Err(DiscoveryError::MappingFile {
            line: 1,
            reason: format!(
                "header must be '{}' optionally preceded by {}, found '{}'",
                COLUMNS.join(","),
                GROUP_COLUMN,
                fields.join(",")
            ),
        });
    };
    let offset = usize::from(has_group);

    let mut rows = Vec::new();
    for record in csv.records() {
        let record = record.map_err(|e| DiscoveryError::MappingFile {
            line: e.position().map(|p| p.line()).unwrap_or(0),
            reason: e.to_string(),
        })?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        if record.iter().all(str::is_empty) {
            continue;
        }
        let field = |i: usize| record.get(i + offset).unwrap_or("");
        let bad = |reason: String| DiscoveryError::MappingFile { line, reason };

        let hostname = field(1).to_string();
        if hostname.is_empty() {
            return Err(bad("HOSTNAME is empty".to_string()));
        }
        let admin_mac: MacAddr = field(2)
            .parse()
            .map_err(|e| bad(format!("ADMIN_MAC: {}", e)))?;
        let admin_ip = optional_ip(field(3)).map_err(|v| bad(format!("ADMIN_IP: invalid address '{}'", v)))?;
        let bmc_ip = optional_ip(field(4)).map_err(|v| bad(format!("BMC_IP: invalid address '{}'", v)))?;
        let group_name = if has_group {
            Some(record.get(0).unwrap_or("").to_string()).filter(|g| !g.is_empty())
        } else {
            None
        };
        let service_tag = Some(field(0).to_string()).filter(|t| !t.is_empty());

        rows.push(MappingRow {
            line,
            group_name,
            service_tag,
            hostname,
            admin_mac,
            admin_ip,
            bmc_ip,
        });
    }
    Ok(rows)
}

fn optional_ip(value: &str) -> std::result::Result<Option<Ipv4Addr>, String> {
    if value.is_empty() {
        return Ok(None);
    }
    value.parse().map(Some).map_err(|_| value.to_string())
}

/// A parsed mapping file ready to feed the registry.
#[derive(Clone, Debug)]
pub struct MappingDiscovery {
    rows: Vec<MappingRow>,
    domain: Option<String>,
    default_group: Option<String>,
}

impl MappingDiscovery {
    /// Discovery over rows already parsed.
    pub fn from_rows(rows: Vec<MappingRow>) -> Self {
        Self {
            rows,
            domain: None,
            default_group: None,
        }
    }

    /// Parses a mapping CSV from `reader`.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(Self::from_rows(parse_mapping(reader)?))
    }

    /// Parses the mapping CSV at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let discovery = Self::from_reader(File::open(path)?)?;
        info!(file = %path.display(), rows = discovery.rows.len(), "mapping file parsed");
        Ok(discovery)
    }

    /// Sets the DNS domain for hostnames.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Group for rows without a `GROUP_NAME` column.
    pub fn with_default_group(mut self, group: impl Into<String>) -> Self {
        self.default_group = Some(group.into());
        self
    }

    /// Parsed rows in file order.
    pub fn rows(&self) -> &[MappingRow] {
        &self.rows
    }

    /// Yields one identity per row, in file order. Rows repeating a MAC are
    /// all yielded; the registry keeps a single row for them.
    pub fn discover(self) -> BoxStream<'static, Result<NodeIdentity>> {
        let MappingDiscovery {
            rows,
            domain,
            default_group,
        } = self;
        let identities = rows.into_iter().map(move |row| {
            let mut identity =
                NodeIdentity::new(row.hostname.clone(), row.admin_mac, DiscoveryMechanism::Mapping)
                    .with_hostname(fqdn(&row.hostname, domain.as_deref()));
            identity.service_tag = row.service_tag;
            identity.admin_ip = row.admin_ip;
            identity.bmc_ip = row.bmc_ip;
            identity.placement.group_name = row.group_name.or_else(|| default_group.clone());
            if identity.needs_manual_boot() {
                debug!(node = %identity.node, line = row.line, "no BMC address, node waits for manual PXE boot");
            }
            Ok(identity)
        });
        stream::iter(identities).boxed()
    }
}
