//! Admin IP assignment and node naming for discovered nodes.

use omnia_registry::Ipv4Range;
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// Hands out admin network addresses.
///
/// With correlation enabled a node gets the admin address at the same offset
/// as its BMC address within the BMC range. When that address is outside the
/// admin range or already taken, the next free address from the start of the
/// admin range is used instead.
#[derive(Clone, Debug)]
pub struct AdminAddressing {
    range: Ipv4Range,
    correlate: bool,
    used: HashSet<Ipv4Addr>,
    cursor: u64,
}

impl AdminAddressing {
    /// Assigns from `range`; with `correlate`, at the BMC's offset when free.
    pub fn new(range: Ipv4Range, correlate: bool) -> Self {
        Self {
            range,
            correlate,
            used: HashSet::new(),
            cursor: 0,
        }
    }

    /// Marks addresses already held by registered nodes.
    pub fn with_used(mut self, used: impl IntoIterator<Item = Ipv4Addr>) -> Self {
        self.used.extend(used);
        self
    }

    /// The admin range addresses come from.
    pub fn range(&self) -> Ipv4Range {
        self.range
    }

    /// Assigns an admin address for the node whose BMC sits at `bmc_ip`
    /// inside `bmc_range`. Returns `None` once the admin range is exhausted.
    pub fn assign(&mut self, bmc_range: &Ipv4Range, bmc_ip: Ipv4Addr) -> Option<Ipv4Addr> {
        if self.correlate {
            let candidate = bmc_range
                .offset_of(bmc_ip)
                .and_then(|offset| self.range.nth(offset));
            if let Some(ip) = candidate {
                if self.used.insert(ip) {
                    return Some(ip);
                }
            }
        }
        self.next_free()
    }

    /// Next unused address in ascending order.
    pub fn next_free(&mut self) -> Option<Ipv4Addr> {
        while let Some(ip) = self.range.nth(self.cursor) {
            self.cursor += 1;
            if self.used.insert(ip) {
                return Some(ip);
            }
        }
        None
    }
}

/// Produces `<group>node<NNN>` names.
#[derive(Clone, Debug)]
pub struct NodeNamer {
    group: String,
    next: u32,
}

impl NodeNamer {
    /// Numbering starts at `<group>node001`.
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            next: 1,
        }
    }

    /// Continues numbering after the highest `<group>node<NNN>` in `existing`.
    pub fn resume<'a>(group: impl Into<String>, existing: impl IntoIterator<Item = &'a str>) -> Self {
        let group = group.into();
        let prefix = format!("{}node", group);
        let highest = existing
            .into_iter()
            .filter_map(|name| name.strip_prefix(prefix.as_str()))
            .filter(|digits| digits.len() == 3 && digits.bytes().all(|b| b.is_ascii_digit()))
            .filter_map(|digits| digits.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        Self {
            group,
            next: highest + 1,
        }
    }

    /// The next name; numbers are never reused.
    pub fn next_name(&mut self) -> String {
        let name = format!("{}node{:03}", self.group, self.next);
        self.next += 1;
        name
    }
}

/// Joins a short name and an optional DNS domain.
pub fn fqdn(node: &str, domain: Option<&str>) -> String {
    match domain.map(str::trim).filter(|d| !d.is_empty()) {
        Some(domain) => format!("{}.{}", node, domain),
        None => node.to_string(),
    }
}
