//! Address types shared by discovery, provisioning and configuration validation.
//!
//! `MacAddr` is the natural key of the node registry. `Ipv4Range` and
//! `PortRanges` follow the textual forms used in the roles/groups document
//! (`10.3.0.1-10.3.0.200`, `1-24,30`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

/// Parse failures for the address types in this module.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetParseError {
    /// Not six hex octets separated by `:` or `-`.
    #[error("invalid MAC address '{0}'")]
    Mac(String),
    /// Malformed range, or start address after end address.
    #[error("invalid IPv4 range '{0}'")]
    Range(String),
    /// Malformed port list, or a segment whose start is after its end.
    #[error("invalid port range '{0}'")]
    Ports(String),
}

/// A 48-bit hardware address, displayed as lowercase colon-separated hex.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    /// Creates a MAC address from raw octets.
    pub fn new(octets: [u8; 6]) -> Self {
        MacAddr(octets)
    }

    /// Returns the raw octets.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for MacAddr {
    type Err = NetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parts: Vec<&str> = trimmed.split(|c| c == ':' || c == '-').collect();
        if parts.len() != 6 {
            return Err(NetParseError::Mac(s.to_string()));
        }
        let mut octets = [0u8; 6];
        for (slot, part) in octets.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(NetParseError::Mac(s.to_string()));
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| NetParseError::Mac(s.to_string()))?;
        }
        Ok(MacAddr(octets))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl TryFrom<String> for MacAddr {
    type Error = NetParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.to_string()
    }
}

/// An inclusive range of IPv4 addresses.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Range {
    start: Ipv4Addr,
    end: Ipv4Addr,
}

impl Ipv4Range {
    /// Creates a range; fails when `start` is after `end`.
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Result<Self, NetParseError> {
        if start > end {
            return Err(NetParseError::Range(format!("{}-{}", start, end)));
        }
        Ok(Self { start, end })
    }

    /// First address of the range.
    pub fn start(&self) -> Ipv4Addr {
        self.start
    }

    /// Last address of the range.
    pub fn end(&self) -> Ipv4Addr {
        self.end
    }

    /// Number of addresses covered, both ends included.
    pub fn host_count(&self) -> u64 {
        u64::from(u32::from(self.end)) - u64::from(u32::from(self.start)) + 1
    }

    /// Returns true if `ip` lies within the range.
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.start <= ip && ip <= self.end
    }

    /// Returns true if the two ranges share at least one address.
    pub fn overlaps(&self, other: &Ipv4Range) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// The address `n` positions after the start, if still inside the range.
    pub fn nth(&self, n: u64) -> Option<Ipv4Addr> {
        let candidate = u64::from(u32::from(self.start)).checked_add(n)?;
        if candidate > u64::from(u32::from(self.end)) {
            return None;
        }
        Some(Ipv4Addr::from(candidate as u32))
    }

    /// Position of `ip` relative to the start of the range.
    pub fn offset_of(&self, ip: Ipv4Addr) -> Option<u64> {
        if !self.contains(ip) {
            return None;
        }
        Some(u64::from(u32::from(ip)) - u64::from(u32::from(self.start)))
    }

    /// Iterates every address of the range in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Ipv4Addr> {
        (u32::from(self.start)..=u32::from(self.end)).map(Ipv4Addr::from)
    }
}

impl FromStr for Ipv4Range {
    type Err = NetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| NetParseError::Range(s.to_string()))?;
        let start: Ipv4Addr = start
            .trim()
            .parse()
            .map_err(|_| NetParseError::Range(s.to_string()))?;
        let end: Ipv4Addr = end
            .trim()
            .parse()
            .map_err(|_| NetParseError::Range(s.to_string()))?;
        Ipv4Range::new(start, end).map_err(|_| NetParseError::Range(s.to_string()))
    }
}

impl fmt::Display for Ipv4Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl TryFrom<String> for Ipv4Range {
    type Error = NetParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ipv4Range> for String {
    fn from(range: Ipv4Range) -> Self {
        range.to_string()
    }
}

/// A comma-separated list of switch ports and port spans, e.g. `1-24,30`.
///
/// Segments keep their configured order; overlap between segments is legal to
/// parse and reported by [`PortRanges::has_internal_overlap`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortRanges {
    segments: Vec<(u16, u16)>,
}

impl PortRanges {
    /// Builds a list from explicit `(start, end)` segments.
    pub fn from_segments(segments: Vec<(u16, u16)>) -> Result<Self, NetParseError> {
        if let Some((s, e)) = segments.iter().find(|(s, e)| s > e) {
            return Err(NetParseError::Ports(format!("{}-{}", s, e)));
        }
        Ok(Self { segments })
    }

    /// The configured segments, in order.
    pub fn segments(&self) -> &[(u16, u16)] {
        &self.segments
    }

    /// Returns true if `port` is covered by any segment.
    pub fn contains(&self, port: u16) -> bool {
        self.segments.iter().any(|&(s, e)| s <= port && port <= e)
    }

    /// Every covered port, segment by segment.
    pub fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.segments.iter().flat_map(|&(s, e)| s..=e)
    }

    /// Total number of ports, counting duplicates between segments.
    pub fn port_count(&self) -> usize {
        self.segments
            .iter()
            .map(|&(s, e)| usize::from(e - s) + 1)
            .sum()
    }

    /// Returns true if two segments of this list cover the same port.
    pub fn has_internal_overlap(&self) -> bool {
        for (i, a) in self.segments.iter().enumerate() {
            for b in &self.segments[i + 1..] {
                if a.0 <= b.1 && b.0 <= a.1 {
                    return true;
                }
            }
        }
        false
    }

    /// Returns true if any port is covered by both lists.
    pub fn overlaps(&self, other: &PortRanges) -> bool {
        self.segments
            .iter()
            .any(|a| other.segments.iter().any(|b| a.0 <= b.1 && b.0 <= a.1))
    }
}

impl FromStr for PortRanges {
    type Err = NetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut segments = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let bad = || NetParseError::Ports(part.to_string());
            let (start, end) = match part.split_once('-') {
                Some((a, b)) => (
                    a.trim().parse::<u16>().map_err(|_| bad())?,
                    b.trim().parse::<u16>().map_err(|_| bad())?,
                ),
                None => {
                    let p = part.parse::<u16>().map_err(|_| bad())?;
                    (p, p)
                }
            };
            if start > end {
                return Err(bad());
            }
            segments.push((start, end));
        }
        if segments.is_empty() {
            return Err(NetParseError::Ports(s.to_string()));
        }
        Ok(Self { segments })
    }
}

impl fmt::Display for PortRanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .segments
            .iter()
            .map(|&(s, e)| {
                if s == e {
                    s.to_string()
                } else {
                    format!("{}-{}", s, e)
                }
            })
            .collect();
        f.write_str(&parts.join(","))
    }
}

impl TryFrom<String> for PortRanges {
    type Error = NetParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PortRanges> for String {
    fn from(ports: PortRanges) -> Self {
        ports.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_parse_normalizes_case_and_separator() {
        let a: MacAddr = "AA-BB-CC-00-11-22".parse().unwrap();
        let b: MacAddr = "aa:bb:cc:00:11:22".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "aa:bb:cc:00:11:22");
    }

    #[test]
    fn test_mac_parse_rejects_short_and_garbage() {
        assert!("aa:bb:cc:00:11".parse::<MacAddr>().is_err());
        assert!("aa:bb:cc:00:11:zz".parse::<MacAddr>().is_err());
        assert!("aabbcc001122".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_range_parse_and_bounds() {
        let r: Ipv4Range = "10.3.0.1-10.3.0.10".parse().unwrap();
        assert_eq!(r.host_count(), 10);
        assert!(r.contains(Ipv4Addr::new(10, 3, 0, 5)));
        assert!(!r.contains(Ipv4Addr::new(10, 3, 0, 11)));
        assert_eq!(r.nth(9), Some(Ipv4Addr::new(10, 3, 0, 10)));
        assert_eq!(r.nth(10), None);
        assert_eq!(r.offset_of(Ipv4Addr::new(10, 3, 0, 3)), Some(2));
    }

    #[test]
    fn test_range_rejects_reversed() {
        assert!("10.3.0.10-10.3.0.1".parse::<Ipv4Range>().is_err());
        assert!("10.3.0.10".parse::<Ipv4Range>().is_err());
    }

    #[test]
    fn test_range_overlap() {
        let a: Ipv4Range = "10.5.0.1-10.5.0.100".parse().unwrap();
        let b: Ipv4Range = "10.5.0.100-10.5.0.200".parse().unwrap();
        let c: Ipv4Range = "10.5.1.1-10.5.1.200".parse().unwrap();
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_range_iter_crosses_octet_boundary() {
        let r: Ipv4Range = "10.3.0.254-10.3.1.1".parse().unwrap();
        let all: Vec<_> = r.iter().collect();
        assert_eq!(all.len(), 4);
        assert_eq!(all[2], Ipv4Addr::new(10, 3, 1, 0));
    }

    #[test]
    fn test_ports_parse_and_display() {
        let p: PortRanges = "1-4, 10".parse().unwrap();
        assert_eq!(p.port_count(), 5);
        assert!(p.contains(3));
        assert!(p.contains(10));
        assert!(!p.contains(5));
        assert_eq!(p.to_string(), "1-4,10");
        assert_eq!(p.ports().collect::<Vec<_>>(), vec![1, 2, 3, 4, 10]);
    }

    #[test]
    fn test_ports_reject_reversed_segment() {
        assert!("10-2".parse::<PortRanges>().is_err());
        assert!("".parse::<PortRanges>().is_err());
        assert!("a-b".parse::<PortRanges>().is_err());
    }

    #[test]
    fn test_ports_overlap_detection() {
        let p: PortRanges = "1-10,5".parse().unwrap();
        assert!(p.has_internal_overlap());
        let q: PortRanges = "11-20".parse().unwrap();
        assert!(!p.overlaps(&q));
        let r: PortRanges = "20-30".parse().unwrap();
        assert!(q.overlaps(&r));
    }

    #[test]
    fn test_serde_uses_text_forms() {
        let mac: MacAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"aa:bb:cc:dd:ee:ff\"");
        let range: Ipv4Range = serde_json::from_str("\"10.0.0.1-10.0.0.9\"").unwrap();
        assert_eq!(range.host_count(), 9);
    }
}
