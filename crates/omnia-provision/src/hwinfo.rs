//! Hardware facts from the PXE console log.
//!
//! During PXE boot each node logs lines such as
//! `node001: NVIDIA GPU Found count=4` or `node001: No CPU Found`. The most
//! recent line for a node wins, separately for CPU and GPU.

use omnia_registry::{CpuVendor, GpuVendor, HardwareFacts};
use std::fs;
use std::path::Path;

/// Default location of the provisioning tool's console log.
pub const COMPUTES_LOG: &str = "/var/log/xcat/computes.log";

enum CpuMarker {
    Found(CpuVendor),
    None,
}

enum GpuMarker {
    Found(GpuVendor),
    None,
}

fn cpu_marker(line: &str) -> Option<CpuMarker> {
    if line.contains("Intel CPU Found") {
        Some(CpuMarker::Found(CpuVendor::Intel))
    } else if line.contains("AMD CPU Found") {
        Some(CpuMarker::Found(CpuVendor::Amd))
    } else if line.contains("No CPU Found") {
        Some(CpuMarker::None)
    } else {
        None
    }
}

fn gpu_marker(line: &str) -> Option<GpuMarker> {
    if line.contains("NVIDIA GPU Found") {
        Some(GpuMarker::Found(GpuVendor::Nvidia))
    } else if line.contains("AMD GPU Found") {
        Some(GpuMarker::Found(GpuVendor::Amd))
    } else if line.contains("Intel GPU Found") {
        Some(GpuMarker::Found(GpuVendor::Intel))
    } else if line.contains("No GPU Found") {
        Some(GpuMarker::None)
    } else {
        None
    }
}

/// Count after the first `=`, or zero.
fn count(line: &str) -> u32 {
    line.split_once('=')
        .and_then(|(_, rest)| {
            let digits: String = rest.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().ok()
        })
        .unwrap_or(0)
}

/// True if `node` appears in `line` as a whole token.
fn mentions(line: &str, node: &str) -> bool {
    line.match_indices(node).any(|(i, _)| {
        let before = line[..i].chars().next_back();
        let after = line[i + node.len()..].chars().next();
        let boundary = |c: Option<char>| c.map_or(true, |c| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'));
        boundary(before) && boundary(after)
    })
}

/// Scans `log` newest line first for `node`. Returns `None` when the log has
/// no CPU or GPU line for it.
pub fn parse_hardware_facts(log: &str, node: &str) -> Option<HardwareFacts> {
    let mut facts = HardwareFacts::default();
    let mut cpu_seen = false;
    let mut gpu_seen = false;

    for line in log.lines().rev().filter(|l| mentions(l, node)) {
        if !gpu_seen {
            if let Some(marker) = gpu_marker(line) {
                gpu_seen = true;
                if let GpuMarker::Found(vendor) = marker {
                    facts.gpu = Some(vendor);
                    facts.gpu_count = count(line);
                }
            }
        }
        if !cpu_seen {
            if let Some(marker) = cpu_marker(line) {
                cpu_seen = true;
                if let CpuMarker::Found(vendor) = marker {
                    facts.cpu = Some(vendor);
                    facts.cpu_count = count(line);
                }
            }
        }
        if cpu_seen && gpu_seen {
            break;
        }
    }

    (cpu_seen || gpu_seen).then_some(facts)
}

/// Reads `path` and parses facts for `node`.
pub fn read_hardware_facts(path: &Path, node: &str) -> std::io::Result<Option<HardwareFacts>> {
    let log = fs::read_to_string(path)?;
    Ok(parse_hardware_facts(&log, node))
}
