//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use clap::Parser;
use omnia_mgmt::cli::Cli;
use omnia_mgmt::MgmtConfig;
use std::path::Path;

pub const ROLES_YAML: &str = r#"
Roles:
  - name: slurm_control_node
    groups: [ctl]
  - name: slurm_node
    groups: [grp1]
Groups:
  ctl:
    location_id: SU-1.RACK-0
  grp1:
    location_id: SU-1.RACK-1
    resource_mgr_id: rm1
"#;

pub const MAPPING_CSV: &str = "\
GROUP_NAME,SERVICE_TAG,HOSTNAME,ADMIN_MAC,ADMIN_IP,BMC_IP
grp1,TAG001,node001,aa:bb:cc:dd:ee:01,10.5.0.101,10.3.0.101
grp1,TAG002,node002,aa:bb:cc:dd:ee:02,10.5.0.102,
grp9,TAG003,node003,aa:bb:cc:dd:ee:03,10.5.0.103,10.3.0.103
";

/// Config with every path inside `dir`.
pub fn config_in(dir: &Path) -> MgmtConfig {
    MgmtConfig {
        registry_journal: dir.join("state/nodeinfo.journal"),
        inventory_dir: dir.join("inventory"),
        roles_config: dir.join("roles_config.yml"),
        ha_config: dir.join("high_availability_config.yml"),
        range_ledger: dir.join("state/provision_ranges.json"),
        domain_name: Some("cluster.local".to_string()),
        ..MgmtConfig::default()
    }
}

/// Runs `omnia <args>` and returns what it printed.
pub async fn omnia(config: &MgmtConfig, args: &[&str]) -> anyhow::Result<String> {
    let cli = Cli::try_parse_from(std::iter::once("omnia").chain(args.iter().copied()))?;
    let mut out = Vec::new();
    cli.execute(config, &mut out).await?;
    Ok(String::from_utf8(out)?)
}
