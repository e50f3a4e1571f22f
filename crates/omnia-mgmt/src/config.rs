//! `omnia` configuration file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Log line format on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Paths and settings shared by every subcommand. Missing keys take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MgmtConfig {
    /// Registry journal; the `nodeinfo` table is rebuilt from it on start.
    pub registry_journal: PathBuf,
    /// Status history entries kept per node; 0 keeps all of them.
    pub history_limit: usize,
    /// Directory the inventory files are written to.
    pub inventory_dir: PathBuf,
    /// Roles and groups document.
    pub roles_config: PathBuf,
    /// HA pairs document.
    pub ha_config: PathBuf,
    /// Re-provision range ledger.
    pub range_ledger: PathBuf,
    /// DNS domain appended to discovered hostnames.
    pub domain_name: Option<String>,
    /// Default log format; `--log-format` overrides it.
    pub log_format: LogFormat,
    /// PXE console log that hardware facts are read from.
    pub computes_log: PathBuf,
    /// Command run to drop a node from the workload manager before its row
    /// is removed, as `[program, args...]`. See `CommandScheduler` for the
    /// placeholders.
    pub deregister_command: Option<Vec<String>>,
    /// Bound on one run of `deregister_command`.
    pub deregister_timeout_secs: u64,
}

impl Default for MgmtConfig {
    fn default() -> Self {
        Self {
            registry_journal: PathBuf::from("/opt/omnia/nodeinfo.journal"),
            history_limit: omnia_registry::registry::DEFAULT_HISTORY_LIMIT,
            inventory_dir: PathBuf::from("/opt/omnia/omnia_inventory"),
            roles_config: PathBuf::from("/opt/omnia/input/project_default/roles_config.yml"),
            ha_config: PathBuf::from("/opt/omnia/input/project_default/high_availability_config.yml"),
            range_ledger: PathBuf::from("/opt/omnia/provision_ranges.json"),
            domain_name: None,
            log_format: LogFormat::Text,
            computes_log: PathBuf::from(omnia_provision::COMPUTES_LOG),
            deregister_command: None,
            deregister_timeout_secs: 120,
        }
    }
}

impl MgmtConfig {
    /// Parses a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: MgmtConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: MgmtConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Loads `path` when it exists, otherwise falls back to defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Bound on one deregistration.
    pub fn deregister_timeout(&self) -> Duration {
        Duration::from_secs(self.deregister_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = MgmtConfig::default();
        assert_eq!(config.history_limit, 256);
        assert_eq!(config.range_ledger, PathBuf::from("/opt/omnia/provision_ranges.json"));
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.domain_name.is_none());
        assert!(config.deregister_command.is_none());
        assert_eq!(config.deregister_timeout(), Duration::from_secs(120));
        assert_eq!(config.computes_log, PathBuf::from("/var/log/xcat/computes.log"));
    }

    #[test]
    fn test_from_file_toml_partial() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
registry_journal = "/tmp/omnia/nodeinfo.journal"
domain_name = "cluster.local"
log_format = "json"
deregister_command = ["scontrol", "delete", "nodename={{node}}"]
"#
        )
        .unwrap();

        let config = MgmtConfig::from_file(file.path()).unwrap();
        assert_eq!(config.registry_journal, PathBuf::from("/tmp/omnia/nodeinfo.journal"));
        assert_eq!(config.domain_name.as_deref(), Some("cluster.local"));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.inventory_dir, MgmtConfig::default().inventory_dir);
        assert_eq!(
            config.deregister_command,
            Some(vec![
                "scontrol".to_string(),
                "delete".to_string(),
                "nodename={node}".to_string()
            ])
        );
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        write!(file, r#"{{"history_limit": 0, "inventory_dir": "/srv/inv"}}"#).unwrap();

        let config = MgmtConfig::from_file(file.path()).unwrap();
        assert_eq!(config.history_limit, 0);
        assert_eq!(config.inventory_dir, PathBuf::from("/srv/inv"));
    }

    #[test]
    fn test_unsupported_extension() {
        let file = NamedTempFile::with_suffix(".ini").unwrap();
        assert!(MgmtConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = MgmtConfig::load_or_default(Path::new("/nonexistent/omnia.toml")).unwrap();
        assert_eq!(config, MgmtConfig::default());
    }
}
