//! The `omnia` command line.

use crate::config::{LogFormat, MgmtConfig};
use crate::scheduler::CommandScheduler;
use crate::status::{render_table, status_counts, status_lines, write_csv, NodeInfoRow};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use omnia_discovery::{DiscoveryRun, MappingDiscovery};
use omnia_ha::HaConfig;
use omnia_provision::{deregister_and_remove, read_hardware_facts, ClusterScheduler, RangeLedger};
use omnia_registry::{
    HardwareFacts, Inventory, Ipv4Range, MemoryRegistry, Node, NodeFilter, NodeId, NodeRegistry,
    NodeStatus,
};
use omnia_roles::{resolve, service_node_plan, validate, RolesConfig};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Top-level arguments.
#[derive(Parser)]
#[command(name = "omnia")]
#[command(about = "Omnia cluster management CLI", long_about = None)]
pub struct Cli {
    /// Configuration file, TOML or JSON.
    #[arg(short, long, env = "OMNIA_CONFIG", default_value = "/etc/omnia/omnia.toml")]
    pub config: PathBuf,

    /// Overrides the registry journal from the config file.
    #[arg(long, env = "OMNIA_REGISTRY")]
    pub registry: Option<PathBuf>,

    /// Overrides the log format from the config file.
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Prints `<nodename>: <status>` for every registered node.
    Status {
        /// Also prints node counts per status.
        #[arg(long)]
        summary: bool,
    },
    /// Inspects or removes registry rows.
    Nodes {
        /// Subcommand.
        #[command(subcommand)]
        cmd: NodesCmd,
    },
    /// Registers nodes found by a discovery mechanism.
    Discover {
        /// Subcommand.
        #[command(subcommand)]
        cmd: DiscoverCmd,
    },
    /// Checks and applies the roles config.
    Roles {
        /// Subcommand.
        #[command(subcommand)]
        cmd: RolesCmd,
    },
    /// Regenerates the inventory files from the registry.
    Inventory {
        /// Output directory; defaults to `inventory_dir`.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Manages the re-provision range ledger.
    Ranges {
        /// Subcommand.
        #[command(subcommand)]
        cmd: RangesCmd,
    },
    /// Checks the HA config.
    Ha {
        /// Subcommand.
        #[command(subcommand)]
        cmd: HaCmd,
    },
}

/// `omnia nodes` subcommands.
#[derive(Subcommand, Clone)]
pub enum NodesCmd {
    /// Lists the `nodeinfo` rows.
    List {
        /// Only rows in this status.
        #[arg(long)]
        status: Option<NodeStatus>,
        /// Only rows of this group.
        #[arg(long)]
        group: Option<String>,
        /// Only rows holding this role.
        #[arg(long)]
        role: Option<String>,
        /// Output format.
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Shows one row with its status history.
    Show {
        /// Registry id.
        node_id: u64,
    },
    /// Deregisters an idle node from the workload manager, then deletes its
    /// row.
    Remove {
        /// Registry id.
        node_id: u64,
        /// Deletes the row without running `deregister_command`.
        #[arg(long)]
        skip_deregister: bool,
    },
    /// Reads the node's CPU and GPU facts from the PXE console log into its
    /// row.
    Hardware {
        /// Registry id.
        node_id: u64,
        /// Console log; defaults to `computes_log`.
        #[arg(long)]
        log: Option<PathBuf>,
    },
}

/// `omnia discover` subcommands.
#[derive(Subcommand, Clone)]
pub enum DiscoverCmd {
    /// Registers the nodes of a mapping CSV file.
    Mapping {
        /// Mapping CSV file.
        file: PathBuf,
        /// Group for rows that leave the group column empty.
        #[arg(short, long)]
        group: Option<String>,
    },
}

/// `omnia roles` subcommands. `file` defaults to `roles_config`.
#[derive(Subcommand, Clone)]
pub enum RolesCmd {
    /// Runs every validation rule.
    Validate {
        /// Roles config file.
        file: Option<PathBuf>,
    },
    /// Shows how many nodes each role resolves to.
    Resolve {
        /// Roles config file.
        file: Option<PathBuf>,
        /// Writes the resolved roles into the registry.
        #[arg(long)]
        apply: bool,
    },
    /// Shows which service node provisions which groups.
    Hierarchy {
        /// Roles config file.
        file: Option<PathBuf>,
    },
}

/// `omnia ranges` subcommands.
#[derive(Subcommand, Clone)]
pub enum RangesCmd {
    /// Lists recorded ranges.
    List,
    /// Reserves an admin range for a new run and prints the run id.
    Reserve {
        /// `start-end` IPv4 range.
        range: Ipv4Range,
    },
    /// Releases the range of a finished run.
    Release {
        /// Run id printed by `reserve`.
        run_id: Uuid,
    },
}

/// `omnia ha` subcommands.
#[derive(Subcommand, Clone)]
pub enum HaCmd {
    /// Validates the HA config and lists its pairs.
    Validate {
        /// HA config file; defaults to `ha_config`.
        file: Option<PathBuf>,
    },
}

/// Output format of `nodes list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Aligned text table.
    Table,
    /// `nodeinfo` rows as a JSON array.
    Json,
    /// `nodeinfo` rows as CSV with a header.
    Csv,
}

impl Cli {
    /// Runs the command against `config`, writing its report to `out`.
    pub async fn execute<W: Write>(&self, config: &MgmtConfig, out: &mut W) -> Result<()> {
        match &self.command {
            Command::Status { summary } => self.status(config, *summary, out),
            Command::Nodes { cmd } => self.nodes(config, cmd, out).await,
            Command::Discover { cmd } => self.discover(config, cmd, out).await,
            Command::Roles { cmd } => self.roles(config, cmd, out),
            Command::Inventory { out: dir } => self.inventory(config, dir.as_deref(), out),
            Command::Ranges { cmd } => self.ranges(config, cmd, out),
            Command::Ha { cmd } => self.ha(config, cmd, out),
        }
    }

    fn journal_path(&self, config: &MgmtConfig) -> PathBuf {
        self.registry
            .clone()
            .unwrap_or_else(|| config.registry_journal.clone())
    }

    fn open_registry(&self, config: &MgmtConfig) -> Result<Arc<MemoryRegistry>> {
        let path = self.journal_path(config);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let registry = MemoryRegistry::open(&path)
            .with_context(|| format!("opening registry journal {}", path.display()))?
            .with_history_limit(config.history_limit);
        Ok(Arc::new(registry))
    }

    fn status<W: Write>(&self, config: &MgmtConfig, summary: bool, out: &mut W) -> Result<()> {
        let nodes = self.open_registry(config)?.list(&NodeFilter::all());
        if nodes.is_empty() {
            writeln!(out, "No nodes registered")?;
            return Ok(());
        }
        for line in status_lines(&nodes) {
            writeln!(out, "{}", line)?;
        }
        if summary {
            writeln!(out)?;
            for (status, count) in status_counts(&nodes) {
                writeln!(out, "{:<14} {}", status.as_str(), count)?;
            }
        }
        Ok(())
    }

    async fn nodes<W: Write>(
        &self,
        config: &MgmtConfig,
        cmd: &NodesCmd,
        out: &mut W,
    ) -> Result<()> {
        let registry = self.open_registry(config)?;
        match cmd {
            NodesCmd::List {
                status,
                group,
                role,
                format,
            } => {
                let mut filter = NodeFilter::all();
                if let Some(status) = status {
                    filter = filter.with_status(*status);
                }
                if let Some(group) = group {
                    filter = filter.with_group(group.clone());
                }
                if let Some(role) = role {
                    filter = filter.with_role(role.clone());
                }
                let nodes = registry.list(&filter);
                match format {
                    OutputFormat::Table => write!(out, "{}", render_table(&nodes))?,
                    OutputFormat::Json => {
                        let rows: Vec<NodeInfoRow> = nodes.iter().map(NodeInfoRow::from).collect();
                        writeln!(out, "{}", serde_json::to_string_pretty(&rows)?)?;
                    }
                    OutputFormat::Csv => write_csv(&nodes, &mut *out)?,
                }
            }
            NodesCmd::Show { node_id } => {
                let node = registry.get(NodeId::new(*node_id))?;
                show_node(&node, out)?;
            }
            NodesCmd::Remove {
                node_id,
                skip_deregister,
            } => {
                let scheduler = match (&config.deregister_command, skip_deregister) {
                    (_, true) => {
                        warn!(node = node_id, "removing without scheduler deregistration");
                        None
                    }
                    (Some(argv), false) => Some(CommandScheduler::from_argv(argv).context(
                        "deregister_command is empty; set a program or pass --skip-deregister",
                    )?),
                    (None, false) => anyhow::bail!(
                        "No deregister_command configured; set one so the workload manager \
                         forgets the node, or pass --skip-deregister"
                    ),
                };
                let node = deregister_and_remove(
                    registry.as_ref(),
                    scheduler.as_ref().map(|s| s as &dyn ClusterScheduler),
                    NodeId::new(*node_id),
                    config.deregister_timeout(),
                )
                .await?;
                info!(node = %node.id, name = node.name(), "node removed");
                writeln!(out, "Removed {} ({})", node.name(), node.id)?;
            }
            NodesCmd::Hardware { node_id, log } => {
                let id = NodeId::new(*node_id);
                let node = registry.get(id)?;
                let path = log.as_deref().unwrap_or(config.computes_log.as_path());
                let facts = read_hardware_facts(path, node.name())
                    .with_context(|| format!("reading {}", path.display()))?
                    .with_context(|| {
                        format!("No CPU or GPU lines for {} in {}", node.name(), path.display())
                    })?;
                registry.update_hardware(id, facts.clone())?;
                info!(node = %id, name = node.name(), ?facts, "hardware facts recorded");
                show_hardware(&node, &facts, out)?;
            }
        }
        Ok(())
    }

    async fn discover<W: Write>(
        &self,
        config: &MgmtConfig,
        cmd: &DiscoverCmd,
        out: &mut W,
    ) -> Result<()> {
        match cmd {
            DiscoverCmd::Mapping { file, group } => {
                let mut mapping = MappingDiscovery::from_path(file)?;
                if let Some(domain) = &config.domain_name {
                    mapping = mapping.with_domain(domain.clone());
                }
                if let Some(group) = group {
                    mapping = mapping.with_default_group(group.clone());
                }

                let registry = self.open_registry(config)?;
                let mut run = DiscoveryRun::new(registry);
                if config.roles_config.exists() {
                    let roles = RolesConfig::from_path(&config.roles_config)?;
                    validate(&roles)?;
                    run = run.with_placements(roles.placements());
                } else {
                    warn!(
                        path = %config.roles_config.display(),
                        "roles config not found, registering groups without placement"
                    );
                }

                let report = run.execute(mapping.into()).await?;
                writeln!(
                    out,
                    "Registered {} node(s): {} new, {} updated, {} skipped",
                    report.registered(),
                    report.inserted.len(),
                    report.updated.len(),
                    report.skipped
                )?;
                if !report.cross_mechanism.is_empty() {
                    writeln!(
                        out,
                        "{} node(s) were previously discovered by another mechanism",
                        report.cross_mechanism.len()
                    )?;
                }
                writeln!(out, "Run: {}", report.run_id)?;
            }
        }
        Ok(())
    }

    fn roles<W: Write>(&self, config: &MgmtConfig, cmd: &RolesCmd, out: &mut W) -> Result<()> {
        let load = |file: &Option<PathBuf>| {
            let path = file.as_deref().unwrap_or(config.roles_config.as_path());
            RolesConfig::from_path(path)
        };
        match cmd {
            RolesCmd::Validate { file } => {
                let roles = load(file)?;
                let warnings = validate(&roles)?;
                for warning in &warnings {
                    writeln!(out, "warning: {}", warning)?;
                }
                writeln!(
                    out,
                    "Roles config is valid: {} role(s), {} group(s)",
                    roles.roles.len(),
                    roles.groups.len()
                )?;
            }
            RolesCmd::Resolve { file, apply } => {
                let roles = load(file)?;
                let registry = self.open_registry(config)?;
                let assignment = resolve(&roles, &registry.list(&NodeFilter::all()))?;
                writeln!(out, "{:<24} {}", "ROLE", "NODES")?;
                writeln!(out, "{}", "-".repeat(40))?;
                for (role, ids) in &assignment.by_role {
                    writeln!(out, "{:<24} {}", role, ids.len())?;
                }
                writeln!(out, "{:<24} {}", "(unassigned)", assignment.unassigned.len())?;
                if *apply {
                    let changed = assignment.apply(registry.as_ref())?;
                    writeln!(out, "Updated the role of {} node(s)", changed)?;
                }
            }
            RolesCmd::Hierarchy { file } => {
                let roles = load(file)?;
                validate(&roles)?;
                let registry = self.open_registry(config)?;
                let plans = service_node_plan(&roles, &registry.list(&NodeFilter::all()))?;
                if plans.is_empty() {
                    writeln!(out, "All groups are provisioned by the management node")?;
                }
                for plan in plans.values() {
                    writeln!(
                        out,
                        "{} ({}): {}",
                        plan.node,
                        plan.service_tag,
                        plan.child_groups.join(", ")
                    )?;
                }
            }
        }
        Ok(())
    }

    fn inventory<W: Write>(
        &self,
        config: &MgmtConfig,
        dir: Option<&Path>,
        out: &mut W,
    ) -> Result<()> {
        let nodes = self.open_registry(config)?.list(&NodeFilter::all());
        let dir = dir.unwrap_or(config.inventory_dir.as_path());
        let written = Inventory::from_nodes(&nodes).write_to(dir)?;
        for name in &written {
            writeln!(out, "{}", dir.join(name).display())?;
        }
        Ok(())
    }

    fn ranges<W: Write>(&self, config: &MgmtConfig, cmd: &RangesCmd, out: &mut W) -> Result<()> {
        let path = &config.range_ledger;
        let mut ledger = RangeLedger::load(path)?;
        match cmd {
            RangesCmd::List => {
                writeln!(out, "{:<38} {:<32} {}", "RUN", "RANGE", "RELEASED")?;
                writeln!(out, "{}", "-".repeat(90))?;
                for record in ledger.records() {
                    let released = record
                        .released_at
                        .map(|at| at.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string());
                    writeln!(
                        out,
                        "{:<38} {:<32} {}",
                        record.run_id.to_string(),
                        record.range.to_string(),
                        released
                    )?;
                }
            }
            RangesCmd::Reserve { range } => {
                let nodes = self.open_registry(config)?.list(&NodeFilter::all());
                let run_id = ledger.reserve(*range, &nodes)?;
                save_ledger(&ledger, path)?;
                writeln!(out, "{}", run_id)?;
            }
            RangesCmd::Release { run_id } => {
                if !ledger.release(*run_id) {
                    anyhow::bail!("No unreleased range for run {}", run_id);
                }
                save_ledger(&ledger, path)?;
                writeln!(out, "Released range of run {}", run_id)?;
            }
        }
        Ok(())
    }

    fn ha<W: Write>(&self, config: &MgmtConfig, cmd: &HaCmd, out: &mut W) -> Result<()> {
        match cmd {
            HaCmd::Validate { file } => {
                let path = file.as_deref().unwrap_or(config.ha_config.as_path());
                let ha = HaConfig::from_path(path)?;
                ha.validate()?;
                if !ha.enabled {
                    writeln!(out, "HA is disabled")?;
                    return Ok(());
                }
                for pair in &ha.pairs {
                    writeln!(
                        out,
                        "{}: {} active, passive {} on {}",
                        pair.name,
                        pair.active_node_service_tag,
                        pair.passive_tags().join(", "),
                        pair.virtual_ip
                    )?;
                }
            }
        }
        Ok(())
    }
}

fn save_ledger(ledger: &RangeLedger, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    ledger.save(path)?;
    Ok(())
}

fn show_hardware<W: Write>(node: &Node, facts: &HardwareFacts, out: &mut W) -> Result<()> {
    let describe = |vendor: Option<String>, count: u32| match vendor {
        Some(vendor) => format!("{} x{}", vendor.to_lowercase(), count),
        None => "none".to_string(),
    };
    writeln!(out, "Node: {} ({})", node.name(), node.id)?;
    writeln!(out, "CPU:  {}", describe(facts.cpu.map(|v| format!("{:?}", v)), facts.cpu_count))?;
    writeln!(out, "GPU:  {}", describe(facts.gpu.map(|v| format!("{:?}", v)), facts.gpu_count))?;
    Ok(())
}

fn show_node<W: Write>(node: &Node, out: &mut W) -> Result<()> {
    let identity = &node.identity;
    let or_dash = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());
    writeln!(out, "Node:        {} ({})", node.name(), node.id)?;
    writeln!(out, "Hostname:    {}", identity.hostname)?;
    writeln!(out, "Service tag: {}", or_dash(identity.service_tag.clone()))?;
    writeln!(out, "Admin MAC:   {}", identity.admin_mac)?;
    writeln!(out, "Admin IP:    {}", or_dash(identity.admin_ip.map(|ip| ip.to_string())))?;
    writeln!(out, "BMC IP:      {}", or_dash(identity.bmc_ip.map(|ip| ip.to_string())))?;
    writeln!(out, "Mechanism:   {}", identity.mechanism)?;
    writeln!(out, "Group:       {}", or_dash(node.group().map(str::to_string)))?;
    writeln!(out, "Role:        {}", or_dash(node.role.clone()))?;
    writeln!(out, "Status:      {}", node.status)?;
    writeln!(out, "History:")?;
    for record in &node.history {
        writeln!(out, "  {}  {}", record.at.to_rfc3339(), record.status)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nodes_list() {
        let cli = Cli::try_parse_from([
            "omnia", "nodes", "list", "--status", "booted", "--group", "grp1", "-f", "json",
        ])
        .unwrap();
        match cli.command {
            Command::Nodes {
                cmd:
                    NodesCmd::List {
                        status,
                        group,
                        format,
                        ..
                    },
            } => {
                assert_eq!(status, Some(NodeStatus::Booted));
                assert_eq!(group.as_deref(), Some("grp1"));
                assert_eq!(format, OutputFormat::Json);
            }
            _ => panic!("expected nodes list"),
        }
    }

    #[test]
    fn test_parse_nodes_remove_flag() {
        let cli = Cli::try_parse_from(["omnia", "nodes", "remove", "7", "--skip-deregister"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Command::Nodes {
                cmd: NodesCmd::Remove {
                    node_id: 7,
                    skip_deregister: true
                }
            }
        ));
    }

    #[test]
    fn test_parse_rejects_bad_range() {
        assert!(Cli::try_parse_from(["omnia", "ranges", "reserve", "10.5.0.9-10.5.0.1"]).is_err());
        assert!(Cli::try_parse_from(["omnia", "ranges", "reserve", "10.5.0.1-10.5.0.9"]).is_ok());
    }

    #[test]
    fn test_parse_log_format_and_registry_override() {
        let cli = Cli::try_parse_from([
            "omnia",
            "--log-format",
            "json",
            "--registry",
            "/tmp/nodeinfo.journal",
            "status",
        ])
        .unwrap();
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        assert_eq!(
            cli.journal_path(&MgmtConfig::default()),
            PathBuf::from("/tmp/nodeinfo.journal")
        );
    }
}
