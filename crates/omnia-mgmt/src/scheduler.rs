//! Scheduler deregistration through an operator-configured command.

use async_trait::async_trait;
use omnia_provision::{ClusterScheduler, ProvisionError};
use omnia_registry::Node;
use tokio::process::Command;
use tracing::debug;

/// Runs `program args...` once per removed node.
///
/// `{node}`, `{hostname}` and `{service_tag}` in the arguments are replaced
/// with the node's values. A non-zero exit fails the deregistration.
#[derive(Clone, Debug)]
pub struct CommandScheduler {
    program: String,
    args: Vec<String>,
}

impl CommandScheduler {
    /// Builds a scheduler from `[program, args...]`. `None` when empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn expand(&self, node: &Node) -> Vec<String> {
        let tag = node.identity.service_tag.as_deref().unwrap_or("");
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{node}", node.name())
                    .replace("{hostname}", &node.identity.hostname)
                    .replace("{service_tag}", tag)
            })
            .collect()
    }
}

#[async_trait]
impl ClusterScheduler for CommandScheduler {
    async fn deregister(&self, node: &Node) -> omnia_provision::Result<()> {
        let args = self.expand(node);
        debug!(node = %node.id, program = %self.program, ?args, "running deregister command");
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|e| ProvisionError::Scheduler {
                node: node.id,
                reason: format!("failed to run {}: {}", self.program, e),
            })?;
        if !output.status.success() {
            return Err(ProvisionError::Scheduler {
                node: node.id,
                reason: format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}
