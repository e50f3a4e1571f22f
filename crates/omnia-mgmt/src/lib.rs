#![warn(missing_docs)]

//! Omnia management: the `omnia` operator CLI and its configuration.

pub mod cli;
pub mod config;
pub mod scheduler;
pub mod status;

pub use config::{LogFormat, MgmtConfig};
pub use scheduler::CommandScheduler;
pub use status::{render_table, status_counts, status_lines, write_csv, NodeInfoRow};
