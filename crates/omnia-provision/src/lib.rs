#![warn(missing_docs)]

//! Omnia provisioning: the node status state machine, boot event handling,
//! stuck-node detection and re-provision range bookkeeping.

pub mod error;
pub mod hwinfo;
pub mod ledger;
pub mod provisioner;
pub mod state;

pub use error::{ProvisionError, Result};
pub use hwinfo::{parse_hardware_facts, read_hardware_facts, COMPUTES_LOG};
pub use ledger::{RangeLedger, RangeRecord};
pub use provisioner::{
    deregister_and_remove, ClusterScheduler, ProvisionConfig, Provisioner, ProvisioningTool,
    StuckNode,
};
pub use state::{can_reprovision, can_transition, reprovision_target, BootEvent};
