#![warn(missing_docs)]

//! Omnia high availability: active/passive management node pairs sharing a
//! virtual IP, liveness tracking and ordered failover.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod state;

pub use config::{HaConfig, HaPairConfig, LivenessConfig, PassiveNodes};
pub use coordinator::{FailoverCoordinator, HaActions, LivenessProbe, LivenessReport, PairOutcome};
pub use error::{HaError, Result};
pub use state::{FailoverEvent, Generation, PairState, PairStatus, PendingDemotion};
