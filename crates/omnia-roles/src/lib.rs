#![warn(missing_docs)]

//! Omnia roles: the roles/groups document, its validation, and resolution
//! of registry nodes to roles.

pub mod config;
pub mod error;
pub mod hierarchy;
pub mod resolve;
pub mod validate;

pub use config::{BmcDetails, GroupDef, RoleDef, RolesConfig, SwitchDetails};
pub use error::{Result, RolesError};
pub use hierarchy::{service_node_plan, ServiceNodePlan};
pub use resolve::{resolve, RoleAssignment};
pub use validate::{validate, ValidationWarning, MAX_ROLES};
