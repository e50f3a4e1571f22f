//! Error types for roles configuration and resolution.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for role operations.
pub type Result<T> = std::result::Result<T, RolesError>;

/// Error variants for roles configuration, validation and resolution.
///
/// Every validation variant names the role or group at fault.
#[derive(Debug, Error)]
pub enum RolesError {
    /// The configuration file could not be read.
    #[error("cannot read {path}: {source}")]
    Read {
        /// File that was opened.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// YAML syntax or shape error.
    #[error("roles config YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON syntax or shape error.
    #[error("roles config JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The `Roles` section is empty.
    #[error("at least one role must be defined")]
    NoRoles,

    /// The `Groups` section is empty.
    #[error("at least one group must be defined")]
    NoGroups,

    /// More roles than the configuration supports.
    #[error("{count} roles defined, at most {limit} are supported")]
    TooManyRoles {
        /// Number of roles found.
        count: usize,
        /// Upper bound.
        limit: usize,
    },

    /// Two roles share a name.
    #[error("role {role} is defined more than once")]
    DuplicateRole {
        /// The repeated role name.
        role: String,
    },

    /// A role lists no groups.
    #[error("role {role} must be associated with at least one group")]
    EmptyRole {
        /// The role without groups.
        role: String,
    },

    /// A role references another role instead of a group.
    #[error("role {role} references role {nested}; roles cannot be nested")]
    NestedRole {
        /// The referencing role.
        role: String,
        /// The referenced role.
        nested: String,
    },

    /// A role references a group that is not defined.
    #[error("role {role} references undefined group {group}")]
    UndefinedGroup {
        /// The referencing role.
        role: String,
        /// The missing group.
        group: String,
    },

    /// A group backing an exclusive role also backs another role.
    #[error("group {group} backs {exclusive_role} and cannot also back {other_role}")]
    ExclusiveGroup {
        /// The shared group.
        group: String,
        /// `service_node` or `oim_ha_node`.
        exclusive_role: String,
        /// The other role using the group.
        other_role: String,
    },

    /// A group is shared between management-layer and compute-layer roles.
    #[error("group {group} is shared between management roles [{management}] and compute roles [{compute}]")]
    LayerConflict {
        /// The shared group.
        group: String,
        /// Management-layer roles using it, comma separated.
        management: String,
        /// Compute-layer roles using it, comma separated.
        compute: String,
    },

    /// A group is referenced by more than one role.
    #[error("group {group} is referenced by roles {roles:?}; a node must resolve to one role")]
    AmbiguousRoleAssignment {
        /// The shared group.
        group: String,
        /// Every role referencing it, in definition order.
        roles: Vec<String>,
    },

    /// Only part of a cluster's role set is defined.
    #[error("{set} roles incomplete, missing: {missing}")]
    IncompleteRoleSet {
        /// Name of the role set.
        set: String,
        /// Missing role names, comma separated.
        missing: String,
    },

    /// A Kubernetes role's group has no cluster name.
    #[error("group {group} must have a cluster_name for role {role}")]
    MissingClusterName {
        /// The group without a cluster name.
        group: String,
        /// The role requiring it.
        role: String,
    },

    /// Switch IP and ports must be given together.
    #[error("group {group} switch details are incomplete: ip and ports are both required")]
    SwitchIncomplete {
        /// The group at fault.
        group: String,
    },

    /// Switch IP or port ranges do not parse.
    #[error("group {group} switch details are invalid: {reason}")]
    InvalidSwitch {
        /// The group at fault.
        group: String,
        /// Parse failure.
        reason: String,
    },

    /// Two groups claim the same port on one switch.
    #[error("group {group} has ports overlapping group {other} on switch {switch}")]
    SwitchPortOverlap {
        /// The group declared second.
        group: String,
        /// The group it overlaps.
        other: String,
        /// Switch IP both groups use.
        switch: String,
    },

    /// Switch-based discovery needs a BMC static range to derive addresses.
    #[error("group {group} has switch details but no BMC static range")]
    SwitchWithoutBmcRange {
        /// The group at fault.
        group: String,
    },

    /// A BMC static range does not parse.
    #[error("group {group} BMC static range {range:?} is invalid: {reason}")]
    InvalidBmcRange {
        /// The group at fault.
        group: String,
        /// The configured value.
        range: String,
        /// Parse failure.
        reason: String,
    },

    /// Two groups' BMC static ranges overlap.
    #[error("group {group} BMC static range overlaps group {other}")]
    BmcRangeOverlap {
        /// The group declared second.
        group: String,
        /// The group it overlaps.
        other: String,
    },

    /// `resource_mgr_id` is required on worker groups and forbidden elsewhere.
    #[error("group {group} resource_mgr_id: {reason}")]
    ResourceManagerId {
        /// The group at fault.
        group: String,
        /// What is wrong.
        reason: String,
    },

    /// A group's parent service node is not ready to serve it.
    #[error("group {group} parent {parent} is not ready: {reason}")]
    ParentNotReady {
        /// The child group.
        group: String,
        /// Parent service tag.
        parent: String,
        /// Why the parent cannot serve.
        reason: String,
    },

    /// Registry errors while applying an assignment.
    #[error("registry error: {0}")]
    Registry(#[from] omnia_registry::RegistryError),
}

impl RolesError {
    /// Whether the error was raised by validating the document rather than
    /// by reading it or touching the registry.
    pub fn is_validation(&self) -> bool {
        !matches!(
            self,
            RolesError::Read { .. }
                | RolesError::Yaml(_)
                | RolesError::Json(_)
                | RolesError::Registry(_)
        )
    }
}
