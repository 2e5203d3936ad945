//! Sync configuration.
//!
//! Mapping rules and run limits for one sync or prune invocation. The same
//! `SyncConfig` must be used for a sync and the prune that follows it.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use groupsync_directory::error::{GroupSyncError, GroupSyncResult};

/// How directory member references become local user identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "strategy")]
pub enum MemberResolution {
    /// Member values already are local user names (e.g. `memberUid`).
    Direct,
    /// Member values reference directory entries; the local user name is the
    /// first present of `user_name_attributes` on the referenced entry.
    Lookup { user_name_attributes: Vec<String> },
}

impl Default for MemberResolution {
    fn default() -> Self {
        MemberResolution::Lookup {
            user_name_attributes: vec!["uid".to_string()],
        }
    }
}

/// Attribute mapping rules from directory groups to local groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRules {
    /// Attribute holding the group's unique identifier (`dn` for the DN).
    #[serde(default = "default_group_uid_attribute")]
    pub group_uid_attribute: String,
    /// Attributes tried in order for the local group name.
    #[serde(default = "default_group_name_attributes")]
    pub group_name_attributes: Vec<String>,
    /// Attributes whose values (union) are the group's member references.
    #[serde(default = "default_group_membership_attributes")]
    pub group_membership_attributes: Vec<String>,
    /// Member resolution strategy.
    #[serde(default)]
    pub member_resolution: MemberResolution,
    /// Identifier overrides keyed by the value of `group_uid_attribute`.
    #[serde(default)]
    pub identifier_overrides: HashMap<String, String>,
    /// Local name overrides keyed by group identifier.
    #[serde(default)]
    pub name_overrides: HashMap<String, String>,
}

fn default_group_uid_attribute() -> String {
    "dn".to_string()
}

fn default_group_name_attributes() -> Vec<String> {
    vec!["cn".to_string()]
}

fn default_group_membership_attributes() -> Vec<String> {
    vec!["member".to_string()]
}

impl Default for MappingRules {
    fn default() -> Self {
        Self {
            group_uid_attribute: default_group_uid_attribute(),
            group_name_attributes: default_group_name_attributes(),
            group_membership_attributes: default_group_membership_attributes(),
            member_resolution: MemberResolution::default(),
            identifier_overrides: HashMap::new(),
            name_overrides: HashMap::new(),
        }
    }
}

impl MappingRules {
    /// Set the identifier attribute.
    #[must_use]
    pub fn with_uid_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.group_uid_attribute = attribute.into();
        self
    }

    /// Set the member resolution strategy.
    #[must_use]
    pub fn with_member_resolution(mut self, resolution: MemberResolution) -> Self {
        self.member_resolution = resolution;
        self
    }

    /// Override the local name of one group.
    #[must_use]
    pub fn with_name_override(
        mut self,
        identifier: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        self.name_overrides.insert(identifier.into(), name.into());
        self
    }

    /// Override the identifier of the group whose UID attribute has `uid`.
    #[must_use]
    pub fn with_identifier_override(
        mut self,
        uid: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        self.identifier_overrides.insert(uid.into(), identifier.into());
        self
    }

    fn validate(&self) -> GroupSyncResult<()> {
        if self.group_uid_attribute.trim().is_empty() {
            return Err(GroupSyncError::config_invalid(
                "group UID attribute must not be empty",
            ));
        }
        if self.group_membership_attributes.is_empty()
            || self
                .group_membership_attributes
                .iter()
                .any(|a| a.trim().is_empty())
        {
            return Err(GroupSyncError::config_invalid(
                "group membership attributes must be a non-empty list of attribute names",
            ));
        }
        if self.group_name_attributes.iter().any(|a| a.trim().is_empty()) {
            return Err(GroupSyncError::config_invalid(
                "group name attributes must not contain empty names",
            ));
        }
        if let MemberResolution::Lookup {
            user_name_attributes,
        } = &self.member_resolution
        {
            if user_name_attributes.is_empty()
                || user_name_attributes.iter().any(|a| a.trim().is_empty())
            {
                return Err(GroupSyncError::config_invalid(
                    "user name attributes must be a non-empty list of attribute names",
                ));
            }
        }
        for (identifier, name) in &self.name_overrides {
            if !is_valid_group_name(name) {
                return Err(GroupSyncError::config_invalid(format!(
                    "invalid group name '{name}' mapped from '{identifier}'"
                )));
            }
        }
        let mut seen = HashSet::new();
        for (uid, identifier) in &self.identifier_overrides {
            if identifier.trim().is_empty() {
                return Err(GroupSyncError::config_invalid(format!(
                    "empty identifier override for '{uid}'"
                )));
            }
            if !seen.insert(identifier.as_str()) {
                return Err(GroupSyncError::config_invalid(format!(
                    "identifier '{identifier}' is the override for more than one group"
                )));
            }
        }
        Ok(())
    }
}

/// Configuration for one sync or prune run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Attribute mapping rules.
    #[serde(default)]
    pub mapping: MappingRules,
    /// Record missing member entries at debug level instead of warn.
    #[serde(default)]
    pub tolerate_member_not_found_errors: bool,
    /// Record out-of-scope member entries at debug level instead of warn.
    #[serde(default)]
    pub tolerate_member_out_of_scope_errors: bool,
    /// Timeout applied to each directory query and store write.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum number of groups processed concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_concurrency() -> usize {
    4
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mapping: MappingRules::default(),
            tolerate_member_not_found_errors: false,
            tolerate_member_out_of_scope_errors: false,
            timeout_ms: default_timeout_ms(),
            concurrency: default_concurrency(),
        }
    }
}

impl SyncConfig {
    /// Create a config with the given mapping rules and default limits.
    #[must_use]
    pub fn new(mapping: MappingRules) -> Self {
        Self {
            mapping,
            ..Self::default()
        }
    }

    /// Per-operation timeout as Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check if this configuration is valid.
    pub fn validate(&self) -> GroupSyncResult<()> {
        if self.timeout_ms == 0 {
            return Err(GroupSyncError::config_invalid(
                "timeout must be greater than zero",
            ));
        }
        if self.concurrency == 0 || self.concurrency > 64 {
            return Err(GroupSyncError::config_invalid(
                "concurrency must be between 1 and 64",
            ));
        }
        self.mapping.validate()
    }
}

/// Which directory groups a run considers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "values")]
pub enum Scope {
    /// Every group the directory lists (or the whitelist, when one is set).
    AllDirectoryGroups,
    /// Explicit directory group identifiers.
    Identifiers(Vec<String>),
    /// Directory groups linked from these local groups; empty means every
    /// local group synced from this directory.
    LocalGroups(Vec<String>),
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::AllDirectoryGroups => write!(f, "all"),
            Scope::Identifiers(ids) => write!(f, "identifiers({})", ids.len()),
            Scope::LocalGroups(names) if names.is_empty() => write!(f, "local(all)"),
            Scope::LocalGroups(names) => write!(f, "local({})", names.len()),
        }
    }
}

/// Check whether a name can be used as a local group name.
///
/// Names must be non-empty, must not be `.` or `..`, and must not contain
/// `/` or `%`.
#[must_use]
pub fn is_valid_group_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '%'])
}
