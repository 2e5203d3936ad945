//! Run results.
//!
//! Per-group outcomes of a sync or prune run, plus aggregate statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use groupsync_directory::error::{ErrorRecord, GroupSyncError};

/// What happened to one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupAction {
    /// A new local group was (or, in a dry-run, would be) created.
    Created,
    /// An existing local group was replaced.
    Updated,
    /// The local group already matched the directory.
    Unchanged,
    /// The local group was pruned.
    Deleted,
    /// Processing this group failed.
    Failed,
}

impl GroupAction {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupAction::Created => "created",
            GroupAction::Updated => "updated",
            GroupAction::Unchanged => "unchanged",
            GroupAction::Deleted => "deleted",
            GroupAction::Failed => "failed",
        }
    }
}

impl fmt::Display for GroupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A member reference that was dropped during mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberWarning {
    /// The member reference as found on the directory group.
    pub member: String,
    /// Why it could not be resolved.
    pub error: ErrorRecord,
}

/// Outcome for one directory group (sync) or local group (prune).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupOutcome {
    /// Directory group identifier.
    pub identifier: String,
    /// Local group name, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Action taken.
    pub action: GroupAction,
    /// Previous local name when the group was renamed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renamed_from: Option<String>,
    /// Dropped members.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<MemberWarning>,
    /// Failure reason for `Failed` outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
}

impl GroupOutcome {
    /// Create a successful outcome.
    pub fn new(
        identifier: impl Into<String>,
        name: impl Into<String>,
        action: GroupAction,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            name: Some(name.into()),
            action,
            renamed_from: None,
            warnings: Vec::new(),
            error: None,
        }
    }

    /// Create a failed outcome.
    pub fn failed(identifier: impl Into<String>, error: &GroupSyncError) -> Self {
        Self {
            identifier: identifier.into(),
            name: None,
            action: GroupAction::Failed,
            renamed_from: None,
            warnings: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// Set the local group name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach member warnings.
    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<MemberWarning>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Record the previous name of a renamed group.
    #[must_use]
    pub fn renamed_from(mut self, old_name: impl Into<String>) -> Self {
        self.renamed_from = Some(old_name.into());
        self
    }

    /// Check if this outcome is a failure.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.action == GroupAction::Failed
    }
}

/// Result of one sync or prune run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Whether the run was a dry-run (no store mutations).
    pub dry_run: bool,
    /// Whether the run stopped early on cancellation.
    pub cancelled: bool,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub completed_at: DateTime<Utc>,
    /// Per-group outcomes, sorted by identifier.
    pub outcomes: Vec<GroupOutcome>,
}

/// Result of a sync run.
pub type SyncResult = RunResult;

/// Result of a prune run.
pub type PruneResult = RunResult;

impl RunResult {
    pub(crate) fn new(dry_run: bool, started_at: DateTime<Utc>) -> Self {
        Self {
            dry_run,
            cancelled: false,
            started_at,
            completed_at: started_at,
            outcomes: Vec::new(),
        }
    }

    pub(crate) fn finish(mut self, mut outcomes: Vec<GroupOutcome>, cancelled: bool) -> Self {
        outcomes.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        self.outcomes = outcomes;
        self.cancelled = cancelled;
        self.completed_at = Utc::now();
        self
    }

    /// Outcomes with the given action.
    pub fn with_action(&self, action: GroupAction) -> impl Iterator<Item = &GroupOutcome> {
        self.outcomes.iter().filter(move |o| o.action == action)
    }

    /// Created outcomes.
    pub fn created(&self) -> impl Iterator<Item = &GroupOutcome> {
        self.with_action(GroupAction::Created)
    }

    /// Updated outcomes.
    pub fn updated(&self) -> impl Iterator<Item = &GroupOutcome> {
        self.with_action(GroupAction::Updated)
    }

    /// Deleted outcomes.
    pub fn deleted(&self) -> impl Iterator<Item = &GroupOutcome> {
        self.with_action(GroupAction::Deleted)
    }

    /// Failed outcomes.
    pub fn failed(&self) -> impl Iterator<Item = &GroupOutcome> {
        self.with_action(GroupAction::Failed)
    }

    /// Outcome for a directory identifier.
    #[must_use]
    pub fn outcome(&self, identifier: &str) -> Option<&GroupOutcome> {
        self.outcomes.iter().find(|o| o.identifier == identifier)
    }

    /// The run failed as a whole: there was work and every group failed.
    #[must_use]
    pub fn run_failed(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(GroupOutcome::is_failed)
    }

    /// Aggregate counts.
    #[must_use]
    pub fn statistics(&self) -> RunStatistics {
        RunStatistics::from_outcomes(&self.outcomes, self.completed_at - self.started_at)
    }
}

/// Aggregate counts for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    /// Groups processed.
    pub groups_total: u32,
    /// Actions taken broken down by type.
    pub actions: BTreeMap<GroupAction, u32>,
    /// Errors broken down by code.
    pub errors_by_code: BTreeMap<String, u32>,
    /// Members dropped across all groups.
    pub members_dropped: u32,
    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl RunStatistics {
    fn from_outcomes(outcomes: &[GroupOutcome], elapsed: chrono::Duration) -> Self {
        let mut stats = Self {
            groups_total: outcomes.len() as u32,
            duration_ms: elapsed.num_milliseconds().max(0) as u64,
            ..Self::default()
        };
        for outcome in outcomes {
            *stats.actions.entry(outcome.action).or_insert(0) += 1;
            if let Some(err) = &outcome.error {
                *stats.errors_by_code.entry(err.code.clone()).or_insert(0) += 1;
            }
            stats.members_dropped += outcome.warnings.len() as u32;
        }
        stats
    }

    /// Get count for a specific action.
    #[must_use]
    pub fn action_count(&self, action: GroupAction) -> u32 {
        self.actions.get(&action).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(outcomes: Vec<GroupOutcome>) -> RunResult {
        RunResult::new(false, Utc::now()).finish(outcomes, false)
    }

    #[test]
    fn test_outcomes_sorted_by_identifier() {
        let result = result_with(vec![
            GroupOutcome::new("g2", "g2", GroupAction::Created),
            GroupOutcome::new("g1", "g1", GroupAction::Updated),
        ]);
        let ids: Vec<_> = result.outcomes.iter().map(|o| o.identifier.as_str()).collect();
        assert_eq!(ids, vec!["g1", "g2"]);
    }

    #[test]
    fn test_run_failed_only_when_all_failed() {
        let err = GroupSyncError::group_not_found("g1");

        assert!(!result_with(vec![]).run_failed());
        assert!(result_with(vec![GroupOutcome::failed("g1", &err)]).run_failed());
        assert!(!result_with(vec![
            GroupOutcome::failed("g1", &err),
            GroupOutcome::new("g2", "g2", GroupAction::Unchanged),
        ])
        .run_failed());
    }

    #[test]
    fn test_statistics() {
        let err = GroupSyncError::store_write_failed("g3", "disk full");
        let warning = MemberWarning {
            member: "cn=ghost,dc=example,dc=com".to_string(),
            error: (&GroupSyncError::member_not_found("cn=ghost,dc=example,dc=com")).into(),
        };
        let result = result_with(vec![
            GroupOutcome::new("g1", "g1", GroupAction::Created).with_warnings(vec![warning]),
            GroupOutcome::new("g2", "g2", GroupAction::Created),
            GroupOutcome::failed("g3", &err),
        ]);

        let stats = result.statistics();
        assert_eq!(stats.groups_total, 3);
        assert_eq!(stats.action_count(GroupAction::Created), 2);
        assert_eq!(stats.action_count(GroupAction::Deleted), 0);
        assert_eq!(stats.errors_by_code.get("STORE_WRITE_FAILED"), Some(&1));
        assert_eq!(stats.members_dropped, 1);
    }

    #[test]
    fn test_outcome_serialization_is_compact() {
        let outcome = GroupOutcome::new("g1", "admins", GroupAction::Updated).renamed_from("old");
        let json = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["action"], "updated");
        assert_eq!(json["renamed_from"], "old");
        assert!(json.get("error").is_none());
        assert!(json.get("warnings").is_none());
    }
}
