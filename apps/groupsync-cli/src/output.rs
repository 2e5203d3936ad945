//! Terminal output for run results

use std::fmt::Write as _;

use clap::ValueEnum;
use serde::Serialize;

use groupsync_engine::{GroupAction, GroupOutcome, RunResult, RunStatistics};

use crate::error::CliResult;

/// Result rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human readable table
    #[default]
    Table,
    /// JSON document on stdout
    Json,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    #[serde(flatten)]
    result: &'a RunResult,
    statistics: RunStatistics,
}

/// Render a run result in the requested format.
pub fn render(result: &RunResult, format: OutputFormat) -> CliResult<String> {
    match format {
        OutputFormat::Table => Ok(render_table(result)),
        OutputFormat::Json => {
            let report = JsonReport {
                result,
                statistics: result.statistics(),
            };
            Ok(serde_json::to_string_pretty(&report)?)
        }
    }
}

/// Print a run result to stdout; the dry-run banner goes to stderr.
pub fn print_result(result: &RunResult, format: OutputFormat) -> CliResult<()> {
    if result.dry_run {
        eprintln!("{}", dry_run_banner());
    }
    println!("{}", render(result, format)?);
    Ok(())
}

/// Notice printed before the results of a dry-run.
pub fn dry_run_banner() -> &'static str {
    "Dry run: no groups were changed. Rerun with --confirm to apply these changes."
}

fn render_table(result: &RunResult) -> String {
    let mut out = String::new();

    if result.outcomes.is_empty() {
        out.push_str("No groups matched.");
        return out;
    }

    let _ = writeln!(out, "{:<10} {:<48} {:<30} DETAILS", "ACTION", "IDENTIFIER", "NAME");
    let _ = writeln!(out, "{}", "-".repeat(100));
    for outcome in &result.outcomes {
        let _ = writeln!(
            out,
            "{:<10} {:<48} {:<30} {}",
            outcome.action.as_str(),
            truncate(&outcome.identifier, 48),
            truncate(outcome.name.as_deref().unwrap_or("-"), 30),
            details(outcome),
        );
    }

    let stats = result.statistics();
    let _ = writeln!(out);
    let _ = write!(
        out,
        "{} group(s): {} created, {} updated, {} unchanged, {} deleted, {} failed",
        stats.groups_total,
        stats.action_count(GroupAction::Created),
        stats.action_count(GroupAction::Updated),
        stats.action_count(GroupAction::Unchanged),
        stats.action_count(GroupAction::Deleted),
        stats.action_count(GroupAction::Failed),
    );
    if stats.members_dropped > 0 {
        let _ = write!(out, "; {} member(s) dropped", stats.members_dropped);
    }
    if result.cancelled {
        out.push_str("\nRun was cancelled before all groups were processed.");
    }
    out
}

fn details(outcome: &GroupOutcome) -> String {
    if let Some(error) = &outcome.error {
        return format!("{}: {}", error.code, error.message);
    }
    let mut parts = Vec::new();
    if let Some(old) = &outcome.renamed_from {
        parts.push(format!("renamed from {old}"));
    }
    if !outcome.warnings.is_empty() {
        parts.push(format!("{} member(s) dropped", outcome.warnings.len()));
    }
    parts.join(", ")
}

/// Truncate to `max` characters, marking the cut with `...`.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use groupsync_directory::prelude::*;
    use groupsync_engine::MemberWarning;

    fn result(dry_run: bool, outcomes: Vec<GroupOutcome>) -> RunResult {
        let now = Utc::now();
        RunResult {
            dry_run,
            cancelled: false,
            started_at: now,
            completed_at: now,
            outcomes,
        }
    }

    #[test]
    fn test_table_lists_every_outcome() {
        let result = result(
            false,
            vec![
                GroupOutcome::new("cn=g1", "g1", GroupAction::Created),
                GroupOutcome::new("cn=g2", "g2-new", GroupAction::Updated).renamed_from("g2"),
                GroupOutcome::failed("cn=g3", &GroupSyncError::group_not_found("cn=g3")),
            ],
        );

        let table = render(&result, OutputFormat::Table).unwrap();
        assert!(table.starts_with("ACTION"));
        assert!(table.contains("created"));
        assert!(table.contains("renamed from g2"));
        assert!(table.contains("GROUP_NOT_FOUND"));
        assert!(table
            .contains("3 group(s): 1 created, 1 updated, 0 unchanged, 0 deleted, 1 failed"));
    }

    #[test]
    fn test_table_reports_dropped_members() {
        let warning = MemberWarning {
            member: "cn=ghost".to_string(),
            error: ErrorRecord::from(&GroupSyncError::member_not_found("cn=ghost")),
        };
        let result = result(
            false,
            vec![GroupOutcome::new("cn=g1", "g1", GroupAction::Created)
                .with_warnings(vec![warning])],
        );

        let table = render(&result, OutputFormat::Table).unwrap();
        assert!(table.contains("1 member(s) dropped"));
    }

    #[test]
    fn test_empty_result() {
        let table = render(&result(true, vec![]), OutputFormat::Table).unwrap();
        assert_eq!(table, "No groups matched.");
    }

    #[test]
    fn test_json_includes_statistics() {
        let result = result(
            true,
            vec![GroupOutcome::new("cn=g1", "g1", GroupAction::Created)],
        );

        let json = render(&result, OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["dry_run"], true);
        assert_eq!(value["outcomes"][0]["action"], "created");
        assert_eq!(value["statistics"]["groups_total"], 1);
        assert_eq!(value["statistics"]["actions"]["created"], 1);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("cn=a-very-long-group", 10), "cn=a-ve...");
    }

    #[test]
    fn test_dry_run_banner_mentions_confirm() {
        assert!(dry_run_banner().contains("--confirm"));
    }
}
