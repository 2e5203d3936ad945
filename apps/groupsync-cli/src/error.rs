//! CLI error types and exit codes

use groupsync_directory::error::GroupSyncError;
use thiserror::Error;

/// Exit codes for the CLI
/// - 0: Success
/// - 1: General error
/// - 2: Run failed (every group failed)
/// - 3: Directory unreachable
/// - 4: Validation error
pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Directory unreachable: {0}")]
    Unreachable(String),

    #[error("{0}")]
    Sync(GroupSyncError),

    #[error("Run failed: all {failed} group(s) reported errors")]
    RunFailed { failed: usize },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::RunFailed { .. } => 2,
            CliError::Unreachable(_) => 3,
            CliError::Validation(_) => 4,
            CliError::Config(_) | CliError::Io(_) | CliError::Sync(_) => 1,
        }
    }

    /// Print the error to stderr with appropriate formatting
    pub fn print(&self) {
        let use_color = std::env::var("NO_COLOR").is_err();

        if use_color {
            eprintln!("\x1b[31mError:\x1b[0m {}", self);
        } else {
            eprintln!("Error: {}", self);
        }

        if let Some(suggestion) = self.suggestion() {
            if use_color {
                eprintln!("\n\x1b[33mSuggestion:\x1b[0m {}", suggestion);
            } else {
                eprintln!("\nSuggestion: {}", suggestion);
            }
        }
    }

    fn suggestion(&self) -> Option<&'static str> {
        match self {
            CliError::Unreachable(_) => {
                Some("Check the url, bindDN and bindPassword in the sync config.")
            }
            CliError::RunFailed { .. } => Some("Rerun with --verbose for per-group details."),
            _ => None,
        }
    }
}

impl From<GroupSyncError> for CliError {
    fn from(e: GroupSyncError) -> Self {
        match e {
            GroupSyncError::DirectoryUnreachable { message, .. } => CliError::Unreachable(message),
            GroupSyncError::ConfigInvalid { message } => CliError::Config(message),
            other => CliError::Sync(other),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Config(format!("JSON error: {}", e))
    }
}

impl From<serde_yaml::Error> for CliError {
    fn from(e: serde_yaml::Error) -> Self {
        CliError::Config(format!("YAML error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_run_failed() {
        assert_eq!(CliError::RunFailed { failed: 3 }.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_validation() {
        assert_eq!(CliError::Validation("bad".to_string()).exit_code(), 4);
    }

    #[test]
    fn test_unreachable_maps_to_exit_code_3() {
        let err: CliError = GroupSyncError::unreachable("connection refused").into();
        assert!(matches!(err, CliError::Unreachable(_)));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_config_invalid_keeps_message() {
        let err: CliError = GroupSyncError::config_invalid("concurrency must be > 0").into();
        assert_eq!(
            err.to_string(),
            "Configuration error: concurrency must be > 0"
        );
    }

    #[test]
    fn test_other_errors_pass_through() {
        let err: CliError = GroupSyncError::group_not_found("cn=x").into();
        assert!(matches!(err, CliError::Sync(GroupSyncError::GroupNotFound { .. })));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_run_failed_display() {
        assert_eq!(
            CliError::RunFailed { failed: 2 }.to_string(),
            "Run failed: all 2 group(s) reported errors"
        );
    }
}
