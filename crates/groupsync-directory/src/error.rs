//! Group sync error types
//!
//! Error definitions with fatal/per-group classification for run control.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error that can occur while talking to the directory or the group store.
#[derive(Debug, Error)]
pub enum GroupSyncError {
    // Run-level errors
    /// The directory cannot be reached or refused the bind.
    #[error("directory unreachable: {message}")]
    DirectoryUnreachable {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Sync configuration is invalid; the run never starts.
    #[error("invalid configuration: {message}")]
    ConfigInvalid { message: String },

    /// The group store could not be listed or read.
    #[error("group store read failed: {message}")]
    StoreReadFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // Per-group errors
    /// No directory group exists for the identifier.
    #[error("directory group not found: {identifier}")]
    GroupNotFound { identifier: String },

    /// A member reference does not resolve to a directory entry.
    #[error("directory member not found: {identifier}")]
    MemberNotFound { identifier: String },

    /// A member reference lies outside the configured users search base.
    #[error("member {identifier} is outside the users search base {base_dn}")]
    MemberOutOfScope { identifier: String, base_dn: String },

    /// A required attribute is absent on a directory entry.
    #[error("attribute '{attribute}' missing on directory entry {dn}")]
    AttributeMissing { attribute: String, dn: String },

    /// A directory query failed for a reason other than reachability.
    #[error("directory query failed: {message}")]
    QueryFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A create, update or delete against the group store failed.
    #[error("group store write failed for {name}: {message}")]
    StoreWriteFailed {
        name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The local group exists but is not owned by this directory group.
    #[error("group {name} conflicts with sync: {message}")]
    GroupConflict { name: String, message: String },

    /// A directory query or store write exceeded the caller's timeout.
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl GroupSyncError {
    /// Check if this error aborts the whole run rather than a single group.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GroupSyncError::DirectoryUnreachable { .. } | GroupSyncError::ConfigInvalid { .. }
        )
    }

    /// Check if this error is transient and a later run may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GroupSyncError::DirectoryUnreachable { .. }
                | GroupSyncError::Timeout { .. }
                | GroupSyncError::QueryFailed { .. }
                | GroupSyncError::StoreReadFailed { .. }
                | GroupSyncError::StoreWriteFailed { .. }
        )
    }

    /// Check if this error means the directory no longer has the record.
    ///
    /// Pruning treats these as proof that the sync source is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GroupSyncError::GroupNotFound { .. } | GroupSyncError::AttributeMissing { .. }
        )
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            GroupSyncError::DirectoryUnreachable { .. } => "DIRECTORY_UNREACHABLE",
            GroupSyncError::ConfigInvalid { .. } => "CONFIG_INVALID",
            GroupSyncError::StoreReadFailed { .. } => "STORE_READ_FAILED",
            GroupSyncError::GroupNotFound { .. } => "GROUP_NOT_FOUND",
            GroupSyncError::MemberNotFound { .. } => "MEMBER_NOT_FOUND",
            GroupSyncError::MemberOutOfScope { .. } => "MEMBER_OUT_OF_SCOPE",
            GroupSyncError::AttributeMissing { .. } => "ATTRIBUTE_MISSING",
            GroupSyncError::QueryFailed { .. } => "QUERY_FAILED",
            GroupSyncError::StoreWriteFailed { .. } => "STORE_WRITE_FAILED",
            GroupSyncError::GroupConflict { .. } => "GROUP_CONFLICT",
            GroupSyncError::Timeout { .. } => "TIMEOUT",
            GroupSyncError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    // Convenience constructors

    /// Create a directory unreachable error.
    pub fn unreachable(message: impl Into<String>) -> Self {
        GroupSyncError::DirectoryUnreachable {
            message: message.into(),
            source: None,
        }
    }

    /// Create a directory unreachable error with source.
    pub fn unreachable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        GroupSyncError::DirectoryUnreachable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error.
    pub fn config_invalid(message: impl Into<String>) -> Self {
        GroupSyncError::ConfigInvalid {
            message: message.into(),
        }
    }

    /// Create a group not found error.
    pub fn group_not_found(identifier: impl Into<String>) -> Self {
        GroupSyncError::GroupNotFound {
            identifier: identifier.into(),
        }
    }

    /// Create a member not found error.
    pub fn member_not_found(identifier: impl Into<String>) -> Self {
        GroupSyncError::MemberNotFound {
            identifier: identifier.into(),
        }
    }

    /// Create a member out of scope error.
    pub fn member_out_of_scope(identifier: impl Into<String>, base_dn: impl Into<String>) -> Self {
        GroupSyncError::MemberOutOfScope {
            identifier: identifier.into(),
            base_dn: base_dn.into(),
        }
    }

    /// Create an attribute missing error.
    pub fn attribute_missing(attribute: impl Into<String>, dn: impl Into<String>) -> Self {
        GroupSyncError::AttributeMissing {
            attribute: attribute.into(),
            dn: dn.into(),
        }
    }

    /// Create a query failed error.
    pub fn query_failed(message: impl Into<String>) -> Self {
        GroupSyncError::QueryFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a query failed error with source.
    pub fn query_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        GroupSyncError::QueryFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a store read error.
    pub fn store_read_failed(message: impl Into<String>) -> Self {
        GroupSyncError::StoreReadFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a store write error.
    pub fn store_write_failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        GroupSyncError::StoreWriteFailed {
            name: name.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a store write error with source.
    pub fn store_write_failed_with_source(
        name: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        GroupSyncError::StoreWriteFailed {
            name: name.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a group conflict error.
    pub fn conflict(name: impl Into<String>, message: impl Into<String>) -> Self {
        GroupSyncError::GroupConflict {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        GroupSyncError::Timeout {
            operation: operation.into(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        GroupSyncError::Internal {
            message: message.into(),
        }
    }
}

/// Result type for directory and store operations.
pub type GroupSyncResult<T> = Result<T, GroupSyncError>;

/// Serializable snapshot of an error, kept in run results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Stable error code (see [`GroupSyncError::error_code`]).
    pub code: String,
    /// Human readable message.
    pub message: String,
}

impl From<&GroupSyncError> for ErrorRecord {
    fn from(err: &GroupSyncError) -> Self {
        Self {
            code: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fatal_errors() {
        let fatal = vec![
            GroupSyncError::unreachable("connection refused"),
            GroupSyncError::config_invalid("groupUIDAttribute is empty"),
        ];

        for err in fatal {
            assert!(err.is_fatal(), "Expected {} to be fatal", err.error_code());
        }
    }

    #[test]
    fn test_per_group_errors_are_not_fatal() {
        let per_group = vec![
            GroupSyncError::group_not_found("cn=g1,ou=groups,dc=example,dc=com"),
            GroupSyncError::attribute_missing("gidNumber", "cn=g1,dc=example,dc=com"),
            GroupSyncError::store_write_failed("g1", "conflict"),
            GroupSyncError::conflict("g1", "owned by another host"),
            GroupSyncError::timeout("lookup group", Duration::from_secs(5)),
        ];

        for err in per_group {
            assert!(
                !err.is_fatal(),
                "Expected {} to not be fatal",
                err.error_code()
            );
        }
    }

    #[test]
    fn test_not_found_classification() {
        assert!(GroupSyncError::group_not_found("g1").is_not_found());
        assert!(GroupSyncError::attribute_missing("cn", "dn").is_not_found());
        assert!(!GroupSyncError::query_failed("size limit exceeded").is_not_found());
        assert!(!GroupSyncError::unreachable("down").is_not_found());
    }

    #[test]
    fn test_transient_errors() {
        assert!(GroupSyncError::timeout("x", Duration::from_millis(10)).is_transient());
        assert!(GroupSyncError::unreachable("down").is_transient());
        assert!(!GroupSyncError::conflict("g1", "taken").is_transient());
        assert!(!GroupSyncError::config_invalid("bad").is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = GroupSyncError::timeout("lookup group g1", Duration::from_millis(1500));
        assert_eq!(err.to_string(), "lookup group g1 timed out after 1500 ms");

        let err = GroupSyncError::attribute_missing("gidNumber", "cn=g1,dc=example,dc=com");
        assert_eq!(
            err.to_string(),
            "attribute 'gidNumber' missing on directory entry cn=g1,dc=example,dc=com"
        );
    }

    #[test]
    fn test_error_record_snapshot() {
        let err = GroupSyncError::group_not_found("g2");
        let record = ErrorRecord::from(&err);

        assert_eq!(record.code, "GROUP_NOT_FOUND");
        assert_eq!(record.message, "directory group not found: g2");
        assert_eq!(
            record.to_string(),
            "[GROUP_NOT_FOUND] directory group not found: g2"
        );
    }

    #[test]
    fn test_error_with_source() {
        let source_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = GroupSyncError::unreachable_with_source("bind failed", source_err);

        assert!(err.is_fatal());
        if let GroupSyncError::DirectoryUnreachable { source, .. } = &err {
            assert!(source.is_some());
        } else {
            panic!("Expected DirectoryUnreachable variant");
        }
    }
}
