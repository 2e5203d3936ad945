//! Local group types
//!
//! The cluster-resident representation of a synchronized group, together with
//! the provenance metadata that links it back to its directory record.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Annotation holding the directory identifier a group was synced from.
pub const SYNC_SOURCE_ANNOTATION: &str = "openshift.io/ldap.uid";

/// Annotation holding the `host:port` of the source directory.
pub const SYNC_URL_ANNOTATION: &str = "openshift.io/ldap.url";

/// Annotation holding the RFC 3339 time of the last successful sync.
pub const SYNC_TIME_ANNOTATION: &str = "openshift.io/ldap.sync-time";

/// Label holding the host of the source directory.
pub const SYNC_HOST_LABEL: &str = "openshift.io/ldap.host";

/// A group as persisted in the local group store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalGroup {
    /// Unique group name.
    pub name: String,
    /// Local user identifiers.
    #[serde(default)]
    pub users: BTreeSet<String>,
    /// Free-form annotations, including sync provenance.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Labels, including the sync host label.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl LocalGroup {
    /// Create an empty group.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set users using builder pattern.
    pub fn with_users<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.users = users.into_iter().map(Into::into).collect();
        self
    }

    /// Record sync provenance using builder pattern.
    #[must_use]
    pub fn with_sync_source(
        mut self,
        identifier: &str,
        directory_url: &str,
        synced_at: DateTime<Utc>,
    ) -> Self {
        self.set_sync_source(identifier, directory_url, synced_at);
        self
    }

    /// Record sync provenance: source identifier, directory url and host, sync time.
    pub fn set_sync_source(
        &mut self,
        identifier: &str,
        directory_url: &str,
        synced_at: DateTime<Utc>,
    ) {
        self.annotations
            .insert(SYNC_SOURCE_ANNOTATION.to_string(), identifier.to_string());
        self.annotations
            .insert(SYNC_URL_ANNOTATION.to_string(), directory_url.to_string());
        self.annotations.insert(
            SYNC_TIME_ANNOTATION.to_string(),
            synced_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        self.labels
            .insert(SYNC_HOST_LABEL.to_string(), host_of(directory_url).to_string());
    }

    /// Directory identifier this group was synced from.
    pub fn sync_source(&self) -> Option<&str> {
        self.annotations
            .get(SYNC_SOURCE_ANNOTATION)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    /// `host:port` of the directory this group was synced from.
    pub fn sync_url(&self) -> Option<&str> {
        self.annotations.get(SYNC_URL_ANNOTATION).map(String::as_str)
    }

    /// Host label of the directory this group was synced from.
    pub fn sync_host(&self) -> Option<&str> {
        self.labels.get(SYNC_HOST_LABEL).map(String::as_str)
    }

    /// Time of the last successful sync, if recorded and parseable.
    pub fn sync_time(&self) -> Option<DateTime<Utc>> {
        self.annotations
            .get(SYNC_TIME_ANNOTATION)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Check whether this group carries provenance from the given directory.
    ///
    /// Both the host label and the url annotation must agree; groups synced
    /// from another directory are never touched.
    pub fn is_synced_from(&self, directory_url: &str) -> bool {
        self.sync_source().is_some()
            && self.sync_host() == Some(host_of(directory_url))
            && self.sync_url() == Some(directory_url)
    }
}

/// Strip the port from a `host:port` string.
///
/// Bracketed IPv6 literals keep their brackets.
pub fn host_of(url: &str) -> &str {
    match url.rfind(':') {
        Some(idx) if !url[idx..].contains(']') => &url[..idx],
        _ => url,
    }
}
