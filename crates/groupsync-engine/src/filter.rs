//! Whitelist/blacklist filtering of directory group identifiers.

use std::collections::HashSet;
use std::path::Path;

use groupsync_directory::error::{GroupSyncError, GroupSyncResult};

/// Inclusion and exclusion sets over directory group identifiers.
///
/// An empty whitelist admits every identifier. The blacklist always wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    whitelist: HashSet<String>,
    blacklist: HashSet<String>,
}

impl FilterSet {
    /// Create an unrestricted filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add identifiers to the whitelist.
    #[must_use]
    pub fn with_whitelist<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.whitelist.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Add identifiers to the blacklist.
    #[must_use]
    pub fn with_blacklist<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blacklist.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Add the identifiers listed in a file to the whitelist.
    pub fn with_whitelist_file(self, path: impl AsRef<Path>) -> GroupSyncResult<Self> {
        let ids = read_identifier_file(path.as_ref())?;
        Ok(self.with_whitelist(ids))
    }

    /// Add the identifiers listed in a file to the blacklist.
    pub fn with_blacklist_file(self, path: impl AsRef<Path>) -> GroupSyncResult<Self> {
        let ids = read_identifier_file(path.as_ref())?;
        Ok(self.with_blacklist(ids))
    }

    /// Decide whether a directory group takes part in the run.
    #[must_use]
    pub fn admits(&self, identifier: &str) -> bool {
        (self.whitelist.is_empty() || self.whitelist.contains(identifier))
            && !self.blacklist.contains(identifier)
    }

    /// Check if a whitelist is in effect.
    #[must_use]
    pub fn is_restricted(&self) -> bool {
        !self.whitelist.is_empty()
    }

    /// Whitelisted identifiers, sorted.
    #[must_use]
    pub fn whitelist(&self) -> Vec<&str> {
        sorted(&self.whitelist)
    }

    /// Blacklisted identifiers, sorted.
    #[must_use]
    pub fn blacklist(&self) -> Vec<&str> {
        sorted(&self.blacklist)
    }
}

fn sorted(set: &HashSet<String>) -> Vec<&str> {
    let mut ids: Vec<&str> = set.iter().map(String::as_str).collect();
    ids.sort_unstable();
    ids
}

/// Parse line-delimited identifiers. Blank lines and `#` comments are skipped.
pub fn parse_identifier_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect()
}

fn read_identifier_file(path: &Path) -> GroupSyncResult<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        GroupSyncError::config_invalid(format!(
            "could not read identifier file {}: {e}",
            path.display()
        ))
    })?;
    Ok(parse_identifier_list(&content))
}
