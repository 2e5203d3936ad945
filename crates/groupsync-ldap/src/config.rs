//! LDAP directory configuration
//!
//! Connection parameters plus the group and user queries that bound what the
//! sync can see.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use groupsync_directory::error::{GroupSyncError, GroupSyncResult};

/// Search scope of a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    /// Only the base entry.
    Base,
    /// Immediate children of the base.
    One,
    /// The base and its whole subtree.
    #[default]
    Sub,
}

impl SearchScope {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchScope::Base => "base",
            SearchScope::One => "one",
            SearchScope::Sub => "sub",
        }
    }
}

impl std::fmt::Display for SearchScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SearchScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "base" => Ok(SearchScope::Base),
            "one" | "onelevel" => Ok(SearchScope::One),
            "" | "sub" | "subtree" => Ok(SearchScope::Sub),
            _ => Err(format!("Unknown search scope: {s}")),
        }
    }
}

impl From<SearchScope> for ldap3::Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => ldap3::Scope::Base,
            SearchScope::One => ldap3::Scope::OneLevel,
            SearchScope::Sub => ldap3::Scope::Subtree,
        }
    }
}

/// A bounded directory query: where to look and what to match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LdapQuery {
    /// Base DN of the search.
    pub base_dn: String,

    /// Search scope below the base.
    #[serde(default)]
    pub scope: SearchScope,

    /// Filter every returned entry must match.
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Server-side time limit in seconds (0 = none).
    #[serde(default)]
    pub timeout_secs: u64,
}

fn default_filter() -> String {
    "(objectClass=*)".to_string()
}

impl LdapQuery {
    /// Create a subtree query with the given base and filter.
    pub fn new(base_dn: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
            scope: SearchScope::Sub,
            filter: filter.into(),
            timeout_secs: 0,
        }
    }

    /// Set the search scope.
    #[must_use]
    pub fn with_scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    /// Time limit as Duration, if one is set.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    fn validate(&self, name: &str) -> GroupSyncResult<()> {
        if self.base_dn.trim().is_empty() {
            return Err(GroupSyncError::config_invalid(format!(
                "{name}: base DN is required"
            )));
        }
        if !is_balanced_filter(&self.filter) {
            return Err(GroupSyncError::config_invalid(format!(
                "{name}: invalid filter '{}'",
                self.filter
            )));
        }
        Ok(())
    }
}

/// Check that a filter is parenthesized and its parentheses balance.
fn is_balanced_filter(filter: &str) -> bool {
    let filter = filter.trim();
    if !filter.starts_with('(') || !filter.ends_with(')') {
        return false;
    }
    let mut depth: i32 = 0;
    let mut escaped = false;
    for c in filter.chars() {
        match c {
            '\\' => escaped = !escaped,
            '(' if !escaped => depth += 1,
            ')' if !escaped => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => escaped = false,
        }
        if c != '\\' {
            escaped = false;
        }
    }
    depth == 0
}

/// Configuration for an LDAP-backed directory.
#[derive(Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    /// LDAP server hostname or IP address.
    pub host: String,

    /// LDAP server port (389 for LDAP, 636 for LDAPS).
    #[serde(default = "default_ldap_port")]
    pub port: u16,

    /// Use SSL/TLS (LDAPS).
    #[serde(default)]
    pub use_ssl: bool,

    /// Use STARTTLS upgrade on plain LDAP connection.
    #[serde(default)]
    pub use_starttls: bool,

    /// Bind DN; empty binds anonymously.
    #[serde(default)]
    pub bind_dn: String,

    /// Bind password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_password: Option<String>,

    /// Connection timeout in seconds.
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,

    /// Query locating groups.
    pub groups_query: LdapQuery,

    /// Attribute that identifies a group (`dn` for the DN).
    #[serde(default = "default_dn_attribute")]
    pub group_uid_attribute: String,

    /// Query locating users (group members).
    pub users_query: LdapQuery,

    /// Attribute member references point at (`dn` for the DN).
    #[serde(default = "default_dn_attribute")]
    pub user_uid_attribute: String,
}

impl std::fmt::Debug for LdapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_ssl", &self.use_ssl)
            .field("use_starttls", &self.use_starttls)
            .field("bind_dn", &self.bind_dn)
            .field(
                "bind_password",
                &self.bind_password.as_ref().map(|_| "***REDACTED***"),
            )
            .field("connection_timeout_secs", &self.connection_timeout_secs)
            .field("groups_query", &self.groups_query)
            .field("group_uid_attribute", &self.group_uid_attribute)
            .field("users_query", &self.users_query)
            .field("user_uid_attribute", &self.user_uid_attribute)
            .finish()
    }
}

fn default_ldap_port() -> u16 {
    389
}

fn default_connection_timeout_secs() -> u64 {
    30
}

fn default_dn_attribute() -> String {
    "dn".to_string()
}

impl LdapConfig {
    /// Create a new LDAP config for a host with group and user queries.
    pub fn new(host: impl Into<String>, groups_query: LdapQuery, users_query: LdapQuery) -> Self {
        Self {
            host: host.into(),
            port: default_ldap_port(),
            use_ssl: false,
            use_starttls: false,
            bind_dn: String::new(),
            bind_password: None,
            connection_timeout_secs: default_connection_timeout_secs(),
            groups_query,
            group_uid_attribute: default_dn_attribute(),
            users_query,
            user_uid_attribute: default_dn_attribute(),
        }
    }

    /// Set bind credentials.
    pub fn with_bind(mut self, bind_dn: impl Into<String>, password: impl Into<String>) -> Self {
        self.bind_dn = bind_dn.into();
        self.bind_password = Some(password.into());
        self
    }

    /// Enable SSL (LDAPS).
    #[must_use]
    pub fn with_ssl(mut self) -> Self {
        self.use_ssl = true;
        self.port = 636;
        self
    }

    /// Enable STARTTLS.
    #[must_use]
    pub fn with_starttls(mut self) -> Self {
        self.use_starttls = true;
        self
    }

    /// Set the group identifier attribute.
    pub fn with_group_uid_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.group_uid_attribute = attribute.into();
        self
    }

    /// Set the user identifier attribute.
    pub fn with_user_uid_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.user_uid_attribute = attribute.into();
        self
    }

    /// Apply a server URL such as `ldaps://ldap.example.com:636`.
    ///
    /// The scheme selects LDAPS; a missing port falls back to the scheme's
    /// default.
    pub fn with_url(mut self, url: &str) -> GroupSyncResult<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| GroupSyncError::config_invalid(format!("invalid LDAP URL '{url}'")))?;
        self.use_ssl = match scheme.to_lowercase().as_str() {
            "ldap" => false,
            "ldaps" => true,
            other => {
                return Err(GroupSyncError::config_invalid(format!(
                    "unsupported LDAP scheme '{other}'"
                )))
            }
        };

        let authority = rest.split(['/', '?']).next().unwrap_or_default();
        let (host, port) = split_host_port(authority)?;
        self.host = host.to_string();
        self.port = port.unwrap_or(if self.use_ssl { 636 } else { 389 });
        Ok(self)
    }

    /// Get the LDAP URL.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.use_ssl { "ldaps" } else { "ldap" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// `host:port`, recorded on synced groups.
    #[must_use]
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connection timeout as Duration.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Check if this configuration is valid.
    pub fn validate(&self) -> GroupSyncResult<()> {
        if self.host.is_empty() {
            return Err(GroupSyncError::config_invalid("LDAP host is required"));
        }
        if self.use_ssl && self.use_starttls {
            return Err(GroupSyncError::config_invalid(
                "cannot use both SSL and STARTTLS",
            ));
        }
        if self.bind_password.is_some() && self.bind_dn.is_empty() {
            return Err(GroupSyncError::config_invalid(
                "bind password is set without a bind DN",
            ));
        }
        if self.group_uid_attribute.trim().is_empty() || self.user_uid_attribute.trim().is_empty()
        {
            return Err(GroupSyncError::config_invalid(
                "group and user UID attributes are required",
            ));
        }
        self.groups_query.validate("groups query")?;
        self.users_query.validate("users query")
    }

    /// Return a copy safe to log.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.bind_password.is_some() {
            config.bind_password = Some("***REDACTED***".to_string());
        }
        config
    }
}

fn split_host_port(authority: &str) -> GroupSyncResult<(&str, Option<u16>)> {
    let invalid = || GroupSyncError::config_invalid(format!("invalid LDAP host '{authority}'"));

    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        // [v6]:port
        let end = rest.find(']').ok_or_else(invalid)?;
        let host = &authority[..end + 2];
        let port = rest[end + 1..].strip_prefix(':');
        (host, port)
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    if host.is_empty() || host == "[]" {
        return Err(invalid());
    }
    let port = port
        .map(|p| p.parse::<u16>().map_err(|_| invalid()))
        .transpose()?;
    Ok((host, port))
}
