//! LDAP directory implementation
//!
//! Implements `DirectoryQuery` over an LDAP v3 server using rfc2307-style
//! group and user queries.

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapResult, Scope, SearchEntry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use groupsync_directory::entry::{dn_is_under, DirectoryEntry, DN_ATTRIBUTE};
use groupsync_directory::error::{GroupSyncError, GroupSyncResult};
use groupsync_directory::traits::DirectoryQuery;

use crate::config::{LdapConfig, LdapQuery};

/// LDAP result code: noSuchObject.
const RC_NO_SUCH_OBJECT: u32 = 32;

/// LDAP result code: invalidCredentials.
const RC_INVALID_CREDENTIALS: u32 = 49;

/// Directory backed by an LDAP server.
pub struct LdapDirectory {
    /// Configuration.
    config: LdapConfig,

    /// `host:port` reported as the directory url.
    host_port: String,

    /// Cached LDAP connection (lazily initialized).
    connection: Arc<RwLock<Option<Ldap>>>,
}

impl LdapDirectory {
    /// Create a new LDAP directory with the given configuration.
    pub fn new(config: LdapConfig) -> GroupSyncResult<Self> {
        config.validate()?;

        let host_port = config.host_port();
        Ok(Self {
            config,
            host_port,
            connection: Arc::new(RwLock::new(None)),
        })
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &LdapConfig {
        &self.config
    }

    /// Get an LDAP connection, creating one if necessary.
    async fn get_connection(&self) -> GroupSyncResult<Ldap> {
        {
            let conn_guard = self.connection.read().await;
            if let Some(ref conn) = *conn_guard {
                return Ok(conn.clone());
            }
        }

        let conn = self.create_connection().await?;
        *self.connection.write().await = Some(conn.clone());
        Ok(conn)
    }

    /// Drop the cached connection so the next call reconnects.
    async fn reset_connection(&self) {
        *self.connection.write().await = None;
    }

    /// Create a new LDAP connection and bind.
    async fn create_connection(&self) -> GroupSyncResult<Ldap> {
        let url = self.config.url();
        debug!(url = %url, "Connecting to LDAP server");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(self.config.connection_timeout())
            .set_starttls(self.config.use_starttls);

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| {
                GroupSyncError::unreachable_with_source(
                    format!("failed to connect to LDAP server at {url}"),
                    e,
                )
            })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        if self.config.bind_dn.is_empty() {
            debug!("Using anonymous LDAP access");
            return Ok(ldap);
        }

        let bind_dn = &self.config.bind_dn;
        let bind_password = self.config.bind_password.as_deref().unwrap_or("");
        debug!(bind_dn = %bind_dn, "Performing LDAP bind");

        let result = ldap
            .simple_bind(bind_dn, bind_password)
            .await
            .map_err(|e| {
                GroupSyncError::unreachable_with_source(
                    format!("LDAP bind failed for {bind_dn}"),
                    e,
                )
            })?;

        if result.rc != 0 {
            if result.rc == RC_INVALID_CREDENTIALS {
                return Err(GroupSyncError::unreachable(format!(
                    "invalid credentials for {bind_dn}"
                )));
            }
            return Err(GroupSyncError::unreachable(format!(
                "LDAP bind failed with code {}: {}",
                result.rc, result.text
            )));
        }

        info!(host = %self.config.host, "LDAP connection established");
        Ok(ldap)
    }

    /// Run a search. A missing base object yields no entries.
    async fn search(
        &self,
        base: &str,
        scope: Scope,
        filter: &str,
        timeout: Option<Duration>,
    ) -> GroupSyncResult<Vec<DirectoryEntry>> {
        let mut ldap = self.get_connection().await?;
        if let Some(timeout) = timeout {
            ldap.with_timeout(timeout);
        }

        debug!(base_dn = %base, filter = %filter, "Searching LDAP");

        let result = match ldap.search(base, scope, filter, vec!["*"]).await {
            Ok(result) => result,
            Err(e) => {
                self.reset_connection().await;
                return Err(GroupSyncError::query_failed_with_source(
                    format!("LDAP search under {base} failed"),
                    e,
                ));
            }
        };

        let ldap3::SearchResult(entries, res) = result;
        if res.rc == RC_NO_SUCH_OBJECT {
            return Ok(Vec::new());
        }
        check_result(&res, base)?;

        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(entry_from_search)
            .collect())
    }

    /// Find exactly one entry in `query` whose `attribute` equals `value`.
    ///
    /// Returns `None` when nothing matches.
    async fn find_one(
        &self,
        query: &LdapQuery,
        attribute: &str,
        value: &str,
    ) -> GroupSyncResult<Option<DirectoryEntry>> {
        let mut entries = if attribute.eq_ignore_ascii_case(DN_ATTRIBUTE) {
            if !dn_is_under(value, &query.base_dn) {
                return Ok(None);
            }
            self.search(value, Scope::Base, &query.filter, query.timeout())
                .await?
        } else {
            let filter = and_filter(&query.filter, attribute, value);
            self.search(&query.base_dn, query.scope.into(), &filter, query.timeout())
                .await?
        };

        match entries.len() {
            0 => Ok(None),
            1 => Ok(entries.pop()),
            n => Err(GroupSyncError::query_failed(format!(
                "{n} entries under {} have {attribute}={value}",
                query.base_dn
            ))),
        }
    }
}

#[async_trait]
impl DirectoryQuery for LdapDirectory {
    fn url(&self) -> &str {
        &self.host_port
    }

    #[instrument(skip(self), fields(host = %self.host_port))]
    async fn test_connection(&self) -> GroupSyncResult<()> {
        let base = &self.config.groups_query.base_dn;
        let entries = self
            .search(base, Scope::Base, "(objectClass=*)", None)
            .await
            .map_err(|e| match e {
                GroupSyncError::DirectoryUnreachable { .. } => e,
                other => GroupSyncError::unreachable_with_source("test search failed", other),
            })?;

        if entries.is_empty() {
            return Err(GroupSyncError::unreachable(format!(
                "groups base DN '{base}' not found or not accessible"
            )));
        }

        info!("LDAP connection test successful");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn lookup_group(&self, identifier: &str) -> GroupSyncResult<DirectoryEntry> {
        self.find_one(
            &self.config.groups_query,
            &self.config.group_uid_attribute,
            identifier,
        )
        .await?
        .ok_or_else(|| GroupSyncError::group_not_found(identifier))
    }

    #[instrument(skip(self))]
    async fn list_groups(&self) -> GroupSyncResult<Vec<DirectoryEntry>> {
        let query = &self.config.groups_query;
        let entries = self
            .search(&query.base_dn, query.scope.into(), &query.filter, query.timeout())
            .await?;
        info!(total_found = entries.len(), "Listed directory groups");
        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn lookup_member(&self, identifier: &str) -> GroupSyncResult<DirectoryEntry> {
        let query = &self.config.users_query;
        let by_dn = self
            .config
            .user_uid_attribute
            .eq_ignore_ascii_case(DN_ATTRIBUTE);
        if by_dn && !dn_is_under(identifier, &query.base_dn) {
            return Err(GroupSyncError::member_out_of_scope(
                identifier,
                &query.base_dn,
            ));
        }

        self.find_one(query, &self.config.user_uid_attribute, identifier)
            .await?
            .ok_or_else(|| GroupSyncError::member_not_found(identifier))
    }
}

impl std::fmt::Debug for LdapDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapDirectory")
            .field("host_port", &self.host_port)
            .field("config", &self.config.redacted())
            .finish()
    }
}

fn check_result(res: &LdapResult, base: &str) -> GroupSyncResult<()> {
    if res.rc == 0 {
        return Ok(());
    }
    Err(GroupSyncError::query_failed(format!(
        "LDAP search under {base} failed with code {}: {}",
        res.rc, res.text
    )))
}

/// Escape special characters in LDAP filter values (RFC 4515).
pub fn escape_ldap_value(value: &str) -> String {
    value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}

/// Combine a base filter with an equality match on one attribute.
pub fn and_filter(base_filter: &str, attribute: &str, value: &str) -> String {
    format!(
        "(&{}({}={}))",
        base_filter.trim(),
        attribute,
        escape_ldap_value(value)
    )
}

/// Convert an LDAP search entry. Binary attributes are not carried.
fn entry_from_search(entry: SearchEntry) -> DirectoryEntry {
    let mut out = DirectoryEntry::new(entry.dn);
    for (name, values) in entry.attrs {
        out.set(name, values);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchScope;
    use std::collections::HashMap;

    fn test_config() -> LdapConfig {
        LdapConfig::new(
            "127.0.0.1",
            LdapQuery::new("ou=groups,dc=example,dc=com", "(objectClass=groupOfNames)"),
            LdapQuery::new("ou=users,dc=example,dc=com", "(objectClass=inetOrgPerson)"),
        )
    }

    #[test]
    fn test_escape_ldap_value() {
        assert_eq!(escape_ldap_value("admins"), "admins");
        assert_eq!(escape_ldap_value("a*b"), "a\\2ab");
        assert_eq!(escape_ldap_value("(x)"), "\\28x\\29");
        assert_eq!(escape_ldap_value("a\\b"), "a\\5cb");
        assert_eq!(escape_ldap_value("nul\0"), "nul\\00");
    }

    #[test]
    fn test_and_filter_escapes_injection() {
        assert_eq!(
            and_filter("(objectClass=posixGroup)", "gidNumber", "5000"),
            "(&(objectClass=posixGroup)(gidNumber=5000))"
        );
        assert_eq!(
            and_filter("(objectClass=*)", "cn", "x)(cn=*"),
            "(&(objectClass=*)(cn=x\\29\\28cn=\\2a))"
        );
    }

    #[test]
    fn test_entry_from_search() {
        let mut attrs = HashMap::new();
        attrs.insert("cn".to_string(), vec!["admins".to_string()]);
        attrs.insert(
            "member".to_string(),
            vec![
                "cn=alice,ou=users,dc=example,dc=com".to_string(),
                "cn=bob,ou=users,dc=example,dc=com".to_string(),
            ],
        );
        let entry = entry_from_search(SearchEntry {
            dn: "cn=admins,ou=groups,dc=example,dc=com".to_string(),
            attrs,
            bin_attrs: HashMap::new(),
        });

        assert_eq!(entry.first("dn"), Some("cn=admins,ou=groups,dc=example,dc=com"));
        assert_eq!(entry.first("CN"), Some("admins"));
        assert_eq!(entry.values("member").map(|v| v.len()), Some(2));
    }

    #[test]
    fn test_scope_conversion() {
        assert!(matches!(Scope::from(SearchScope::Base), Scope::Base));
        assert!(matches!(Scope::from(SearchScope::One), Scope::OneLevel));
        assert!(matches!(Scope::from(SearchScope::Sub), Scope::Subtree));
    }

    #[test]
    fn test_new_validates_config() {
        let mut config = test_config();
        config.host = String::new();
        assert!(LdapDirectory::new(config).is_err());

        let directory = LdapDirectory::new(test_config()).unwrap();
        assert_eq!(directory.url(), "127.0.0.1:389");
    }

    #[test]
    fn test_debug_redacts_password() {
        let directory = LdapDirectory::new(
            test_config().with_bind("cn=admin,dc=example,dc=com", "hunter2"),
        )
        .unwrap();
        let debug = format!("{directory:?}");
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_member_outside_users_base_is_out_of_scope() {
        // Rejected before any connection is attempted.
        let directory = LdapDirectory::new(test_config()).unwrap();
        let err = directory
            .lookup_member("cn=svc,ou=services,dc=example,dc=com")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "MEMBER_OUT_OF_SCOPE");
    }

    #[tokio::test]
    async fn test_group_outside_groups_base_is_not_found() {
        let directory = LdapDirectory::new(test_config()).unwrap();
        let err = directory
            .lookup_group("cn=admins,ou=elsewhere,dc=example,dc=com")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "GROUP_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let mut config = test_config();
        config.port = 1;
        config.connection_timeout_secs = 2;
        let directory = LdapDirectory::new(config).unwrap();

        let err = directory.test_connection().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.error_code(), "DIRECTORY_UNREACHABLE");
    }
}
