//! Sync config file
//!
//! The YAML file passed with `--sync-config`. Keys are camelCase:
//!
//! ```yaml
//! url: ldap://ldap.example.com:389
//! bindDN: cn=admin,dc=example,dc=com
//! bindPassword: secret
//! insecure: false
//! timeoutSeconds: 30
//! groupUIDNameMapping:
//!   "cn=admins,ou=groups,dc=example,dc=com": cluster-admins
//! rfc2307:
//!   groupsQuery:
//!     baseDN: ou=groups,dc=example,dc=com
//!     scope: sub
//!     filter: (objectClass=groupOfNames)
//!   groupUIDAttribute: dn
//!   groupNameAttributes: [cn]
//!   groupMembershipAttributes: [member]
//!   usersQuery:
//!     baseDN: ou=users,dc=example,dc=com
//!     filter: (objectClass=inetOrgPerson)
//!   userUIDAttribute: dn
//!   userNameAttributes: [uid]
//!   tolerateMemberNotFoundErrors: false
//!   tolerateMemberOutOfScopeErrors: false
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use groupsync_engine::{MappingRules, MemberResolution, SyncConfig};
use groupsync_ldap::{LdapConfig, LdapQuery, SearchScope};

use crate::error::{CliError, CliResult};

/// On-disk sync configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfigFile {
    /// Directory URL, `ldap://` or `ldaps://`.
    pub url: String,

    #[serde(default, rename = "bindDN")]
    pub bind_dn: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_password: Option<String>,

    /// Plain `ldap://` without STARTTLS.
    #[serde(default)]
    pub insecure: bool,

    /// Connection and per-operation timeout.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Groups processed in parallel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,

    /// Explicit local names keyed by directory group identifier.
    #[serde(default, rename = "groupUIDNameMapping")]
    pub group_uid_name_mapping: HashMap<String, String>,

    pub rfc2307: Rfc2307Config,
}

/// Schema block for RFC 2307 style directories.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rfc2307Config {
    pub groups_query: QueryConfig,

    #[serde(default = "default_dn", rename = "groupUIDAttribute")]
    pub group_uid_attribute: String,

    #[serde(default = "default_group_name_attributes")]
    pub group_name_attributes: Vec<String>,

    #[serde(default = "default_group_membership_attributes")]
    pub group_membership_attributes: Vec<String>,

    pub users_query: QueryConfig,

    #[serde(default = "default_dn", rename = "userUIDAttribute")]
    pub user_uid_attribute: String,

    #[serde(default = "default_user_name_attributes")]
    pub user_name_attributes: Vec<String>,

    #[serde(default)]
    pub tolerate_member_not_found_errors: bool,

    #[serde(default)]
    pub tolerate_member_out_of_scope_errors: bool,
}

/// A query block.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryConfig {
    #[serde(rename = "baseDN")]
    pub base_dn: String,

    #[serde(default)]
    pub scope: SearchScope,

    #[serde(default = "default_filter")]
    pub filter: String,

    #[serde(default, alias = "timeout")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_dn() -> String {
    "dn".to_string()
}

fn default_filter() -> String {
    "(objectClass=*)".to_string()
}

fn default_group_name_attributes() -> Vec<String> {
    vec!["cn".to_string()]
}

fn default_group_membership_attributes() -> Vec<String> {
    vec!["member".to_string()]
}

fn default_user_name_attributes() -> Vec<String> {
    vec!["uid".to_string()]
}

impl From<&QueryConfig> for LdapQuery {
    fn from(query: &QueryConfig) -> Self {
        let mut ldap = LdapQuery::new(&query.base_dn, &query.filter).with_scope(query.scope);
        ldap.timeout_secs = query.timeout_seconds;
        ldap
    }
}

impl SyncConfigFile {
    /// Read and parse a sync config file.
    pub fn load(path: impl AsRef<Path>) -> CliResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("cannot read sync config {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse a sync config from YAML text.
    pub fn from_yaml(content: &str) -> CliResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Directory connection settings.
    pub fn ldap_config(&self) -> CliResult<LdapConfig> {
        let schema = &self.rfc2307;
        let mut config = LdapConfig::new(
            "",
            LdapQuery::from(&schema.groups_query),
            LdapQuery::from(&schema.users_query),
        )
        .with_url(&self.url)?
        .with_group_uid_attribute(&schema.group_uid_attribute)
        .with_user_uid_attribute(&schema.user_uid_attribute);

        if config.use_ssl {
            if self.insecure {
                return Err(CliError::Config(
                    "insecure cannot be used with an ldaps:// url".to_string(),
                ));
            }
        } else if !self.insecure {
            config = config.with_starttls();
        }

        if !self.bind_dn.is_empty() {
            config = config.with_bind(
                &self.bind_dn,
                self.bind_password.clone().unwrap_or_default(),
            );
        } else if self.bind_password.is_some() {
            return Err(CliError::Config(
                "bindPassword is set without bindDN".to_string(),
            ));
        }
        config.connection_timeout_secs = self.timeout_seconds;

        config.validate()?;
        Ok(config)
    }

    /// Engine settings: mapping rules, tolerance flags and limits.
    pub fn sync_config(&self) -> CliResult<SyncConfig> {
        let schema = &self.rfc2307;
        let mut mapping = MappingRules::default()
            .with_uid_attribute(&schema.group_uid_attribute)
            .with_member_resolution(MemberResolution::Lookup {
                user_name_attributes: schema.user_name_attributes.clone(),
            });
        mapping.group_name_attributes = schema.group_name_attributes.clone();
        mapping.group_membership_attributes = schema.group_membership_attributes.clone();
        for (identifier, name) in &self.group_uid_name_mapping {
            mapping = mapping.with_name_override(identifier, name);
        }

        let mut config = SyncConfig::new(mapping);
        config.tolerate_member_not_found_errors = schema.tolerate_member_not_found_errors;
        config.tolerate_member_out_of_scope_errors = schema.tolerate_member_out_of_scope_errors;
        if self.timeout_seconds > 0 {
            config.timeout_ms = self.timeout_seconds.saturating_mul(1000);
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
url: ldap://ldap.example.com
rfc2307:
  groupsQuery:
    baseDN: ou=groups,dc=example,dc=com
  usersQuery:
    baseDN: ou=users,dc=example,dc=com
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let file = SyncConfigFile::from_yaml(MINIMAL).unwrap();
        assert_eq!(file.timeout_seconds, 30);
        assert!(!file.insecure);
        assert_eq!(file.rfc2307.group_uid_attribute, "dn");
        assert_eq!(file.rfc2307.group_name_attributes, vec!["cn"]);
        assert_eq!(file.rfc2307.group_membership_attributes, vec!["member"]);
        assert_eq!(file.rfc2307.user_name_attributes, vec!["uid"]);
        assert_eq!(file.rfc2307.groups_query.scope, SearchScope::Sub);
        assert_eq!(file.rfc2307.groups_query.filter, "(objectClass=*)");
    }

    #[test]
    fn test_plain_ldap_upgrades_to_starttls() {
        let ldap = SyncConfigFile::from_yaml(MINIMAL)
            .unwrap()
            .ldap_config()
            .unwrap();
        assert!(ldap.use_starttls);
        assert!(!ldap.use_ssl);
        assert_eq!(ldap.host_port(), "ldap.example.com:389");
    }

    #[test]
    fn test_insecure_keeps_plain_ldap() {
        let mut file = SyncConfigFile::from_yaml(MINIMAL).unwrap();
        file.insecure = true;
        let ldap = file.ldap_config().unwrap();
        assert!(!ldap.use_starttls);
        assert!(!ldap.use_ssl);
    }

    #[test]
    fn test_insecure_rejected_with_ldaps() {
        let mut file = SyncConfigFile::from_yaml(MINIMAL).unwrap();
        file.url = "ldaps://ldap.example.com".to_string();
        file.insecure = true;
        assert!(matches!(file.ldap_config(), Err(CliError::Config(_))));
    }

    #[test]
    fn test_password_without_bind_dn_rejected() {
        let mut file = SyncConfigFile::from_yaml(MINIMAL).unwrap();
        file.bind_password = Some("secret".to_string());
        assert!(matches!(file.ldap_config(), Err(CliError::Config(_))));
    }

    #[test]
    fn test_unsupported_scheme_rejected() {
        let mut file = SyncConfigFile::from_yaml(MINIMAL).unwrap();
        file.url = "http://ldap.example.com".to_string();
        assert!(matches!(file.ldap_config(), Err(CliError::Config(_))));
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
url: ldaps://ldap.example.com:1636
bindDN: cn=admin,dc=example,dc=com
bindPassword: secret
timeoutSeconds: 10
concurrency: 8
groupUIDNameMapping:
  "cn=admins,ou=groups,dc=example,dc=com": cluster-admins
rfc2307:
  groupsQuery:
    baseDN: ou=groups,dc=example,dc=com
    scope: one
    filter: (objectClass=groupOfNames)
    timeout: 5
  groupUIDAttribute: dn
  groupNameAttributes: [displayName, cn]
  groupMembershipAttributes: [member, uniqueMember]
  usersQuery:
    baseDN: ou=users,dc=example,dc=com
    filter: (objectClass=inetOrgPerson)
  userUIDAttribute: dn
  userNameAttributes: [mail, uid]
  tolerateMemberNotFoundErrors: true
  tolerateMemberOutOfScopeErrors: true
"#;
        let file = SyncConfigFile::from_yaml(yaml).unwrap();

        let ldap = file.ldap_config().unwrap();
        assert!(ldap.use_ssl);
        assert_eq!(ldap.port, 1636);
        assert_eq!(ldap.bind_dn, "cn=admin,dc=example,dc=com");
        assert_eq!(ldap.connection_timeout_secs, 10);
        assert_eq!(ldap.groups_query.scope, SearchScope::One);
        assert_eq!(ldap.groups_query.timeout_secs, 5);

        let sync = file.sync_config().unwrap();
        assert_eq!(sync.timeout_ms, 10_000);
        assert_eq!(sync.concurrency, 8);
        assert!(sync.tolerate_member_not_found_errors);
        assert!(sync.tolerate_member_out_of_scope_errors);
        assert_eq!(
            sync.mapping.group_name_attributes,
            vec!["displayName", "cn"]
        );
        assert_eq!(
            sync.mapping.name_overrides["cn=admins,ou=groups,dc=example,dc=com"],
            "cluster-admins"
        );
        assert_eq!(
            sync.mapping.member_resolution,
            MemberResolution::Lookup {
                user_name_attributes: vec!["mail".to_string(), "uid".to_string()]
            }
        );
    }

    #[test]
    fn test_invalid_override_name_rejected() {
        let mut file = SyncConfigFile::from_yaml(MINIMAL).unwrap();
        file.group_uid_name_mapping
            .insert("cn=g1".to_string(), "bad/name".to_string());
        assert!(matches!(file.sync_config(), Err(CliError::Config(_))));
    }

    #[test]
    fn test_missing_rfc2307_block_is_an_error() {
        let err = SyncConfigFile::from_yaml("url: ldap://ldap.example.com\n").unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = SyncConfigFile::load("/nonexistent/sync.yaml").unwrap_err();
        assert!(err.to_string().contains("cannot read sync config"));
    }
}
