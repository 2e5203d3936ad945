//! Attribute mapping from directory groups to local groups.
//!
//! Identifier and name resolve override-first, then from the configured
//! attributes. Members resolve through the configured strategy; references
//! that cannot be resolved are dropped with a warning instead of failing the
//! group.

use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, warn};

use groupsync_directory::entry::DirectoryGroup;
use groupsync_directory::error::{GroupSyncError, GroupSyncResult};
use groupsync_directory::traits::DirectoryQuery;

use crate::config::{is_valid_group_name, MappingRules, MemberResolution, SyncConfig};
use crate::result::MemberWarning;
use crate::runner::bounded;

/// Maximum length of a local group name.
pub const MAX_GROUP_NAME_LENGTH: usize = 253;

/// The local fields derived from one directory group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedGroup {
    /// Directory identifier (the sync-source value).
    pub identifier: String,
    /// Local group name.
    pub name: String,
    /// Local user identifiers.
    pub users: BTreeSet<String>,
    /// Member references that were dropped.
    pub warnings: Vec<MemberWarning>,
}

/// Maps directory groups under a fixed set of rules.
#[derive(Debug, Clone)]
pub struct AttributeMapper {
    rules: MappingRules,
    tolerate_member_not_found: bool,
    tolerate_member_out_of_scope: bool,
    timeout: Duration,
}

impl AttributeMapper {
    /// Create a mapper from a sync configuration.
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            rules: config.mapping.clone(),
            tolerate_member_not_found: config.tolerate_member_not_found_errors,
            tolerate_member_out_of_scope: config.tolerate_member_out_of_scope_errors,
            timeout: config.timeout(),
        }
    }

    /// Resolve the directory identifier of a group.
    pub fn map_identifier(&self, group: &DirectoryGroup) -> GroupSyncResult<String> {
        let uid = group
            .first(&self.rules.group_uid_attribute)
            .ok_or_else(|| {
                GroupSyncError::attribute_missing(&self.rules.group_uid_attribute, &group.dn)
            })?;
        Ok(self
            .rules
            .identifier_overrides
            .get(uid)
            .cloned()
            .unwrap_or_else(|| uid.to_string()))
    }

    /// The value to look a group up by in the directory, undoing any
    /// identifier override.
    #[must_use]
    pub fn directory_key<'a>(&'a self, identifier: &'a str) -> &'a str {
        self.rules
            .identifier_overrides
            .iter()
            .find(|(_, id)| id.as_str() == identifier)
            .map_or(identifier, |(uid, _)| uid.as_str())
    }

    /// Resolve the local name of a group.
    pub fn map_name(&self, group: &DirectoryGroup) -> GroupSyncResult<String> {
        let identifier = self.map_identifier(group)?;
        self.name_for(group, &identifier)
    }

    fn name_for(&self, group: &DirectoryGroup, identifier: &str) -> GroupSyncResult<String> {
        if let Some(name) = self.rules.name_overrides.get(identifier) {
            return Ok(name.clone());
        }

        let from_attribute = self
            .rules
            .group_name_attributes
            .iter()
            .find_map(|attr| group.first(attr));
        if let Some(name) = from_attribute {
            if is_valid_group_name(name) && name.len() <= MAX_GROUP_NAME_LENGTH {
                return Ok(name.to_string());
            }
        }

        let sanitized = sanitize_name(from_attribute.unwrap_or(identifier));
        if sanitized.is_empty() {
            return Err(GroupSyncError::attribute_missing(
                self.rules.group_name_attributes.join(","),
                &group.dn,
            ));
        }
        Ok(sanitized)
    }

    /// Resolve group members to local user identifiers.
    ///
    /// Unresolvable members become warnings. Only directory-level failures
    /// (unreachable, timeout, query errors) are returned as errors.
    pub async fn map_members(
        &self,
        group: &DirectoryGroup,
        directory: &dyn DirectoryQuery,
    ) -> GroupSyncResult<(BTreeSet<String>, Vec<MemberWarning>)> {
        let references: BTreeSet<&str> = self
            .rules
            .group_membership_attributes
            .iter()
            .filter_map(|attr| group.values(attr))
            .flatten()
            .collect();

        let mut users = BTreeSet::new();
        let mut warnings = Vec::new();

        for reference in references {
            match self.resolve_member(reference, directory).await {
                Ok(user) => {
                    users.insert(user);
                }
                Err(e) if is_member_error(&e) => {
                    self.report_dropped_member(&group.dn, reference, &e);
                    warnings.push(MemberWarning {
                        member: reference.to_string(),
                        error: (&e).into(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Ok((users, warnings))
    }

    /// Map every local field of a group.
    pub async fn map(
        &self,
        group: &DirectoryGroup,
        directory: &dyn DirectoryQuery,
    ) -> GroupSyncResult<MappedGroup> {
        let identifier = self.map_identifier(group)?;
        let name = self.name_for(group, &identifier)?;
        let (users, warnings) = self.map_members(group, directory).await?;
        Ok(MappedGroup {
            identifier,
            name,
            users,
            warnings,
        })
    }

    async fn resolve_member(
        &self,
        reference: &str,
        directory: &dyn DirectoryQuery,
    ) -> GroupSyncResult<String> {
        let user_name_attributes = match &self.rules.member_resolution {
            MemberResolution::Direct => return Ok(reference.to_string()),
            MemberResolution::Lookup {
                user_name_attributes,
            } => user_name_attributes,
        };

        let entry = bounded(
            "lookup member",
            self.timeout,
            directory.lookup_member(reference),
        )
        .await?;
        user_name_attributes
            .iter()
            .find_map(|attr| entry.first(attr))
            .map(ToString::to_string)
            .ok_or_else(|| {
                GroupSyncError::attribute_missing(user_name_attributes.join(","), &entry.dn)
            })
    }

    fn report_dropped_member(&self, group_dn: &str, member: &str, err: &GroupSyncError) {
        let tolerated = match err {
            GroupSyncError::MemberNotFound { .. } => self.tolerate_member_not_found,
            GroupSyncError::MemberOutOfScope { .. } => self.tolerate_member_out_of_scope,
            _ => false,
        };
        if tolerated {
            debug!(group = %group_dn, member = %member, error = %err, "Dropping member");
        } else {
            warn!(
                group = %group_dn,
                member = %member,
                error = %err,
                "Dropping unresolvable member"
            );
        }
    }
}

fn is_member_error(err: &GroupSyncError) -> bool {
    matches!(
        err,
        GroupSyncError::MemberNotFound { .. }
            | GroupSyncError::MemberOutOfScope { .. }
            | GroupSyncError::AttributeMissing { .. }
    )
}

/// Turn an arbitrary string into a valid local group name.
///
/// Lowercases, replaces every character outside `[a-z0-9.-]` with `-`,
/// collapses runs of `-`, and trims separators from both ends.
#[must_use]
pub fn sanitize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars().flat_map(char::to_lowercase) {
        let c = if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            c
        } else {
            '-'
        };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }

    let mut name = out.trim_matches(|c| c == '-' || c == '.').to_string();
    if name.len() > MAX_GROUP_NAME_LENGTH {
        name.truncate(MAX_GROUP_NAME_LENGTH);
        name = name.trim_end_matches(|c| c == '-' || c == '.').to_string();
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use groupsync_directory::entry::DirectoryEntry;
    use groupsync_directory::memory::InMemoryDirectory;

    const URL: &str = "ldap.example.com:389";

    fn admins() -> DirectoryEntry {
        DirectoryEntry::new("cn=admins,ou=groups,dc=example,dc=com")
            .with("cn", "admins")
            .with("gidNumber", "5000")
            .with_values(
                "member",
                [
                    "cn=alice,ou=users,dc=example,dc=com",
                    "cn=bob,ou=users,dc=example,dc=com",
                ],
            )
    }

    fn directory() -> InMemoryDirectory {
        InMemoryDirectory::new(URL, "dn")
            .with_member(
                DirectoryEntry::new("cn=alice,ou=users,dc=example,dc=com").with("uid", "alice"),
            )
            .with_member(
                DirectoryEntry::new("cn=bob,ou=users,dc=example,dc=com").with("uid", "bob"),
            )
    }

    fn mapper(rules: MappingRules) -> AttributeMapper {
        AttributeMapper::new(&SyncConfig::new(rules))
    }

    #[test]
    fn test_identifier_from_attribute() {
        let m = mapper(MappingRules::default());
        assert_eq!(
            m.map_identifier(&admins()).unwrap(),
            "cn=admins,ou=groups,dc=example,dc=com"
        );

        let m = mapper(MappingRules::default().with_uid_attribute("gidNumber"));
        assert_eq!(m.map_identifier(&admins()).unwrap(), "5000");
    }

    #[test]
    fn test_identifier_override_wins() {
        let m = mapper(
            MappingRules::default()
                .with_uid_attribute("gidNumber")
                .with_identifier_override("5000", "admins-id"),
        );
        assert_eq!(m.map_identifier(&admins()).unwrap(), "admins-id");
        assert_eq!(m.directory_key("admins-id"), "5000");
        assert_eq!(m.directory_key("6000"), "6000");
    }

    #[test]
    fn test_identifier_attribute_missing() {
        let m = mapper(MappingRules::default().with_uid_attribute("entryUUID"));
        let err = m.map_identifier(&admins()).unwrap_err();
        assert_eq!(err.error_code(), "ATTRIBUTE_MISSING");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_name_resolution_order() {
        let m = mapper(MappingRules::default());
        assert_eq!(m.map_name(&admins()).unwrap(), "admins");

        let m = mapper(
            MappingRules::default()
                .with_name_override("cn=admins,ou=groups,dc=example,dc=com", "cluster-admins"),
        );
        assert_eq!(m.map_name(&admins()).unwrap(), "cluster-admins");
    }

    #[test]
    fn test_name_falls_back_to_sanitized_identifier() {
        let mut rules = MappingRules::default();
        rules.group_name_attributes = vec!["displayName".to_string()];
        let m = mapper(rules);

        assert_eq!(
            m.map_name(&admins()).unwrap(),
            "cn-admins-ou-groups-dc-example-dc-com"
        );
    }

    #[test]
    fn test_invalid_attribute_name_is_sanitized() {
        let group = admins().with("cn", "Ops/On-Call");
        let m = mapper(MappingRules::default());
        assert_eq!(m.map_name(&group).unwrap(), "ops-on-call");
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Domain Admins"), "domain-admins");
        assert_eq!(sanitize_name("  __x__ "), "x");
        assert_eq!(sanitize_name("a.b-c"), "a.b-c");
        assert_eq!(sanitize_name("///"), "");
        assert_eq!(sanitize_name(&"a".repeat(300)).len(), MAX_GROUP_NAME_LENGTH);
    }

    #[tokio::test]
    async fn test_lookup_members() {
        let m = mapper(MappingRules::default());
        let (users, warnings) = m.map_members(&admins(), &directory()).await.unwrap();

        assert_eq!(users.into_iter().collect::<Vec<_>>(), vec!["alice", "bob"]);
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_members_are_dropped() {
        let group = admins().with_values(
            "member",
            [
                "cn=alice,ou=users,dc=example,dc=com",
                "cn=ghost,ou=users,dc=example,dc=com",
                "cn=svc,ou=services,dc=example,dc=com",
            ],
        );
        let dir = directory().with_users_base("ou=users,dc=example,dc=com");
        let (users, warnings) = mapper(MappingRules::default())
            .map_members(&group, &dir)
            .await
            .unwrap();

        assert_eq!(users.len(), 1);
        assert!(users.contains("alice"));
        let mut codes: Vec<_> = warnings.iter().map(|w| w.error.code.as_str()).collect();
        codes.sort_unstable();
        assert_eq!(codes, vec!["MEMBER_NOT_FOUND", "MEMBER_OUT_OF_SCOPE"]);
    }

    #[tokio::test]
    async fn test_member_without_name_attribute_is_dropped() {
        let dir = directory()
            .with_member(DirectoryEntry::new("cn=carol,ou=users,dc=example,dc=com"));
        let group = admins().with("member", "cn=carol,ou=users,dc=example,dc=com");

        let (users, warnings) = mapper(MappingRules::default())
            .map_members(&group, &dir)
            .await
            .unwrap();
        assert!(users.is_empty());
        assert_eq!(warnings[0].error.code, "ATTRIBUTE_MISSING");
    }

    #[tokio::test]
    async fn test_direct_members_union_of_attributes() {
        let mut rules = MappingRules::default().with_member_resolution(MemberResolution::Direct);
        rules.group_membership_attributes = vec!["memberUid".to_string(), "owner".to_string()];
        let group = DirectoryEntry::new("cn=dev,dc=example,dc=com")
            .with_values("memberUid", ["alice", "bob"])
            .with_values("owner", ["bob", "dave"]);

        let (users, _) = mapper(rules)
            .map_members(&group, &directory())
            .await
            .unwrap();
        assert_eq!(
            users.into_iter().collect::<Vec<_>>(),
            vec!["alice", "bob", "dave"]
        );
    }

    #[tokio::test]
    async fn test_unreachable_directory_fails_members() {
        let dir = directory();
        dir.set_unreachable(true);

        let err = mapper(MappingRules::default())
            .map_members(&admins(), &dir)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "DIRECTORY_UNREACHABLE");
    }

    #[tokio::test]
    async fn test_mapping_is_deterministic() {
        let m = mapper(MappingRules::default());
        let dir = directory();
        let first = m.map(&admins(), &dir).await.unwrap();
        let second = m.map(&admins(), &dir).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.name, "admins");
    }
}
