//! In-memory collaborators.
//!
//! A directory and a group store held entirely in memory, with hooks for
//! injecting failures and delays. Used by tests and for local dry runs.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use crate::entry::{dn_is_under, DirectoryEntry, DN_ATTRIBUTE};
use crate::error::{GroupSyncError, GroupSyncResult};
use crate::group::LocalGroup;
use crate::traits::{DirectoryQuery, GroupStore};

/// Directory backed by a map of entries.
pub struct InMemoryDirectory {
    url: String,
    group_uid_attribute: String,
    // Key: dn (lowercase)
    groups: RwLock<BTreeMap<String, DirectoryEntry>>,
    // Key: dn (lowercase)
    members: RwLock<HashMap<String, DirectoryEntry>>,
    users_base_dn: Option<String>,
    unreachable: AtomicBool,
    failing_lookups: RwLock<HashSet<String>>,
    lookup_delay: RwLock<Option<Duration>>,
    lookup_count: AtomicU32,
}

impl InMemoryDirectory {
    /// Create an empty directory whose groups are identified by `group_uid_attribute`.
    pub fn new(url: impl Into<String>, group_uid_attribute: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            group_uid_attribute: group_uid_attribute.into(),
            groups: RwLock::new(BTreeMap::new()),
            members: RwLock::new(HashMap::new()),
            users_base_dn: None,
            unreachable: AtomicBool::new(false),
            failing_lookups: RwLock::new(HashSet::new()),
            lookup_delay: RwLock::new(None),
            lookup_count: AtomicU32::new(0),
        }
    }

    /// Add a group using builder pattern.
    #[must_use]
    pub fn with_group(self, entry: DirectoryEntry) -> Self {
        self.put_group(entry);
        self
    }

    /// Add a member entry using builder pattern.
    #[must_use]
    pub fn with_member(self, entry: DirectoryEntry) -> Self {
        self.members.write().insert(entry.dn.to_lowercase(), entry);
        self
    }

    /// Restrict member lookups to entries beneath `base_dn`.
    #[must_use]
    pub fn with_users_base(mut self, base_dn: impl Into<String>) -> Self {
        self.users_base_dn = Some(base_dn.into());
        self
    }

    /// Insert or replace a group.
    pub fn put_group(&self, entry: DirectoryEntry) {
        self.groups.write().insert(entry.dn.to_lowercase(), entry);
    }

    /// Remove the group with the given identifier. Returns whether one was removed.
    pub fn remove_group(&self, identifier: &str) -> bool {
        let mut groups = self.groups.write();
        let key = groups
            .iter()
            .find(|(_, e)| self.matches_identifier(e, identifier))
            .map(|(k, _)| k.clone());
        match key {
            Some(k) => groups.remove(&k).is_some(),
            None => false,
        }
    }

    /// Make every call fail as if the directory were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Make lookups of one group identifier fail with a query error.
    pub fn fail_lookup(&self, identifier: impl Into<String>) {
        self.failing_lookups.write().insert(identifier.into());
    }

    /// Delay every group lookup.
    pub fn set_lookup_delay(&self, delay: Option<Duration>) {
        *self.lookup_delay.write() = delay;
    }

    /// Number of group lookups served so far.
    pub fn lookup_count(&self) -> u32 {
        self.lookup_count.load(Ordering::SeqCst)
    }

    fn matches_identifier(&self, entry: &DirectoryEntry, identifier: &str) -> bool {
        if self.group_uid_attribute.eq_ignore_ascii_case(DN_ATTRIBUTE) {
            return entry.dn.eq_ignore_ascii_case(identifier);
        }
        entry
            .values(&self.group_uid_attribute)
            .is_some_and(|values| values.contains(&identifier))
    }

    fn check_reachable(&self) -> GroupSyncResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(GroupSyncError::unreachable(format!(
                "cannot connect to {}",
                self.url
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryQuery for InMemoryDirectory {
    fn url(&self) -> &str {
        &self.url
    }

    async fn test_connection(&self) -> GroupSyncResult<()> {
        self.check_reachable()
    }

    async fn lookup_group(&self, identifier: &str) -> GroupSyncResult<DirectoryEntry> {
        self.lookup_count.fetch_add(1, Ordering::SeqCst);
        let delay = *self.lookup_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_reachable()?;

        if self.failing_lookups.read().contains(identifier) {
            return Err(GroupSyncError::query_failed(format!(
                "lookup of {identifier} failed"
            )));
        }

        self.groups
            .read()
            .values()
            .find(|e| self.matches_identifier(e, identifier))
            .cloned()
            .ok_or_else(|| GroupSyncError::group_not_found(identifier))
    }

    async fn list_groups(&self) -> GroupSyncResult<Vec<DirectoryEntry>> {
        self.check_reachable()?;
        Ok(self.groups.read().values().cloned().collect())
    }

    async fn lookup_member(&self, identifier: &str) -> GroupSyncResult<DirectoryEntry> {
        self.check_reachable()?;
        if let Some(base) = &self.users_base_dn {
            if !dn_is_under(identifier, base) {
                return Err(GroupSyncError::member_out_of_scope(identifier, base));
            }
        }
        self.members
            .read()
            .get(&identifier.to_lowercase())
            .cloned()
            .ok_or_else(|| GroupSyncError::member_not_found(identifier))
    }
}

/// Group store backed by a map keyed by group name.
#[derive(Default)]
pub struct InMemoryGroupStore {
    groups: RwLock<BTreeMap<String, LocalGroup>>,
    failing_writes: RwLock<HashSet<String>>,
    write_count: AtomicU32,
}

impl InMemoryGroupStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a group using builder pattern.
    #[must_use]
    pub fn with_group(self, group: LocalGroup) -> Self {
        self.groups.write().insert(group.name.clone(), group);
        self
    }

    /// Make writes to one group name fail.
    pub fn fail_writes_for(&self, name: impl Into<String>) {
        self.failing_writes.write().insert(name.into());
    }

    /// Snapshot of all stored groups.
    pub fn groups(&self) -> Vec<LocalGroup> {
        self.groups.read().values().cloned().collect()
    }

    /// Get a stored group without going through the async trait.
    pub fn snapshot(&self, name: &str) -> Option<LocalGroup> {
        self.groups.read().get(name).cloned()
    }

    /// Number of groups stored.
    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.groups.read().is_empty()
    }

    /// Number of successful create/update/delete calls.
    pub fn write_count(&self) -> u32 {
        self.write_count.load(Ordering::SeqCst)
    }

    fn check_writable(&self, name: &str) -> GroupSyncResult<()> {
        if self.failing_writes.read().contains(name) {
            return Err(GroupSyncError::store_write_failed(
                name,
                "injected write failure",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl GroupStore for InMemoryGroupStore {
    async fn get(&self, name: &str) -> GroupSyncResult<Option<LocalGroup>> {
        Ok(self.groups.read().get(name).cloned())
    }

    async fn create(&self, group: LocalGroup) -> GroupSyncResult<()> {
        self.check_writable(&group.name)?;
        let mut groups = self.groups.write();
        if groups.contains_key(&group.name) {
            return Err(GroupSyncError::store_write_failed(
                group.name,
                "group already exists",
            ));
        }
        groups.insert(group.name.clone(), group);
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update(&self, group: LocalGroup) -> GroupSyncResult<()> {
        self.check_writable(&group.name)?;
        let mut groups = self.groups.write();
        match groups.get_mut(&group.name) {
            Some(existing) => {
                *existing = group;
                self.write_count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(GroupSyncError::store_write_failed(
                group.name,
                "group does not exist",
            )),
        }
    }

    async fn delete(&self, name: &str) -> GroupSyncResult<()> {
        self.check_writable(name)?;
        match self.groups.write().remove(name) {
            Some(_) => {
                self.write_count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(GroupSyncError::store_write_failed(
                name,
                "group does not exist",
            )),
        }
    }

    async fn list_by_sync_annotation(&self) -> GroupSyncResult<Vec<LocalGroup>> {
        Ok(self
            .groups
            .read()
            .values()
            .filter(|g| g.sync_source().is_some())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn directory() -> InMemoryDirectory {
        InMemoryDirectory::new("ldap.example.com:389", "cn")
            .with_group(
                DirectoryEntry::new("cn=g1,ou=groups,dc=example,dc=com")
                    .with("cn", "g1")
                    .with_values("member", ["cn=alice,ou=users,dc=example,dc=com"]),
            )
            .with_member(
                DirectoryEntry::new("cn=alice,ou=users,dc=example,dc=com").with("uid", "alice"),
            )
    }

    #[tokio::test]
    async fn test_lookup_group_by_uid_attribute() {
        let dir = directory();
        let group = dir.lookup_group("g1").await.unwrap();
        assert_eq!(group.dn, "cn=g1,ou=groups,dc=example,dc=com");

        let err = dir.lookup_group("g2").await.unwrap_err();
        assert_eq!(err.error_code(), "GROUP_NOT_FOUND");
        assert_eq!(dir.lookup_count(), 2);
    }

    #[tokio::test]
    async fn test_lookup_group_by_dn() {
        let dir = InMemoryDirectory::new("ldap.example.com:389", "dn")
            .with_group(DirectoryEntry::new("cn=g1,dc=example,dc=com"));

        assert!(dir.lookup_group("CN=g1,DC=example,DC=com").await.is_ok());
    }

    #[tokio::test]
    async fn test_lookup_member_case_insensitive_dn() {
        let dir = directory();
        let member = dir
            .lookup_member("CN=Alice,OU=Users,DC=example,DC=com")
            .await
            .unwrap();
        assert_eq!(member.first("uid"), Some("alice"));

        let err = dir.lookup_member("cn=ghost,dc=example,dc=com").await.unwrap_err();
        assert_eq!(err.error_code(), "MEMBER_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_lookup_member_out_of_scope() {
        let dir = directory().with_users_base("ou=users,dc=example,dc=com");
        assert!(dir
            .lookup_member("cn=alice,ou=users,dc=example,dc=com")
            .await
            .is_ok());

        let err = dir
            .lookup_member("cn=svc,ou=services,dc=example,dc=com")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "MEMBER_OUT_OF_SCOPE");
    }

    #[tokio::test]
    async fn test_unreachable_directory() {
        let dir = directory();
        dir.set_unreachable(true);

        let err = dir.test_connection().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(dir.list_groups().await.is_err());
    }

    #[tokio::test]
    async fn test_remove_group() {
        let dir = directory();
        assert!(dir.remove_group("g1"));
        assert!(!dir.remove_group("g1"));
        assert!(dir.list_groups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_create_update_delete() {
        let store = InMemoryGroupStore::new();
        store
            .create(LocalGroup::new("g1").with_users(["alice"]))
            .await
            .unwrap();
        assert!(store.create(LocalGroup::new("g1")).await.is_err());

        store
            .update(LocalGroup::new("g1").with_users(["bob"]))
            .await
            .unwrap();
        let g1 = store.get("g1").await.unwrap().unwrap();
        assert!(g1.users.contains("bob"));
        assert!(!g1.users.contains("alice"));

        store.delete("g1").await.unwrap();
        assert!(store.is_empty());
        assert_eq!(store.write_count(), 3);
        assert!(store.update(LocalGroup::new("g1")).await.is_err());
    }

    #[tokio::test]
    async fn test_store_lists_only_synced_groups() {
        let store = InMemoryGroupStore::new()
            .with_group(LocalGroup::new("manual"))
            .with_group(LocalGroup::new("synced").with_sync_source(
                "g1",
                "ldap.example.com:389",
                Utc::now(),
            ));

        let synced = store.list_by_sync_annotation().await.unwrap();
        assert_eq!(synced.len(), 1);
        assert_eq!(synced[0].name, "synced");
    }

    #[tokio::test]
    async fn test_store_injected_write_failure() {
        let store = InMemoryGroupStore::new();
        store.fail_writes_for("g1");

        let err = store.create(LocalGroup::new("g1")).await.unwrap_err();
        assert_eq!(err.error_code(), "STORE_WRITE_FAILED");
        assert_eq!(store.write_count(), 0);
    }
}
