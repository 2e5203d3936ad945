//! Collaborator traits
//!
//! The sync core consumes two collaborators: a directory it reads groups and
//! members from, and a group store it reconciles.

use async_trait::async_trait;

use crate::entry::DirectoryEntry;
use crate::error::GroupSyncResult;
use crate::group::LocalGroup;

/// Read access to the external directory.
#[async_trait]
pub trait DirectoryQuery: Send + Sync {
    /// `host:port` of the directory, recorded on every synced group.
    fn url(&self) -> &str;

    /// Verify the directory is reachable and the bind succeeds.
    ///
    /// Failure here is fatal to a run and is reported as
    /// [`GroupSyncError::DirectoryUnreachable`](crate::error::GroupSyncError::DirectoryUnreachable).
    async fn test_connection(&self) -> GroupSyncResult<()>;

    /// Fetch one group by its directory identifier.
    ///
    /// Returns [`GroupSyncError::GroupNotFound`](crate::error::GroupSyncError::GroupNotFound)
    /// when no record matches.
    async fn lookup_group(&self, identifier: &str) -> GroupSyncResult<DirectoryEntry>;

    /// List every group within the directory's configured group scope.
    async fn list_groups(&self) -> GroupSyncResult<Vec<DirectoryEntry>>;

    /// Fetch the entry a group member reference points at.
    ///
    /// Returns `MemberNotFound` or `MemberOutOfScope` for references that
    /// cannot be resolved.
    async fn lookup_member(&self, identifier: &str) -> GroupSyncResult<DirectoryEntry>;
}

/// Read/write access to the local group store.
#[async_trait]
pub trait GroupStore: Send + Sync {
    /// Get a group by name.
    async fn get(&self, name: &str) -> GroupSyncResult<Option<LocalGroup>>;

    /// Create a new group. Fails if the name is taken.
    async fn create(&self, group: LocalGroup) -> GroupSyncResult<()>;

    /// Replace an existing group. Fails if the name does not exist.
    async fn update(&self, group: LocalGroup) -> GroupSyncResult<()>;

    /// Delete a group by name.
    async fn delete(&self, name: &str) -> GroupSyncResult<()>;

    /// List every group carrying a sync-source annotation.
    async fn list_by_sync_annotation(&self) -> GroupSyncResult<Vec<LocalGroup>>;
}
