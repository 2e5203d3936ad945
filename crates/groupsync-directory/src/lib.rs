//! # Directory Contracts
//!
//! Core abstractions shared by the group sync engine and its collaborators.
//!
//! The sync core never talks to a directory server or a cluster API directly.
//! It consumes two traits:
//!
//! - [`DirectoryQuery`] - look up and list directory groups, resolve members
//! - [`GroupStore`] - get, create, update, delete and list local groups
//!
//! ## Crate Organization
//!
//! - [`error`] - Error types with fatal/per-group classification
//! - [`entry`] - Directory entries (`DirectoryEntry`, `DirectoryGroup`)
//! - [`group`] - Local groups and their sync-source provenance
//! - [`traits`] - Collaborator traits
//! - [`memory`] - In-memory directory and store
//!
//! ## Example
//!
//! ```
//! use groupsync_directory::prelude::*;
//!
//! let entry = DirectoryEntry::new("cn=admins,ou=groups,dc=example,dc=com")
//!     .with("cn", "admins")
//!     .with_values("member", ["cn=alice,ou=users,dc=example,dc=com"]);
//!
//! assert_eq!(entry.first("CN"), Some("admins"));
//! ```

pub mod entry;
pub mod error;
pub mod group;
pub mod memory;
pub mod traits;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::entry::{dn_is_under, DirectoryEntry, DirectoryGroup, DN_ATTRIBUTE};
    pub use crate::error::{ErrorRecord, GroupSyncError, GroupSyncResult};
    pub use crate::group::{
        host_of, LocalGroup, SYNC_HOST_LABEL, SYNC_SOURCE_ANNOTATION, SYNC_TIME_ANNOTATION,
        SYNC_URL_ANNOTATION,
    };
    pub use crate::memory::{InMemoryDirectory, InMemoryGroupStore};
    pub use crate::traits::{DirectoryQuery, GroupStore};
}

// Re-export async_trait for collaborator implementors
pub use async_trait::async_trait;
