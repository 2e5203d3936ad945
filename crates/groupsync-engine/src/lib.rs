//! # Group Sync Engine
//!
//! Reconciles groups in an external directory with a local group store.
//!
//! This crate provides:
//! - Whitelist/blacklist filtering of directory group identifiers
//! - Attribute mapping from directory records to local groups
//! - Create-or-update sync with dry-run support
//! - Pruning of local groups whose directory record is gone
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────┐     ┌────────────────┐     ┌─────────────┐
//! │  Directory   │────►│  FilterSet  │────►│ AttributeMapper│────►│ GroupStore  │
//! │  (query)     │     │             │     │                │     │  (upsert)   │
//! └──────┬───────┘     └─────────────┘     └────────────────┘     └──────▲──────┘
//!        │                                                               │
//!        └──────────────────────────► Pruner ────────────────────────────┘
//!                                  (existence only)
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use groupsync_directory::prelude::*;
//! use groupsync_engine::{FilterSet, MemberResolution, Scope, SyncConfig, SyncEngine};
//!
//! # tokio_test_runtime(async {
//! let directory = Arc::new(
//!     InMemoryDirectory::new("ldap.example.com:389", "cn").with_group(
//!         DirectoryEntry::new("cn=g1,ou=groups,dc=example,dc=com")
//!             .with("cn", "g1")
//!             .with_values("memberUid", ["alice", "bob"]),
//!     ),
//! );
//! let store = Arc::new(InMemoryGroupStore::new());
//!
//! let mut config = SyncConfig::default();
//! config.mapping.group_uid_attribute = "cn".to_string();
//! config.mapping.group_membership_attributes = vec!["memberUid".to_string()];
//! config.mapping.member_resolution = MemberResolution::Direct;
//!
//! let result = SyncEngine::new(directory, store.clone(), config)?
//!     .with_filter(FilterSet::new().with_whitelist(["g1"]))
//!     .confirmed(true)
//!     .sync(&Scope::AllDirectoryGroups)
//!     .await?;
//!
//! assert_eq!(result.created().count(), 1);
//! assert_eq!(store.len(), 1);
//! # Ok::<(), GroupSyncError>(())
//! # });
//! # fn tokio_test_runtime<F: std::future::Future<Output = Result<(), GroupSyncError>>>(f: F) {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f).unwrap();
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod filter;
pub mod mapper;
pub mod prune;
pub mod result;

mod runner;

pub use config::{is_valid_group_name, MappingRules, MemberResolution, Scope, SyncConfig};
pub use engine::SyncEngine;
pub use filter::{parse_identifier_list, FilterSet};
pub use mapper::{sanitize_name, AttributeMapper, MappedGroup, MAX_GROUP_NAME_LENGTH};
pub use prune::Pruner;
pub use result::{
    GroupAction, GroupOutcome, MemberWarning, PruneResult, RunResult, RunStatistics, SyncResult,
};
