//! Pruner.
//!
//! Deletes local groups whose directory counterpart no longer exists. Pruning
//! is scoped to existence only: a group that still resolves is kept even when
//! the current whitelist would exclude it.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use groupsync_directory::error::GroupSyncResult;
use groupsync_directory::group::LocalGroup;
use groupsync_directory::traits::{DirectoryQuery, GroupStore};

use crate::config::{Scope, SyncConfig};
use crate::mapper::AttributeMapper;
use crate::result::{GroupAction, GroupOutcome, PruneResult};
use crate::runner::{bounded, ensure_reachable, fan_out};

/// Removes orphaned synced groups.
pub struct Pruner {
    directory: Arc<dyn DirectoryQuery>,
    store: Arc<dyn GroupStore>,
    config: SyncConfig,
    mapper: AttributeMapper,
    confirmed: bool,
    cancel: CancellationToken,
}

impl Pruner {
    /// Create a new pruner. Use the same config as the sync it follows.
    pub fn new(
        directory: Arc<dyn DirectoryQuery>,
        store: Arc<dyn GroupStore>,
        config: SyncConfig,
    ) -> GroupSyncResult<Self> {
        config.validate()?;
        Ok(Self {
            mapper: AttributeMapper::new(&config),
            directory,
            store,
            config,
            confirmed: false,
            cancel: CancellationToken::new(),
        })
    }

    /// Perform deletions. Without confirmation the pruner only reports them.
    #[must_use]
    pub fn confirmed(mut self, confirmed: bool) -> Self {
        self.confirmed = confirmed;
        self
    }

    /// Stop starting new groups once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Check if this pruner runs without deleting.
    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        !self.confirmed
    }

    fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    /// Prune synced groups within scope.
    ///
    /// `AllDirectoryGroups` and an empty `LocalGroups` cover every group
    /// synced from this directory; `Identifiers` restricts by sync source and
    /// `LocalGroups` by local name.
    #[instrument(
        skip(self),
        fields(directory = %self.directory.url(), dry_run = self.is_dry_run())
    )]
    pub async fn prune(&self, scope: &Scope) -> GroupSyncResult<PruneResult> {
        let result = PruneResult::new(self.is_dry_run(), Utc::now());

        ensure_reachable(self.directory.as_ref(), self.timeout()).await?;
        let synced = bounded(
            "list synced groups",
            self.timeout(),
            self.store.list_by_sync_annotation(),
        )
        .await?;

        let url = self.directory.url();
        let mut in_scope: Vec<LocalGroup> = synced
            .into_iter()
            .filter(|g| g.is_synced_from(url))
            .filter(|g| match scope {
                Scope::AllDirectoryGroups => true,
                Scope::Identifiers(ids) => g
                    .sync_source()
                    .is_some_and(|s| ids.iter().any(|id| id == s)),
                Scope::LocalGroups(names) => names.is_empty() || names.contains(&g.name),
            })
            .collect();
        in_scope.sort_by(|a, b| a.name.cmp(&b.name));

        info!(scope = %scope, candidates = in_scope.len(), "Starting prune");

        let (outcomes, cancelled) = fan_out(
            in_scope,
            self.config.concurrency,
            &self.cancel,
            |group| self.prune_group(group),
        )
        .await;

        if cancelled {
            warn!("Prune cancelled; remaining groups were not checked");
        }

        let result = result.finish(outcomes, cancelled);
        info!(
            deleted = result.deleted().count(),
            kept = result.with_action(GroupAction::Unchanged).count(),
            failed = result.failed().count(),
            "Prune finished"
        );
        Ok(result)
    }

    #[instrument(skip(self, group), fields(group = %group.name))]
    async fn prune_group(&self, group: LocalGroup) -> GroupOutcome {
        // Only groups with a sync source are listed.
        let identifier = group.sync_source().unwrap_or_default().to_string();

        match self.resolves(&identifier).await {
            Ok(true) => {
                debug!(identifier = %identifier, "Directory group still exists");
                GroupOutcome::new(&identifier, &group.name, GroupAction::Unchanged)
            }
            Ok(false) => {
                if self.confirmed {
                    let deleted = bounded(
                        "delete group",
                        self.timeout(),
                        self.store.delete(&group.name),
                    )
                    .await;
                    if let Err(e) = deleted {
                        warn!(error = %e, "Failed to delete orphaned group");
                        return GroupOutcome::failed(&identifier, &e).with_name(&group.name);
                    }
                }
                info!(identifier = %identifier, "Pruned orphaned group");
                GroupOutcome::new(&identifier, &group.name, GroupAction::Deleted)
            }
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "Could not check directory group");
                GroupOutcome::failed(&identifier, &e).with_name(&group.name)
            }
        }
    }

    /// Whether the sync source still names a directory group that carries the
    /// identifier attribute. Errors other than not-found are returned.
    async fn resolves(&self, identifier: &str) -> GroupSyncResult<bool> {
        let key = self.mapper.directory_key(identifier);
        let record = bounded(
            "lookup group",
            self.timeout(),
            self.directory.lookup_group(key),
        )
        .await;

        match record.and_then(|r| self.mapper.map_identifier(&r)) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
