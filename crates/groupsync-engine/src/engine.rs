//! Sync engine.
//!
//! Reconciles the local group store with the filtered, mapped view of the
//! directory. Each group is processed independently: a failure is recorded in
//! its outcome and never aborts its siblings.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use groupsync_directory::entry::DirectoryEntry;
use groupsync_directory::error::{GroupSyncError, GroupSyncResult};
use groupsync_directory::group::LocalGroup;
use groupsync_directory::traits::{DirectoryQuery, GroupStore};

use crate::config::{Scope, SyncConfig};
use crate::filter::FilterSet;
use crate::mapper::{AttributeMapper, MappedGroup};
use crate::result::{GroupAction, GroupOutcome, SyncResult};
use crate::runner::{bounded, ensure_reachable, fan_out};

/// A directory group selected for processing.
#[derive(Debug, Clone)]
struct Candidate {
    identifier: String,
    /// Already fetched by `list_groups`; otherwise looked up by identifier.
    record: Option<DirectoryEntry>,
}

/// Local groups synced from this directory, keyed by sync source.
#[derive(Debug, Default)]
struct Linked {
    groups: HashMap<String, LocalGroup>,
    /// Sync sources carried by more than one local group, with their names.
    contested: HashMap<String, Vec<String>>,
}

impl Linked {
    fn from_groups(groups: impl IntoIterator<Item = LocalGroup>) -> Self {
        let mut by_source: HashMap<String, Vec<LocalGroup>> = HashMap::new();
        for group in groups {
            let Some(source) = group.sync_source().map(str::to_string) else {
                continue;
            };
            by_source.entry(source).or_default().push(group);
        }

        let mut linked = Self::default();
        for (source, mut holders) in by_source {
            if holders.len() == 1 {
                linked.groups.insert(source, holders.remove(0));
            } else {
                let mut names: Vec<String> = holders.into_iter().map(|g| g.name).collect();
                names.sort_unstable();
                warn!(
                    source = %source,
                    groups = ?names,
                    "Sync source is carried by several groups"
                );
                linked.contested.insert(source, names);
            }
        }
        linked
    }

    fn get(&self, identifier: &str) -> Option<&LocalGroup> {
        self.groups.get(identifier)
    }

    fn len(&self) -> usize {
        self.groups.len() + self.contested.len()
    }

    fn identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .groups
            .keys()
            .chain(self.contested.keys())
            .cloned()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Sync source of the local group called `name`.
    fn source_of(&self, name: &str) -> Option<&str> {
        self.groups
            .iter()
            .find(|(_, g)| g.name == name)
            .map(|(id, _)| id.as_str())
            .or_else(|| {
                self.contested
                    .iter()
                    .find(|(_, names)| names.iter().any(|n| n == name))
                    .map(|(id, _)| id.as_str())
            })
    }

    /// Fail with `GroupConflict` if several local groups carry `identifier`.
    fn ensure_unique(&self, identifier: &str) -> GroupSyncResult<()> {
        match self.contested.get(identifier) {
            Some(names) => Err(GroupSyncError::conflict(
                names.join(", "),
                format!(
                    "{} local groups are synced from '{identifier}'",
                    names.len()
                ),
            )),
            None => Ok(()),
        }
    }
}

/// Local names taken by a directory group during one run. The first claimant
/// keeps the name in dry and confirmed runs alike.
#[derive(Debug, Default)]
struct NameClaims(Mutex<HashMap<String, String>>);

impl NameClaims {
    fn claim(&self, name: &str, identifier: &str) -> GroupSyncResult<()> {
        let mut claims = self.0.lock();
        match claims.get(name) {
            Some(holder) if holder != identifier => Err(GroupSyncError::conflict(
                name,
                format!("name is claimed by '{holder}' in this run"),
            )),
            Some(_) => Ok(()),
            None => {
                claims.insert(name.to_string(), identifier.to_string());
                Ok(())
            }
        }
    }
}

/// Orchestrates directory queries, filtering, mapping and store upserts.
pub struct SyncEngine {
    directory: Arc<dyn DirectoryQuery>,
    store: Arc<dyn GroupStore>,
    config: SyncConfig,
    mapper: AttributeMapper,
    filter: FilterSet,
    confirmed: bool,
    cancel: CancellationToken,
}

impl SyncEngine {
    /// Create a new engine. Fails with `ConfigInvalid` before any I/O.
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
            filter: FilterSet::default(),
            confirmed: false,
            cancel: CancellationToken::new(),
        })
    }

    /// Set the whitelist/blacklist filter.
    #[must_use]
    pub fn with_filter(mut self, filter: FilterSet) -> Self {
        self.filter = filter;
        self
    }

    /// Persist changes. Without confirmation the engine only reports them.
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

    /// Check if this engine runs without persisting.
    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        !self.confirmed
    }

    fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    /// Run one sync over the given scope.
    ///
    /// Returns an error only for run-level failures: unreachable directory,
    /// unreadable store, or a failed group listing. Everything else is
    /// recorded per group in the result.
    #[instrument(
        skip(self),
        fields(directory = %self.directory.url(), dry_run = self.is_dry_run())
    )]
    pub async fn sync(&self, scope: &Scope) -> GroupSyncResult<SyncResult> {
        let result = SyncResult::new(self.is_dry_run(), Utc::now());

        ensure_reachable(self.directory.as_ref(), self.timeout()).await?;
        let linked = self.linked_groups().await?;
        let (candidates, mut outcomes) = self.resolve_candidates(scope, &linked).await?;
        let claims = NameClaims::default();

        info!(
            scope = %scope,
            candidates = candidates.len(),
            linked = linked.len(),
            "Starting group sync"
        );

        let (processed, cancelled) = fan_out(
            candidates,
            self.config.concurrency,
            &self.cancel,
            |candidate| self.sync_group(candidate, &linked, &claims),
        )
        .await;
        outcomes.extend(processed);

        if cancelled {
            warn!("Sync cancelled; remaining groups were not started");
        }

        let result = result.finish(outcomes, cancelled);
        let stats = result.statistics();
        info!(
            created = stats.action_count(GroupAction::Created),
            updated = stats.action_count(GroupAction::Updated),
            unchanged = stats.action_count(GroupAction::Unchanged),
            failed = stats.action_count(GroupAction::Failed),
            members_dropped = stats.members_dropped,
            "Group sync finished"
        );
        Ok(result)
    }

    /// Local groups synced from this directory.
    async fn linked_groups(&self) -> GroupSyncResult<Linked> {
        let groups = bounded(
            "list synced groups",
            self.timeout(),
            self.store.list_by_sync_annotation(),
        )
        .await
        .map_err(|e| match e {
            GroupSyncError::StoreReadFailed { .. } => e,
            other => GroupSyncError::StoreReadFailed {
                message: "could not list synced groups".to_string(),
                source: Some(Box::new(other)),
            },
        })?;

        let url = self.directory.url();
        Ok(Linked::from_groups(
            groups.into_iter().filter(|g| g.is_synced_from(url)),
        ))
    }

    /// Resolve the scope into admitted candidates, plus failures for local
    /// groups that cannot be traced back to this directory.
    async fn resolve_candidates(
        &self,
        scope: &Scope,
        linked: &Linked,
    ) -> GroupSyncResult<(Vec<Candidate>, Vec<GroupOutcome>)> {
        let mut failures = Vec::new();
        let mut filter = self.filter.clone();

        let candidates: Vec<Candidate> = match scope {
            Scope::AllDirectoryGroups if filter.is_restricted() => {
                by_identifier(filter.whitelist().into_iter().map(ToString::to_string))
            }
            Scope::AllDirectoryGroups => {
                let records = bounded(
                    "list groups",
                    self.timeout(),
                    self.directory.list_groups(),
                )
                .await?;
                let mut candidates = Vec::with_capacity(records.len());
                for record in records {
                    match self.mapper.map_identifier(&record) {
                        Ok(identifier) => candidates.push(Candidate {
                            identifier,
                            record: Some(record),
                        }),
                        Err(e) => {
                            warn!(dn = %record.dn, error = %e, "Skipping group without identifier");
                            failures.push(GroupOutcome::failed(record.dn.clone(), &e));
                        }
                    }
                }
                candidates
            }
            Scope::Identifiers(ids) => {
                filter = filter.with_whitelist(ids.iter().cloned());
                by_identifier(filter.whitelist().into_iter().map(ToString::to_string))
            }
            Scope::LocalGroups(names) if names.is_empty() => by_identifier(linked.identifiers()),
            Scope::LocalGroups(names) => {
                let mut ids = Vec::with_capacity(names.len());
                for name in names {
                    match self.linked_source_of(name, linked).await {
                        Ok(id) => ids.push(id),
                        Err(e) => {
                            warn!(group = %name, error = %e, "Local group cannot be synced");
                            failures.push(GroupOutcome::failed(name.clone(), &e).with_name(name));
                        }
                    }
                }
                ids.sort_unstable();
                ids.dedup();
                by_identifier(ids)
            }
        };

        let (admitted, rejected): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|c| filter.admits(&c.identifier));
        for candidate in &rejected {
            debug!(identifier = %candidate.identifier, "Group excluded by filter");
        }
        Ok((admitted, failures))
    }

    /// The directory identifier a local group was synced from.
    async fn linked_source_of(
        &self,
        name: &str,
        linked: &Linked,
    ) -> GroupSyncResult<String> {
        if let Some(id) = linked.source_of(name) {
            return Ok(id.to_string());
        }
        let existing = bounded("get group", self.timeout(), self.store.get(name)).await?;
        match existing {
            None => Err(GroupSyncError::group_not_found(name)),
            Some(_) => Err(GroupSyncError::conflict(
                name,
                format!("group is not synced from {}", self.directory.url()),
            )),
        }
    }

    #[instrument(
        skip(self, candidate, linked, claims),
        fields(identifier = %candidate.identifier)
    )]
    async fn sync_group(
        &self,
        candidate: Candidate,
        linked: &Linked,
        claims: &NameClaims,
    ) -> GroupOutcome {
        let identifier = candidate.identifier.clone();
        match self.sync_one(candidate, linked, claims).await {
            Ok(outcome) => {
                debug!(group = ?outcome.name, action = %outcome.action, "Group processed");
                outcome
            }
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "Group sync failed");
                let outcome = GroupOutcome::failed(&identifier, &e);
                match linked.get(&identifier) {
                    Some(existing) => outcome.with_name(&existing.name),
                    None => outcome,
                }
            }
        }
    }

    async fn sync_one(
        &self,
        candidate: Candidate,
        linked: &Linked,
        claims: &NameClaims,
    ) -> GroupSyncResult<GroupOutcome> {
        linked.ensure_unique(&candidate.identifier)?;
        let record = match candidate.record {
            Some(record) => record,
            None => {
                let key = self.mapper.directory_key(&candidate.identifier);
                bounded(
                    "lookup group",
                    self.timeout(),
                    self.directory.lookup_group(key),
                )
                .await?
            }
        };
        let mapped = self.mapper.map(&record, self.directory.as_ref()).await?;
        self.upsert(mapped, linked, claims).await
    }

    /// Create or replace the local group for a mapped directory group.
    async fn upsert(
        &self,
        mapped: MappedGroup,
        linked: &Linked,
        claims: &NameClaims,
    ) -> GroupSyncResult<GroupOutcome> {
        let MappedGroup {
            identifier,
            name,
            users,
            warnings,
        } = mapped;
        let url = self.directory.url();
        let outcome =
            |action| GroupOutcome::new(&identifier, &name, action).with_warnings(warnings.clone());
        claims.claim(&name, &identifier)?;

        match linked.get(&identifier) {
            Some(existing) if existing.name == name && existing.users == users => {
                Ok(outcome(GroupAction::Unchanged))
            }
            Some(existing) if existing.name == name => {
                let mut group = existing.clone();
                group.users = users;
                group.set_sync_source(&identifier, url, Utc::now());
                if self.confirmed {
                    self.write("update group", self.store.update(group)).await?;
                }
                Ok(outcome(GroupAction::Updated))
            }
            Some(existing) => {
                self.ensure_name_free(&name, &identifier).await?;
                let mut group = existing.clone();
                group.name = name.clone();
                group.users = users;
                group.set_sync_source(&identifier, url, Utc::now());
                if self.confirmed {
                    self.write("create group", self.store.create(group)).await?;
                    let removed = self
                        .write("delete group", self.store.delete(&existing.name))
                        .await;
                    if let Err(e) = removed {
                        self.undo_create(&name).await;
                        return Err(e);
                    }
                }
                info!(from = %existing.name, to = %name, "Renamed group");
                Ok(outcome(GroupAction::Updated).renamed_from(&existing.name))
            }
            None => {
                self.ensure_name_free(&name, &identifier).await?;
                let group = LocalGroup::new(&name)
                    .with_users(users)
                    .with_sync_source(&identifier, url, Utc::now());
                if self.confirmed {
                    self.write("create group", self.store.create(group)).await?;
                }
                Ok(outcome(GroupAction::Created))
            }
        }
    }

    /// Fail with `GroupConflict` if `name` is held by a group not linked to
    /// `identifier` on this directory.
    async fn ensure_name_free(&self, name: &str, identifier: &str) -> GroupSyncResult<()> {
        let Some(holder) = bounded("get group", self.timeout(), self.store.get(name)).await? else {
            return Ok(());
        };

        let url = self.directory.url();
        let message = match holder.sync_source() {
            None => "name is taken by a group that is not synced from a directory".to_string(),
            Some(_) if !holder.is_synced_from(url) => format!(
                "name is taken by a group synced from {}",
                holder.sync_url().unwrap_or("another directory")
            ),
            Some(source) if source != identifier => {
                format!("name is taken by the group synced from '{source}'")
            }
            Some(_) => return Ok(()),
        };
        Err(GroupSyncError::conflict(name, message))
    }

    /// Remove a group created by a rename whose old group could not be
    /// deleted, so the sync source stays on a single group.
    async fn undo_create(&self, name: &str) {
        match self.write("delete group", self.store.delete(name)).await {
            Ok(()) => debug!(group = %name, "Rolled back renamed group"),
            Err(e) => error!(
                group = %name,
                error = %e,
                "Could not roll back renamed group; sync source is now on two groups"
            ),
        }
    }

    async fn write<F>(&self, operation: &str, fut: F) -> GroupSyncResult<()>
    where
        F: std::future::Future<Output = GroupSyncResult<()>>,
    {
        bounded(operation, self.timeout(), fut).await
    }
}

fn by_identifier(ids: impl IntoIterator<Item = String>) -> Vec<Candidate> {
    ids.into_iter()
        .map(|identifier| Candidate {
            identifier,
            record: None,
        })
        .collect()
}
