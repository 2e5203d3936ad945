//! File-backed group store
//!
//! Groups live in one JSON document. Every write replaces the document
//! through a temp file and a rename, so a crash never leaves it half written.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use async_trait::async_trait;
use groupsync_directory::prelude::*;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    groups: Vec<LocalGroup>,
}

/// [`GroupStore`] persisted to a JSON file.
pub struct FileGroupStore {
    path: PathBuf,
    groups: Mutex<BTreeMap<String, LocalGroup>>,
}

impl FileGroupStore {
    /// Open a store, starting empty when the file does not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> GroupSyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        let groups = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let document: StoreDocument = serde_json::from_str(&content).map_err(|e| {
                    GroupSyncError::StoreReadFailed {
                        message: format!("invalid group store {}: {}", path.display(), e),
                        source: Some(Box::new(e)),
                    }
                })?;
                document
                    .groups
                    .into_iter()
                    .map(|g| (g.name.clone(), g))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(GroupSyncError::StoreReadFailed {
                    message: format!("cannot read group store {}: {}", path.display(), e),
                    source: Some(Box::new(e)),
                })
            }
        };

        debug!(path = %path.display(), groups = groups.len(), "Opened group store");
        Ok(Self {
            path,
            groups: Mutex::new(groups),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every stored group, ordered by name.
    pub async fn groups(&self) -> Vec<LocalGroup> {
        self.groups.lock().await.values().cloned().collect()
    }

    async fn persist(
        &self,
        name: &str,
        groups: &BTreeMap<String, LocalGroup>,
    ) -> GroupSyncResult<()> {
        let document = StoreDocument {
            groups: groups.values().cloned().collect(),
        };
        let content = serde_json::to_vec_pretty(&document)
            .map_err(|e| GroupSyncError::store_write_failed_with_source(name, "encode failed", e))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| GroupSyncError::store_write_failed_with_source(name, "write failed", e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| GroupSyncError::store_write_failed_with_source(name, "rename failed", e))
    }
}

#[async_trait]
impl GroupStore for FileGroupStore {
    async fn get(&self, name: &str) -> GroupSyncResult<Option<LocalGroup>> {
        Ok(self.groups.lock().await.get(name).cloned())
    }

    async fn create(&self, group: LocalGroup) -> GroupSyncResult<()> {
        let mut groups = self.groups.lock().await;
        if groups.contains_key(&group.name) {
            return Err(GroupSyncError::store_write_failed(
                &group.name,
                "group already exists",
            ));
        }
        let name = group.name.clone();
        groups.insert(name.clone(), group);
        if let Err(e) = self.persist(&name, &groups).await {
            groups.remove(&name);
            return Err(e);
        }
        Ok(())
    }

    async fn update(&self, group: LocalGroup) -> GroupSyncResult<()> {
        let mut groups = self.groups.lock().await;
        let name = group.name.clone();
        let Some(previous) = groups.insert(name.clone(), group) else {
            groups.remove(&name);
            return Err(GroupSyncError::store_write_failed(&name, "group does not exist"));
        };
        if let Err(e) = self.persist(&name, &groups).await {
            groups.insert(name, previous);
            return Err(e);
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> GroupSyncResult<()> {
        let mut groups = self.groups.lock().await;
        let Some(previous) = groups.remove(name) else {
            return Err(GroupSyncError::store_write_failed(name, "group does not exist"));
        };
        if let Err(e) = self.persist(name, &groups).await {
            groups.insert(name.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }

    async fn list_by_sync_annotation(&self) -> GroupSyncResult<Vec<LocalGroup>> {
        Ok(self
            .groups
            .lock()
            .await
            .values()
            .filter(|g| g.sync_source().is_some())
            .cloned()
            .collect())
    }
}
