use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::common::{DedupCluster, MemberRecord};
use crate::store::{Catalog, RecordStore, Selection};

#[derive(Debug, Deserialize, Clone)]
pub struct JsonFileStoreConfig {
    /// 📁 A JSON file `{"records": [...], "clusters": [...]}`.
    pub path: PathBuf,
    /// 🔖 Where checkpoints are kept. Defaults to `<path>.checkpoints.json`.
    #[serde(default)]
    pub checkpoint_path: Option<PathBuf>,
}

impl JsonFileStoreConfig {
    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoint_path.clone().unwrap_or_else(|| {
            let mut name = self.path.clone().into_os_string();
            name.push(".checkpoints.json");
            PathBuf::from(name)
        })
    }
}

/// 📁 A read-only snapshot of records and clusters loaded from disk at open time.
///
/// Checkpoints are the one thing written back, into a small sidecar JSON map of key → timestamp.
/// The sidecar is rewritten whole on every save; a missing sidecar means "never checkpointed".
#[derive(Debug)]
pub struct JsonFileStore {
    catalog: Catalog,
    checkpoint_path: PathBuf,
    // -- 🔒 serializes read-modify-write of the sidecar
    checkpoint_lock: Mutex<()>,
}

impl JsonFileStore {
    pub async fn open(config: JsonFileStoreConfig) -> Result<Self> {
        let raw = tokio::fs::read_to_string(&config.path).await.with_context(|| {
            format!(
                "💀 The record file '{}' could not be read. We looked everywhere. Under the couch. Behind the fridge.",
                config.path.display()
            )
        })?;
        let catalog: Catalog = serde_json::from_str(&raw).with_context(|| {
            format!(
                "💀 The record file '{}' is not the JSON we expected: an object with 'records' and 'clusters' lists.",
                config.path.display()
            )
        })?;
        info!("📁 opened record file {}", config.path.display());
        Ok(Self {
            catalog,
            checkpoint_path: config.checkpoint_path(),
            checkpoint_lock: Mutex::new(()),
        })
    }

    async fn read_checkpoints(&self) -> Result<BTreeMap<String, DateTime<Utc>>> {
        match tokio::fs::read_to_string(&self.checkpoint_path).await {
            Ok(raw) => serde_json::from_str(&raw).with_context(|| {
                format!(
                    "💀 The checkpoint file '{}' is corrupt. Delete it to start over with a full run.",
                    self.checkpoint_path.display()
                )
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err).with_context(|| {
                format!("💀 Could not read the checkpoint file '{}'.", self.checkpoint_path.display())
            }),
        }
    }
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn cluster_page(&self, selection: &Selection, after: Option<&str>, limit: usize) -> Result<Vec<String>> {
        Ok(self.catalog.cluster_page(selection, after, limit))
    }

    async fn cluster(&self, id: &str) -> Result<Option<DedupCluster>> {
        Ok(self.catalog.cluster(id).cloned())
    }

    async fn records(&self, ids: &[String]) -> Result<Vec<MemberRecord>> {
        Ok(self.catalog.records(ids))
    }

    async fn single_page(&self, selection: &Selection, after: Option<&str>, limit: usize) -> Result<Vec<MemberRecord>> {
        Ok(self.catalog.single_page(selection, after, limit))
    }

    async fn load_checkpoint(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.read_checkpoints().await?.get(key).copied())
    }

    async fn save_checkpoint(&self, key: &str, at: DateTime<Utc>) -> Result<()> {
        let _guard = self.checkpoint_lock.lock().await;
        let mut checkpoints = self.read_checkpoints().await?;
        checkpoints.insert(key.to_string(), at);
        let body = serde_json::to_string_pretty(&checkpoints)
            .context("💀 Could not serialize the checkpoints. A map of timestamps. Somehow.")?;
        tokio::fs::write(&self.checkpoint_path, body).await.with_context(|| {
            format!("💀 Could not write the checkpoint file '{}'.", self.checkpoint_path.display())
        })?;
        debug!("🔖 checkpoint '{}' saved as {}", key, at.to_rfc3339());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn the_one_where_the_snapshot_loads_and_the_checkpoint_sticks() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("records.json");
        let snapshot = json!({
            "records": [
                {"id": "a.1", "source_id": "a", "updated": "2024-05-01T10:00:00Z", "dedup_id": "c1",
                 "fields": {"title": "Moby Dick"}},
                {"id": "b.1", "source_id": "b", "updated": "2024-05-01T11:00:00Z", "dedup_id": "c1",
                 "fields": {"title": ["Moby-Dick", "The Whale"]}},
                {"id": "b.2", "source_id": "b", "updated": "2024-05-01T12:00:00Z", "fields": {"title": "Typee"}}
            ],
            "clusters": [
                {"id": "c1", "member_ids": ["a.1", "b.1"], "changed": "2024-05-01T11:00:00Z"}
            ]
        });
        tokio::fs::write(&path, snapshot.to_string()).await?;

        let config = JsonFileStoreConfig {
            path: path.clone(),
            checkpoint_path: None,
        };
        assert_eq!(config.checkpoint_path(), dir.path().join("records.json.checkpoints.json"));
        let store = JsonFileStore::open(config).await?;

        let all = Selection::default();
        assert_eq!(store.cluster_page(&all, None, 10).await?, vec!["c1"]);
        let singles = store.single_page(&all, None, 10).await?;
        assert_eq!(singles.len(), 1);
        assert_eq!(singles[0].id, "b.2");
        let members = store.records(&["b.1".to_string(), "nope".to_string()]).await?;
        assert_eq!(members.len(), 1);

        assert_eq!(store.load_checkpoint("Last Index Update").await?, None);
        let at = Utc::now();
        store.save_checkpoint("Last Index Update", at).await?;
        store.save_checkpoint("other", at).await?;
        assert_eq!(store.load_checkpoint("Last Index Update").await?, Some(at));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_file_is_not_there() {
        let err = JsonFileStore::open(JsonFileStoreConfig {
            path: PathBuf::from("/definitely/not/here.json"),
            checkpoint_path: None,
        })
        .await
        .expect_err("💀 nothing to open");
        assert!(err.to_string().contains("could not be read"));
    }
}
