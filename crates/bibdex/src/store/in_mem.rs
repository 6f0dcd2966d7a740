use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::common::{DedupCluster, MemberRecord};
use crate::store::{Catalog, RecordStore, Selection};

/// 🧠 A store that lives and dies with the process.
///
/// Clones share state, so a test can keep a handle, hand another to the pipeline, and inspect
/// the checkpoint afterwards.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    catalog: Arc<RwLock<Catalog>>,
    checkpoints: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
}

impl InMemoryStore {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog: Arc::new(RwLock::new(catalog)),
            checkpoints: Arc::default(),
        }
    }

    pub fn from_parts(records: Vec<MemberRecord>, clusters: Vec<DedupCluster>) -> Self {
        Self::new(Catalog::from_parts(records, clusters))
    }

    pub async fn upsert_record(&self, record: MemberRecord) {
        self.catalog.write().await.upsert_record(record);
    }

    pub async fn upsert_cluster(&self, cluster: DedupCluster) {
        self.catalog.write().await.upsert_cluster(cluster);
    }

    pub async fn checkpoint(&self, key: &str) -> Option<DateTime<Utc>> {
        self.checkpoints.read().await.get(key).copied()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn cluster_page(&self, selection: &Selection, after: Option<&str>, limit: usize) -> Result<Vec<String>> {
        Ok(self.catalog.read().await.cluster_page(selection, after, limit))
    }

    async fn cluster(&self, id: &str) -> Result<Option<DedupCluster>> {
        Ok(self.catalog.read().await.cluster(id).cloned())
    }

    async fn records(&self, ids: &[String]) -> Result<Vec<MemberRecord>> {
        Ok(self.catalog.read().await.records(ids))
    }

    async fn single_page(&self, selection: &Selection, after: Option<&str>, limit: usize) -> Result<Vec<MemberRecord>> {
        Ok(self.catalog.read().await.single_page(selection, after, limit))
    }

    async fn load_checkpoint(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.checkpoint(key).await)
    }

    async fn save_checkpoint(&self, key: &str, at: DateTime<Utc>) -> Result<()> {
        self.checkpoints.write().await.insert(key.to_string(), at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_checkpoints_are_remembered_per_key() -> Result<()> {
        let store = InMemoryStore::default();
        let now = Utc::now();
        assert_eq!(store.load_checkpoint("Last Index Update").await?, None);
        store.save_checkpoint("Last Index Update", now).await?;
        assert_eq!(store.load_checkpoint("Last Index Update").await?, Some(now));
        assert_eq!(store.load_checkpoint("Last Index Update http://other").await?, None);
        Ok(())
    }
}
