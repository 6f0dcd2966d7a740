//! 🗄️ The record store: where member records, dedup clusters and checkpoints live.
//!
//! Harvesting and duplicate detection fill the store; this crate only reads records and clusters
//! and writes one thing back, the checkpoint. [`RecordStore`] is the seam. Two implementations:
//!
//! - [`InMemoryStore`]: for tests and for embedding.
//! - [`JsonFileStore`]: a JSON snapshot of records and clusters, with checkpoints in a sidecar file.
//!
//! 🔖 Iteration is cursor based: every page call takes the last id of the previous page. That keeps
//! the cluster and singles phases independent, even when they run side by side.

pub mod in_mem;
pub mod json_file;

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::ops::Bound;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{DedupCluster, MemberRecord};

pub use in_mem::InMemoryStore;
pub use json_file::{JsonFileStore, JsonFileStoreConfig};

/// 🎯 Which records a run covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// ⏱️ Only work changed at or after this instant.
    pub from: Option<DateTime<Utc>>,
    /// ⏱️ Only work changed at or before this instant.
    pub until: Option<DateTime<Utc>>,
    pub source_id: Option<String>,
    pub single_id: Option<String>,
    /// 🗑️ Remove this source from the index: its members leave their clusters, its records get deleted.
    pub delete_source: Option<String>,
}

impl Selection {
    /// 🧩 Does this selection cover less than the whole record set?
    ///
    /// Only meaningful for what the user asked for; the `from` the pipeline derives from the
    /// checkpoint is applied on a copy.
    pub fn is_partial(&self) -> bool {
        self.from.is_some()
            || self.until.is_some()
            || self.source_id.is_some()
            || self.single_id.is_some()
            || self.delete_source.is_some()
    }

    pub fn deleting_source(&self) -> Option<&str> {
        self.delete_source.as_deref()
    }

    fn has_range(&self) -> bool {
        self.from.is_some() || self.until.is_some()
    }

    fn in_range(&self, at: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| at >= from) && self.until.is_none_or(|until| at <= until)
    }

    /// 🏷️ Either source filter; a deletion run is by definition scoped to that source.
    fn source(&self) -> Option<&str> {
        self.delete_source.as_deref().or(self.source_id.as_deref())
    }
}

/// 🗄️ What the pipeline needs from the store.
#[async_trait]
pub trait RecordStore: Send + Sync + Debug {
    /// 👯 Up to `limit` selected cluster ids, sorted, strictly after `after`.
    async fn cluster_page(&self, selection: &Selection, after: Option<&str>, limit: usize) -> Result<Vec<String>>;

    async fn cluster(&self, id: &str) -> Result<Option<DedupCluster>>;

    /// 📚 The records with these ids, in the given order. Unknown ids are left out.
    async fn records(&self, ids: &[String]) -> Result<Vec<MemberRecord>>;

    /// 📄 Up to `limit` selected records that belong to no live cluster, sorted by id, after `after`.
    async fn single_page(&self, selection: &Selection, after: Option<&str>, limit: usize) -> Result<Vec<MemberRecord>>;

    async fn load_checkpoint(&self, key: &str) -> Result<Option<DateTime<Utc>>>;

    async fn save_checkpoint(&self, key: &str, at: DateTime<Utc>) -> Result<()>;
}

/// 📇 Records and clusters, indexed by id. The selection logic both stores share lives here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "CatalogFile", into = "CatalogFile")]
pub struct Catalog {
    records: BTreeMap<String, MemberRecord>,
    clusters: BTreeMap<String, DedupCluster>,
}

/// 💾 On-disk shape: two plain lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    records: Vec<MemberRecord>,
    #[serde(default)]
    clusters: Vec<DedupCluster>,
}

impl From<CatalogFile> for Catalog {
    fn from(file: CatalogFile) -> Self {
        Catalog::from_parts(file.records, file.clusters)
    }
}

impl From<Catalog> for CatalogFile {
    fn from(catalog: Catalog) -> Self {
        CatalogFile {
            records: catalog.records.into_values().collect(),
            clusters: catalog.clusters.into_values().collect(),
        }
    }
}

impl Catalog {
    pub fn from_parts(records: Vec<MemberRecord>, clusters: Vec<DedupCluster>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.id.clone(), r)).collect(),
            clusters: clusters.into_iter().map(|c| (c.id.clone(), c)).collect(),
        }
    }

    pub fn upsert_record(&mut self, record: MemberRecord) {
        self.records.insert(record.id.clone(), record);
    }

    pub fn upsert_cluster(&mut self, cluster: DedupCluster) {
        self.clusters.insert(cluster.id.clone(), cluster);
    }

    pub fn cluster(&self, id: &str) -> Option<&DedupCluster> {
        self.clusters.get(id)
    }

    pub fn records(&self, ids: &[String]) -> Vec<MemberRecord> {
        ids.iter().filter_map(|id| self.records.get(id).cloned()).collect()
    }

    fn after<'a, V>(map: &'a BTreeMap<String, V>, after: Option<&str>) -> impl Iterator<Item = (&'a String, &'a V)> {
        let lower = match after {
            Some(after) => Bound::Excluded(after.to_string()),
            None => Bound::Unbounded,
        };
        map.range::<String, _>((lower, Bound::Unbounded))
    }

    fn cluster_selected(&self, cluster: &DedupCluster, selection: &Selection) -> bool {
        if let Some(single) = selection.single_id.as_deref() {
            return cluster.id == single || cluster.member_ids.iter().any(|id| id == single);
        }
        let members = || cluster.member_ids.iter().filter_map(|id| self.records.get(id));
        if let Some(source) = selection.source() {
            if !members().any(|record| record.source_id == source) {
                return false;
            }
        }
        if !selection.has_range() {
            return true;
        }
        selection.in_range(cluster.changed) || members().any(|record| selection.in_range(record.updated))
    }

    /// 🔗 Is the record claimed by a cluster that still exists and is not deleted?
    fn in_live_cluster(&self, record: &MemberRecord) -> bool {
        record
            .dedup_id
            .as_deref()
            .and_then(|id| self.clusters.get(id))
            .is_some_and(|cluster| !cluster.deleted)
    }

    fn single_selected(&self, record: &MemberRecord, selection: &Selection) -> bool {
        if self.in_live_cluster(record) {
            return false;
        }
        if let Some(single) = selection.single_id.as_deref() {
            return record.id == single;
        }
        if let Some(source) = selection.source() {
            if record.source_id != source {
                return false;
            }
        }
        selection.in_range(record.updated)
    }

    pub fn cluster_page(&self, selection: &Selection, after: Option<&str>, limit: usize) -> Vec<String> {
        Self::after(&self.clusters, after)
            .filter(|(_, cluster)| self.cluster_selected(cluster, selection))
            .take(limit)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn single_page(&self, selection: &Selection, after: Option<&str>, limit: usize) -> Vec<MemberRecord> {
        Self::after(&self.records, after)
            .filter(|(_, record)| self.single_selected(record, selection))
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect()
    }
}

/// 🔧 Which store to open. In TOML: `[store.JsonFile]` or `store = { InMemory = [] }`.
#[derive(Debug, Deserialize, Clone)]
pub enum StoreConfig {
    JsonFile(JsonFileStoreConfig),
    InMemory(()),
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::InMemory(())
    }
}

/// 🚪 Open the configured store.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn RecordStore>> {
    Ok(match config {
        StoreConfig::JsonFile(config) => Arc::new(JsonFileStore::open(config.clone()).await?),
        StoreConfig::InMemory(()) => Arc::new(InMemoryStore::default()),
    })
}
