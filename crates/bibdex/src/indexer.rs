//! 📦 BatchIndexer: buffers documents and deletions, ships them in bounded batches, commits.
//!
//! ```text
//!  add(doc) ─▶ [ documents | bytes ] ──(count or bytes bound)──▶ push pool ─▶ sink
//!  delete(id) ─▶ [ deletions ] ──(max_delete_records)─────────────▶ push pool ─▶ sink
//!  maybe_commit(processed) ──(every commit_interval)──▶ flush, drain, Commit, drain
//! ```
//!
//! The byte bound is checked *before* appending, so a batch never grows past `max_bytes`.
//! A single document bigger than `max_bytes` still has to go somewhere: it travels alone.
//! Commits always wait for every in-flight push, so a commit makes everything before it visible.

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, trace};

use crate::backends::{IndexRequest, RequestKind};
use crate::common::Document;
use crate::supervisors::WorkerPool;
use crate::supervisors::workers::push_worker::{PushReceipt, PushTask};

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    /// 📦 Documents per add request.
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    /// 📏 Serialized bytes per add request.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    /// 🗑️ Ids per delete request.
    #[serde(default = "default_max_delete_records")]
    pub max_delete_records: usize,
    /// 🔁 Processed records between forced commits. 0 commits only at the end.
    #[serde(default = "default_commit_interval")]
    pub commit_interval: u64,
}

fn default_max_records() -> usize {
    5000
}

// 📏 1 MiB. Index servers have feelings about request size.
fn default_max_bytes() -> usize {
    1024 * 1024
}

fn default_max_delete_records() -> usize {
    1000
}

fn default_commit_interval() -> u64 {
    50_000
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
            max_bytes: default_max_bytes(),
            max_delete_records: default_max_delete_records(),
            commit_interval: default_commit_interval(),
        }
    }
}

/// 📊 What the indexer has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexerStats {
    pub documents: u64,
    pub deletions: u64,
    /// 📨 Add and delete requests submitted.
    pub batches: u64,
    pub commits: u64,
    /// 🧾 Requests the push pool has confirmed.
    pub acknowledged: u64,
}

#[derive(Debug)]
pub struct BatchIndexer {
    pool: WorkerPool<PushTask>,
    config: BatchConfig,
    documents: Vec<String>,
    buffered_bytes: usize,
    deletions: Vec<String>,
    last_commit_at: u64,
    stats: IndexerStats,
}

impl BatchIndexer {
    pub fn new(pool: WorkerPool<PushTask>, config: BatchConfig) -> Self {
        Self {
            pool,
            config,
            documents: Vec::new(),
            buffered_bytes: 0,
            deletions: Vec::new(),
            last_commit_at: 0,
            stats: IndexerStats::default(),
        }
    }

    pub fn stats(&self) -> IndexerStats {
        self.stats
    }

    /// ✅ Has anything been sent toward the index?
    pub fn did_work(&self) -> bool {
        self.stats.documents > 0 || self.stats.deletions > 0
    }

    pub fn buffered(&self) -> (usize, usize) {
        (self.documents.len(), self.deletions.len())
    }

    /// ➕ Serialize and buffer a document, flushing around it as the bounds require.
    pub async fn add(&mut self, document: &Document) -> Result<()> {
        let body = serde_json::to_string(document)
            .with_context(|| format!("💀 Could not serialize document '{}'.", document.id))?;

        if !self.documents.is_empty() && self.buffered_bytes + body.len() > self.config.max_bytes {
            self.flush_documents().await?;
        }
        self.buffered_bytes += body.len();
        self.documents.push(body);
        self.stats.documents += 1;

        if self.documents.len() >= self.config.max_records || self.buffered_bytes >= self.config.max_bytes {
            self.flush_documents().await?;
        }
        Ok(())
    }

    /// ➖ Buffer a deletion.
    pub async fn delete(&mut self, id: impl Into<String>) -> Result<()> {
        self.deletions.push(id.into());
        self.stats.deletions += 1;
        if self.deletions.len() >= self.config.max_delete_records.max(1) {
            self.flush_deletions().await?;
        }
        Ok(())
    }

    /// 🚽 Send both buffers, bounds or not.
    pub async fn flush(&mut self) -> Result<()> {
        self.flush_documents().await?;
        self.flush_deletions().await
    }

    /// 🔁 Commit if `commit_interval` records went by since the last commit.
    pub async fn maybe_commit(&mut self, processed: u64) -> Result<bool> {
        let interval = self.config.commit_interval;
        if interval == 0 || processed.saturating_sub(self.last_commit_at) < interval {
            return Ok(false);
        }
        info!("🔁 {} records processed, committing", processed);
        self.commit().await?;
        self.last_commit_at = processed;
        Ok(true)
    }

    /// ✅ Flush, wait for every push, commit, wait for the commit.
    pub async fn commit(&mut self) -> Result<()> {
        self.flush().await?;
        self.drain().await?;
        self.submit(IndexRequest::Commit).await?;
        self.drain().await?;
        self.stats.commits += 1;
        debug!("✅ commit acknowledged");
        Ok(())
    }

    /// ⏳ Wait for every in-flight push. Buffers are not flushed.
    pub async fn drain(&mut self) -> Result<()> {
        self.pool.drain().await?;
        self.collect_receipts()?;
        Ok(())
    }

    /// 📬 Non-blocking: pick up whatever the push workers have confirmed.
    pub fn poll(&mut self) -> Result<()> {
        self.collect_receipts()
    }

    /// 🚪 Flush, drain, and let the push workers go home.
    pub async fn close(mut self) -> Result<IndexerStats> {
        self.flush().await?;
        self.drain().await?;
        self.pool.close().await?;
        Ok(self.stats)
    }

    /// 🚪 Close the push pool without flushing. For error paths.
    pub async fn abandon(mut self) -> Result<()> {
        self.pool.close().await
    }

    async fn flush_documents(&mut self) -> Result<()> {
        if self.documents.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.documents);
        trace!("📦 flushing {} document(s), {} bytes", batch.len(), self.buffered_bytes);
        self.buffered_bytes = 0;
        self.submit(IndexRequest::Add(batch)).await
    }

    async fn flush_deletions(&mut self) -> Result<()> {
        if self.deletions.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.deletions);
        trace!("🗑️ flushing {} deletion(s)", batch.len());
        self.submit(IndexRequest::Delete(batch)).await
    }

    async fn submit(&mut self, request: IndexRequest) -> Result<()> {
        if request.kind() != RequestKind::Commit {
            self.stats.batches += 1;
        }
        self.pool.submit(request).await?;
        self.collect_receipts()
    }

    fn collect_receipts(&mut self) -> Result<()> {
        self.pool.poll_results()?;
        while let Some(PushReceipt { kind, items }) = self.pool.take_result() {
            trace!("🧾 {} request with {} item(s) acknowledged", kind, items);
            self.stats.acknowledged += 1;
        }
        Ok(())
    }
}
