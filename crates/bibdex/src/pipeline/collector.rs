//! 📥 The fan-in side: merge outcomes come back here in arrival order and go into the indexer.

use anyhow::Result;
use tracing::{info, warn};

use crate::indexer::BatchIndexer;
use crate::pipeline::RunSummary;
use crate::progress::ProgressMetrics;
use crate::supervisors::WorkerPool;
use crate::supervisors::workers::merge_worker::{MergeOutcome, MergeTask, MergeUnit};

#[derive(Debug)]
pub(crate) struct ResultCollector {
    indexer: BatchIndexer,
    summary: RunSummary,
    progress: ProgressMetrics,
    log_interval: u64,
}

impl ResultCollector {
    pub(crate) fn new(indexer: BatchIndexer, progress: ProgressMetrics, log_interval: u64) -> Self {
        Self {
            indexer,
            summary: RunSummary::default(),
            progress,
            log_interval,
        }
    }

    /// 📬 Take whatever the pool has finished, without waiting for the rest.
    pub(crate) async fn collect(&mut self, pool: &mut WorkerPool<MergeTask>) -> Result<()> {
        pool.poll_results()?;
        while let Some(outcome) = pool.take_result() {
            self.absorb(outcome).await?;
        }
        self.indexer.poll()
    }

    /// ⏳ Wait for every request the pool has taken, then collect.
    pub(crate) async fn drain_pool(&mut self, pool: &mut WorkerPool<MergeTask>) -> Result<()> {
        pool.drain().await?;
        self.collect(pool).await
    }

    pub(crate) async fn absorb(&mut self, outcome: MergeOutcome) -> Result<()> {
        let MergeOutcome { unit, result, skipped } = outcome;
        self.summary.processed += 1;
        match unit {
            MergeUnit::Cluster(_) => {
                self.summary.clusters += 1;
                if result.merged.is_some() {
                    self.summary.merged_clusters += 1;
                }
            }
            MergeUnit::Single(_) => self.summary.singles += 1,
        }
        if skipped {
            self.summary.skipped += 1;
        }

        for id in result.deleted_ids {
            self.indexer.delete(id).await?;
        }
        for document in result.survivors.iter().chain(result.merged.iter()) {
            self.indexer.add(document).await?;
        }
        self.indexer.maybe_commit(self.summary.processed).await?;

        self.summary.record_indexer(self.indexer.stats());
        self.progress.update(&self.summary);
        if self.log_interval > 0 && self.summary.processed % self.log_interval == 0 {
            info!(
                "📈 {} processed: {} clusters ({} merged), {} singles, {} documents, {} deletions",
                self.summary.processed,
                self.summary.clusters,
                self.summary.merged_clusters,
                self.summary.singles,
                self.summary.documents,
                self.summary.deletions
            );
        }
        Ok(())
    }

    /// 🚽 Flush the buffers and wait for every push.
    pub(crate) async fn drain(&mut self) -> Result<()> {
        self.indexer.flush().await?;
        self.indexer.drain().await
    }

    pub(crate) async fn commit(&mut self) -> Result<()> {
        self.indexer.commit().await?;
        self.summary.record_indexer(self.indexer.stats());
        Ok(())
    }

    pub(crate) fn did_work(&self) -> bool {
        self.indexer.did_work()
    }

    /// 🏁 Close the push pool and hand back the counters.
    pub(crate) async fn finish(self) -> Result<RunSummary> {
        let Self {
            indexer,
            mut summary,
            progress,
            ..
        } = self;
        let stats = indexer.close().await?;
        summary.record_indexer(stats);
        summary.elapsed = progress.elapsed();
        progress.finish();
        Ok(summary)
    }

    /// 🚪 Close without flushing. Whatever is still buffered is lost, and so is the checkpoint.
    pub(crate) async fn abandon(self) {
        self.progress.finish();
        if let Err(err) = self.indexer.abandon().await {
            warn!("🚪 closing the push pool after a failure also failed: {:#}", err);
        }
    }
}
