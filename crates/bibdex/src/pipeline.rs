//! 🎬 The orchestrator: clusters first, then singles, then drain, commit, checkpoint.
//!
//! ```text
//!  Init ─▶ ProcessClusters ─▶ ProcessSingles ─▶ Drain ─▶ Commit ─▶ Checkpoint ─▶ Done
//!              │                    │             │
//!              └──── Ctrl-C ────────┴─────────────┴──▶ Terminating (drain, commit, Err)
//! ```
//!
//! Clusters and singles are paged out of the store by id cursor and submitted to the "merge" and
//! "record" pools. Results come back in arrival order and go straight into the batch indexer.
//! With `parallel_singles` the singles phase runs in a sibling task that owns its own pools and
//! its own indexer; the main run waits for it before committing.
//!
//! The checkpoint is the instant the run *started*, and it is written only when the user asked
//! for everything and everything went through. Anything else leaves it alone, so the next
//! incremental run picks up the same records again (at-least-once).

mod collector;
pub mod state;
pub mod summary;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app_config::AppConfig;
use crate::backends::SinkFactory;
use crate::error::PipelineError;
use crate::indexer::BatchIndexer;
use crate::merge::MergeEngine;
use crate::progress::ProgressMetrics;
use crate::store::{RecordStore, Selection};
use crate::supervisors::workers::merge_worker::{MergeRequest, MergeTask};
use crate::supervisors::workers::push_worker::PushTask;
use crate::supervisors::{Sibling, Supervisor, TaskFactory, WorkerPool};
use crate::transforms::DocumentBuilder;

use collector::ResultCollector;
use state::StateTracker;

pub use state::RunState;
pub use summary::RunSummary;

const SINGLES_SIBLING: &str = "singles";

/// 🎯 What this run covers.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub selection: Selection,
    /// 🔁 Ignore the checkpoint and go through everything.
    pub full: bool,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: Arc<AppConfig>,
    store: Arc<dyn RecordStore>,
    builder: Arc<dyn DocumentBuilder>,
    engine: Arc<MergeEngine>,
    sinks: SinkFactory,
    supervisor: Supervisor,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn RecordStore>,
        builder: Arc<dyn DocumentBuilder>,
        sinks: SinkFactory,
        cancel: CancellationToken,
    ) -> Self {
        let engine = Arc::new(MergeEngine::new(&config.merge));
        Self {
            config: Arc::new(config),
            store,
            builder,
            engine,
            sinks,
            supervisor: Supervisor::new(),
            cancel,
        }
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// 🔖 The key the checkpoint lives under, per endpoint when so configured.
    pub fn checkpoint_key(&self) -> String {
        let key = &self.config.pipeline.checkpoint_key;
        if self.config.pipeline.checkpoint_per_endpoint {
            format!("{} {}", key, self.sinks.endpoint())
        } else {
            key.clone()
        }
    }

    /// 🚀 One full pass. `Err(PipelineError::Interrupted)` when the token was cancelled.
    pub async fn run(&self, options: RunOptions) -> Result<RunSummary> {
        let started_at = Utc::now();
        let mut states = StateTracker::new();
        let selection = self.effective_selection(&options).await?;
        info!("🎬 starting run with {:?}", selection);

        let mut collector = self.collector("push", "📚 indexing", self.config.pipeline.progress)?;
        let singles_token = self.cancel.child_token();
        let mut sibling: Option<Sibling<RunSummary>> = None;

        let phases = async {
            states.enter(RunState::ProcessClusters);
            if self.config.pipeline.parallel_singles {
                let pipeline = self.clone();
                let selection = selection.clone();
                let token = singles_token.clone();
                sibling = Some(
                    self.supervisor
                        .spawn_sibling(SINGLES_SIBLING, async move { pipeline.singles_alone(selection, token).await }),
                );
            }
            self.process_clusters(&selection, &mut collector, &self.cancel).await?;

            states.enter(RunState::ProcessSingles);
            let singles = match sibling.take() {
                Some(sibling) => sibling
                    .join()
                    .await
                    .context("💀 The parallel singles task failed. The clusters went fine, if that helps.")?,
                None => {
                    self.process_singles(&selection, &mut collector, &self.cancel).await?;
                    RunSummary::default()
                }
            };

            states.enter(RunState::Drain);
            collector.drain().await?;
            Ok::<_, anyhow::Error>(singles)
        }
        .await;

        let singles = match phases {
            Ok(singles) => singles,
            Err(err) => return self.bail(err, collector, sibling, &singles_token).await,
        };

        let interrupted = self.cancel.is_cancelled();
        if interrupted {
            warn!("🛑 cancelled during {}; draining what was already dispatched", states.current());
            states.enter(RunState::Terminating);
        }
        if collector.did_work() || singles.did_work() {
            if !interrupted {
                states.enter(RunState::Commit);
            }
            if let Err(err) = collector.commit().await {
                return self.bail(err, collector, None, &singles_token).await;
            }
        } else {
            debug!("💤 nothing went to the index; skipping the commit");
        }

        let finished = collector.finish().await;
        self.supervisor.shutdown(self.config.runtime.shutdown_grace()).await;
        let mut summary = finished?;
        summary.absorb(&singles);

        if interrupted {
            warn!(
                "🛑 interrupted after {} unit(s); {} document(s) and {} deletion(s) went out",
                summary.processed, summary.documents, summary.deletions
            );
            return Err(PipelineError::Interrupted.into());
        }

        if options.selection.is_partial() {
            info!("🧩 filtered run; the checkpoint stays where it was");
        } else {
            states.enter(RunState::Checkpoint);
            let key = self.checkpoint_key();
            self.store
                .save_checkpoint(&key, started_at)
                .await
                .with_context(|| format!("💀 Everything was indexed, but the checkpoint '{key}' could not be saved. The next run will redo this one."))?;
            info!("🔖 checkpoint '{}' set to {}", key, started_at.to_rfc3339());
            summary.checkpoint_saved = true;
        }

        states.enter(RunState::Done);
        summary.states = states.history();
        info!(
            "✅ done: {} clusters, {} singles, {} documents, {} deletions, {} commits",
            summary.clusters, summary.singles, summary.documents, summary.deletions, summary.commits
        );
        Ok(summary)
    }

    /// 🔖 Start from the checkpoint unless told otherwise.
    async fn effective_selection(&self, options: &RunOptions) -> Result<Selection> {
        let mut selection = options.selection.clone();
        let explicit = selection.from.is_some() || selection.single_id.is_some() || selection.delete_source.is_some();
        if options.full || explicit {
            return Ok(selection);
        }
        let key = self.checkpoint_key();
        let checkpoint = self
            .store
            .load_checkpoint(&key)
            .await
            .with_context(|| format!("💀 Could not read the checkpoint '{key}' from the store."))?;
        match checkpoint {
            Some(at) => {
                info!("🔖 resuming from checkpoint '{}' at {}", key, at.to_rfc3339());
                selection.from = Some(at);
            }
            None => info!("🔖 no checkpoint '{}' yet; going through everything", key),
        }
        Ok(selection)
    }

    fn collector(&self, pool_id: &str, label: &str, progress: bool) -> Result<ResultCollector> {
        let runtime = &self.config.runtime;
        let pool = WorkerPool::new(
            pool_id,
            runtime.push_workers,
            runtime.push_queue_depth,
            PushTask::factory(self.sinks.clone()),
            &self.supervisor,
        )?;
        Ok(ResultCollector::new(
            BatchIndexer::new(pool, self.config.batch.clone()),
            ProgressMetrics::new(label, progress),
            self.config.pipeline.log_interval,
        ))
    }

    fn merge_factory(&self, selection: &Selection) -> TaskFactory<MergeTask> {
        MergeTask::factory(
            self.store.clone(),
            self.engine.clone(),
            self.builder.clone(),
            self.config.merge.document_cache_capacity,
            selection.delete_source.clone(),
        )
    }

    /// 👯 Page cluster ids out of the store and through the "merge" pool.
    async fn process_clusters(
        &self,
        selection: &Selection,
        collector: &mut ResultCollector,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let runtime = &self.config.runtime;
        let page_size = self.config.pipeline.page_size;
        let mut pool = WorkerPool::new(
            "merge",
            runtime.merge_workers,
            runtime.merge_queue_depth,
            self.merge_factory(selection),
            &self.supervisor,
        )?;

        let paged = async {
            let mut cursor: Option<String> = None;
            'pages: loop {
                if cancel.is_cancelled() {
                    break;
                }
                let page = self
                    .store
                    .cluster_page(selection, cursor.as_deref(), page_size)
                    .await
                    .context("💀 Could not page cluster ids out of the store.")?;
                let last_page = page.len() < page_size;
                cursor = page.last().cloned();
                for cluster_id in page {
                    if cancel.is_cancelled() {
                        break 'pages;
                    }
                    pool.submit(MergeRequest::Cluster(cluster_id)).await?;
                    collector.collect(&mut pool).await?;
                }
                if last_page {
                    break;
                }
            }
            // -- ⏳ whatever was dispatched gets finished, interrupted or not
            collector.drain_pool(&mut pool).await
        }
        .await;

        let closed = pool.close().await;
        paged?;
        closed
    }

    /// 📄 Page standalone records out of the store and through the "record" pool.
    async fn process_singles(
        &self,
        selection: &Selection,
        collector: &mut ResultCollector,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let runtime = &self.config.runtime;
        let page_size = self.config.pipeline.page_size;
        let mut pool = WorkerPool::new(
            "record",
            runtime.record_workers,
            runtime.merge_queue_depth,
            self.merge_factory(selection),
            &self.supervisor,
        )?;

        let paged = async {
            let mut cursor: Option<String> = None;
            'pages: loop {
                if cancel.is_cancelled() {
                    break;
                }
                let page = self
                    .store
                    .single_page(selection, cursor.as_deref(), page_size)
                    .await
                    .context("💀 Could not page standalone records out of the store.")?;
                let last_page = page.len() < page_size;
                cursor = page.last().map(|record| record.id.clone());
                for record in page {
                    if cancel.is_cancelled() {
                        break 'pages;
                    }
                    pool.submit(MergeRequest::Single(record)).await?;
                    collector.collect(&mut pool).await?;
                }
                if last_page {
                    break;
                }
            }
            collector.drain_pool(&mut pool).await
        }
        .await;

        let closed = pool.close().await;
        paged?;
        closed
    }

    /// 👯 The sibling singles phase: own pools, own indexer, no commit. The main run commits.
    async fn singles_alone(self, selection: Selection, cancel: CancellationToken) -> Result<RunSummary> {
        let mut collector = self.collector("push-singles", "📄 singles", false)?;
        if let Err(err) = self.process_singles(&selection, &mut collector, &cancel).await {
            collector.abandon().await;
            return Err(err);
        }
        collector.finish().await
    }

    /// 💀 Unwind after a failure: stop the sibling, drop the buffers, send the workers home.
    async fn bail(
        &self,
        err: anyhow::Error,
        collector: ResultCollector,
        sibling: Option<Sibling<RunSummary>>,
        singles_token: &CancellationToken,
    ) -> Result<RunSummary> {
        singles_token.cancel();
        if let Some(sibling) = sibling {
            if let Err(sibling_err) = sibling.join().await {
                warn!("👯 the singles task also failed while we were unwinding: {:#}", sibling_err);
            }
        }
        collector.abandon().await;
        self.supervisor.shutdown(self.config.runtime.shutdown_grace()).await;
        Err(err)
    }
}
