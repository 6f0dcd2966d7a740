//! 🧬 The merge task: what the "merge" and "record" pools run.
//!
//! A cluster request carries only the cluster id; the worker loads the cluster and its members
//! itself, through its own store handle. A single request carries the record, which the
//! orchestrator already has in hand from paging.
//!
//! Data faults split two ways here. A broken standalone record is logged and skipped. A broken
//! cluster member fails the request, which aborts the run: skipping it could leave a merged
//! document in the index with no matching deletion.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, trace, warn};

use crate::cache::DocumentCache;
use crate::common::{MemberRecord, MergeResult};
use crate::merge::MergeEngine;
use crate::store::RecordStore;
use crate::supervisors::pool::TaskFactory;
use crate::supervisors::workers::PoolTask;
use crate::transforms::DocumentBuilder;

/// 📨 Work for a merge worker.
#[derive(Debug, Clone)]
pub enum MergeRequest {
    Cluster(String),
    Single(MemberRecord),
}

/// 🏷️ What a result was about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeUnit {
    Cluster(String),
    Single(String),
}

/// 📬 One merge worker answer.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub unit: MergeUnit,
    pub result: MergeResult,
    /// ⏭️ A standalone record that was skipped as a data fault.
    pub skipped: bool,
}

/// 🧬 Per-worker merge state: its own store handle, its own document cache.
#[derive(Debug)]
pub struct MergeTask {
    store: Arc<dyn RecordStore>,
    engine: Arc<MergeEngine>,
    builder: Arc<dyn DocumentBuilder>,
    cache: DocumentCache,
    deleting_source: Option<String>,
}

impl MergeTask {
    pub fn new(
        store: Arc<dyn RecordStore>,
        engine: Arc<MergeEngine>,
        builder: Arc<dyn DocumentBuilder>,
        cache_capacity: usize,
        deleting_source: Option<String>,
    ) -> Self {
        Self {
            store,
            engine,
            builder,
            cache: DocumentCache::new(cache_capacity),
            deleting_source,
        }
    }

    /// 🏭 A factory for pools. Each worker gets a fresh task and therefore a fresh cache.
    pub fn factory(
        store: Arc<dyn RecordStore>,
        engine: Arc<MergeEngine>,
        builder: Arc<dyn DocumentBuilder>,
        cache_capacity: usize,
        deleting_source: Option<String>,
    ) -> TaskFactory<MergeTask> {
        Arc::new(move || {
            Ok(MergeTask::new(
                store.clone(),
                engine.clone(),
                builder.clone(),
                cache_capacity,
                deleting_source.clone(),
            ))
        })
    }

    pub fn cache(&self) -> &DocumentCache {
        &self.cache
    }

    async fn merge_cluster(&mut self, cluster_id: String) -> Result<MergeOutcome> {
        let Some(cluster) = self
            .store
            .cluster(&cluster_id)
            .await
            .with_context(|| format!("💀 Could not load cluster '{cluster_id}' from the store."))?
        else {
            // -- 👻 gone between paging and now: whatever it left in the index has to go too
            warn!("👻 cluster '{}' vanished from the store; deleting it from the index", cluster_id);
            return Ok(MergeOutcome {
                result: MergeResult {
                    deleted_ids: vec![cluster_id.clone()],
                    ..Default::default()
                },
                unit: MergeUnit::Cluster(cluster_id),
                skipped: false,
            });
        };

        let members = self
            .store
            .records(&cluster.member_ids)
            .await
            .with_context(|| format!("💀 Could not load the members of cluster '{cluster_id}'."))?;

        let engine = &self.engine;
        let builder = self.builder.as_ref();
        let cache = &mut self.cache;
        let mut result = engine.merge_cluster(&cluster, &members, self.deleting_source.as_deref(), |record| {
            cache.get_or_build(record, builder)
        })?;

        // -- 🕳️ members the store no longer knows about leave the index as well
        for member_id in &cluster.member_ids {
            if !members.iter().any(|member| &member.id == member_id) {
                debug!("🕳️ member '{}' of cluster '{}' is missing from the store", member_id, cluster_id);
                result.deleted_ids.push(member_id.clone());
            }
        }

        trace!(
            "🧬 cluster '{}': {} document(s), {} deletion(s)",
            cluster_id,
            result.document_count(),
            result.deleted_ids.len()
        );
        Ok(MergeOutcome {
            unit: MergeUnit::Cluster(cluster_id),
            result,
            skipped: false,
        })
    }

    fn convert_single(&self, record: MemberRecord) -> MergeOutcome {
        let builder = self.builder.as_ref();
        match self
            .engine
            .convert_single(&record, self.deleting_source.as_deref(), |r| builder.build(r))
        {
            Ok(result) => MergeOutcome {
                unit: MergeUnit::Single(record.id),
                result,
                skipped: false,
            },
            Err(err) => {
                warn!("⏭️ skipping record '{}': {:#}", record.id, err);
                MergeOutcome {
                    unit: MergeUnit::Single(record.id),
                    result: MergeResult::default(),
                    skipped: true,
                }
            }
        }
    }
}

#[async_trait]
impl PoolTask for MergeTask {
    type Request = MergeRequest;
    type Response = MergeOutcome;

    async fn run(&mut self, request: MergeRequest) -> Result<MergeOutcome> {
        match request {
            MergeRequest::Cluster(cluster_id) => self.merge_cluster(cluster_id).await,
            MergeRequest::Single(record) => Ok(self.convert_single(record)),
        }
    }

    async fn finish(&mut self) -> Result<()> {
        debug!(
            "🗃️ merge task done; document cache hits {} misses {}",
            self.cache.hits(),
            self.cache.misses()
        );
        Ok(())
    }
}
