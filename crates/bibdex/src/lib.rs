//! 📚 bibdex: merge duplicate bibliographic records and push them into a search index.
//!
//! 🎬 *[a library. nine copies of Moby Dick. one of them spells it "MOBY-DICK". all of them want
//! to be in the index.]*
//!
//! ```text
//!  RecordStore ─▶ Pipeline ─▶ "merge"/"record" pools ─▶ MergeEngine ─▶ BatchIndexer ─▶ "push" pool ─▶ Sink
//! ```
//!
//! The CLI calls [`run`]; tests and embedders can assemble a [`pipeline::Pipeline`] themselves
//! with their own store, document builder and sink.

pub mod app_config;
pub mod backends;
pub mod cache;
pub mod common;
pub mod composers;
pub mod error;
pub mod indexer;
pub mod merge;
pub mod pipeline;
pub(crate) mod progress;
pub mod store;
pub mod supervisors;
pub mod transforms;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::app_config::AppConfig;
use crate::backends::SinkFactory;
use crate::pipeline::{Pipeline, RunOptions, RunSummary};
use crate::store::open_store;
use crate::transforms::RawFields;

/// 🚀 Validate, open the store, and run one pass with the stock document builder.
pub async fn run(config: AppConfig, options: RunOptions, cancel: CancellationToken) -> Result<RunSummary> {
    config
        .validate()
        .context("💀 The configuration was rejected before anything started. Nothing was touched.")?;
    let store = open_store(&config.store).await?;
    let sinks = SinkFactory::new(config.sink.clone());
    let pipeline = Pipeline::new(config, store, Arc::new(RawFields), sinks, cancel);
    pipeline.run(options).await
}
