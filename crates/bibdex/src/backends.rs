//! 🔌 Backends: where the index requests finally leave the building.
//!
//! 🎭 Three sinks, one trait:
//! - [`solr::SolrSink`]: POSTs to a live index, with retries and optional cluster-health gating.
//! - [`dump::DumpSink`]: writes every request body to a numbered file. For looking, not touching.
//! - [`in_mem::InMemorySink`]: remembers every request. Tests love it.
//!
//! 🧠 Sinks are I/O only. Batching lives in the indexer, body rendering lives in `composers`.
//! The push workers each build their own sink from a [`SinkFactory`], so no HTTP client is ever
//! shared between workers.
//!
//! 🦆 The duck is here because every file must have one. This is law.

pub mod dump;
pub mod in_mem;
pub mod solr;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

pub use dump::{DumpSink, DumpSinkConfig};
pub use in_mem::InMemorySink;
pub use solr::health::{ClusterHealth, HealthConfig, HealthMonitor};
pub use solr::{SolrSink, SolrSinkConfig};

/// 📨 One request toward the index. Documents arrive already serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexRequest {
    /// 📦 Serialized documents, one JSON object each.
    Add(Vec<String>),
    /// 🗑️ Ids to delete.
    Delete(Vec<String>),
    Commit,
}

/// 🏷️ What kind of request it was, without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Add,
    Delete,
    Commit,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::Add => "add",
            RequestKind::Delete => "delete",
            RequestKind::Commit => "commit",
        };
        f.write_str(name)
    }
}

impl IndexRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            IndexRequest::Add(_) => RequestKind::Add,
            IndexRequest::Delete(_) => RequestKind::Delete,
            IndexRequest::Commit => RequestKind::Commit,
        }
    }

    /// 🔢 Documents or ids carried. A commit carries nothing.
    pub fn items(&self) -> usize {
        match self {
            IndexRequest::Add(documents) => documents.len(),
            IndexRequest::Delete(ids) => ids.len(),
            IndexRequest::Commit => 0,
        }
    }
}

/// 🕳️ A place index requests go to.
///
/// # Contract
/// - `send` returns only once the request is durably handed over, or with the error that ends the run.
/// - `close` is called once, when the owning worker clocks out.
#[async_trait]
pub trait Sink: fmt::Debug + Send {
    async fn send(&mut self, request: IndexRequest) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// 🎭 Enum dispatch over the concrete sinks.
#[derive(Debug)]
pub enum SinkBackend {
    Solr(SolrSink),
    Dump(DumpSink),
    InMemory(InMemorySink),
}

#[async_trait]
impl Sink for SinkBackend {
    async fn send(&mut self, request: IndexRequest) -> Result<()> {
        match self {
            SinkBackend::Solr(sink) => sink.send(request).await,
            SinkBackend::Dump(sink) => sink.send(request).await,
            SinkBackend::InMemory(sink) => sink.send(request).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            SinkBackend::Solr(sink) => sink.close().await,
            SinkBackend::Dump(sink) => sink.close().await,
            SinkBackend::InMemory(sink) => sink.close().await,
        }
    }
}

/// 🔧 Which sink to push to. In TOML: `[sink.Solr]`, `[sink.Dump]`, or `sink = { InMemory = [] }`.
#[derive(Debug, Deserialize, Clone)]
pub enum SinkConfig {
    Solr(SolrSinkConfig),
    Dump(DumpSinkConfig),
    InMemory(()),
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig::InMemory(())
    }
}

/// 🏭 Builds one sink per push worker.
///
/// Dump sinks built by the same factory share a file counter, so two workers never write the
/// same file. In-memory sinks built by the same factory share one request log.
#[derive(Debug, Clone)]
pub struct SinkFactory {
    config: SinkConfig,
    dump_sequence: Arc<AtomicUsize>,
    memory: InMemorySink,
}

impl SinkFactory {
    pub fn new(config: SinkConfig) -> Self {
        Self::with_memory(config, InMemorySink::default())
    }

    /// 🧪 Like `new`, but in-memory sinks write into `memory`, which the caller keeps a handle to.
    pub fn with_memory(config: SinkConfig, memory: InMemorySink) -> Self {
        Self {
            config,
            dump_sequence: Arc::new(AtomicUsize::new(0)),
            memory,
        }
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// 🧪 The shared in-memory log. Empty unless the sink is `InMemory`.
    pub fn memory(&self) -> &InMemorySink {
        &self.memory
    }

    /// 🏗️ A fresh sink. Called inside the push worker that will own it.
    pub fn build(&self) -> Result<SinkBackend> {
        Ok(match &self.config {
            SinkConfig::Solr(config) => SinkBackend::Solr(SolrSink::new(config.clone())?),
            SinkConfig::Dump(config) => {
                SinkBackend::Dump(DumpSink::new(config.clone(), self.dump_sequence.clone()))
            }
            SinkConfig::InMemory(()) => SinkBackend::InMemory(self.memory.clone()),
        })
    }

    /// 🏷️ Where requests end up, for logs and per-endpoint checkpoint keys.
    pub fn endpoint(&self) -> String {
        match &self.config {
            SinkConfig::Solr(config) => config.url.trim_end_matches('/').to_string(),
            SinkConfig::Dump(config) => format!("dump:{}", config.prefix),
            SinkConfig::InMemory(()) => "memory".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_requests_know_what_they_are() {
        let add = IndexRequest::Add(vec!["{}".into(), "{}".into()]);
        assert_eq!(add.kind(), RequestKind::Add);
        assert_eq!(add.items(), 2);
        assert_eq!(IndexRequest::Commit.items(), 0);
        assert_eq!(RequestKind::Delete.to_string(), "delete");
    }

    #[test]
    fn the_one_where_the_endpoint_loses_its_trailing_slash() {
        let factory = SinkFactory::new(SinkConfig::Solr(SolrSinkConfig::new(
            "http://localhost:8983/solr/biblio/",
        )));
        assert_eq!(factory.endpoint(), "http://localhost:8983/solr/biblio");
        assert_eq!(SinkFactory::new(SinkConfig::default()).endpoint(), "memory");
    }

    #[tokio::test]
    async fn the_one_where_in_memory_sinks_share_one_diary() -> Result<()> {
        let factory = SinkFactory::new(SinkConfig::InMemory(()));
        let mut first = factory.build()?;
        let mut second = factory.build()?;
        first.send(IndexRequest::Commit).await?;
        second.send(IndexRequest::Delete(vec!["x".into()])).await?;
        assert_eq!(factory.memory().requests().await.len(), 2);
        Ok(())
    }
}
