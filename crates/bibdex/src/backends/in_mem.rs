use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::backends::{IndexRequest, Sink};

/// 📦 A sink that never forgets.
///
/// Every request lands in a shared `Arc<Mutex<Vec<_>>>`. Clones share the same log, so a test can
/// keep one handle while the push workers get theirs. Requests are stored typed, not rendered;
/// the rendering has its own tests in `composers`.
#[derive(Debug, Default, Clone)]
pub struct InMemorySink {
    received: Arc<Mutex<Vec<IndexRequest>>>,
    closed: Arc<AtomicUsize>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 📜 Everything received so far, in arrival order.
    pub async fn requests(&self) -> Vec<IndexRequest> {
        self.received.lock().await.clone()
    }

    /// 📦 Every added document, parsed back into JSON.
    pub async fn added_documents(&self) -> Result<Vec<Value>> {
        let received = self.received.lock().await;
        let mut documents = Vec::new();
        for request in received.iter() {
            if let IndexRequest::Add(bodies) = request {
                for body in bodies {
                    documents.push(
                        serde_json::from_str(body)
                            .context("💀 The in-memory sink was handed a document that is not JSON.")?,
                    );
                }
            }
        }
        Ok(documents)
    }

    /// 🗑️ Every deleted id, in arrival order.
    pub async fn deleted_ids(&self) -> Vec<String> {
        self.received
            .lock()
            .await
            .iter()
            .filter_map(|request| match request {
                IndexRequest::Delete(ids) => Some(ids.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub async fn commits(&self) -> usize {
        self.received
            .lock()
            .await
            .iter()
            .filter(|request| matches!(request, IndexRequest::Commit))
            .count()
    }

    /// 🚪 How many sink handles have been closed.
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for InMemorySink {
    async fn send(&mut self, request: IndexRequest) -> Result<()> {
        // 🔒 lock, push, done
        self.received.lock().await.push(request);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
