//! 📡 The push task: what the "push" pool runs.
//!
//! One sink per worker, built inside the worker from the shared [`SinkFactory`]. The task sends
//! whatever request it is handed and reports back what went out. Retries and health waits happen
//! inside the sink; an error that reaches this far ends the run.
//!
//! 🦆 (the duck does not retry. the duck commits.)

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::trace;

use crate::backends::{IndexRequest, RequestKind, Sink, SinkBackend, SinkFactory};
use crate::supervisors::pool::TaskFactory;
use crate::supervisors::workers::PoolTask;

/// 🧾 Proof of delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushReceipt {
    pub kind: RequestKind,
    pub items: usize,
}

#[derive(Debug)]
pub struct PushTask {
    sink: SinkBackend,
}

impl PushTask {
    pub fn factory(sinks: SinkFactory) -> TaskFactory<PushTask> {
        Arc::new(move || {
            let sink = sinks
                .build()
                .with_context(|| format!("💀 Could not build a sink for '{}'.", sinks.endpoint()))?;
            Ok(PushTask { sink })
        })
    }
}

#[async_trait]
impl PoolTask for PushTask {
    type Request = IndexRequest;
    type Response = PushReceipt;

    async fn run(&mut self, request: IndexRequest) -> Result<PushReceipt> {
        let receipt = PushReceipt {
            kind: request.kind(),
            items: request.items(),
        };
        self.sink.send(request).await?;
        trace!("🧾 pushed {} request with {} item(s)", receipt.kind, receipt.items);
        Ok(receipt)
    }

    async fn finish(&mut self) -> Result<()> {
        self.sink.close().await
    }
}
