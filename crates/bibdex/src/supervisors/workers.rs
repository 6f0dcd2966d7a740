//! 🧵 Workers: the ones who actually do the work while the Supervisor takes the credit.
//!
//! A worker is a long-lived tokio task holding the far end of two private channels: one for
//! requests, one for outcomes. It builds its task via the pool's factory *after* it has been
//! spawned, so every HTTP client and store handle is born inside the worker that uses it.
//!
//! 🔄 Loop: receive → run → send outcome. When the dispatcher side of the request channel is gone
//! (the pool was closed or dropped), `recv` fails and the worker leaves instead of idling forever
//! as an orphan.

pub mod merge_worker;
pub mod push_worker;

use anyhow::Result;
use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::supervisors::pool::TaskFactory;

/// 🏗️ A background worker, that does work. duh.
pub trait Worker {
    /// 🚀 Start the worker. Returns a JoinHandle because we trust but verify.
    fn start(self) -> JoinHandle<Result<()>>;
}

/// 🎯 The fixed function a pool runs over and over.
#[async_trait]
pub trait PoolTask: Send + 'static {
    type Request: Send + 'static;
    type Response: Send + 'static;

    /// 🔄 Handle one request. An `Err` crosses back to the dispatcher as a message and aborts the run.
    async fn run(&mut self, request: Self::Request) -> Result<Self::Response>;

    /// 🗑️ Called once when the worker's request channel closes.
    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// 📬 What a worker sends back for every request.
#[derive(Debug)]
pub(crate) enum WorkerOutcome<R> {
    Done(R),
    Failed(String),
}

/// 🧵 One pool worker.
pub(crate) struct PoolWorker<T: PoolTask> {
    pub(crate) pool_id: String,
    pub(crate) index: usize,
    pub(crate) factory: TaskFactory<T>,
    pub(crate) requests: Receiver<T::Request>,
    pub(crate) outcomes: Sender<WorkerOutcome<T::Response>>,
}

impl<T: PoolTask> Worker for PoolWorker<T> {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            // -- 🏗️ construct the task here, inside the worker, never in the parent
            let mut task = (self.factory.as_ref())();
            if let Err(err) = &task {
                warn!(
                    "💀 worker {} of pool '{}' could not initialize its task: {err:#}",
                    self.index, self.pool_id
                );
            }
            debug!("🧵 worker {} of pool '{}' reporting for duty", self.index, self.pool_id);

            while let Ok(request) = self.requests.recv().await {
                let outcome = match task.as_mut() {
                    Ok(task) => match task.run(request).await {
                        Ok(response) => WorkerOutcome::Done(response),
                        Err(err) => WorkerOutcome::Failed(format!("{err:#}")),
                    },
                    Err(err) => WorkerOutcome::Failed(format!("worker initialization failed: {err:#}")),
                };
                if self.outcomes.send(outcome).await.is_err() {
                    // -- 🏚️ nobody is listening anymore
                    trace!("🏚️ worker {} of pool '{}' lost its dispatcher", self.index, self.pool_id);
                    break;
                }
            }

            debug!("🏁 worker {} of pool '{}' clocking out", self.index, self.pool_id);
            match task.as_mut() {
                Ok(task) => task.finish().await,
                Err(_) => Ok(()),
            }
        })
    }
}
