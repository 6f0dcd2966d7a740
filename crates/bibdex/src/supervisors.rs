//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 "In a world where workers toil endlessly..."
//! 🎬 "One supervisor dared to remember how each of them died."
//!
//! 📦 The Supervisor module: part middle manager, part coroner.
//!
//! - [`Supervisor`] owns every worker's `JoinHandle`, reaps exits, and keeps a separate ledger for
//!   unmanaged sibling tasks (the parallel singles phase) so their exit status can be looked up by
//!   name afterwards.
//! - [`pool::WorkerPool`] is the dispatcher: bounded queue, per-worker channels, arrival-order results.
//! - [`workers`] holds the worker loop and the two concrete tasks (merge and push).
//!
//! 🦆 (the duck supervises nothing. the duck is at peace with this.)

pub mod pool;
pub mod workers;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Result, anyhow};
use futures::FutureExt;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

pub use pool::{TaskFactory, WorkerPool};
pub use workers::{PoolTask, Worker};

/// 🪦 How a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failed(String),
    Panicked(String),
    /// ✂️ Aborted by us during shutdown, after the grace period ran out.
    Aborted,
}

impl ExitStatus {
    fn from_join<T>(joined: std::result::Result<Result<T>, JoinError>) -> (Self, Option<Result<T>>) {
        match joined {
            Ok(Ok(value)) => (ExitStatus::Success, Some(Ok(value))),
            Ok(Err(err)) => (ExitStatus::Failed(format!("{err:#}")), Some(Err(err))),
            Err(join_err) if join_err.is_cancelled() => (ExitStatus::Aborted, None),
            Err(join_err) => (ExitStatus::Panicked(join_err.to_string()), None),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }
}

/// 📋 One reaped pool worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    pub pool: String,
    pub worker: usize,
    pub status: ExitStatus,
}

#[derive(Debug)]
struct ManagedWorker {
    pool: String,
    worker: usize,
    handle: JoinHandle<Result<()>>,
}

#[derive(Debug, Default)]
struct SupervisorState {
    managed: Vec<ManagedWorker>,
    exits: Vec<WorkerExit>,
    external: HashMap<String, ExitStatus>,
}

/// 🧑‍💼 Owns worker lifecycles. Cheap to clone; all clones share one ledger.
#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    state: Arc<Mutex<SupervisorState>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SupervisorState> {
        // -- 🔒 a poisoned ledger is still a ledger
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 👶 Take responsibility for a freshly spawned pool worker.
    pub(crate) fn adopt(&self, pool: &str, worker: usize, handle: JoinHandle<Result<()>>) {
        self.lock().managed.push(ManagedWorker {
            pool: pool.to_string(),
            worker,
            handle,
        });
    }

    /// 🧹 Collect exit statuses of workers that have already finished. Never blocks.
    pub fn reap(&self) -> Vec<WorkerExit> {
        let mut state = self.lock();
        let (finished, alive): (Vec<_>, Vec<_>) = state
            .managed
            .drain(..)
            .partition(|managed| managed.handle.is_finished());
        state.managed = alive;

        let mut reaped = Vec::with_capacity(finished.len());
        for managed in finished {
            let status = match managed.handle.now_or_never() {
                Some(joined) => ExitStatus::from_join(joined).0,
                None => ExitStatus::Aborted,
            };
            if !status.is_success() {
                warn!("🪦 worker {} of pool '{}' exited: {:?}", managed.worker, managed.pool, status);
            }
            reaped.push(WorkerExit {
                pool: managed.pool,
                worker: managed.worker,
                status,
            });
        }
        state.exits.extend(reaped.iter().cloned());
        reaped
    }

    /// 📜 Every pool-worker exit reaped so far.
    pub fn exits(&self) -> Vec<WorkerExit> {
        self.lock().exits.clone()
    }

    /// 🔢 Pool workers not yet reaped.
    pub fn managed_count(&self) -> usize {
        self.lock().managed.len()
    }

    /// 👯 Spawn an unmanaged sibling task. Its exit is recorded under `name` once joined.
    pub fn spawn_sibling<T, F>(&self, name: &str, future: F) -> Sibling<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        debug!("👯 spawning sibling task '{}'", name);
        Sibling {
            name: name.to_string(),
            handle: tokio::spawn(future),
            supervisor: self.clone(),
        }
    }

    /// 🔍 Exit status of a joined sibling.
    pub fn external_status(&self, name: &str) -> Option<ExitStatus> {
        self.lock().external.get(name).cloned()
    }

    fn record_external(&self, name: &str, status: ExitStatus) {
        self.lock().external.insert(name.to_string(), status);
    }

    /// 🛑 Wait up to `grace` for each worker to wind down, then abort stragglers.
    ///
    /// Pools should be closed first; a worker only leaves its loop once its request channel is gone.
    pub async fn shutdown(&self, grace: Duration) {
        let managed: Vec<ManagedWorker> = self.lock().managed.drain(..).collect();
        let mut exits = Vec::with_capacity(managed.len());
        for mut worker in managed {
            let status = match tokio::time::timeout(grace, &mut worker.handle).await {
                Ok(joined) => ExitStatus::from_join(joined).0,
                Err(_) => {
                    warn!(
                        "✂️ worker {} of pool '{}' ignored the shutdown; aborting it",
                        worker.worker, worker.pool
                    );
                    worker.handle.abort();
                    ExitStatus::Aborted
                }
            };
            exits.push(WorkerExit {
                pool: worker.pool,
                worker: worker.worker,
                status,
            });
        }
        debug!("🛑 supervisor shut down {} worker(s)", exits.len());
        self.lock().exits.extend(exits);
    }
}

/// 👯 Handle to a sibling task spawned via [`Supervisor::spawn_sibling`].
#[derive(Debug)]
pub struct Sibling<T> {
    name: String,
    handle: JoinHandle<Result<T>>,
    supervisor: Supervisor,
}

impl<T> Sibling<T> {
    /// ⏳ Wait for the sibling, record its exit status, and hand back its result.
    pub async fn join(self) -> Result<T> {
        let (status, outcome) = ExitStatus::from_join(self.handle.await);
        self.supervisor.record_external(&self.name, status.clone());
        match outcome {
            Some(result) => result,
            None => Err(anyhow!(
                "💀 Sibling task '{}' did not finish: {:?}",
                self.name,
                status
            )),
        }
    }
}
