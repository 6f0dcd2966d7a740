//! 🏊 WorkerPool: the dispatcher.
//!
//! ```text
//!  submit ─▶ [ pending queue, bounded by max_queue_depth ] ─dispatch─▶ idle worker's request channel
//!                                                                          │
//!  take_result ◀─ [ results, arrival order ] ◀─ poll_results ◀─ outcome channel (try_recv)
//! ```
//!
//! - `worker_count == 0` runs the task inline in the caller. Handy for debugging and tiny runs.
//! - `submit` applies backpressure: while the queue is full it polls, dispatches and naps.
//! - Results come back in arrival order, not submission order. Workers finish when they finish.
//! - A `Failed` outcome or a worker that hangs up mid-request is a [`PoolError`]. Neither is retried.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_channel::{Receiver, Sender, TryRecvError, TrySendError};
use tracing::{debug, trace};

use crate::error::{PipelineError, PoolError};
use crate::supervisors::Supervisor;
use crate::supervisors::workers::{PoolTask, PoolWorker, Worker, WorkerOutcome};

/// 🏭 Builds a task. Called once per worker, inside the worker.
pub type TaskFactory<T> = Arc<dyn Fn() -> Result<T> + Send + Sync>;

// -- 💤 naps taken while waiting for capacity or for the pool to empty
const SUBMIT_BACKOFF: Duration = Duration::from_millis(1);
const DRAIN_BACKOFF: Duration = Duration::from_millis(1);

struct WorkerSlot<T: PoolTask> {
    requests: Sender<T::Request>,
    outcomes: Receiver<WorkerOutcome<T::Response>>,
    active: bool,
}

enum PoolMode<T: PoolTask> {
    Inline {
        factory: TaskFactory<T>,
        task: Option<T>,
    },
    Workers(Vec<WorkerSlot<T>>),
}

/// 🏊 A named pool of workers running one kind of task.
pub struct WorkerPool<T: PoolTask> {
    pool_id: String,
    max_queue_depth: usize,
    mode: PoolMode<T>,
    queue: VecDeque<T::Request>,
    results: VecDeque<T::Response>,
    closed: bool,
}

impl<T: PoolTask> std::fmt::Debug for WorkerPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("pool_id", &self.pool_id)
            .field("max_queue_depth", &self.max_queue_depth)
            .field("workers", &self.worker_count())
            .field("queued", &self.queue.len())
            .field("results", &self.results.len())
            .finish()
    }
}

impl<T: PoolTask> WorkerPool<T> {
    /// 🏗️ Create a pool. Workers are spawned right away and adopted by `supervisor`.
    pub fn new(
        pool_id: impl Into<String>,
        worker_count: usize,
        max_queue_depth: usize,
        factory: TaskFactory<T>,
        supervisor: &Supervisor,
    ) -> Result<Self> {
        let pool_id = pool_id.into();
        if max_queue_depth == 0 {
            return Err(PipelineError::Config(format!(
                "pool '{pool_id}' needs a max_queue_depth of at least 1"
            ))
            .into());
        }

        let mode = if worker_count == 0 {
            debug!("🐢 pool '{}' runs inline in the caller", pool_id);
            PoolMode::Inline {
                factory,
                task: None,
            }
        } else {
            let mut slots = Vec::with_capacity(worker_count);
            for index in 0..worker_count {
                // -- 📮 capacity 1 each way: a worker holds at most one request and one answer
                let (request_tx, request_rx) = async_channel::bounded(1);
                let (outcome_tx, outcome_rx) = async_channel::bounded(1);
                let worker = PoolWorker {
                    pool_id: pool_id.clone(),
                    index,
                    factory: factory.clone(),
                    requests: request_rx,
                    outcomes: outcome_tx,
                };
                supervisor.adopt(&pool_id, index, worker.start());
                slots.push(WorkerSlot {
                    requests: request_tx,
                    outcomes: outcome_rx,
                    active: false,
                });
            }
            debug!("🧵 pool '{}' spawned {} worker(s)", pool_id, worker_count);
            PoolMode::Workers(slots)
        };

        Ok(Self {
            pool_id,
            max_queue_depth,
            mode,
            queue: VecDeque::new(),
            results: VecDeque::new(),
            closed: false,
        })
    }

    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    /// 🔢 Number of spawned workers; 0 for an inline pool.
    pub fn worker_count(&self) -> usize {
        match &self.mode {
            PoolMode::Inline { .. } => 0,
            PoolMode::Workers(slots) => slots.len(),
        }
    }

    /// 📦 Requests waiting for an idle worker.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// 🏃 Workers currently holding a request.
    pub fn active_workers(&self) -> usize {
        match &self.mode {
            PoolMode::Inline { .. } => 0,
            PoolMode::Workers(slots) => slots.iter().filter(|slot| slot.active).count(),
        }
    }

    /// 📥 Submit a request, waiting while the pending queue is at `max_queue_depth`.
    pub async fn submit(&mut self, request: T::Request) -> Result<()> {
        if self.closed {
            return Err(PoolError::Closed {
                pool: self.pool_id.clone(),
            }
            .into());
        }
        if let PoolMode::Inline { factory, task } = &mut self.mode {
            if task.is_none() {
                let built = (factory.as_ref())()
                    .with_context(|| format!("💀 Inline pool '{}' could not build its task", self.pool_id))?;
                *task = Some(built);
            }
            if let Some(task) = task.as_mut() {
                let response = task.run(request).await.map_err(|err| PoolError::TaskFailed {
                    pool: self.pool_id.clone(),
                    message: format!("{err:#}"),
                })?;
                self.results.push_back(response);
            }
            return Ok(());
        }

        while self.queue.len() >= self.max_queue_depth {
            self.poll_results()?;
            if self.queue.len() < self.max_queue_depth {
                break;
            }
            trace!("⏳ pool '{}' is full ({} queued), waiting", self.pool_id, self.queue.len());
            tokio::time::sleep(SUBMIT_BACKOFF).await;
        }

        self.queue.push_back(request);
        self.dispatch()
    }

    /// 📬 Non-blocking sweep over active workers. Returns whether any result is buffered.
    pub fn poll_results(&mut self) -> Result<bool> {
        if let PoolMode::Workers(slots) = &mut self.mode {
            for (index, slot) in slots.iter_mut().enumerate() {
                if !slot.active {
                    continue;
                }
                match slot.outcomes.try_recv() {
                    Ok(WorkerOutcome::Done(response)) => {
                        slot.active = false;
                        self.results.push_back(response);
                    }
                    Ok(WorkerOutcome::Failed(message)) => {
                        slot.active = false;
                        return Err(PoolError::TaskFailed {
                            pool: self.pool_id.clone(),
                            message,
                        }
                        .into());
                    }
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Closed) => {
                        return Err(PoolError::WorkerCrashed {
                            pool: self.pool_id.clone(),
                            worker: index,
                        }
                        .into());
                    }
                }
            }
        }
        self.dispatch()?;
        Ok(!self.results.is_empty())
    }

    /// 🍽️ Oldest buffered result.
    pub fn take_result(&mut self) -> Option<T::Response> {
        self.results.pop_front()
    }

    /// ❓ Anything queued or in flight?
    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty() || self.active_workers() > 0
    }

    /// ⏳ Wait until nothing is queued or in flight. Results stay buffered for `take_result`.
    pub async fn drain(&mut self) -> Result<()> {
        while self.has_pending() {
            self.poll_results()?;
            if !self.has_pending() {
                break;
            }
            tokio::time::sleep(DRAIN_BACKOFF).await;
        }
        Ok(())
    }

    /// 🚪 Close every request channel. Workers finish their current request and leave.
    /// An inline pool finishes its task right here.
    pub async fn close(&mut self) -> Result<()> {
        self.closed = true;
        match &mut self.mode {
            PoolMode::Workers(slots) => {
                for slot in slots.iter() {
                    slot.requests.close();
                }
            }
            PoolMode::Inline { task, .. } => {
                if let Some(task) = task.as_mut() {
                    task.finish()
                        .await
                        .with_context(|| format!("💀 Inline pool '{}' could not finish its task", self.pool_id))?;
                }
            }
        }
        debug!("🚪 pool '{}' closed", self.pool_id);
        Ok(())
    }

    /// 🚚 Hand queued requests to idle workers, first idle worker first.
    fn dispatch(&mut self) -> Result<()> {
        let PoolMode::Workers(slots) = &mut self.mode else {
            return Ok(());
        };
        for (index, slot) in slots.iter_mut().enumerate() {
            if self.queue.is_empty() {
                break;
            }
            if slot.active {
                continue;
            }
            let Some(request) = self.queue.pop_front() else {
                break;
            };
            match slot.requests.try_send(request) {
                Ok(()) => slot.active = true,
                Err(TrySendError::Full(request)) => self.queue.push_front(request),
                Err(TrySendError::Closed(_)) => {
                    return Err(PoolError::WorkerCrashed {
                        pool: self.pool_id.clone(),
                        worker: index,
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use tokio::sync::Semaphore;

    /// 🧪 Waits for a permit before answering. Lets tests hold workers hostage.
    struct GatedEcho {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl PoolTask for GatedEcho {
        type Request = u32;
        type Response = u32;

        async fn run(&mut self, request: u32) -> Result<u32> {
            self.gate.acquire().await?.forget();
            Ok(request)
        }
    }

    fn gated_factory(gate: Arc<Semaphore>) -> TaskFactory<GatedEcho> {
        Arc::new(move || Ok(GatedEcho { gate: gate.clone() }))
    }

    struct Grumpy;

    #[async_trait]
    impl PoolTask for Grumpy {
        type Request = u32;
        type Response = u32;

        async fn run(&mut self, request: u32) -> Result<u32> {
            match request {
                13 => Err(anyhow!("unlucky number")),
                666 => panic!("the worker has left the building"),
                n => Ok(n * 2),
            }
        }
    }

    fn grumpy_factory() -> TaskFactory<Grumpy> {
        Arc::new(|| Ok(Grumpy))
    }

    async fn collect_all<T: PoolTask>(pool: &mut WorkerPool<T>) -> Result<Vec<T::Response>> {
        pool.drain().await?;
        pool.poll_results()?;
        let mut out = Vec::new();
        while let Some(result) = pool.take_result() {
            out.push(result);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn the_one_where_the_fourth_submit_waits_its_turn() -> Result<()> {
        let supervisor = Supervisor::new();
        let gate = Arc::new(Semaphore::new(0));
        let mut pool = WorkerPool::new("gated", 2, 1, gated_factory(gate.clone()), &supervisor)?;

        pool.submit(1).await?;
        pool.submit(2).await?;
        pool.submit(3).await?;
        assert_eq!(pool.active_workers(), 2);
        assert_eq!(pool.queued(), 1);

        // 🧪 both workers are stuck at the gate and the queue is full: submit 4 must not finish
        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.submit(4)).await;
        assert!(blocked.is_err(), "submit 4 should block while the queue is full");
        assert_eq!(pool.queued(), 1, "nothing was enqueued by the blocked submit");

        // 🔓 let exactly one task through; its result frees a worker, task 3 moves in, 4 fits
        gate.add_permits(1);
        tokio::time::timeout(Duration::from_secs(5), pool.submit(4)).await??;
        assert_eq!(pool.queued(), 1);
        assert!(pool.take_result().is_some());

        gate.add_permits(10);
        pool.submit(5).await?;
        let mut seen: BTreeSet<u32> = collect_all(&mut pool).await?.into_iter().collect();
        seen.insert(0);
        assert_eq!(seen.len(), 5, "four more results plus the one taken earlier");

        pool.close().await?;
        supervisor.shutdown(Duration::from_secs(1)).await;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_every_result_comes_home() -> Result<()> {
        let supervisor = Supervisor::new();
        let mut pool = WorkerPool::new("grumpy", 3, 2, grumpy_factory(), &supervisor)?;
        for n in 1..=10 {
            pool.submit(n).await?;
        }
        let mut results = collect_all(&mut pool).await?;
        results.sort();
        assert_eq!(results, (1..=10).map(|n| n * 2).collect::<Vec<_>>());
        assert!(!pool.has_pending());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_task_error_aborts_the_dispatcher() -> Result<()> {
        let supervisor = Supervisor::new();
        let mut pool = WorkerPool::new("grumpy", 1, 4, grumpy_factory(), &supervisor)?;
        pool.submit(13).await?;
        let err = pool.drain().await.expect_err("💀 the failure must surface");
        match err.downcast_ref::<PoolError>() {
            Some(PoolError::TaskFailed { pool, message }) => {
                assert_eq!(pool, "grumpy");
                assert!(message.contains("unlucky number"));
            }
            other => panic!("💀 expected TaskFailed, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_panicking_worker_is_a_crash_not_a_shrug() -> Result<()> {
        let supervisor = Supervisor::new();
        let mut pool = WorkerPool::new("grumpy", 1, 4, grumpy_factory(), &supervisor)?;
        pool.submit(666).await?;
        let err = pool.drain().await.expect_err("💀 the crash must surface");
        assert!(matches!(
            err.downcast_ref::<PoolError>(),
            Some(PoolError::WorkerCrashed { worker: 0, .. })
        ));
        // -- 🪦 give the unwinding task a moment to be marked finished
        tokio::time::sleep(Duration::from_millis(50)).await;
        let exits = supervisor.reap();
        assert!(exits
            .iter()
            .any(|exit| matches!(exit.status, crate::supervisors::ExitStatus::Panicked(_))));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_zero_workers_means_do_it_yourself() -> Result<()> {
        let supervisor = Supervisor::new();
        let mut pool = WorkerPool::new("inline", 0, 1, grumpy_factory(), &supervisor)?;
        pool.submit(21).await?;
        assert!(!pool.has_pending());
        assert!(pool.poll_results()?);
        assert_eq!(pool.take_result(), Some(42));
        assert_eq!(supervisor.managed_count(), 0);

        let err = pool.submit(13).await.expect_err("💀 inline failures surface too");
        assert!(err.downcast_ref::<PoolError>().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_zero_depth_queue_is_a_config_fault() {
        let supervisor = Supervisor::new();
        let outcome = WorkerPool::new("nope", 1, 0, grumpy_factory(), &supervisor);
        assert!(matches!(
            outcome.map(|_| ()).unwrap_err().downcast_ref::<PipelineError>(),
            Some(PipelineError::Config(_))
        ));
    }

    #[tokio::test]
    async fn the_one_where_closing_lets_workers_go_home() -> Result<()> {
        let supervisor = Supervisor::new();
        let mut pool = WorkerPool::new("grumpy", 2, 2, grumpy_factory(), &supervisor)?;
        pool.submit(1).await?;
        collect_all(&mut pool).await?;
        pool.close().await?;
        assert!(matches!(
            pool.submit(2).await.map(|_| ()).unwrap_err().downcast_ref::<PoolError>(),
            Some(PoolError::Closed { .. })
        ));
        supervisor.shutdown(Duration::from_secs(1)).await;
        let exits = supervisor.exits();
        assert_eq!(exits.len(), 2);
        assert!(exits.iter().all(|exit| exit.status.is_success()));
        Ok(())
    }
}
