//! 🏷️ Typed errors, for the places where "anyhow" is not specific enough.
//!
//! Most of bibdex speaks `anyhow::Result` with a healthy amount of `.context(...)`. These types
//! exist for callers that have to tell failure kinds apart: a crashed worker is not a flaky
//! network, and an interrupted run is not a crashed worker. They travel inside `anyhow::Error`
//! and come back out with `downcast_ref`.

use thiserror::Error;

/// 🧵 Failures surfaced by a worker pool. Every one of them aborts the run.
#[derive(Debug, Error)]
pub enum PoolError {
    /// 💀 The task returned an error inside a worker. The message is all that crossed the channel.
    #[error("💀 A task in pool '{pool}' failed: {message}")]
    TaskFailed { pool: String, message: String },

    /// 💀 The worker vanished while it owed us a result. Panic, abort, or cosmic ray.
    #[error("💀 Worker {worker} of pool '{pool}' exited without sending its result. It left no note.")]
    WorkerCrashed { pool: String, worker: usize },

    /// 🚪 Work was submitted after the pool was closed.
    #[error("💀 Pool '{pool}' is closed and is not taking requests anymore.")]
    Closed { pool: String },
}

/// 🚨 Pipeline-level failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 🛑 Somebody pressed Ctrl-C. In-flight work was drained before we got here.
    #[error("🛑 The run was interrupted. In-flight work was drained; the checkpoint was left alone.")]
    Interrupted,

    /// 📡 Every retry got the same cold shoulder.
    #[error("💀 Pushing to '{url}' failed after {attempts} attempts. Last error: {last_error}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    /// 🏥 The index cluster stayed sick longer than we were willing to wait.
    #[error("💀 Index cluster health stayed '{state}' through {tries} checks. Giving up on the push path.")]
    ClusterUnhealthy { state: String, tries: u32 },

    /// 🔧 Settings that cannot work. Raised before any processing begins.
    #[error("💀 Invalid configuration: {0}")]
    Config(String),
}
