//! 🗺️ Where the run is. Mostly for the logs and the summary.

use std::fmt;

use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    ProcessClusters,
    ProcessSingles,
    Drain,
    Commit,
    Checkpoint,
    Done,
    /// 🛑 Interrupted: drain, commit if anything went out, exit non-zero.
    Terminating,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "init",
            RunState::ProcessClusters => "process-clusters",
            RunState::ProcessSingles => "process-singles",
            RunState::Drain => "drain",
            RunState::Commit => "commit",
            RunState::Checkpoint => "checkpoint",
            RunState::Done => "done",
            RunState::Terminating => "terminating",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub(crate) struct StateTracker {
    current: RunState,
    history: Vec<RunState>,
}

impl StateTracker {
    pub(crate) fn new() -> Self {
        Self {
            current: RunState::Init,
            history: vec![RunState::Init],
        }
    }

    pub(crate) fn enter(&mut self, next: RunState) {
        if next == self.current {
            return;
        }
        match next {
            RunState::Terminating => info!("🛑 {} → {}", self.current, next),
            _ => debug!("🗺️ {} → {}", self.current, next),
        }
        self.current = next;
        self.history.push(next);
    }

    pub(crate) fn current(&self) -> RunState {
        self.current
    }

    pub(crate) fn history(&self) -> Vec<RunState> {
        self.history.clone()
    }
}
