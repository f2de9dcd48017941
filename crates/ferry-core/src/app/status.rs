//! Status - プールの観測用ビュー
//!
//! dispatcher が保持している状態のスナップショット。
//! 返した時点で古くなり得るので、判断ではなく表示・テスト用。

use serde::{Deserialize, Serialize};

use crate::domain::{RequestId, WorkerId, WorkerState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub id: WorkerId,
    pub state: WorkerState,
    pub current_request: Option<RequestId>,
    pub completed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub workers: Vec<WorkerStatus>,
    /// Waiting for an idle worker.
    pub queued: usize,
    /// Submitted and not yet answered (includes `queued`).
    pub pending: usize,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub protocol_violations: u64,
    pub shutting_down: bool,
}

impl PoolStatus {
    pub fn idle_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.state.is_idle()).count()
    }

    pub fn running_workers(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.state == WorkerState::Running)
            .count()
    }
}

/// Outcome of [`WorkerPool::shutdown`](super::WorkerPool::shutdown).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Requests that finished while the pool was draining.
    pub drained: u64,
    /// Workers aborted because the timeout elapsed first.
    pub force_terminated: usize,
    /// Queued requests failed with `PoolShutdown` at the deadline.
    pub abandoned: usize,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.force_terminated == 0 && self.abandoned == 0
    }
}
