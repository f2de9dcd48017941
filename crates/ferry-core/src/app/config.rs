//! PoolConfig - プールの設定
//!
//! serde で読み込めるように全フィールドに default を持たせています。
//! 時間は JSON / env で扱いやすいようミリ秒で保持します。

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolConfig {
    /// Number of worker execution contexts.
    pub size: usize,
    /// Per-request limit; a worker that exceeds it is aborted and replaced.
    pub task_timeout_ms: Option<u64>,
    /// Used by callers that shut down without an explicit timeout.
    pub shutdown_timeout_ms: Option<u64>,
    /// Capacity of the command and response channels.
    pub channel_capacity: usize,
}

impl PoolConfig {
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout_ms = Some(duration_ms(timeout));
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = Some(duration_ms(timeout));
        self
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }

    pub fn shutdown_timeout(&self) -> Option<Duration> {
        self.shutdown_timeout_ms.map(Duration::from_millis)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.size == 0 {
            return Err("size must be at least 1".to_string());
        }
        if self.channel_capacity == 0 {
            return Err("channelCapacity must be at least 1".to_string());
        }
        if self.task_timeout_ms == Some(0) {
            return Err("taskTimeoutMs must be positive".to_string());
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_size(),
            task_timeout_ms: None,
            shutdown_timeout_ms: None,
            channel_capacity: 64,
        }
    }
}

// CPU 数ぶん。取れなければ 4
fn default_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
