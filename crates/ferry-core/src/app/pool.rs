//! WorkerPool - 呼び出し側の handle
//!
//! 中身は dispatcher への mpsc と ID 生成器だけなので、clone は安価です。
//! リクエストの header はここ（呼び出し側のタスク）で JSON 化してから送ります。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use super::dispatcher::{Command, Submission};
use super::status::{PoolStatus, ShutdownReport};
use crate::domain::{FerryError, TaskName, TaskRequest};
use crate::ports::IdGenerator;
use crate::transfer::{Envelope, Frame, TransferList};
use crate::typed::{Task, TaskOutput};

#[derive(Clone)]
pub struct WorkerPool {
    commands: mpsc::Sender<Command>,
    ids: Arc<dyn IdGenerator>,
}

impl WorkerPool {
    pub(crate) fn new(commands: mpsc::Sender<Command>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { commands, ids }
    }

    /// Run `task_name` on the next idle worker.
    ///
    /// The buffers in `payload` are moved to the worker; buffers the task
    /// moves back come out in the returned envelope.
    ///
    /// Dropping the returned future does not cancel the work. The worker
    /// still finishes and its response is discarded.
    pub async fn submit(
        &self,
        task_name: impl Into<TaskName>,
        payload: Envelope,
    ) -> Result<Envelope, FerryError> {
        let task_name = task_name.into();
        let id = self.ids.generate_request_id();

        let (value, buffers) = payload.into_parts();
        let request = TaskRequest {
            id,
            task_name: task_name.clone(),
            payload: value,
            transfer_buffer_indices: (0..buffers.len()).collect(),
        };
        let frame = Frame::request(&request, buffers)?;

        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Submit(Submission {
                id,
                task_name,
                frame,
                reply,
            }))
            .await
            .map_err(|_| FerryError::PoolShutdown)?;

        response.await.map_err(|_| FerryError::PoolShutdown)?
    }

    /// Typed form of [`submit`](Self::submit).
    pub async fn run<T: Task>(
        &self,
        task: &T,
        transfer: TransferList,
    ) -> Result<TaskOutput<T::Output>, FerryError> {
        let payload = Envelope::pack(task, transfer)?;
        let (value, buffers) = self.submit(T::NAME, payload).await?.unpack::<T::Output>()?;
        Ok(TaskOutput { value, buffers })
    }

    pub async fn status(&self) -> Result<PoolStatus, FerryError> {
        let (reply, status) = oneshot::channel();
        self.commands
            .send(Command::Status(reply))
            .await
            .map_err(|_| FerryError::PoolShutdown)?;
        status.await.map_err(|_| FerryError::PoolShutdown)
    }

    /// Stop accepting work, wait for in-flight requests and release the workers.
    ///
    /// With `Some(timeout)`, workers still running at the deadline are aborted
    /// and their requests fail with [`FerryError::WorkerTimeout`]; requests
    /// still queued fail with [`FerryError::PoolShutdown`]. `None` falls back
    /// to [`PoolConfig::shutdown_timeout`](super::PoolConfig::shutdown_timeout),
    /// and waits as long as it takes only when that is unset too.
    ///
    /// Dropping every handle starts the same drain with the configured timeout.
    pub async fn shutdown(&self, timeout: Option<Duration>) -> Result<ShutdownReport, FerryError> {
        let (reply, report) = oneshot::channel();
        self.commands
            .send(Command::Shutdown { timeout, reply })
            .await
            .map_err(|_| FerryError::PoolShutdown)?;
        report.await.map_err(|_| FerryError::PoolShutdown)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}
