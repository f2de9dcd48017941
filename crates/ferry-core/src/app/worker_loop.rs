//! WorkerLoop - worker execution context
//!
//! # フロー
//! 1. inbox から Frame を受け取る（Idle → Running）
//! 2. header を decode し、バッファを Envelope に組み直す
//! 3. TypedRegistry で dispatch（別タスクで実行し panic を捕まえる）
//! 4. 成功なら結果を Frame に、失敗なら ErrorCapsule に包む
//! 5. Running → Idle にして dispatcher へ返す
//!
//! dispatcher とはメモリを共有せず、Frame のやり取りだけで通信します。

use std::any::Any;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{Instrument, debug, info_span, warn};

use crate::domain::capsule::names;
use crate::domain::{
    ErrorCapsule, FerryError, RequestId, TaskName, TaskRequest, TaskResponse, WorkerId, WorkerState,
};
use crate::transfer::{Envelope, Frame};
use crate::typed::{DispatchError, TypedRegistry};

/// What a worker sends back to the dispatcher.
///
/// The worker id travels outside the frame so the dispatcher can still
/// attribute a reply whose header it cannot decode.
#[derive(Debug)]
pub(crate) struct WorkerMessage {
    pub worker: WorkerId,
    pub frame: Result<Frame, FerryError>,
}

pub(crate) struct WorkerLoop {
    id: WorkerId,
    state: WorkerState,
    registry: Arc<TypedRegistry>,
    inbox: mpsc::Receiver<Frame>,
    outbox: mpsc::Sender<WorkerMessage>,
}

impl WorkerLoop {
    pub(crate) fn new(
        id: WorkerId,
        registry: Arc<TypedRegistry>,
        inbox: mpsc::Receiver<Frame>,
        outbox: mpsc::Sender<WorkerMessage>,
    ) -> Self {
        Self {
            id,
            state: WorkerState::Idle,
            registry,
            inbox,
            outbox,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        let span = info_span!("worker", worker = %self.id);
        tokio::spawn(self.run().instrument(span))
    }

    async fn run(mut self) {
        debug!("worker started");
        while let Some(frame) = self.inbox.recv().await {
            if let Err(err) = self.state.transition(WorkerState::Running) {
                // dispatcher は Idle の worker にしか送らないので通常は起きない
                warn!(error = %err, "request rejected");
                let message = WorkerMessage {
                    worker: self.id,
                    frame: Err(err),
                };
                if self.outbox.send(message).await.is_err() {
                    break;
                }
                continue;
            }

            let frame = self.process(frame).await;

            if let Err(err) = self.state.transition(WorkerState::Idle) {
                warn!(error = %err, "unexpected state after task");
            }
            let message = WorkerMessage {
                worker: self.id,
                frame,
            };
            if self.outbox.send(message).await.is_err() {
                debug!("dispatcher gone");
                break;
            }
        }

        if let Err(err) = self.state.transition(WorkerState::Terminated) {
            warn!(error = %err, "unexpected state at exit");
        }
        debug!("worker stopped");
    }

    async fn process(&self, frame: Frame) -> Result<Frame, FerryError> {
        let (request, buffers) = frame.decode_request()?;
        let TaskRequest {
            id,
            task_name,
            payload,
            ..
        } = request;
        debug!(request = %id, task = %task_name, buffers = buffers.len(), "task received");

        let outcome = match Envelope::from_parts(payload, buffers) {
            Ok(envelope) => self.execute(&task_name, id, envelope).await,
            Err(err) => Err(ErrorCapsule::runtime(names::INVALID_TRANSFER, err.to_string())),
        };

        match outcome {
            Ok(envelope) => {
                let (value, buffers) = envelope.into_parts();
                let response = TaskResponse::success(id, self.id, value, buffers.len());
                match Frame::response(&response, buffers) {
                    Ok(frame) => {
                        debug!(request = %id, task = %task_name, "task succeeded");
                        Ok(frame)
                    }
                    Err(err) => {
                        warn!(request = %id, task = %task_name, error = %err, "result could not be encoded");
                        let capsule = ErrorCapsule::runtime(names::RESULT_ENCODE, err.to_string());
                        Frame::response(&TaskResponse::error(id, self.id, capsule), Vec::new())
                    }
                }
            }
            Err(capsule) => {
                debug!(
                    request = %id,
                    task = %task_name,
                    name = capsule.name_or_default(),
                    "task failed"
                );
                Frame::response(&TaskResponse::error(id, self.id, capsule), Vec::new())
            }
        }
    }

    async fn execute(
        &self,
        task_name: &TaskName,
        id: RequestId,
        envelope: Envelope,
    ) -> Result<Envelope, ErrorCapsule> {
        let registry = Arc::clone(&self.registry);
        let name = task_name.clone();
        // 別タスクで走らせると panic が JoinError として返ってくる
        let mut task = AbortOnDrop(tokio::spawn(async move {
            registry.dispatch(&name, id, envelope).await
        }));

        match (&mut task.0).await {
            Ok(Ok(envelope)) => Ok(envelope),
            Ok(Err(DispatchError::UnknownTask(name))) => Err(ErrorCapsule::runtime(
                names::UNKNOWN_TASK,
                format!("no handler registered for task '{name}'"),
            )),
            Ok(Err(DispatchError::Failed(failure))) => Err(ErrorCapsule::capture(&failure)),
            Err(err) => {
                warn!(request = %id, task = %task_name, "task body panicked");
                Err(ErrorCapsule::runtime(names::PANIC, panic_message(err)))
            }
        }
    }
}

// worker が abort されたとき、実行中の task body も道連れにする
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return "task body was cancelled".to_string();
    }
    let payload: Box<dyn Any + Send> = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("task body panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("task body panicked: {s}")
    } else {
        "task body panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ResponseStatus, TaskFailure};
    use crate::typed::{Handler, Reply, Task, TaskInput};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use ulid::Ulid;

    #[derive(Debug, Serialize, Deserialize)]
    struct Shout {
        text: String,
    }

    impl Task for Shout {
        const NAME: &'static str = "test.shout.v1";
        type Output = String;
    }

    struct ShoutHandler;

    #[async_trait]
    impl Handler<Shout> for ShoutHandler {
        async fn handle(&self, input: TaskInput<Shout>) -> Result<Reply<String>, TaskFailure> {
            match input.task.text.as_str() {
                "panic" => panic!("kaboom"),
                "fail" => Err(TaskFailure::new("Err", "boom").with_field("extra1", 1)),
                text => Ok(Reply::new(text.to_uppercase())),
            }
        }
    }

    struct Harness {
        inbox: mpsc::Sender<Frame>,
        outbox: mpsc::Receiver<WorkerMessage>,
        worker: WorkerId,
        handle: JoinHandle<()>,
    }

    fn start() -> Harness {
        let mut registry = TypedRegistry::new();
        registry.register::<Shout, _>(ShoutHandler).unwrap();

        let (inbox_tx, inbox_rx) = mpsc::channel(1);
        let (outbox_tx, outbox_rx) = mpsc::channel(4);
        let worker = WorkerId::from_ulid(Ulid::new());
        let handle = WorkerLoop::new(worker, Arc::new(registry), inbox_rx, outbox_tx).spawn();
        Harness {
            inbox: inbox_tx,
            outbox: outbox_rx,
            worker,
            handle,
        }
    }

    fn request(task_name: &str, payload: serde_json::Value) -> (RequestId, Frame) {
        let id = RequestId::from_ulid(Ulid::new());
        let request = TaskRequest {
            id,
            task_name: TaskName::new(task_name),
            payload,
            transfer_buffer_indices: Vec::new(),
        };
        (id, Frame::request(&request, Vec::new()).unwrap())
    }

    async fn roundtrip(h: &mut Harness, frame: Frame) -> TaskResponse {
        h.inbox.send(frame).await.unwrap();
        let message = h.outbox.recv().await.unwrap();
        assert_eq!(message.worker, h.worker);
        message.frame.unwrap().decode_response().unwrap().0
    }

    #[tokio::test]
    async fn success_response_carries_value() {
        let mut h = start();
        let (id, frame) = request(Shout::NAME, serde_json::json!({ "text": "hi" }));

        let response = roundtrip(&mut h, frame).await;
        assert_eq!(response.id, id);
        assert_eq!(response.worker_id, h.worker);
        assert_eq!(response.status, ResponseStatus::Success);
        assert_eq!(response.value, Some(serde_json::json!("HI")));
    }

    #[tokio::test]
    async fn failure_response_carries_capsule() {
        let mut h = start();
        let (_, frame) = request(Shout::NAME, serde_json::json!({ "text": "fail" }));

        let response = roundtrip(&mut h, frame).await;
        let capsule = response.error_capsule.unwrap();
        assert_eq!(capsule.name.as_deref(), Some("Err"));
        assert_eq!(capsule.message, "boom");
        assert_eq!(capsule.extra["extra1"], serde_json::json!(1));
        assert!(!capsule.is_runtime());
    }

    #[tokio::test]
    async fn unknown_task_answers_and_stays_usable() {
        let mut h = start();
        let (_, frame) = request("doesNotExist", serde_json::json!(null));
        let response = roundtrip(&mut h, frame).await;
        let capsule = response.error_capsule.unwrap();
        assert_eq!(capsule.name.as_deref(), Some(names::UNKNOWN_TASK));
        assert!(capsule.is_runtime());

        let (_, frame) = request(Shout::NAME, serde_json::json!({ "text": "again" }));
        assert!(roundtrip(&mut h, frame).await.is_success());
    }

    #[tokio::test]
    async fn panic_becomes_capsule() {
        let mut h = start();
        let (_, frame) = request(Shout::NAME, serde_json::json!({ "text": "panic" }));

        let capsule = roundtrip(&mut h, frame).await.error_capsule.unwrap();
        assert_eq!(capsule.name.as_deref(), Some(names::PANIC));
        assert!(capsule.message.contains("kaboom"));
    }

    #[tokio::test]
    async fn dangling_buffer_reference_is_invalid_transfer() {
        let mut h = start();
        let request = TaskRequest {
            id: RequestId::from_ulid(Ulid::new()),
            task_name: TaskName::new(Shout::NAME),
            // buffer 0 は送るが値からは参照しない
            payload: serde_json::json!({ "text": "x" }),
            transfer_buffer_indices: vec![0],
        };
        let frame = Frame::request(&request, vec![vec![1u8].into()]).unwrap();

        let capsule = roundtrip(&mut h, frame).await.error_capsule.unwrap();
        assert_eq!(capsule.name.as_deref(), Some(names::INVALID_TRANSFER));
    }

    #[tokio::test]
    async fn closing_inbox_stops_worker() {
        let h = start();
        drop(h.inbox);
        h.handle.await.unwrap();
    }
}
