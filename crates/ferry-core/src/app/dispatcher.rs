//! Dispatcher - プールの状態を一手に持つ actor
//!
//! claim（Idle worker の選択）・pending table・FIFO キュー・timeout を
//! すべてこの 1 タスクが直列に処理するので、ロックは不要です。
//!
//! # 学習ポイント
//! - `tokio::select!` でコマンド / レスポンス / 期限を同時に待つ
//! - pending table: `HashMap<RequestId, oneshot::Sender<..>>`
//! - 期限切れの worker は abort して新しい worker に差し替える

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use super::config::PoolConfig;
use super::status::{PoolStatus, ShutdownReport, WorkerStatus};
use super::worker_loop::{WorkerLoop, WorkerMessage};
use crate::domain::{
    ErrorCapsule, FerryError, RequestId, TaskName, TaskResponse, WorkerId, WorkerState,
};
use crate::ports::IdGenerator;
use crate::transfer::{Envelope, Frame, TransferBuffer};
use crate::typed::TypedRegistry;

pub(crate) type ReplyTx = oneshot::Sender<Result<Envelope, FerryError>>;

/// A request already encoded by the caller side.
pub(crate) struct Submission {
    pub id: RequestId,
    pub task_name: TaskName,
    pub frame: Frame,
    pub reply: ReplyTx,
}

pub(crate) enum Command {
    Submit(Submission),
    Status(oneshot::Sender<PoolStatus>),
    Shutdown {
        timeout: Option<Duration>,
        reply: oneshot::Sender<ShutdownReport>,
    },
}

struct Slot {
    id: WorkerId,
    state: WorkerState,
    inbox: mpsc::Sender<Frame>,
    handle: JoinHandle<()>,
    current: Option<InFlight>,
    completed: u64,
}

struct InFlight {
    request: RequestId,
    deadline: Option<Instant>,
}

struct Pending {
    task_name: TaskName,
    reply: ReplyTx,
}

struct Draining {
    deadline: Option<Instant>,
    waiters: Vec<oneshot::Sender<ShutdownReport>>,
    report: ShutdownReport,
}

#[derive(Default)]
struct Counters {
    completed: u64,
    failed: u64,
    timed_out: u64,
    protocol_violations: u64,
}

pub(crate) struct Dispatcher {
    config: PoolConfig,
    registry: Arc<TypedRegistry>,
    ids: Arc<dyn IdGenerator>,
    commands: mpsc::Receiver<Command>,
    responses: mpsc::Receiver<WorkerMessage>,
    responses_tx: mpsc::Sender<WorkerMessage>,
    slots: Vec<Slot>,
    queue: VecDeque<(RequestId, Frame)>,
    pending: HashMap<RequestId, Pending>,
    counters: Counters,
    draining: Option<Draining>,
}

impl Dispatcher {
    pub(crate) fn new(
        config: PoolConfig,
        registry: Arc<TypedRegistry>,
        ids: Arc<dyn IdGenerator>,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        let (responses_tx, responses) = mpsc::channel(config.channel_capacity);
        let mut dispatcher = Self {
            config,
            registry,
            ids,
            commands,
            responses,
            responses_tx,
            slots: Vec::new(),
            queue: VecDeque::new(),
            pending: HashMap::new(),
            counters: Counters::default(),
            draining: None,
        };
        for _ in 0..dispatcher.config.size {
            let slot = dispatcher.spawn_worker();
            dispatcher.slots.push(slot);
        }
        dispatcher
    }

    pub(crate) async fn run(mut self) {
        info!(
            workers = self.slots.len(),
            registered = ?self.registry.registered_names(),
            "worker pool started"
        );

        let mut commands_open = true;
        loop {
            if self.drain_complete() {
                break;
            }

            let deadline = self.next_deadline();
            // 無効な分岐でも式は評価されるので、期限が無いときは遠い時刻を入れておく
            let wake_at = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                command = self.commands.recv(), if commands_open => match command {
                    Some(command) => self.on_command(command),
                    None => {
                        // 全 handle が drop された。設定の期限で打ち切る
                        commands_open = false;
                        self.begin_shutdown(self.config.shutdown_timeout(), None);
                    }
                },
                Some(message) = self.responses.recv() => self.on_response(message),
                _ = sleep_until(wake_at), if deadline.is_some() => self.on_deadline(),
            }
        }

        self.finish().await;
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Submit(submission) => self.on_submit(submission),
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown { timeout, reply } => {
                let timeout = timeout.or(self.config.shutdown_timeout());
                self.begin_shutdown(timeout, Some(reply))
            }
        }
    }

    fn on_submit(&mut self, submission: Submission) {
        let Submission {
            id,
            task_name,
            frame,
            reply,
        } = submission;

        if self.draining.is_some() {
            let _ = reply.send(Err(FerryError::PoolShutdown));
            return;
        }

        if self.pending.contains_key(&id) {
            // 先に待っている caller の reply を上書きしない
            warn!(request = %id, task = %task_name, "duplicate request id rejected");
            let _ = reply.send(Err(FerryError::DuplicateRequestId(id)));
            return;
        }

        debug!(request = %id, task = %task_name, "request queued");
        self.pending.insert(id, Pending { task_name, reply });
        self.queue.push_back((id, frame));
        self.pump();
    }

    /// Hand queued requests to idle workers in FIFO order.
    fn pump(&mut self) {
        while !self.queue.is_empty() {
            let Some(index) = self.slots.iter().position(|s| s.state.is_idle()) else {
                return;
            };
            let Some((id, frame)) = self.queue.pop_front() else {
                return;
            };
            self.assign(index, id, frame);
        }
    }

    fn assign(&mut self, index: usize, id: RequestId, frame: Frame) {
        let deadline = self.config.task_timeout().map(|t| Instant::now() + t);
        let slot = &mut self.slots[index];

        if let Err(err) = slot.state.transition(WorkerState::Running) {
            warn!(worker = %slot.id, request = %id, error = %err, "claim rejected");
            self.queue.push_front((id, frame));
            return;
        }

        match slot.inbox.try_send(frame) {
            Ok(()) => {
                debug!(worker = %slot.id, request = %id, "request dispatched");
                slot.current = Some(InFlight {
                    request: id,
                    deadline,
                });
            }
            Err(err) => {
                // worker が居なくなっていた。差し替えて先頭に戻す
                warn!(worker = %slot.id, request = %id, "worker unavailable, replacing");
                let frame = match err {
                    mpsc::error::TrySendError::Full(frame) | mpsc::error::TrySendError::Closed(frame) => {
                        frame
                    }
                };
                self.queue.push_front((id, frame));
                self.replace_worker(index);
            }
        }
    }

    fn on_response(&mut self, message: WorkerMessage) {
        let WorkerMessage { worker, frame } = message;

        let Some(index) = self.slots.iter().position(|s| s.id == worker) else {
            // timeout で差し替え済みの worker から遅れて届いたもの
            debug!(worker = %worker, "response from retired worker discarded");
            return;
        };

        let in_flight = {
            let slot = &mut self.slots[index];
            if let Err(err) = slot.state.transition(WorkerState::Idle) {
                warn!(worker = %worker, error = %err, "unexpected response");
            }
            let in_flight = slot.current.take();
            if in_flight.is_some() {
                slot.completed += 1;
            }
            in_flight
        };

        match frame.and_then(Frame::decode_response) {
            Ok((response, buffers)) => {
                let expected = in_flight.as_ref().map(|f| f.request);
                if expected != Some(response.id) {
                    self.protocol_violation(
                        worker,
                        format!("response for {} does not match the request in flight", response.id),
                    );
                    // 本来待っていたリクエストは救えないので失敗させる
                    if let Some(expected) = expected {
                        self.fail(
                            expected,
                            FerryError::ProtocolViolation {
                                worker,
                                detail: "worker answered a different request".to_string(),
                            },
                        );
                    }
                    if let Some(pending) = self.pending.remove(&response.id) {
                        self.deliver(response.id, pending, response, buffers);
                    }
                } else if let Some(pending) = self.pending.remove(&response.id) {
                    self.deliver(response.id, pending, response, buffers);
                } else {
                    self.protocol_violation(worker, format!("unmatched response id {}", response.id));
                }
            }
            Err(err) => {
                self.protocol_violation(worker, err.to_string());
                if let Some(in_flight) = in_flight {
                    self.fail(
                        in_flight.request,
                        FerryError::ProtocolViolation {
                            worker,
                            detail: err.to_string(),
                        },
                    );
                }
            }
        }

        self.pump();
    }

    fn deliver(
        &mut self,
        id: RequestId,
        pending: Pending,
        response: TaskResponse,
        buffers: Vec<TransferBuffer>,
    ) {
        let result = if response.is_success() {
            Envelope::from_parts(response.value.unwrap_or_default(), buffers)
        } else {
            let capsule = response
                .error_capsule
                .unwrap_or_else(|| ErrorCapsule::degraded(""));
            Err(FerryError::from_capsule(&pending.task_name, capsule))
        };

        match &result {
            Ok(_) => self.counters.completed += 1,
            Err(_) => self.counters.failed += 1,
        }
        if let Some(draining) = &mut self.draining {
            draining.report.drained += 1;
        }

        if pending.reply.send(result).is_err() {
            debug!(request = %id, task = %pending.task_name, "caller went away, response discarded");
        }
    }

    fn fail(&mut self, id: RequestId, err: FerryError) {
        let Some(pending) = self.pending.remove(&id) else {
            return;
        };
        self.counters.failed += 1;
        if pending.reply.send(Err(err)).is_err() {
            debug!(request = %id, "caller went away, failure discarded");
        }
    }

    fn protocol_violation(&mut self, worker: WorkerId, detail: String) {
        self.counters.protocol_violations += 1;
        warn!(worker = %worker, detail = %detail, "protocol violation");
    }

    fn next_deadline(&self) -> Option<Instant> {
        let task_deadlines = self
            .slots
            .iter()
            .filter_map(|s| s.current.as_ref().and_then(|f| f.deadline));
        let shutdown_deadline = self.draining.as_ref().and_then(|d| d.deadline);
        task_deadlines.chain(shutdown_deadline).min()
    }

    fn on_deadline(&mut self) {
        let now = Instant::now();

        if let Some(draining) = &self.draining
            && draining.deadline.is_some_and(|d| d <= now)
        {
            self.force_stop();
            return;
        }

        let expired: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.current.as_ref().and_then(|f| f.deadline).is_some_and(|d| d <= now))
            .map(|(i, _)| i)
            .collect();

        for index in expired {
            self.time_out(index);
            self.replace_worker(index);
        }
        self.pump();
    }

    /// Abort the worker at `index` and fail its in-flight request.
    fn time_out(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        slot.handle.abort();
        let _ = slot.state.transition(WorkerState::Terminated);
        let worker = slot.id;
        if let Some(in_flight) = slot.current.take() {
            warn!(worker = %worker, request = %in_flight.request, "worker timed out");
            self.counters.timed_out += 1;
            self.fail(
                in_flight.request,
                FerryError::WorkerTimeout {
                    worker,
                    request: in_flight.request,
                },
            );
        }
    }

    fn replace_worker(&mut self, index: usize) {
        let fresh = self.spawn_worker();
        let old = std::mem::replace(&mut self.slots[index], fresh);
        old.handle.abort();
        debug!(old = %old.id, new = %self.slots[index].id, "worker replaced");
    }

    fn spawn_worker(&self) -> Slot {
        let id = self.ids.generate_worker_id();
        // 同時に 1 件しか送らない
        let (inbox, inbox_rx) = mpsc::channel(1);
        let handle = WorkerLoop::new(
            id,
            Arc::clone(&self.registry),
            inbox_rx,
            self.responses_tx.clone(),
        )
        .spawn();
        Slot {
            id,
            state: WorkerState::Idle,
            inbox,
            handle,
            current: None,
            completed: 0,
        }
    }

    fn begin_shutdown(
        &mut self,
        timeout: Option<Duration>,
        reply: Option<oneshot::Sender<ShutdownReport>>,
    ) {
        if let Some(draining) = &mut self.draining {
            // 2 回目以降は同じ完了を待つ
            if let Some(reply) = reply {
                draining.waiters.push(reply);
            }
            return;
        }

        info!(
            pending = self.pending.len(),
            queued = self.queue.len(),
            timeout = ?timeout,
            "worker pool shutting down"
        );
        self.draining = Some(Draining {
            deadline: timeout.map(|t| Instant::now() + t),
            waiters: reply.into_iter().collect(),
            report: ShutdownReport::default(),
        });
    }

    fn drain_complete(&self) -> bool {
        self.draining.is_some() && self.pending.is_empty()
    }

    /// Deadline reached while draining.
    fn force_stop(&mut self) {
        let running: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.current.is_some())
            .map(|(i, _)| i)
            .collect();
        for &index in &running {
            self.time_out(index);
        }

        let queued: Vec<RequestId> = self.queue.drain(..).map(|(id, _)| id).collect();
        for &id in &queued {
            self.fail(id, FerryError::PoolShutdown);
        }

        // 応答済みでない残り（あり得ないはずだが取りこぼさない）
        let leftovers: Vec<RequestId> = self.pending.keys().copied().collect();
        for id in leftovers {
            self.fail(id, FerryError::PoolShutdown);
        }

        if let Some(draining) = &mut self.draining {
            draining.report.force_terminated = running.len();
            draining.report.abandoned = queued.len();
        }
    }

    async fn finish(mut self) {
        // inbox を閉じると Idle の worker はループを抜ける
        let slots = std::mem::take(&mut self.slots);
        let mut handles = Vec::with_capacity(slots.len());
        for slot in slots {
            drop(slot.inbox);
            handles.push((slot.id, slot.handle));
        }
        for (id, handle) in handles {
            if let Err(err) = handle.await
                && !err.is_cancelled()
            {
                warn!(worker = %id, error = %err, "worker ended abnormally");
            }
        }

        let draining = self.draining.take().unwrap_or_else(|| Draining {
            deadline: None,
            waiters: Vec::new(),
            report: ShutdownReport::default(),
        });
        info!(
            drained = draining.report.drained,
            force_terminated = draining.report.force_terminated,
            abandoned = draining.report.abandoned,
            "worker pool stopped"
        );
        for waiter in draining.waiters {
            let _ = waiter.send(draining.report.clone());
        }
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            workers: self
                .slots
                .iter()
                .map(|s| WorkerStatus {
                    id: s.id,
                    state: s.state,
                    current_request: s.current.as_ref().map(|f| f.request),
                    completed: s.completed,
                })
                .collect(),
            queued: self.queue.len(),
            pending: self.pending.len(),
            completed: self.counters.completed,
            failed: self.counters.failed,
            timed_out: self.counters.timed_out,
            protocol_violations: self.counters.protocol_violations,
            shutting_down: self.draining.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::WorkerPool;
    use crate::domain::TaskFailure;
    use crate::ports::{SystemClock, UlidGenerator};
    use crate::transfer::TransferList;
    use crate::typed::{Handler, Reply, Task, TaskInput};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use tokio::sync::Notify;
    use ulid::Ulid;

    #[derive(Debug, Serialize, Deserialize)]
    struct Hold;

    impl Task for Hold {
        const NAME: &'static str = "test.hold.v1";
        type Output = ();
    }

    struct HoldHandler(Arc<Notify>);

    #[async_trait]
    impl Handler<Hold> for HoldHandler {
        async fn handle(&self, _input: TaskInput<Hold>) -> Result<Reply<()>, TaskFailure> {
            self.0.notified().await;
            Ok(Reply::new(()))
        }
    }

    /// Start a dispatcher and keep a sender that can speak for its workers.
    fn start(
        config: PoolConfig,
        notify: Arc<Notify>,
    ) -> (WorkerPool, mpsc::Sender<WorkerMessage>, JoinHandle<()>) {
        let mut registry = TypedRegistry::new();
        registry.register::<Hold, _>(HoldHandler(notify)).unwrap();
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(SystemClock));
        let (commands_tx, commands_rx) = mpsc::channel(config.channel_capacity);

        let dispatcher = Dispatcher::new(config, Arc::new(registry), Arc::clone(&ids), commands_rx);
        let responses = dispatcher.responses_tx.clone();
        let handle = tokio::spawn(dispatcher.run());
        (WorkerPool::new(commands_tx, ids), responses, handle)
    }

    async fn wait_for(pool: &WorkerPool, ready: impl Fn(&PoolStatus) -> bool) -> PoolStatus {
        loop {
            let status = pool.status().await.unwrap();
            if ready(&status) {
                return status;
            }
            tokio::task::yield_now().await;
        }
    }

    fn hold(pool: &WorkerPool) -> JoinHandle<Result<(), FerryError>> {
        let pool = pool.clone();
        tokio::spawn(async move { pool.run(&Hold, TransferList::new()).await.map(|out| out.value) })
    }

    #[tokio::test]
    async fn unmatched_response_id_is_counted_and_dropped() {
        let notify = Arc::new(Notify::new());
        let (pool, responses, _dispatcher) =
            start(PoolConfig::default().with_size(2), Arc::clone(&notify));
        let held = hold(&pool);

        let status = wait_for(&pool, |s| s.running_workers() == 1).await;
        let idle = status
            .workers
            .iter()
            .find(|w| w.current_request.is_none())
            .unwrap()
            .id;

        let stray = TaskResponse::success(
            RequestId::from_ulid(Ulid::new()),
            idle,
            serde_json::json!("stray"),
            0,
        );
        responses
            .send(WorkerMessage {
                worker: idle,
                frame: Frame::response(&stray, Vec::new()),
            })
            .await
            .unwrap();

        let status = wait_for(&pool, |s| s.protocol_violations == 1).await;
        assert_eq!(status.pending, 1);
        assert_eq!(status.running_workers(), 1);
        assert!(status.workers.iter().all(|w| w.completed == 0));

        notify.notify_one();
        held.await.unwrap().unwrap();
        let status = pool.status().await.unwrap();
        assert_eq!(status.completed, 1);
        assert_eq!(status.protocol_violations, 1);
    }

    #[tokio::test]
    async fn undecodable_reply_from_idle_worker_leaves_others_alone() {
        let notify = Arc::new(Notify::new());
        let (pool, responses, _dispatcher) =
            start(PoolConfig::default().with_size(2), Arc::clone(&notify));
        let held = hold(&pool);

        let status = wait_for(&pool, |s| s.running_workers() == 1).await;
        let idle = status
            .workers
            .iter()
            .find(|w| w.current_request.is_none())
            .unwrap()
            .id;

        responses
            .send(WorkerMessage {
                worker: idle,
                frame: Ok(Frame::raw(b"not json".to_vec(), Vec::new())),
            })
            .await
            .unwrap();

        let status = wait_for(&pool, |s| s.protocol_violations == 1).await;
        assert_eq!(status.pending, 1);
        assert_eq!(status.failed, 0);

        notify.notify_one();
        held.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn undecodable_reply_fails_the_request_in_flight() {
        let notify = Arc::new(Notify::new());
        let (pool, responses, _dispatcher) =
            start(PoolConfig::default().with_size(1), Arc::clone(&notify));
        let held = hold(&pool);

        let status = wait_for(&pool, |s| s.running_workers() == 1).await;
        let busy = status.workers[0].id;

        responses
            .send(WorkerMessage {
                worker: busy,
                frame: Ok(Frame::raw(b"{\"id\":".to_vec(), Vec::new())),
            })
            .await
            .unwrap();

        let err = held.await.unwrap().unwrap_err();
        assert!(matches!(err, FerryError::ProtocolViolation { worker, .. } if worker == busy));
        let status = pool.status().await.unwrap();
        assert_eq!(status.pending, 0);
        assert_eq!(status.failed, 1);
        assert_eq!(status.protocol_violations, 1);

        // 本物の応答は遅れて届き、待ち手がいないので違反として数えるだけ
        notify.notify_one();
        let status = wait_for(&pool, |s| s.protocol_violations == 2).await;
        assert_eq!(status.completed, 0);
        assert_eq!(status.idle_workers(), 1);
    }

    #[tokio::test]
    async fn dropping_every_handle_respects_configured_shutdown_timeout() {
        let config = PoolConfig::default()
            .with_size(1)
            .with_shutdown_timeout(Duration::from_millis(50));
        let (pool, responses, dispatcher) = start(config, Arc::new(Notify::new()));
        drop(responses);

        let held = hold(&pool);
        wait_for(&pool, |s| s.running_workers() == 1).await;
        held.abort();
        let _ = held.await;
        drop(pool);

        tokio::time::timeout(Duration::from_secs(2), dispatcher)
            .await
            .expect("dispatcher should stop at the configured deadline")
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_without_timeout_falls_back_to_config() {
        let config = PoolConfig::default()
            .with_size(1)
            .with_shutdown_timeout(Duration::from_millis(50));
        let (pool, _responses, _dispatcher) = start(config, Arc::new(Notify::new()));

        let held = hold(&pool);
        wait_for(&pool, |s| s.running_workers() == 1).await;

        let report = tokio::time::timeout(Duration::from_secs(2), pool.shutdown(None))
            .await
            .expect("shutdown should stop at the configured deadline")
            .unwrap();
        assert_eq!(report.force_terminated, 1);
        assert!(matches!(
            held.await.unwrap(),
            Err(FerryError::WorkerTimeout { .. })
        ));
    }
}
