//! Handler trait - Task を実行する Handler の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (Handler<T>)
//! - Object-safe trait (DynHandler)
//! - Type erasure パターン (TypedHandler<T, H> → DynHandler)

use std::marker::PhantomData;

use async_trait::async_trait;

use super::task::{Reply, Task, TaskInput};
use crate::domain::capsule::names;
use crate::domain::{FerryError, RequestId, TaskFailure};
use crate::transfer::Envelope;

/// Handler は Task を実行して Reply を返す
///
/// # 使用例
/// ```ignore
/// struct UpperHandler;
///
/// #[async_trait]
/// impl Handler<StringUpper> for UpperHandler {
///     async fn handle(&self, input: TaskInput<StringUpper>) -> Result<Reply<Upper>, TaskFailure> {
///         Ok(Reply::new(Upper { transformed: input.task.message.to_uppercase() }))
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, input: TaskInput<T>) -> Result<Reply<T::Output>, TaskFailure>;
}

/// DynHandler は object-safe な Handler の抽象化
///
/// payload の decode と reply の pack はここで行うので、
/// worker は型を知らずに Envelope だけを扱えます。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, request_id: RequestId, payload: Envelope) -> Result<Envelope, TaskFailure>;
    fn task_name(&self) -> &'static str;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(&self, request_id: RequestId, payload: Envelope) -> Result<Envelope, TaskFailure> {
        let (task, buffers) = payload.unpack::<T>().map_err(|e| match e {
            FerryError::Encode(e) => TaskFailure::runtime(names::PAYLOAD_DECODE, format!("json decode: {e}")),
            other => TaskFailure::runtime(names::INVALID_TRANSFER, other.to_string()),
        })?;

        let reply = self
            .handler
            .handle(TaskInput {
                request_id,
                task,
                buffers,
            })
            .await?;

        Envelope::pack(&reply.value, reply.transfer).map_err(|e| match e {
            FerryError::InvalidTransfer(msg) => TaskFailure::runtime(names::INVALID_TRANSFER, msg),
            other => TaskFailure::runtime(names::RESULT_ENCODE, other.to_string()),
        })
    }

    fn task_name(&self) -> &'static str {
        T::NAME
    }
}
