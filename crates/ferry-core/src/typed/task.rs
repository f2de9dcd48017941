//! Task trait - 型付き Task の定義
//!
//! # 学習ポイント
//! - Associated Constants (`const NAME`)
//! - Associated Types (`type Output`)

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::RequestId;
use crate::transfer::{BufferSet, TransferList};

/// Task は task 名と payload / output の型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Reverse {
///     data: BufferRef,
/// }
///
/// impl Task for Reverse {
///     const NAME: &'static str = "ferry.buffer.reverse.v1";
///     type Output = Reversed;
/// }
/// ```
///
/// # 命名規約
/// - `{namespace}.{domain}.{action}.v{major}`
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;

    type Output: Serialize + DeserializeOwned + Send + 'static;
}

/// What a handler receives: the decoded task and the buffers that came with it.
#[derive(Debug)]
pub struct TaskInput<T> {
    pub request_id: RequestId,
    pub task: T,
    pub buffers: BufferSet,
}

/// What a handler returns: the logical output and the buffers it moves back.
#[derive(Debug)]
pub struct Reply<O> {
    pub value: O,
    pub transfer: TransferList,
}

impl<O> Reply<O> {
    pub fn new(value: O) -> Self {
        Self {
            value,
            transfer: TransferList::new(),
        }
    }

    pub fn with_transfer(value: O, transfer: TransferList) -> Self {
        Self { value, transfer }
    }
}

/// Caller-side result of a typed run.
#[derive(Debug)]
pub struct TaskOutput<O> {
    pub value: O,
    pub buffers: BufferSet,
}
