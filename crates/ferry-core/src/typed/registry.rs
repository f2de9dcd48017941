//! TypedRegistry - Handler の登録と管理
//!
//! # 学習ポイント
//! - HashMap での型消去された trait object の管理
//! - Generic methods での登録と型安全性
//! - Arc による共有所有権（worker 間で読み取り専用に共有）

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{DynHandler, Handler, TypedHandler};
use super::task::Task;
use crate::domain::{RequestId, TaskFailure, TaskName};
use crate::transfer::Envelope;

/// TypedRegistry は型付き Handler を登録・管理
///
/// # 使用例
/// ```ignore
/// let mut registry = TypedRegistry::new();
/// registry.register::<StringUpper, _>(StringUpperHandler)?;
///
/// let out = registry.dispatch(&name, request_id, envelope).await?;
/// ```
///
/// # 内部実装
/// - `register::<T: Task>(handler: impl Handler<T>)` で登録
/// - 内部的に TypedHandler でラップして DynHandler に変換
/// - 登録は起動時だけ。以降は不変なのでロック不要
#[derive(Default)]
pub struct TypedRegistry {
    handlers: HashMap<String, Arc<dyn DynHandler>>,
}

/// RegistryError は TypedRegistry の登録エラー
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Handler for task '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// DispatchError は dispatch 時のエラー
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no handler registered for task '{0}'")]
    UnknownTask(TaskName),

    #[error("{0}")]
    Failed(TaskFailure),
}

impl TypedRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        let name = T::NAME.to_string();
        if self.handlers.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.handlers.insert(name, Arc::new(TypedHandler::new(handler)));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Look up and run the handler for `name`.
    pub async fn dispatch(
        &self,
        name: &TaskName,
        request_id: RequestId,
        payload: Envelope,
    ) -> Result<Envelope, DispatchError> {
        let handler = self
            .get(name.as_str())
            .ok_or_else(|| DispatchError::UnknownTask(name.clone()))?;

        handler
            .handle_dyn(request_id, payload)
            .await
            .map_err(DispatchError::Failed)
    }
}
