//! PoolBuilder - プールの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;

use tokio::sync::mpsc;

use super::config::PoolConfig;
use super::dispatcher::Dispatcher;
use super::pool::WorkerPool;
use crate::ports::{IdGenerator, SystemClock, UlidGenerator};
use crate::typed::{Handler, RegistryError, Task, TypedRegistry};

/// PoolBuilder は WorkerPool を構築
///
/// # 使用例
/// ```ignore
/// let pool = PoolBuilder::new()
///     .register::<StringUpper, _>(StringUpperHandler)?
///     .expect_tasks(&[StringUpper::NAME])
///     .config(PoolConfig::default().with_size(4))
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - expect_tasks() で期待される task 名を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば BuildError を返す
pub struct PoolBuilder {
    registry: TypedRegistry,
    expected_tasks: Option<Vec<String>>,
    config: PoolConfig,
    ids: Option<Arc<dyn IdGenerator>>,
}

/// BuildError はプール構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error("invalid pool config: {0}")]
    InvalidConfig(String),

    #[error("build() must be called from within a tokio runtime")]
    NoRuntime,
}

impl PoolBuilder {
    pub fn new() -> Self {
        Self {
            registry: TypedRegistry::new(),
            expected_tasks: None,
            config: PoolConfig::default(),
            ids: None,
        }
    }

    /// Handler を登録
    pub fn register<T: Task, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    /// 期待される task 名のリストを設定
    pub fn expect_tasks(mut self, task_names: &[&str]) -> Self {
        self.expected_tasks = Some(task_names.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to a ULID generator on the system clock.
    pub fn id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Some(Arc::new(ids));
        self
    }

    /// 検証してから dispatcher と worker を起動
    ///
    /// # 検証
    /// - expect_tasks() の task 名が全て登録されているか
    /// - config が妥当か
    /// - tokio runtime の中で呼ばれているか
    pub fn build(self) -> Result<WorkerPool, BuildError> {
        if let Some(expected_tasks) = &self.expected_tasks {
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|name| !self.registry.contains(name))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing_tasks));
            }
        }
        self.config.validate().map_err(BuildError::InvalidConfig)?;
        // worker と dispatcher を spawn するので runtime が要る
        tokio::runtime::Handle::try_current().map_err(|_| BuildError::NoRuntime)?;

        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UlidGenerator::new(SystemClock)),
        };
        let (commands_tx, commands_rx) = mpsc::channel(self.config.channel_capacity);

        let dispatcher = Dispatcher::new(
            self.config,
            Arc::new(self.registry),
            Arc::clone(&ids),
            commands_rx,
        );
        tokio::spawn(dispatcher.run());

        Ok(WorkerPool::new(commands_tx, ids))
    }
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}
