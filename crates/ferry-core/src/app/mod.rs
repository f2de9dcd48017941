//! App - アプリケーション層
//!
//! typed registry と transfer を組み合わせて worker pool を実装します。
//!
//! # 主要コンポーネント
//! - **PoolBuilder**: プールの構築とワイヤリング（起動時検証）
//! - **WorkerPool**: 呼び出し側の handle（submit / run / status / shutdown）
//! - **Dispatcher**: claim・pending table・キュー・timeout を持つ actor
//! - **WorkerLoop**: worker execution context（Idle → Running → Idle）
//! - **PoolStatus**: 観測用のスナップショット

pub mod builder;
pub mod config;
mod dispatcher;
pub mod pool;
pub mod status;
mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, PoolBuilder};
pub use self::config::PoolConfig;
pub use self::pool::WorkerPool;
pub use self::status::{PoolStatus, ShutdownReport, WorkerStatus};
