//! ferry-core
//!
//! Worker pool that moves byte buffers between the caller and workers
//! instead of copying them, and carries task failures back as error capsules.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, state, capsule, errors）
//! - **transfer**: 所有権を移動するバッファと Envelope / Frame
//! - **typed**: 型付き Task API（Task trait, Handler trait, TypedRegistry）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, ImageCodec）
//! - **impls**: ports の実装（RasterCodec）
//! - **app**: worker pool 本体（builder, dispatcher, worker_loop, status）
//! - **tasks**: 組み込みの task body

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod tasks;
pub mod transfer;
pub mod typed;

pub use app::{BuildError, PoolBuilder, PoolConfig, PoolStatus, ShutdownReport, WorkerPool};
pub use domain::{FerryError, RemoteError, TaskFailure};
pub use transfer::{BufferRef, Envelope, TransferBuffer, TransferList};
