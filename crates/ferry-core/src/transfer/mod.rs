//! Transfer - ownership-transferring envelopes.
//!
//! # 主要コンポーネント
//! - **TransferBuffer**: move-only なバイト列
//! - **BufferRef**: 値の中からバッファを指すプレースホルダ
//! - **TransferList / Envelope**: 値 + 移動するバッファ
//! - **BufferSet**: 受け取った側のバッファ（各スロット一度だけ take 可能）
//! - **Frame**: チャネルを実際に流れる単位

pub mod buffer;
pub mod envelope;
pub mod frame;

pub use self::buffer::{BufferRef, BufferSet, TransferBuffer};
pub use self::envelope::{Envelope, TransferList};
pub use self::frame::Frame;
