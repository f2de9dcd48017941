//! Ports - 抽象化レイヤー
//!
//! 外部の協力者（時刻、ID 生成、画像コーデック）へのインターフェース。

pub mod clock;
pub mod codec;
pub mod id_generator;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::codec::{CodecError, CompressOptions, ImageCodec, ImageInfo};
pub use self::id_generator::{IdGenerator, UlidGenerator};
