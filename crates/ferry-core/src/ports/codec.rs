//! ImageCodec port - 外部の画像コーデック
//!
//! 遅くて失敗しうるブラックボックスとして扱います。
//! worker の中では `spawn_blocking` 越しに呼び出してください。

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressOptions {
    /// 1..=100
    pub quality: u8,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self { quality: 80 }
    }
}

/// Format and dimensions of an encoded image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub format: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("input image buffer is empty")]
    EmptyInput,

    #[error("unsupported or unrecognized image format")]
    UnsupportedFormat,

    #[error("quality must be within 1..=100, got {0}")]
    InvalidQuality(u8),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("encode failed: {0}")]
    Encode(String),
}

pub trait ImageCodec: Send + Sync {
    /// Inspect the input without re-encoding it.
    fn probe(&self, bytes: &[u8]) -> Result<ImageInfo, CodecError>;

    fn compress(&self, bytes: &[u8], options: CompressOptions) -> Result<Vec<u8>, CodecError>;
}
