//! ImageCompress - 受け取った画像を JPEG に再圧縮する
//!
//! 変換は CPU を使うので `spawn_blocking` に逃がします。
//! 出力は常に JPEG です。`image` crate は lossy な WebP を encode できません。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{RequestId, TaskFailure};
use crate::ports::{CompressOptions, ImageCodec, ImageInfo};
use crate::transfer::{BufferRef, TransferList};
use crate::typed::{Handler, Reply, Task, TaskInput};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageCompress {
    #[serde(default)]
    pub description: String,
    pub data: BufferRef,
    #[serde(default)]
    pub quality: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageCompressOutput {
    pub request_id: RequestId,
    pub original_description: String,
    pub source: ImageInfo,
    pub input_len: usize,
    pub data: BufferRef,
    pub timestamp: DateTime<Utc>,
}

impl Task for ImageCompress {
    const NAME: &'static str = "ferry.image.compress.v1";
    type Output = ImageCompressOutput;
}

pub struct ImageCompressHandler {
    codec: Arc<dyn ImageCodec>,
}

impl ImageCompressHandler {
    pub fn new(codec: Arc<dyn ImageCodec>) -> Self {
        Self { codec }
    }
}

#[async_trait]
impl Handler<ImageCompress> for ImageCompressHandler {
    async fn handle(
        &self,
        mut input: TaskInput<ImageCompress>,
    ) -> Result<Reply<ImageCompressOutput>, TaskFailure> {
        let bytes = input.buffers.take(input.task.data)?;
        let options = input
            .task
            .quality
            .map(|quality| CompressOptions { quality })
            .unwrap_or_default();
        let codec = Arc::clone(&self.codec);

        // codec は CPU を占有するので blocking pool へ
        let (source, input_len, compressed) = tokio::task::spawn_blocking(move || {
            let source = codec.probe(&bytes)?;
            let compressed = codec.compress(&bytes, options)?;
            Ok::<_, crate::ports::CodecError>((source, bytes.len(), compressed))
        })
        .await?
        .map_err(|e| TaskFailure::from(e).with_field("quality", options.quality))?;

        debug!(
            request = %input.request_id,
            format = %source.format,
            input_len,
            output_len = compressed.len(),
            "image compressed"
        );

        let mut transfer = TransferList::new();
        let data = transfer.attach(compressed);
        Ok(Reply::with_transfer(
            ImageCompressOutput {
                request_id: input.request_id,
                original_description: input.task.description,
                source,
                input_len,
                data,
                timestamp: Utc::now(),
            },
            transfer,
        ))
    }
}
