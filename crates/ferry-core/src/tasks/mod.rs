//! Tasks - 組み込みの task body
//!
//! - **StringUpper**: 文字列を大文字化（バッファなし）
//! - **BufferReverse**: 受け取ったバッファをその場で反転して送り返す
//! - **ImageCompress**: ImageCodec で JPEG に再圧縮して送り返す

pub mod buffer_reverse;
pub mod image_compress;
pub mod string_upper;

use std::sync::Arc;

use crate::app::PoolBuilder;
use crate::ports::ImageCodec;
use crate::typed::{RegistryError, Task};

pub use self::buffer_reverse::{BufferReverse, BufferReverseHandler, BufferReverseOutput};
pub use self::image_compress::{ImageCompress, ImageCompressHandler, ImageCompressOutput};
pub use self::string_upper::{StringUpper, StringUpperHandler, StringUpperOutput};

pub const BUILTIN_TASKS: [&str; 3] = [StringUpper::NAME, BufferReverse::NAME, ImageCompress::NAME];

/// Register the three built-in tasks on `builder`.
pub fn register_builtin(
    builder: PoolBuilder,
    codec: Arc<dyn ImageCodec>,
) -> Result<PoolBuilder, RegistryError> {
    builder
        .register::<StringUpper, _>(StringUpperHandler)?
        .register::<BufferReverse, _>(BufferReverseHandler)?
        .register::<ImageCompress, _>(ImageCompressHandler::new(codec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{PoolConfig, WorkerPool};
    use crate::domain::FerryError;
    use crate::impls::RasterCodec;
    use crate::impls::raster_codec::sample_png;
    use crate::transfer::TransferList;

    fn pool() -> WorkerPool {
        register_builtin(PoolBuilder::new(), Arc::new(RasterCodec))
            .unwrap()
            .expect_tasks(&BUILTIN_TASKS)
            .config(PoolConfig::default().with_size(2))
            .build()
            .unwrap()
    }

    #[test]
    fn builtin_names_follow_convention() {
        for name in BUILTIN_TASKS {
            assert!(name.starts_with("ferry."));
            assert!(name.ends_with(".v1"));
        }
    }

    #[tokio::test]
    async fn string_upper_through_pool() {
        let pool = pool();
        let out = pool
            .run(
                &StringUpper {
                    message: "3: Hello World".into(),
                },
                TransferList::new(),
            )
            .await
            .unwrap();
        assert_eq!(out.value.transformed, "3: HELLO WORLD");
        assert!(out.buffers.is_empty());
    }

    #[tokio::test]
    async fn buffer_reverse_through_pool() {
        let pool = pool();
        let mut transfer = TransferList::new();
        let data = transfer.attach(vec![1u8, 2, 3, 4]);
        let task = BufferReverse {
            description: "Test Buffer".into(),
            data,
        };

        let mut out = pool.run(&task, transfer).await.unwrap();
        assert_eq!(out.value.original_description, "Test Buffer");
        assert_eq!(out.buffers.take(out.value.data).unwrap(), vec![4, 3, 2, 1]);
    }

    #[tokio::test]
    async fn image_compress_is_deterministic() {
        let pool = pool();
        let png = sample_png(32, 32);

        let mut results = Vec::new();
        for _ in 0..2 {
            let mut transfer = TransferList::new();
            let data = transfer.attach(png.clone());
            let task = ImageCompress {
                description: "sample".into(),
                data,
                quality: Some(80),
            };
            let mut out = pool.run(&task, transfer).await.unwrap();
            assert_eq!(out.value.source.width, 32);
            results.push(out.buffers.take(out.value.data).unwrap());
        }
        assert_eq!(results[0], results[1]);
        assert!(!results[0].is_empty());
    }

    #[tokio::test]
    async fn image_compress_rejects_garbage() {
        let pool = pool();
        let mut transfer = TransferList::new();
        let data = transfer.attach(b"definitely not an image".to_vec());
        let task = ImageCompress {
            description: "junk".into(),
            data,
            quality: None,
        };

        let err = pool.run(&task, transfer).await.unwrap_err();
        match err {
            FerryError::TaskExecution(remote) => {
                assert_eq!(remote.name(), "CodecError");
                assert!(remote.field("quality").is_some());
            }
            other => panic!("expected task failure, got {other:?}"),
        }
    }
}
