//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **RasterCodec**: `image` crate を使った ImageCodec

pub mod raster_codec;

pub use self::raster_codec::RasterCodec;
