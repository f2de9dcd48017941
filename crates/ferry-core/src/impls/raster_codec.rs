//! RasterCodec - `image` crate による ImageCodec 実装
//!
//! 入力フォーマットを自動判別してデコードし、指定 quality の JPEG に
//! 再エンコードします。JPEG エンコーダは決定的なので、同じ入力・同じ
//! quality なら出力はバイト単位で一致します。

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, ImageReader};

use crate::ports::{CodecError, CompressOptions, ImageCodec, ImageInfo};

#[derive(Debug, Clone, Copy, Default)]
pub struct RasterCodec;

impl RasterCodec {
    pub fn new() -> Self {
        Self
    }
}

fn detect(bytes: &[u8]) -> Result<ImageFormat, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::EmptyInput);
    }
    image::guess_format(bytes).map_err(|_| CodecError::UnsupportedFormat)
}

fn format_name(format: ImageFormat) -> String {
    format
        .extensions_str()
        .first()
        .map(|ext| ext.to_string())
        .unwrap_or_else(|| format!("{format:?}").to_lowercase())
}

impl ImageCodec for RasterCodec {
    fn probe(&self, bytes: &[u8]) -> Result<ImageInfo, CodecError> {
        let format = detect(bytes)?;
        let (width, height) = ImageReader::with_format(Cursor::new(bytes), format)
            .into_dimensions()
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok(ImageInfo {
            format: format_name(format),
            width,
            height,
        })
    }

    fn compress(&self, bytes: &[u8], options: CompressOptions) -> Result<Vec<u8>, CodecError> {
        if !(1..=100).contains(&options.quality) {
            return Err(CodecError::InvalidQuality(options.quality));
        }
        let format = detect(bytes)?;
        let decoded = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| CodecError::Decode(e.to_string()))?;

        // JPEG は alpha を持てないので RGB に落とす
        let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());
        let mut out = Vec::new();
        rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, options.quality))
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(out)
    }
}

/// Small PNG gradient for tests.
#[cfg(test)]
pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 7) as u8, (y * 11) as u8, ((x + y) * 3) as u8])
    });
    let mut png = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .unwrap();
    png
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn probe_reports_format_and_dimensions() {
        let info = RasterCodec.probe(&sample_png(16, 9)).unwrap();
        assert_eq!(info.format, "png");
        assert_eq!((info.width, info.height), (16, 9));
    }

    #[test]
    fn compress_is_deterministic() {
        let png = sample_png(32, 32);
        let opts = CompressOptions { quality: 80 };

        let first = RasterCodec.compress(&png, opts).unwrap();
        let second = RasterCodec.compress(&png, opts).unwrap();
        assert_eq!(first, second);

        let info = RasterCodec.probe(&first).unwrap();
        assert_eq!(info.format, "jpg");
        assert_eq!((info.width, info.height), (32, 32));
    }

    #[rstest]
    #[case(Vec::new(), "empty")]
    #[case(b"definitely not an image".to_vec(), "unsupported")]
    fn compress_rejects_bad_input(#[case] input: Vec<u8>, #[case] expected: &str) {
        let err = RasterCodec.compress(&input, CompressOptions::default()).unwrap_err();
        assert!(err.to_string().contains(expected), "{err}");
    }

    #[test]
    fn quality_out_of_range() {
        let err = RasterCodec
            .compress(&sample_png(4, 4), CompressOptions { quality: 0 })
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidQuality(0)));
    }
}
