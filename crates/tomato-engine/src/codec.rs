use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use crate::error::AnalysisError;

/// Lossy JPEG quality used for every encoded upload.
pub const JPEG_QUALITY: u8 = 75;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
    Webp,
}

impl ImageKind {
    fn from_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Png => Some(Self::Png),
            ImageFormat::Jpeg => Some(Self::Jpeg),
            ImageFormat::WebP => Some(Self::Webp),
            _ => None,
        }
    }

    fn format(self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Webp => ImageFormat::WebP,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Png => "PNG",
            Self::Jpeg => "JPEG",
            Self::Webp => "WEBP",
        }
    }
}

/// An uploaded leaf photo: encoded bytes plus the facts learned by decoding
/// them once. Nothing can be changed after construction.
#[derive(Debug, Clone)]
pub struct ImageBlob {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
    kind: ImageKind,
    file_name: Option<String>,
}

impl ImageBlob {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, AnalysisError> {
        let format = image::guess_format(&bytes)
            .map_err(|err| AnalysisError::Decode(format!("unrecognized image data: {err}")))?;
        let kind = ImageKind::from_format(format).ok_or_else(|| {
            AnalysisError::Decode(format!(
                "unsupported image format {format:?}; expected PNG, JPEG or WEBP"
            ))
        })?;
        let decoded = image::load_from_memory_with_format(&bytes, format)
            .map_err(|err| AnalysisError::Decode(err.to_string()))?;
        Ok(Self {
            width: decoded.width(),
            height: decoded.height(),
            bytes,
            kind,
            file_name: None,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, AnalysisError> {
        let bytes = std::fs::read(path)
            .map_err(|err| AnalysisError::Decode(format!("failed reading {}: {err}", path.display())))?;
        let file_name = path
            .file_name()
            .and_then(|value| value.to_str())
            .map(str::to_string);
        let mut blob = Self::from_bytes(bytes)?;
        blob.file_name = file_name;
        Ok(blob)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn size_kb(&self) -> f64 {
        self.bytes.len() as f64 / 1024.0
    }

    fn decode(&self) -> Result<DynamicImage, AnalysisError> {
        image::load_from_memory_with_format(&self.bytes, self.kind.format())
            .map_err(|err| AnalysisError::Decode(err.to_string()))
    }
}

/// Re-encodes the blob as JPEG and returns it base64 encoded.
pub fn encode_jpeg_base64(blob: &ImageBlob) -> Result<String, AnalysisError> {
    let decoded = blob.decode()?;
    let flattened = flatten_onto_white(&decoded);
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY)
        .encode_image(&flattened)
        .map_err(|err| AnalysisError::Decode(format!("JPEG encode failed: {err}")))?;
    Ok(BASE64.encode(bytes))
}

pub fn jpeg_data_url(encoded: &str) -> String {
    format!("data:image/jpeg;base64,{encoded}")
}

fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    flattened
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use base64::Engine as _;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

    use super::{encode_jpeg_base64, jpeg_data_url, ImageBlob, ImageKind, BASE64};
    use crate::error::AnalysisError;

    fn png_bytes(image: DynamicImage) -> anyhow::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }

    fn leaf_png(width: u32, height: u32) -> anyhow::Result<Vec<u8>> {
        let mut image = RgbImage::new(width, height);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            *pixel = Rgb([(x * 7 % 255) as u8, 140, (y * 3 % 255) as u8]);
        }
        png_bytes(DynamicImage::ImageRgb8(image))
    }

    #[test]
    fn blob_records_dimensions_and_format() -> anyhow::Result<()> {
        let bytes = leaf_png(48, 32)?;
        let len = bytes.len();
        let blob = ImageBlob::from_bytes(bytes)?;
        assert_eq!((blob.width(), blob.height()), (48, 32));
        assert_eq!(blob.kind(), ImageKind::Png);
        assert_eq!(blob.kind().label(), "PNG");
        assert_eq!(blob.byte_len(), len);
        assert!(blob.file_name().is_none());
        Ok(())
    }

    #[test]
    fn from_path_keeps_file_name() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("leaf-01.png");
        std::fs::write(&path, leaf_png(8, 8)?)?;
        let blob = ImageBlob::from_path(&path)?;
        assert_eq!(blob.file_name(), Some("leaf-01.png"));
        Ok(())
    }

    #[test]
    fn encode_produces_decodable_jpeg() -> anyhow::Result<()> {
        let blob = ImageBlob::from_bytes(leaf_png(40, 24)?)?;
        let encoded = encode_jpeg_base64(&blob)?;
        let raw = BASE64.decode(encoded.as_bytes())?;
        assert_eq!(image::guess_format(&raw)?, ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&raw)?;
        assert_eq!((decoded.width(), decoded.height()), (40, 24));
        Ok(())
    }

    #[test]
    fn encode_is_deterministic() -> anyhow::Result<()> {
        let blob = ImageBlob::from_bytes(leaf_png(16, 16)?)?;
        assert_eq!(encode_jpeg_base64(&blob)?, encode_jpeg_base64(&blob)?);
        Ok(())
    }

    #[test]
    fn transparent_pixels_flatten_to_white() -> anyhow::Result<()> {
        let image = RgbaImage::from_pixel(16, 16, Rgba([0, 0, 0, 0]));
        let blob = ImageBlob::from_bytes(png_bytes(DynamicImage::ImageRgba8(image))?)?;
        let raw = BASE64.decode(encode_jpeg_base64(&blob)?.as_bytes())?;
        let decoded = image::load_from_memory(&raw)?.to_rgb8();
        let pixel = decoded.get_pixel(8, 8);
        assert!(pixel.0.iter().all(|channel| *channel > 240), "{pixel:?}");
        Ok(())
    }

    #[test]
    fn garbage_bytes_are_a_decode_error() {
        let err = ImageBlob::from_bytes(b"definitely not an image".to_vec()).unwrap_err();
        assert!(matches!(err, AnalysisError::Decode(_)));
    }

    #[test]
    fn truncated_png_is_a_decode_error() -> anyhow::Result<()> {
        let mut bytes = leaf_png(32, 32)?;
        bytes.truncate(bytes.len() / 2);
        let err = ImageBlob::from_bytes(bytes).unwrap_err();
        assert!(matches!(err, AnalysisError::Decode(_)));
        Ok(())
    }

    #[test]
    fn data_url_prefix() {
        assert_eq!(jpeg_data_url("QUJD"), "data:image/jpeg;base64,QUJD");
    }
}
