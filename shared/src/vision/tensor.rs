//! Image to model-input tensor conversion.
//!
//! Images are stretched to the square model input (no letterbox), alpha is
//! dropped, and each byte is scaled by `1 / 255`. The layout is channel-last
//! (`HWC`, RGB), the order the mobile TFLite export consumes.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader, RgbImage, RgbaImage};
use tracing::instrument;

use super::VisionError;

/// Maximum compressed image size (20MB) - first line of defense
const MAX_COMPRESSED_SIZE: usize = 20 * 1024 * 1024;

/// Maximum decompressed pixel count (100 megapixels) - prevents decompression bombs
const MAX_PIXELS: u64 = 100_000_000;

/// Allowed image formats - explicit allowlist
const ALLOWED_FORMATS: &[ImageFormat] = &[ImageFormat::Jpeg, ImageFormat::Png];

/// Normalized `HWC` float tensor for a square model input.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    size: u32,
    data: Vec<f32>,
}

impl Tensor {
    /// Side length of the square input.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// `[1, 3, S, S]` view for ONNX exports that expect planar input.
    #[cfg(feature = "ml")]
    #[must_use]
    pub fn to_nchw(&self) -> ndarray::Array4<f32> {
        let s = self.size as usize;
        ndarray::Array4::from_shape_fn((1, 3, s, s), |(_, c, y, x)| self.data[(y * s + x) * 3 + c])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb,
    Rgba,
}

impl PixelLayout {
    #[must_use]
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Rgb => 3,
            PixelLayout::Rgba => 4,
        }
    }
}

/// Borrowed, uncompressed pixel buffer handed over by a camera shell.
#[derive(Debug, Clone, Copy)]
pub struct RawImage<'a> {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub pixels: &'a [u8],
}

impl RawImage<'_> {
    /// # Errors
    ///
    /// Returns `InvalidImage` if the dimensions are zero or the buffer length
    /// does not match `width * height * channels`.
    pub fn to_dynamic(&self) -> Result<DynamicImage, VisionError> {
        check_dimensions(self.width, self.height)?;
        let expected = (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(self.layout.channels());
        if self.pixels.len() != expected {
            return Err(VisionError::invalid_image(format!(
                "pixel buffer has {} bytes, expected {expected}",
                self.pixels.len()
            )));
        }

        let pixels = self.pixels.to_vec();
        let image = match self.layout {
            PixelLayout::Rgb => {
                RgbImage::from_raw(self.width, self.height, pixels).map(DynamicImage::ImageRgb8)
            }
            PixelLayout::Rgba => {
                RgbaImage::from_raw(self.width, self.height, pixels).map(DynamicImage::ImageRgba8)
            }
        };
        image.ok_or_else(|| VisionError::invalid_image("unreadable pixel data"))
    }
}

fn check_dimensions(width: u32, height: u32) -> Result<(), VisionError> {
    if width == 0 || height == 0 {
        return Err(VisionError::invalid_image(format!(
            "invalid image dimensions: {width}x{height}"
        )));
    }
    Ok(())
}

/// Stretches `image` to `target_size x target_size` and normalizes it.
///
/// # Errors
///
/// `InvalidImage` for a zero-sized image, `InvalidConfig` for a zero target.
#[instrument(skip(image), fields(width = image.width(), height = image.height()))]
pub fn encode(image: &DynamicImage, target_size: u32) -> Result<Tensor, VisionError> {
    check_dimensions(image.width(), image.height())?;
    if target_size == 0 {
        return Err(VisionError::InvalidConfig("target size must be non-zero".into()));
    }

    let rgb = if image.width() == target_size && image.height() == target_size {
        image.to_rgb8()
    } else {
        image
            .resize_exact(target_size, target_size, FilterType::Triangle)
            .to_rgb8()
    };

    let data = rgb.as_raw().iter().map(|&b| f32::from(b) / 255.0).collect();

    Ok(Tensor {
        size: target_size,
        data,
    })
}

/// Decodes compressed JPEG/PNG bytes and encodes them.
///
/// # Errors
///
/// `InvalidImage` if the bytes are oversized, in a disallowed format,
/// exceed the pixel budget, or fail to decode.
#[instrument(skip(image_data), fields(data_len = image_data.len()))]
pub fn encode_bytes(image_data: &[u8], target_size: u32) -> Result<Tensor, VisionError> {
    if image_data.is_empty() {
        return Err(VisionError::invalid_image("input bytes empty"));
    }
    if image_data.len() > MAX_COMPRESSED_SIZE {
        return Err(VisionError::invalid_image(format!(
            "compressed image too large: {} bytes (max: {MAX_COMPRESSED_SIZE})",
            image_data.len()
        )));
    }

    let format = image::guess_format(image_data)?;
    if !ALLOWED_FORMATS.contains(&format) {
        return Err(VisionError::invalid_image(format!("unsupported image format: {format:?}")));
    }

    // Dimension check before full decode
    let (width, height) =
        ImageReader::with_format(Cursor::new(image_data), format).into_dimensions()?;
    check_dimensions(width, height)?;
    if u64::from(width) * u64::from(height) > MAX_PIXELS {
        return Err(VisionError::invalid_image(format!(
            "decompressed image too large: {width}x{height} pixels (max: {MAX_PIXELS})"
        )));
    }

    let image = image::load_from_memory_with_format(image_data, format)?;
    encode(&image, target_size)
}
