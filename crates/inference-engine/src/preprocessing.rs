//! Upload preprocessing pipeline
//!
//! Validation runs in a fixed order, each step with its own failure:
//!
//! 1. declared size against the upload limit (`PayloadTooLarge`)
//! 2. declared media type against the allow-list (`UnsupportedMediaType`)
//! 3. structural decode of the bytes, whatever type was declared (`CorruptImage`)
//!
//! The decoded image is then converted to RGB, resized to the model input
//! resolution and normalized with the transform stored in the artifact sidecar.

use std::io::Cursor;
use image::imageops::FilterType;
use image::io::{Limits, Reader};
use image::{ImageFormat, RgbImage};
use ndarray::Array3;
use tracing::debug;

use common::{ResizeFilter, Result, ServingError, TransformSpec};
use serving_config::PolicyConfig;

/// Upper bound on decoder bytes per pixel (16-bit RGBA)
const MAX_BYTES_PER_PIXEL: u64 = 8;

/// Model-ready input tensor plus facts about the source image
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// `[3, H, W]`, normalized
    pub tensor: Array3<f32>,
    /// Media type sniffed from the bytes
    pub sniffed_media_type: &'static str,
    pub source_width: u32,
    pub source_height: u32,
}

impl DecodedImage {
    pub fn shape(&self) -> [usize; 3] {
        let (c, h, w) = self.tensor.dim();
        [c, h, w]
    }
}

/// Strips parameters and lowercases a media type; `image/jpg` becomes `image/jpeg`
pub fn normalize_media_type(content_type: &str) -> String {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        _ => essence,
    }
}

/// Validates uploads and produces model input tensors
#[derive(Debug, Clone)]
pub struct Preprocessor {
    max_upload_bytes: u64,
    allowed_media_types: Vec<String>,
    max_image_pixels: u64,
}

impl Preprocessor {
    pub fn new<I, S>(max_upload_bytes: u64, allowed_media_types: I, max_image_pixels: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            max_upload_bytes,
            allowed_media_types: allowed_media_types
                .into_iter()
                .map(|t| normalize_media_type(t.as_ref()))
                .collect(),
            max_image_pixels,
        }
    }

    pub fn from_policy(policy: &PolicyConfig) -> Self {
        Self::new(
            policy.max_upload_bytes,
            &policy.allowed_media_types,
            policy.max_image_pixels,
        )
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    pub fn allowed_media_types(&self) -> &[String] {
        &self.allowed_media_types
    }

    /// Step 1: rejects sizes above the upload limit
    pub fn check_size(&self, declared_size: u64) -> Result<()> {
        if declared_size > self.max_upload_bytes {
            return Err(ServingError::PayloadTooLarge {
                size: declared_size,
                limit: self.max_upload_bytes,
            });
        }
        Ok(())
    }

    /// Step 2: rejects media types outside the allow-list
    pub fn check_media_type(&self, declared_content_type: &str) -> Result<String> {
        let media_type = normalize_media_type(declared_content_type);
        if !self.allowed_media_types.iter().any(|t| *t == media_type) {
            return Err(ServingError::UnsupportedMediaType(format!(
                "'{}' is not one of {}",
                declared_content_type,
                self.allowed_media_types.join(", ")
            )));
        }
        Ok(media_type)
    }

    /// Validates an upload and transforms it into a model input tensor
    pub fn decode(
        &self,
        bytes: &[u8],
        declared_content_type: &str,
        declared_size: u64,
        transform: &TransformSpec,
    ) -> Result<DecodedImage> {
        self.check_size(declared_size.max(bytes.len() as u64))?;
        let declared = self.check_media_type(declared_content_type)?;

        let (rgb, format) = self.decode_rgb(bytes)?;
        let sniffed = media_type_of(format);
        if sniffed != declared {
            debug!(declared = %declared, sniffed, "Declared media type differs from content");
        }

        let (source_width, source_height) = rgb.dimensions();
        let tensor = to_tensor(&rgb, transform);

        Ok(DecodedImage {
            tensor,
            sniffed_media_type: sniffed,
            source_width,
            source_height,
        })
    }

    /// Step 3: sniffs and decodes the bytes with dimension limits
    fn decode_rgb(&self, bytes: &[u8]) -> Result<(RgbImage, ImageFormat)> {
        let format = image::guess_format(bytes)
            .map_err(|_| ServingError::CorruptImage("Unrecognized image data".to_string()))?;
        if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP) {
            return Err(ServingError::CorruptImage(format!(
                "Content is {:?}, only JPEG, PNG and WEBP are decoded",
                format
            )));
        }

        let (width, height) = Reader::with_format(Cursor::new(bytes), format)
            .into_dimensions()
            .map_err(|e| ServingError::CorruptImage(format!("Invalid {:?} header: {}", format, e)))?;
        if width == 0 || height == 0 {
            return Err(ServingError::CorruptImage(format!("Image has zero size {}x{}", width, height)));
        }
        let pixels = u64::from(width) * u64::from(height);
        if pixels > self.max_image_pixels {
            return Err(ServingError::CorruptImage(format!(
                "Image is {}x{}, above the limit of {} pixels",
                width, height, self.max_image_pixels
            )));
        }

        let mut limits = Limits::default();
        limits.max_image_width = Some(width);
        limits.max_image_height = Some(height);
        limits.max_alloc = Some(self.max_image_pixels.saturating_mul(MAX_BYTES_PER_PIXEL));

        let mut reader = Reader::with_format(Cursor::new(bytes), format);
        reader.limits(limits);
        let image = reader
            .decode()
            .map_err(|e| ServingError::CorruptImage(format!("Failed to decode {:?}: {}", format, e)))?;

        Ok((image.to_rgb8(), format))
    }
}

fn media_type_of(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Png => "image/png",
        ImageFormat::WebP => "image/webp",
        _ => "application/octet-stream",
    }
}

fn filter_type(filter: ResizeFilter) -> FilterType {
    match filter {
        ResizeFilter::Nearest => FilterType::Nearest,
        ResizeFilter::Bilinear => FilterType::Triangle,
        ResizeFilter::Bicubic => FilterType::CatmullRom,
        ResizeFilter::Lanczos3 => FilterType::Lanczos3,
    }
}

/// Resizes, scales to [0, 1], and normalizes per channel into `[3, H, W]`
fn to_tensor(rgb: &RgbImage, transform: &TransformSpec) -> Array3<f32> {
    let (width, height) = (transform.width, transform.height);
    let resized;
    let source = if rgb.dimensions() == (width, height) {
        rgb
    } else {
        resized = image::imageops::resize(rgb, width, height, filter_type(transform.resize_filter));
        &resized
    };

    Array3::from_shape_fn((3, height as usize, width as usize), |(c, y, x)| {
        let value = f32::from(source.get_pixel(x as u32, y as u32)[c]) / 255.0;
        (value - transform.mean[c]) / transform.std[c]
    })
}
