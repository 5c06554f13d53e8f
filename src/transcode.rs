//! Asset normalization: decode, flatten, downscale, encode WebP.
//!
//! Pure functions of bytes and policy. All I/O stays with the caller.

use crate::error::PipelineError;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};

/// Output policy for normalized artifacts.
#[derive(Debug, Clone)]
pub struct TranscodePolicy {
    /// WebP quality level (0-100).
    pub quality: u8,
    /// Maximum long-edge dimension. Never used to upscale.
    pub max_dimension: u32,
    /// Inputs below this size are rejected before any decode attempt.
    pub min_input_bytes: usize,
}

impl Default for TranscodePolicy {
    fn default() -> Self {
        Self {
            quality: 85,
            max_dimension: 1024,
            min_input_bytes: 100,
        }
    }
}

/// Converts raw image bytes into normalized WebP bytes under `policy`.
///
/// Inputs below `policy.min_input_bytes` fail with
/// [`PipelineError::InvalidAsset`] without invoking the decoder. Images
/// carrying transparency are composited onto an opaque white background.
/// Images whose long edge exceeds `policy.max_dimension` are downscaled
/// preserving aspect ratio; smaller images keep their dimensions. Decode
/// and encode failures surface as [`PipelineError::Transcode`], which is
/// always recoverable at the entry level.
pub fn transcode(raw: &[u8], policy: &TranscodePolicy) -> Result<Vec<u8>, PipelineError> {
    if raw.len() < policy.min_input_bytes {
        return Err(PipelineError::InvalidAsset(format!(
            "{} bytes is below the {} byte minimum",
            raw.len(),
            policy.min_input_bytes
        )));
    }

    let decoded = image::load_from_memory(raw)
        .map_err(|e| PipelineError::Transcode(format!("decode failed: {}", e)))?;

    let resized = if decoded.width() > policy.max_dimension
        || decoded.height() > policy.max_dimension
    {
        decoded.resize(policy.max_dimension, policy.max_dimension, FilterType::Lanczos3)
    } else {
        decoded
    };

    let rgb = flatten_to_rgb(resized);
    let (width, height) = rgb.dimensions();

    let encoded = webp::Encoder::from_rgb(rgb.as_raw(), width, height)
        .encode_simple(false, policy.quality as f32)
        .map_err(|e| PipelineError::Transcode(format!("webp encode failed: {:?}", e)))?;
    Ok(encoded.to_vec())
}

/// Flattens any alpha channel onto an opaque white background. Palette
/// inputs decode to RGB/RGBA upstream, so alpha presence is the only
/// remaining distinction.
fn flatten_to_rgb(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut out = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let a = a as u16;
        let blend = |c: u8| -> u8 { ((c as u16 * a + 255 * (255 - a)) / 255) as u8 };
        out.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    out
}
