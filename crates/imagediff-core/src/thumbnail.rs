//! # Thumbnails
//!
//! Resizing used by the dev server's image endpoint.

use crate::diff::encode_png;
use crate::error::{CoreError, Result};
use image::imageops::FilterType;

/// Largest edge the image endpoint will produce.
pub const MAX_EDGE: u32 = 4096;

/// Work out output dimensions.
///
/// With both edges given the image is stretched to them. With one edge the
/// other follows the source aspect ratio (at least 1px). Zero, oversized
/// or absent edges are rejected.
pub fn fit_dimensions(source: (u32, u32), width: Option<u32>, height: Option<u32>) -> Result<(u32, u32)> {
    let (sw, sh) = source;
    if sw == 0 || sh == 0 {
        return Err(CoreError::EmptyImage);
    }
    for edge in [width, height].into_iter().flatten() {
        if edge == 0 || edge > MAX_EDGE {
            return Err(CoreError::InvalidDimension(edge));
        }
    }

    let scaled = |num: u32, by: u32, over: u32| -> u32 {
        let v = (u64::from(num) * u64::from(by) + u64::from(over) / 2) / u64::from(over);
        (v as u32).clamp(1, MAX_EDGE)
    };

    match (width, height) {
        (Some(w), Some(h)) => Ok((w, h)),
        (Some(w), None) => Ok((w, scaled(sh, w, sw))),
        (None, Some(h)) => Ok((scaled(sw, h, sh), h)),
        (None, None) => Err(CoreError::InvalidDimension(0)),
    }
}

/// Decode `bytes`, resize and re-encode as PNG.
pub fn resize_png(bytes: &[u8], width: Option<u32>, height: Option<u32>) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes).map_err(|e| CoreError::ImageDecode(e.to_string()))?;
    let (w, h) = fit_dimensions((img.width(), img.height()), width, height)?;
    let resized = img.resize_exact(w, h, FilterType::CatmullRom).to_rgba8();
    encode_png(&resized)
}
