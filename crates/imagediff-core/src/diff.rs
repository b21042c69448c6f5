//! # Pixel Diff Engine
//!
//! Compares two screenshots and renders the differing pixels.
//!
//! Pipeline:
//! 1. Decode both inputs and convert to RGB8.
//! 2. If dimensions differ, resize both to (min width, min height).
//! 3. Per pixel, sum `|a - b|` over the three channels; the pixel differs
//!    when the sum exceeds `floor(255 * threshold / 100)`.
//! 4. Render an RGBA image holding image B's colour (opaque) where pixels
//!    differ and full transparency elsewhere.
//! 5. Encode as PNG and report statistics.

use crate::error::{CoreError, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageEncoder, RgbImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

/// Threshold applied when a request does not specify one.
pub const DEFAULT_THRESHOLD: f64 = 5.0;

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

// =============================================================================
// REQUEST / OUTCOME
// =============================================================================

/// A diff request as accepted by the HTTP API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffRequest {
    #[serde(rename = "imageA")]
    pub image_a: String,
    #[serde(rename = "imageB")]
    pub image_b: String,
    /// Percentage in `0..=100`.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Also persist the diff under the diff output directory.
    #[serde(default)]
    pub save: bool,
}

/// Statistics reported alongside a diff image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiffStats {
    pub different_pixels: u64,
    pub total_pixels: u64,
    pub difference_percentage: f64,
    pub width: u32,
    pub height: u32,
}

impl DiffStats {
    /// Whether any pixel crossed the threshold.
    #[must_use]
    pub fn has_differences(&self) -> bool {
        self.different_pixels > 0
    }
}

/// Result of a full diff run.
#[derive(Debug, Clone)]
pub struct DiffOutcome {
    pub stats: DiffStats,
    /// Encoded RGBA PNG.
    pub png: Vec<u8>,
}

// =============================================================================
// MASK
// =============================================================================

/// Per-pixel "differs" flags in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffMask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl DiffMask {
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> bool {
        let idx = y as usize * self.width as usize + x as usize;
        self.bits.get(idx).copied().unwrap_or(false)
    }

    /// Number of differing pixels.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.bits.iter().filter(|b| **b).count() as u64
    }
}

// =============================================================================
// PIPELINE STEPS
// =============================================================================

/// Validate a threshold percentage.
pub fn check_threshold(threshold: f64) -> Result<f64> {
    if threshold.is_finite() && (0.0..=100.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(CoreError::InvalidThreshold(threshold))
    }
}

/// Channel-sum limit for a threshold percentage.
#[must_use]
pub fn channel_limit(threshold: f64) -> u32 {
    (255.0 * threshold / 100.0).floor() as u32
}

/// Decode any supported format into RGB8.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage> {
    let img = image::load_from_memory(bytes).map_err(|e| CoreError::ImageDecode(e.to_string()))?;
    let rgb = img.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(CoreError::EmptyImage);
    }
    Ok(rgb)
}

/// Bring both images to the same size.
///
/// Equal sizes pass through untouched; otherwise both are resized to the
/// smaller width and the smaller height.
#[must_use]
pub fn align(a: RgbImage, b: RgbImage) -> (RgbImage, RgbImage) {
    if a.dimensions() == b.dimensions() {
        return (a, b);
    }
    let width = a.width().min(b.width());
    let height = a.height().min(b.height());
    let a = imageops::resize(&a, width, height, FilterType::CatmullRom);
    let b = imageops::resize(&b, width, height, FilterType::CatmullRom);
    (a, b)
}

/// Compute the difference mask of two equally sized images.
#[must_use]
pub fn difference_mask(a: &RgbImage, b: &RgbImage, threshold: f64) -> DiffMask {
    let limit = channel_limit(threshold);
    let width = a.width().min(b.width());
    let height = a.height().min(b.height());

    let mut bits = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        for x in 0..width {
            let pa = a.get_pixel(x, y);
            let pb = b.get_pixel(x, y);
            let sum: u32 = pa
                .0
                .iter()
                .zip(pb.0.iter())
                .map(|(ca, cb)| u32::from(ca.abs_diff(*cb)))
                .sum();
            bits.push(sum > limit);
        }
    }

    DiffMask {
        width,
        height,
        bits,
    }
}

/// Derive statistics from a mask.
#[must_use]
pub fn compute_stats(mask: &DiffMask) -> DiffStats {
    let different_pixels = mask.count();
    let total_pixels = u64::from(mask.width) * u64::from(mask.height);
    let difference_percentage = if total_pixels == 0 {
        0.0
    } else {
        (different_pixels as f64 / total_pixels as f64) * 100.0
    };
    DiffStats {
        different_pixels,
        total_pixels,
        difference_percentage,
        width: mask.width,
        height: mask.height,
    }
}

/// Render image B's differing pixels on a transparent canvas.
#[must_use]
pub fn render_transparent(b: &RgbImage, mask: &DiffMask) -> RgbaImage {
    let mut out = RgbaImage::new(mask.width, mask.height);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if mask.get(x, y) {
            let [r, g, bl] = b.get_pixel(x, y).0;
            *pixel = Rgba([r, g, bl, 255]);
        }
    }
    out
}

/// PNG-encode an RGBA image.
pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf)
        .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgba8)
        .map_err(|e| CoreError::ImageEncode(e.to_string()))?;
    Ok(buf)
}

/// Diff two already decoded images.
pub fn diff_images(a: RgbImage, b: RgbImage, threshold: f64) -> Result<(DiffStats, RgbaImage)> {
    let threshold = check_threshold(threshold)?;
    if a.width() == 0 || a.height() == 0 || b.width() == 0 || b.height() == 0 {
        return Err(CoreError::EmptyImage);
    }
    let (a, b) = align(a, b);
    let mask = difference_mask(&a, &b, threshold);
    let stats = compute_stats(&mask);
    Ok((stats, render_transparent(&b, &mask)))
}

/// Full pipeline from encoded inputs to an encoded diff.
pub fn generate(a_bytes: &[u8], b_bytes: &[u8], threshold: f64) -> Result<DiffOutcome> {
    let threshold = check_threshold(threshold)?;
    let a = decode_rgb(a_bytes)?;
    let b = decode_rgb(b_bytes)?;
    let (stats, img) = diff_images(a, b, threshold)?;
    let png = encode_png(&img)?;
    Ok(DiffOutcome { stats, png })
}

// =============================================================================
// FORMATTING
// =============================================================================

/// Render a percentage the way the API has always reported it.
///
/// Integral values keep one decimal (`0.0`, `100.0`); others use the
/// shortest representation that round-trips.
#[must_use]
pub fn format_percentage(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

/// Wrap PNG bytes in a `data:` URI.
#[must_use]
pub fn encode_base64_png(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(w: u32, h: u32, c: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb(c))
    }

    fn encode_rgb(img: &RgbImage) -> Vec<u8> {
        let mut buf = Vec::new();
        PngEncoder::new(&mut buf)
            .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgb8)
            .unwrap();
        buf
    }

    #[test]
    fn identical_images_have_no_difference() {
        let (stats, out) = diff_images(solid(4, 3, [10, 20, 30]), solid(4, 3, [10, 20, 30]), 5.0).unwrap();
        assert_eq!(stats.different_pixels, 0);
        assert_eq!(stats.total_pixels, 12);
        assert_eq!(stats.difference_percentage, 0.0);
        assert!(!stats.has_differences());
        assert!(out.pixels().all(|p| p.0 == [0, 0, 0, 0]));
    }

    #[test]
    fn changed_pixel_above_threshold_is_marked() {
        let a = solid(2, 2, [0, 0, 0]);
        let mut b = a.clone();
        b.put_pixel(1, 0, Rgb([200, 0, 0]));

        let (stats, out) = diff_images(a, b, 5.0).unwrap();
        assert_eq!(stats.different_pixels, 1);
        assert_eq!(stats.difference_percentage, 25.0);
        assert_eq!(out.get_pixel(1, 0).0, [200, 0, 0, 255]);
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn change_at_limit_is_ignored() {
        // 5% of 255 floors to 12: a channel sum of exactly 12 does not count.
        assert_eq!(channel_limit(5.0), 12);
        let a = solid(1, 1, [0, 0, 0]);
        let (stats, _) = diff_images(a.clone(), solid(1, 1, [4, 4, 4]), 5.0).unwrap();
        assert_eq!(stats.different_pixels, 0);
        let (stats, _) = diff_images(a, solid(1, 1, [5, 4, 4]), 5.0).unwrap();
        assert_eq!(stats.different_pixels, 1);
    }

    #[test]
    fn zero_threshold_counts_any_change() {
        let (stats, _) = diff_images(solid(1, 1, [0, 0, 0]), solid(1, 1, [0, 0, 1]), 0.0).unwrap();
        assert_eq!(stats.different_pixels, 1);
    }

    #[test]
    fn mismatched_sizes_use_smaller_dimensions() {
        let (stats, out) = diff_images(solid(8, 3, [1, 1, 1]), solid(5, 6, [1, 1, 1]), 5.0).unwrap();
        assert_eq!((stats.width, stats.height), (5, 3));
        assert_eq!(out.dimensions(), (5, 3));
        assert_eq!(stats.total_pixels, 15);
    }

    #[test]
    fn invalid_threshold_is_rejected() {
        for bad in [-1.0, 100.5, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                diff_images(solid(1, 1, [0; 3]), solid(1, 1, [0; 3]), bad),
                Err(CoreError::InvalidThreshold(_))
            ));
        }
    }

    #[test]
    fn generate_round_trips_png_bytes() {
        let a = encode_rgb(&solid(3, 3, [0, 0, 0]));
        let b = encode_rgb(&solid(3, 3, [255, 255, 255]));
        let outcome = generate(&a, &b, 5.0).unwrap();
        assert_eq!(outcome.stats.different_pixels, 9);

        let decoded = image::load_from_memory(&outcome.png).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (3, 3));
        assert_eq!(decoded.get_pixel(2, 2).0, [255, 255, 255, 255]);
    }

    #[test]
    fn garbage_input_fails_to_decode() {
        assert!(matches!(
            generate(b"not an image", b"nope", 5.0),
            Err(CoreError::ImageDecode(_))
        ));
    }

    #[test]
    fn percentage_formatting() {
        assert_eq!(format_percentage(0.0), "0.0");
        assert_eq!(format_percentage(100.0), "100.0");
        assert_eq!(format_percentage(12.5), "12.5");
        assert_eq!(format_percentage(100.0 / 3.0), "33.333333333333336");
    }

    #[test]
    fn base64_data_uri() {
        assert_eq!(encode_base64_png(b"abc"), "data:image/png;base64,YWJj");
    }

    #[test]
    fn request_defaults() {
        let req: DiffRequest = serde_json::from_str(r#"{"imageA":"a.png","imageB":"b.png"}"#).unwrap();
        assert_eq!(req.threshold, DEFAULT_THRESHOLD);
        assert!(!req.save);
    }
}
