//! Error type shared by every core module.

use thiserror::Error;

/// Errors produced by the pure logic layer.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A path segment (target, build, movie or frame) is unsafe to join.
    #[error("Invalid path segment: {0:?}")]
    InvalidSegment(String),

    /// Diff threshold outside `0..=100` or not finite.
    #[error("Threshold must be a percentage between 0 and 100, got {0}")]
    InvalidThreshold(f64),

    /// A proxy rule is malformed.
    #[error("Invalid proxy rule for prefix {prefix:?}: {reason}")]
    InvalidProxyRule { prefix: String, reason: String },

    /// Two proxy rules claim the same prefix.
    #[error("Duplicate proxy prefix: {0:?}")]
    DuplicatePrefix(String),

    /// A URL could not be parsed or joined.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Input bytes are not a decodable image.
    #[error("Failed to decode image: {0}")]
    ImageDecode(String),

    /// Encoding the diff output failed.
    #[error("Failed to encode image: {0}")]
    ImageEncode(String),

    /// Requested output edge is zero or too large.
    #[error("Image dimension out of range: {0}")]
    InvalidDimension(u32),

    /// One of the inputs has zero width or height.
    #[error("Image has no pixels")]
    EmptyImage,
}

impl CoreError {
    /// True when the error stems from caller input rather than internal failure.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::ImageEncode(_))
    }
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
