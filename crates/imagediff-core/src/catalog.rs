//! # Screenshot Catalog Rules
//!
//! Naming and ordering rules for the screenshot tree
//! `<root>/<target>/<build>/<movie>-<frame>.png`.
//!
//! The filesystem walk lives in the app layer; this module only decides
//! what a file name means and how lists are ordered.

use crate::error::{CoreError, Result};
use std::cmp::Ordering;

/// Extension of screenshot files.
pub const IMAGE_EXTENSION: &str = ".png";

/// Movie name of a screenshot file: everything before the last `-`.
///
/// A PNG without `-` is its own movie name (extension included).
/// Returns `None` for non-PNG files.
#[must_use]
pub fn movie_name(file_name: &str) -> Option<&str> {
    if !file_name.ends_with(IMAGE_EXTENSION) {
        return None;
    }
    Some(match file_name.rsplit_once('-') {
        Some((movie, _)) => movie,
        None => file_name,
    })
}

/// Frame identifier of `file_name` if it belongs to `movie`.
#[must_use]
pub fn frame_of<'a>(file_name: &'a str, movie: &str) -> Option<&'a str> {
    let stem = file_name.strip_suffix(IMAGE_EXTENSION)?;
    let rest = stem.strip_prefix(movie)?.strip_prefix('-')?;
    // Frame is the text after the LAST dash, even when the movie prefix
    // itself matched a shorter movie name.
    Some(match rest.rsplit_once('-') {
        Some((_, frame)) => frame,
        None => rest,
    })
}

/// File name of a frame.
#[must_use]
pub fn image_file_name(movie: &str, frame: &str) -> String {
    format!("{}-{}{}", movie, frame, IMAGE_EXTENSION)
}

/// Reject segments that could escape their parent directory.
pub fn validate_segment(segment: &str) -> Result<()> {
    let bad = segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains('/')
        || segment.contains('\\')
        || segment.contains('\0');
    if bad {
        Err(CoreError::InvalidSegment(segment.to_string()))
    } else {
        Ok(())
    }
}

fn numeric_value(name: &str) -> Option<u128> {
    if !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()) {
        name.parse().ok()
    } else {
        None
    }
}

/// Numeric names first by value, then everything else lexicographically.
#[must_use]
pub fn numeric_first(a: &str, b: &str) -> Ordering {
    match (numeric_value(a), numeric_value(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Order build directory names.
pub fn sort_builds(builds: &mut [String]) {
    builds.sort_by(|a, b| numeric_first(a, b));
}

/// Order frame identifiers.
pub fn sort_frames(frames: &mut [String]) {
    frames.sort_by(|a, b| numeric_first(a, b));
}

/// Collect the sorted, deduplicated movie names from a build's file names.
#[must_use]
pub fn movies_in<'a>(file_names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let set: std::collections::BTreeSet<&str> =
        file_names.into_iter().filter_map(movie_name).collect();
    set.into_iter().map(str::to_string).collect()
}

/// Collect the sorted frames of `movie` from a build's file names.
#[must_use]
pub fn frames_in<'a>(file_names: impl IntoIterator<Item = &'a str>, movie: &str) -> Vec<String> {
    let mut frames: Vec<String> = file_names
        .into_iter()
        .filter_map(|f| frame_of(f, movie))
        .map(str::to_string)
        .collect();
    sort_frames(&mut frames);
    frames
}

// =============================================================================
// TESTS
// =============================================================================
