//! Filesystem access to the screenshot tree.
//!
//! All naming and ordering decisions are delegated to
//! [`imagediff_core::catalog`]; this type only reads directories and
//! guards against paths escaping the root.

use crate::error::{AppError, Result};
use imagediff_core::catalog::{self, validate_segment};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

/// URL prefix under which the screenshot root is served.
pub const SCREENSHOTS_MOUNT: &str = "/screenshots/";

/// Read-only view over `<root>/<target>/<build>/<movie>-<frame>.png`.
#[derive(Debug, Clone)]
pub struct ScreenshotCatalog {
    root: PathBuf,
}

impl ScreenshotCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All target directories, sorted.
    pub fn targets(&self) -> Result<Vec<String>> {
        let mut targets = list_entries(&self.root, EntryKind::Dir).map_err(|e| {
            AppError::Internal(format!("Failed getting targets: {}", e))
        })?;
        targets.sort();
        Ok(targets)
    }

    /// Builds of a target, numeric names first.
    pub fn builds(&self, target: &str) -> Result<Vec<String>> {
        validate_segment(target)?;
        let dir = self.root.join(target);
        if !dir.is_dir() {
            return Err(AppError::NotFound(format!("Target '{}' does not exist", target)));
        }
        let mut builds = list_entries(&dir, EntryKind::Dir)?;
        catalog::sort_builds(&mut builds);
        Ok(builds)
    }

    /// Unique movie names recorded in a build.
    pub fn movies(&self, target: &str, build: &str) -> Result<Vec<String>> {
        let dir = self.build_dir(target, build)?;
        let files = list_entries(&dir, EntryKind::File)?;
        Ok(catalog::movies_in(files.iter().map(String::as_str)))
    }

    /// Frames of one movie in a build.
    pub fn frames(&self, target: &str, build: &str, movie: &str) -> Result<Vec<String>> {
        validate_segment(movie)?;
        let dir = self.build_dir(target, build)?;
        let files = list_entries(&dir, EntryKind::File)?;
        Ok(catalog::frames_in(files.iter().map(String::as_str), movie))
    }

    /// Path of a single frame image, which must exist.
    pub fn image_path(&self, target: &str, build: &str, movie: &str, frame: &str) -> Result<PathBuf> {
        for segment in [target, build, movie, frame] {
            validate_segment(segment)?;
        }
        let file_name = catalog::image_file_name(movie, frame);
        let path = self.root.join(target).join(build).join(&file_name);
        if !path.is_file() {
            return Err(AppError::NotFound(format!("Image does not exist: {}", file_name)));
        }
        Ok(path)
    }

    /// Resolve an image reference given by a client.
    ///
    /// Accepted forms: a path relative to the root, a `/screenshots/...`
    /// URL path, or an absolute path inside the root. The returned path is
    /// canonical.
    pub fn resolve_image(&self, reference: &str) -> Result<PathBuf> {
        let relative = if let Some(rest) = reference.strip_prefix(SCREENSHOTS_MOUNT) {
            rest
        } else if Path::new(reference).is_absolute() {
            return self.confine(Path::new(reference), reference);
        } else {
            reference
        };

        let mut path = self.root.clone();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => {
                    let part = part.to_str().ok_or_else(|| {
                        AppError::BadRequest(format!("Invalid image path: {}", reference))
                    })?;
                    validate_segment(part)?;
                    path.push(part);
                }
                Component::CurDir => {}
                _ => {
                    return Err(AppError::BadRequest(format!(
                        "Image path escapes the screenshot root: {}",
                        reference
                    )));
                }
            }
        }

        self.confine(&path, reference)
    }

    /// Canonicalize an existing file and require it to sit under the root,
    /// so symlinks cannot point elsewhere.
    fn confine(&self, candidate: &Path, reference: &str) -> Result<PathBuf> {
        if !candidate.is_file() {
            return Err(AppError::NotFound(format!("Image does not exist: {}", reference)));
        }
        let root = self.root.canonicalize()?;
        let resolved = candidate.canonicalize()?;
        if !resolved.starts_with(&root) {
            return Err(AppError::BadRequest(format!(
                "Image path escapes the screenshot root: {}",
                reference
            )));
        }
        Ok(resolved)
    }

    fn build_dir(&self, target: &str, build: &str) -> Result<PathBuf> {
        validate_segment(target)?;
        validate_segment(build)?;
        let dir = self.root.join(target).join(build);
        if !dir.is_dir() {
            return Err(AppError::NotFound(format!(
                "Build '{}/{}' does not exist",
                target, build
            )));
        }
        Ok(dir)
    }
}

/// Modification time in nanoseconds, or 0 when unavailable.
#[must_use]
pub fn modified_stamp(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Dir,
    File,
}

/// Names of directory entries of one kind, following symlinks.
fn list_entries(dir: &Path, kind: EntryKind) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let keep = match kind {
            EntryKind::Dir => path.is_dir(),
            EntryKind::File => path.is_file(),
        };
        if !keep {
            continue;
        }
        // Non UTF-8 names cannot be addressed through the JSON API.
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}
