//! Image ingestion: turn paths on disk into [`ImageRecord`]s.
//!
//! Accepts any mix of files and directories:
//!
//! ```text
//! image-seo generate shoot/ extra/cover.jpg
//!
//! shoot/
//! ├── 001-dawn.jpg        # picked up
//! ├── notes.txt           # skipped (not an image)
//! └── raw/
//!     └── 002-dusk.webp   # picked up (directories are walked recursively)
//! ```
//!
//! Files named explicitly must be images; files found while walking a
//! directory are skipped silently when they are not. Directory entries are
//! returned sorted by path, after any earlier arguments.
//!
//! The MIME type comes from the file's leading bytes when they are
//! recognizable, falling back to the extension.

use crate::types::ImageRecord;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No such file or directory: {0}")]
    NotFound(PathBuf),
    #[error("Not an image file: {0}")]
    NotAnImage(PathBuf),
    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "webp", "gif", "bmp", "tif", "tiff", "avif", "heic", "heif",
];

/// Whether `path` has an image file extension (case-insensitive).
pub fn is_image(path: &Path) -> bool {
    extension(path).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

fn extension(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

/// MIME type for an image payload: sniffed from `bytes`, else from the
/// extension of `path`.
pub fn detect_mime(bytes: &[u8], path: &Path) -> String {
    if let Ok(format) = image::guess_format(bytes) {
        return format.to_mime_type().to_string();
    }
    let mime = match extension(path).as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("tif" | "tiff") => "image/tiff",
        Some("avif") => "image/avif",
        Some("heic") => "image/heic",
        Some("heif") => "image/heif",
        _ => "application/octet-stream",
    };
    mime.to_string()
}

/// Read every image under `paths` into a record.
pub fn scan_paths(paths: &[PathBuf]) -> Result<Vec<ImageRecord>, ScanError> {
    let mut records = Vec::new();
    for path in paths {
        if path.is_dir() {
            for file in collect_dir(path)? {
                records.push(read_image(&file)?);
            }
        } else if path.is_file() {
            if !is_image(path) {
                return Err(ScanError::NotAnImage(path.clone()));
            }
            records.push(read_image(path)?);
        } else {
            return Err(ScanError::NotFound(path.clone()));
        }
    }
    debug!(count = records.len(), "scanned images");
    Ok(records)
}

fn collect_dir(dir: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type().is_file() && is_image(path) {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

fn read_image(path: &Path) -> Result<ImageRecord, ScanError> {
    let data = std::fs::read(path)?;
    let mime = detect_mime(&data, path);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(ImageRecord::new(name, mime, data))
}
