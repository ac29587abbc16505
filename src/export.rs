//! CSV export of completed results.
//!
//! One header row, then one row per image whose result is a success, in
//! collection order. Images that failed or were never attempted are left
//! out. Every data field is double-quoted with internal quotes doubled, so
//! commas, quotes and newlines inside a title or description survive any
//! standard CSV reader.
//!
//! ```text
//! filename,title,description,tags
//! "sunset.jpg","Golden Sunset","A sun low over the bay","sunset, bay, golden_hour"
//! ```

use crate::types::{ImageRecord, JobResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_FILENAME: &str = "image_seo_data.csv";
pub const HEADER: &str = "filename,title,description,tags";
pub const TAG_SEPARATOR: &str = ", ";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("No SEO data available to export")]
    NothingToExport,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wrap `field` in double quotes, doubling any quote inside it.
pub fn quote_field(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Encode the successful results of `images` as CSV text.
///
/// Rows are joined with `\n`; there is no trailing newline.
pub fn encode(
    images: &[Arc<ImageRecord>],
    results: &HashMap<String, JobResult>,
) -> Result<String, ExportError> {
    let rows: Vec<String> = images
        .iter()
        .filter_map(|image| {
            let seo = results.get(&image.id)?.seo()?;
            let fields = [
                quote_field(&image.name),
                quote_field(&seo.title),
                quote_field(&seo.description),
                quote_field(&seo.tags.join(TAG_SEPARATOR)),
            ];
            Some(fields.join(","))
        })
        .collect();

    if rows.is_empty() {
        return Err(ExportError::NothingToExport);
    }

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(HEADER.to_string());
    lines.extend(rows);
    Ok(lines.join("\n"))
}

/// Write encoded CSV to `dir/filename`, creating `dir` if needed.
pub fn write_csv(dir: &Path, filename: &str, text: &str) -> Result<PathBuf, ExportError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(filename);
    std::fs::write(&path, text)?;
    Ok(path)
}
