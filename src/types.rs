//! Shared types used across ingestion, generation, and export.
//!
//! An [`ImageRecord`] is created once by the scanner and never mutated; the
//! orchestrator hands out `Arc<ImageRecord>` so in-flight jobs can read the
//! payload without holding any lock. A [`JobResult`] is the only outcome of a
//! finished generation call and is always replaced wholesale.

use std::fmt;

/// An uploaded image: file metadata plus the raw payload.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageRecord {
    /// Unique identity (UUID v4).
    pub id: String,
    /// Original file name, used as the export's `filename` column.
    pub name: String,
    /// Size in bytes of the original file.
    pub size: u64,
    /// MIME type sent alongside the payload (e.g. `image/png`).
    pub mime_type: String,
    /// Raw image bytes. Base64-encoded only at request time.
    pub data: Vec<u8>,
}

impl ImageRecord {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            size: data.len() as u64,
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Size in kilobytes, for display.
    pub fn size_kb(&self) -> f64 {
        self.size as f64 / 1024.0
    }
}

// Payloads can be megabytes; keep them out of debug output.
impl fmt::Debug for ImageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("mime_type", &self.mime_type)
            .finish_non_exhaustive()
    }
}

/// Structured SEO metadata returned by the vision model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeoData {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

/// Terminal outcome of one generation job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Success(SeoData),
    Failure { message: String },
}

impl JobResult {
    pub fn seo(&self) -> Option<&SeoData> {
        match self {
            JobResult::Success(seo) => Some(seo),
            JobResult::Failure { .. } => None,
        }
    }
}

/// Where an image currently sits in its generation lifecycle.
///
/// ```text
/// Unstarted -> Loading -> Succeeded | Failed
/// Succeeded | Failed -> Loading   (manual re-dispatch only)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Unstarted,
    Loading,
    Succeeded,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Unstarted => "unstarted",
            JobStatus::Loading => "loading",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_derives_size_and_unique_id() {
        let a = ImageRecord::new("a.png", "image/png", vec![0; 2048]);
        let b = ImageRecord::new("a.png", "image/png", vec![0; 2048]);
        assert_eq!(a.size, 2048);
        assert_eq!(a.size_kb(), 2.0);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn debug_omits_payload() {
        let rec = ImageRecord::new("a.png", "image/png", vec![1, 2, 3]);
        let dbg = format!("{rec:?}");
        assert!(dbg.contains("a.png"));
        assert!(!dbg.contains("data"));
    }

    #[test]
    fn seo_accessor_only_on_success() {
        let seo = SeoData {
            title: "t".into(),
            description: "d".into(),
            tags: vec!["x".into()],
        };
        assert_eq!(JobResult::Success(seo.clone()).seo(), Some(&seo));

        let err = JobResult::Failure {
            message: "x".into(),
        };
        assert!(err.seo().is_none());
    }
}
