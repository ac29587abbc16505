//! CLI output formatting.
//!
//! # Information-First Display
//!
//! Every image is shown by its positional index and generated title, with the
//! source file name and the metadata as indented context. Images that never
//! got a title fall back to the file name in parentheses, so the filename is
//! only the identity when there is nothing better.
//!
//! ## Progress
//!
//! ```text
//! ... dawn.jpg
//! ... dusk.jpg
//! ok  dawn.jpg
//! err dusk.jpg: Failed to process image with AI: [429 RESOURCE_EXHAUSTED] quota
//! ```
//!
//! ## Results
//!
//! ```text
//! 001 Golden Dawn Over Misty Hills
//!     Source: dawn.jpg (412.3 KB)
//!     Description: Soft morning light spills across rolling hills...
//!     Tags: dawn, misty_hills, landscape
//! 002 (dusk.jpg)
//!     Source: dusk.jpg (388.0 KB)
//!     Error: Failed to process image with AI: [429 RESOURCE_EXHAUSTED] quota
//!
//! Generated 1 of 2 images, 1 failed
//! ```
//!
//! # Architecture
//!
//! Each view has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes to stdout. Format functions are pure:
//! no I/O, no side effects.

use crate::ai::{Credential, CredentialCheck};
use crate::config::GenerationSettings;
use crate::jobs::{BatchReport, JobEvent};
use crate::types::{ImageRecord, JobResult};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const DESCRIPTION_PREVIEW: usize = 80;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Truncate text to `max` characters, appending `...` if truncated.
fn truncate_desc(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        None => text.to_string(),
        Some((cut, _)) => format!("{}...", &text[..cut]),
    }
}

/// Collapse internal newlines so a value stays on its display line.
fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

// ============================================================================
// Progress
// ============================================================================

/// Format a single orchestrator event as display lines.
///
/// Collection changes produce no output; the CLI reports those itself.
pub fn format_job_event(event: &JobEvent) -> Vec<String> {
    match event {
        JobEvent::JobStarted { name, .. } => vec![format!("... {name}")],
        JobEvent::JobSucceeded { name, .. } => vec![format!("ok  {name}")],
        JobEvent::JobFailed { name, message, .. } => vec![format!("err {name}: {message}")],
        JobEvent::JobDiscarded { name, .. } => vec![format!("--  {name} (removed)")],
        JobEvent::ImagesAdded { .. } | JobEvent::ImageRemoved { .. } | JobEvent::Cleared => {
            Vec::new()
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Format every image with its current state.
pub fn format_results(
    images: &[Arc<ImageRecord>],
    results: &HashMap<String, JobResult>,
    loading: &HashSet<String>,
) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, image) in images.iter().enumerate() {
        let result = results.get(&image.id);
        let header = match result.and_then(|r| r.seo()) {
            Some(seo) if !seo.title.is_empty() => {
                format!("{} {}", format_index(i + 1), single_line(&seo.title))
            }
            _ => format!("{} ({})", format_index(i + 1), image.name),
        };
        lines.push(header);
        lines.push(format!(
            "{}Source: {} ({:.1} KB)",
            indent(1),
            image.name,
            image.size_kb()
        ));

        if loading.contains(&image.id) {
            lines.push(format!("{}Status: generating", indent(1)));
            continue;
        }
        match result {
            None => lines.push(format!("{}Status: not generated", indent(1))),
            Some(JobResult::Success(seo)) => {
                lines.push(format!(
                    "{}Description: {}",
                    indent(1),
                    truncate_desc(&single_line(&seo.description), DESCRIPTION_PREVIEW)
                ));
                lines.push(format!("{}Tags: {}", indent(1), seo.tags.join(", ")));
            }
            Some(JobResult::Failure { message }) => {
                lines.push(format!("{}Error: {}", indent(1), single_line(message)));
            }
        }
    }
    lines
}

pub fn print_results(
    images: &[Arc<ImageRecord>],
    results: &HashMap<String, JobResult>,
    loading: &HashSet<String>,
) {
    for line in format_results(images, results, loading) {
        println!("{}", line);
    }
}

/// One-line summary of a bulk run.
pub fn format_batch_report(report: &BatchReport) -> Vec<String> {
    if report.dispatched == 0 {
        return vec!["Nothing to generate".to_string()];
    }
    let mut line = format!(
        "Generated {} of {}",
        report.succeeded,
        plural(report.dispatched, "image")
    );
    if report.failed > 0 {
        line.push_str(&format!(", {} failed", report.failed));
    }
    if report.discarded > 0 {
        line.push_str(&format!(", {} discarded", report.discarded));
    }
    vec![line]
}

pub fn print_batch_report(report: &BatchReport) {
    for line in format_batch_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Settings and credential
// ============================================================================

pub fn format_settings(settings: &GenerationSettings) -> Vec<String> {
    vec![
        "Generation".to_string(),
        format!("{}Tags: {}", indent(1), settings.tag_count),
        format!(
            "{}Max title length: {}",
            indent(1),
            settings.max_title_length
        ),
        format!(
            "{}Max description length: {}",
            indent(1),
            settings.max_description_length
        ),
    ]
}

pub fn print_settings(settings: &GenerationSettings) {
    for line in format_settings(settings) {
        println!("{}", line);
    }
}

/// Describe the saved credential without revealing it.
pub fn format_credential_status(credential: Option<&Credential>) -> Vec<String> {
    match credential {
        Some(c) => vec![format!("API key: {}", c.masked())],
        None => vec!["API key: not set".to_string()],
    }
}

pub fn format_credential_check(check: &CredentialCheck) -> Vec<String> {
    match (check.valid, &check.reason) {
        (true, _) => vec!["API key is valid".to_string()],
        (false, Some(reason)) => vec![format!("API key rejected: {reason}")],
        (false, None) => vec!["API key rejected".to_string()],
    }
}
