//! # Image SEO
//!
//! Generate SEO titles, descriptions and tags for images with a vision model,
//! then export the results as CSV.
//!
//! # Architecture: Ingest, Generate, Export
//!
//! ```text
//! 1. Scan       files/dirs   →  ImageRecords      (bytes + MIME type)
//! 2. Generate   ImageRecords →  JobResults        (one vision call per image)
//! 3. Export     JobResults   →  image_seo_data.csv
//! ```
//!
//! The middle stage is the only one with interesting state. Each image is an
//! independent job: it can be generated alone or as part of a bulk run,
//! fails without affecting its siblings, and records its own success or
//! failure. The orchestrator enforces at most one job in flight per image.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`scan`] | Reads files and walks directories into [`types::ImageRecord`]s |
//! | [`ai`] | Credential checks, prompt construction, response parsing, the Gemini client |
//! | [`jobs`] | The orchestrator: image collection, per-image results and loading state, bulk fan-out |
//! | [`export`] | CSV encoding of successful results |
//! | [`config`] | `config.toml` loading, validation, merging; generation settings bounds |
//! | [`store`] | File-backed persistence for the API key and generation settings |
//! | [`types`] | Shared types: `ImageRecord`, `SeoData`, `JobResult`, `JobStatus` |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Failures Are Data
//!
//! A failed generation never surfaces as an `Err` from the orchestrator. It
//! becomes that image's [`types::JobResult::Failure`], shown next to the
//! image and left out of the export. Only precondition failures (no API key,
//! unknown image, nothing to export) are returned to the caller, and those
//! leave all state untouched.
//!
//! ## Settle-All Fan-Out
//!
//! Bulk generation selects every image with no result and no job in flight,
//! marks them all as loading under one lock, then awaits every job with
//! `futures::future::join_all`. No job's failure cancels another's, and the
//! bulk call returns only when every job has reached a terminal state.
//!
//! ## Explicit State, No Globals
//!
//! The API key and generation settings are loaded from [`store`] at startup
//! and handed to the orchestrator explicitly. Front ends follow progress by
//! subscribing to [`jobs::JobEvent`]s on a channel; the orchestrator knows
//! nothing about how they are displayed.
//!
//! ## Testable Seam at the Network Call
//!
//! [`ai::SeoClient`] is the only trait in the pipeline. Everything above it
//! (orchestration, export, output) is tested against a scripted mock without
//! a network or an API key.

pub mod ai;
pub mod config;
pub mod export;
pub mod jobs;
pub mod output;
pub mod scan;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
