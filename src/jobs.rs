//! Job orchestration: the image collection and per-image generation state.
//!
//! The [`Orchestrator`] owns three pieces of state behind one mutex:
//!
//! - **images**: ordered, append-only except for explicit removal
//! - **results**: image id → [`JobResult`]; absence means "not yet attempted"
//! - **loading**: ids with a job in flight, each tagged with its dispatch token
//!
//! Every key in `results` or `loading` belongs to an image still in the
//! collection, and ids in `images` are unique. Removal cascades to both
//! maps. A job writes its result only if its dispatch token is still the one
//! in `loading`; a job whose image was removed (or removed, re-added and
//! dispatched again) is discarded rather than written.
//!
//! ## Dispatch
//!
//! Dispatch and completion are two short critical sections around the
//! network call; the lock is never held across an `.await`. Dispatch marks
//! the id as loading, so a second dispatch for the same id while the first
//! is in flight is a no-op.
//!
//! [`Orchestrator::generate_all`] selects every image with no result and no
//! job in flight, marks them all loading under a single lock, and then drives
//! the jobs concurrently with a settle-all join: a failed job records its
//! failure and never cancels its siblings.
//!
//! ## Notifications
//!
//! State changes are published as [`JobEvent`]s on an optional channel so a
//! front end can follow along without the orchestrator knowing about it.

use crate::ai::{Credential, SeoClient};
use crate::config::GenerationSettings;
use crate::export::{self, ExportError};
use crate::types::{ImageRecord, JobResult, JobStatus, SeoData};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Precondition failures. Reported synchronously; no state is changed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("No API key configured. Save one with `image-seo key set <KEY>` first.")]
    NoCredential,
    #[error("Unknown image id: {0}")]
    UnknownImage(String),
}

/// State-change notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    ImagesAdded { count: usize },
    ImageRemoved { id: String, name: String },
    Cleared,
    JobStarted { id: String, name: String },
    JobSucceeded { id: String, name: String, seo: SeoData },
    JobFailed { id: String, name: String, message: String },
    /// The job finished after its image was removed; its result was dropped.
    JobDiscarded { id: String, name: String },
}

/// How a dispatched job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed,
    Discarded,
}

/// Tally of a [`Orchestrator::generate_all`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub discarded: usize,
}

#[derive(Debug, Default)]
struct JobState {
    images: Vec<Arc<ImageRecord>>,
    results: HashMap<String, JobResult>,
    /// id -> token of the job in flight for it.
    loading: HashMap<String, u64>,
    next_token: u64,
}

impl JobState {
    fn find(&self, id: &str) -> Option<&Arc<ImageRecord>> {
        self.images.iter().find(|img| img.id == id)
    }
}

/// A dispatched job: everything the network call needs, no lock held.
struct Job {
    image: Arc<ImageRecord>,
    credential: Credential,
    token: u64,
}

/// Owns the image collection and drives generation jobs through `C`.
pub struct Orchestrator<C> {
    client: C,
    state: Mutex<JobState>,
    credential: Mutex<Option<Credential>>,
    events: Option<Sender<JobEvent>>,
}

impl<C: SeoClient> Orchestrator<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            state: Mutex::new(JobState::default()),
            credential: Mutex::new(None),
            events: None,
        }
    }

    /// Publish state changes on `tx`. Send failures (receiver gone) are ignored.
    pub fn with_events(mut self, tx: Sender<JobEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_credential(self, credential: Option<Credential>) -> Self {
        *lock(&self.credential) = credential;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    // =========================================================================
    // Credential
    // =========================================================================

    pub fn set_credential(&self, credential: Credential) {
        *lock(&self.credential) = Some(credential);
    }

    fn require_credential(&self) -> Result<Credential, JobError> {
        lock(&self.credential).clone().ok_or(JobError::NoCredential)
    }

    // =========================================================================
    // Collection
    // =========================================================================

    /// Append images in arrival order. Returns the ids that were added.
    ///
    /// A record whose id is already in the collection is skipped.
    pub fn add_images(&self, records: Vec<ImageRecord>) -> Vec<String> {
        let offered = records.len();
        let ids: Vec<String> = {
            let mut state = lock(&self.state);
            let mut ids = Vec::with_capacity(offered);
            for record in records {
                if state.find(&record.id).is_some() {
                    continue;
                }
                ids.push(record.id.clone());
                state.images.push(Arc::new(record));
            }
            ids
        };
        let count = ids.len();
        if count < offered {
            debug!(skipped = offered - count, "duplicate image ids skipped");
        }
        debug!(count, "images added");
        self.emit(JobEvent::ImagesAdded { count });
        ids
    }

    /// Remove one image and any result or loading entry for it.
    ///
    /// Returns `false` (and does nothing) if the id is unknown.
    pub fn remove_image(&self, id: &str) -> bool {
        let removed = {
            let mut state = lock(&self.state);
            let Some(pos) = state.images.iter().position(|img| img.id == id) else {
                return false;
            };
            let image = state.images.remove(pos);
            state.results.remove(id);
            state.loading.remove(id);
            image
        };
        debug!(id, name = %removed.name, "image removed");
        self.emit(JobEvent::ImageRemoved {
            id: removed.id.clone(),
            name: removed.name.clone(),
        });
        true
    }

    /// Clear images, results and loading flags in one step.
    pub fn remove_all(&self) {
        {
            let mut state = lock(&self.state);
            *state = JobState::default();
        }
        debug!("all images removed");
        self.emit(JobEvent::Cleared);
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    pub fn images(&self) -> Vec<Arc<ImageRecord>> {
        lock(&self.state).images.clone()
    }

    pub fn image(&self, id: &str) -> Option<Arc<ImageRecord>> {
        lock(&self.state).find(id).cloned()
    }

    pub fn result(&self, id: &str) -> Option<JobResult> {
        lock(&self.state).results.get(id).cloned()
    }

    pub fn results(&self) -> HashMap<String, JobResult> {
        lock(&self.state).results.clone()
    }

    pub fn is_loading(&self, id: &str) -> bool {
        lock(&self.state).loading.contains_key(id)
    }

    /// Ids with a job in flight.
    pub fn loading(&self) -> HashSet<String> {
        lock(&self.state).loading.keys().cloned().collect()
    }

    /// Lifecycle state of an image, or `None` for an unknown id.
    pub fn status(&self, id: &str) -> Option<JobStatus> {
        let state = lock(&self.state);
        state.find(id)?;
        Some(if state.loading.contains_key(id) {
            JobStatus::Loading
        } else {
            match state.results.get(id) {
                None => JobStatus::Unstarted,
                Some(JobResult::Success(_)) => JobStatus::Succeeded,
                Some(JobResult::Failure { .. }) => JobStatus::Failed,
            }
        })
    }

    /// Encode every successful result as CSV, in collection order.
    pub fn export_csv(&self) -> Result<String, ExportError> {
        let (images, results) = {
            let state = lock(&self.state);
            (state.images.clone(), state.results.clone())
        };
        export::encode(&images, &results)
    }

    // =========================================================================
    // Generation
    // =========================================================================

    /// Generate metadata for one image.
    ///
    /// Rejected up front (no state change) without a credential or for an
    /// unknown id. Returns `Ok(None)` when a job for `id` is already in
    /// flight; otherwise runs the job to a terminal state and reports how it
    /// ended. Generation failures are recorded as the image's result, never
    /// returned as `Err`.
    pub async fn generate_one(
        &self,
        id: &str,
        settings: GenerationSettings,
    ) -> Result<Option<JobOutcome>, JobError> {
        let credential = self.require_credential()?;
        let job = {
            let mut state = lock(&self.state);
            let image = state
                .find(id)
                .cloned()
                .ok_or_else(|| JobError::UnknownImage(id.to_string()))?;
            self.dispatch(&mut state, image, &credential)
        };
        match job {
            Some(job) => Ok(Some(self.run(job, settings).await)),
            None => {
                debug!(id, "already generating; dispatch ignored");
                Ok(None)
            }
        }
    }

    /// Generate metadata for every image that has no result and no job in
    /// flight, concurrently, waiting for all of them to settle.
    ///
    /// Images whose previous attempt failed already have a result and are
    /// therefore not retried here; use [`Orchestrator::generate_one`].
    pub async fn generate_all(&self, settings: GenerationSettings) -> Result<BatchReport, JobError> {
        let credential = self.require_credential()?;
        let jobs: Vec<Job> = {
            let mut state = lock(&self.state);
            let eligible: Vec<Arc<ImageRecord>> = state
                .images
                .iter()
                .filter(|img| {
                    !state.results.contains_key(&img.id) && !state.loading.contains_key(&img.id)
                })
                .cloned()
                .collect();
            eligible
                .into_iter()
                .filter_map(|image| self.dispatch(&mut state, image, &credential))
                .collect()
        };

        let mut report = BatchReport {
            dispatched: jobs.len(),
            ..BatchReport::default()
        };
        if jobs.is_empty() {
            debug!("nothing to generate");
            return Ok(report);
        }
        info!(count = jobs.len(), "generating metadata");

        let outcomes = join_all(jobs.into_iter().map(|job| self.run(job, settings))).await;
        for outcome in outcomes {
            match outcome {
                JobOutcome::Succeeded => report.succeeded += 1,
                JobOutcome::Failed => report.failed += 1,
                JobOutcome::Discarded => report.discarded += 1,
            }
        }
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            discarded = report.discarded,
            "batch finished"
        );
        Ok(report)
    }

    /// Mark `image` as loading under a fresh token. `None` if it already is.
    fn dispatch(
        &self,
        state: &mut JobState,
        image: Arc<ImageRecord>,
        credential: &Credential,
    ) -> Option<Job> {
        if state.loading.contains_key(&image.id) {
            return None;
        }
        let token = state.next_token;
        state.next_token += 1;
        state.loading.insert(image.id.clone(), token);
        self.emit(JobEvent::JobStarted {
            id: image.id.clone(),
            name: image.name.clone(),
        });
        Some(Job {
            image,
            credential: credential.clone(),
            token,
        })
    }

    /// Perform the network call, then record its result.
    async fn run(&self, job: Job, settings: GenerationSettings) -> JobOutcome {
        let Job {
            image,
            credential,
            token,
        } = job;
        debug!(id = %image.id, name = %image.name, "job started");
        let result = match self.client.generate(&image, &settings, &credential).await {
            Ok(seo) => JobResult::Success(seo),
            Err(e) => {
                warn!(name = %image.name, error = %e, "generation failed");
                JobResult::Failure {
                    message: e.to_string(),
                }
            }
        };
        self.complete(&image, token, result)
    }

    /// Write the terminal result and clear the loading flag in one step.
    ///
    /// Only the job holding the current token for its id may do so. Removal
    /// drops the token, so a stale job never touches a later job's state.
    fn complete(&self, image: &ImageRecord, token: u64, result: JobResult) -> JobOutcome {
        let id = image.id.clone();
        let name = image.name.clone();
        let event = {
            let mut state = lock(&self.state);
            if state.loading.get(&id) != Some(&token) {
                None
            } else {
                state.loading.remove(&id);
                let event = match &result {
                    JobResult::Success(seo) => JobEvent::JobSucceeded {
                        id: id.clone(),
                        name: name.clone(),
                        seo: seo.clone(),
                    },
                    JobResult::Failure { message } => JobEvent::JobFailed {
                        id: id.clone(),
                        name: name.clone(),
                        message: message.clone(),
                    },
                };
                state.results.insert(id.clone(), result);
                Some(event)
            }
        };

        match event {
            Some(event) => {
                let outcome = match event {
                    JobEvent::JobSucceeded { .. } => JobOutcome::Succeeded,
                    _ => JobOutcome::Failed,
                };
                self.emit(event);
                outcome
            }
            None => {
                debug!(%id, %name, token, "image removed mid-flight; result discarded");
                self.emit(JobEvent::JobDiscarded { id, name });
                JobOutcome::Discarded
            }
        }
    }

    fn emit(&self, event: JobEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// Lock, recovering the data from a poisoned mutex.
///
/// Every critical section leaves the state consistent before it can panic.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{MockClient, default_seo, sample_image, test_credential};
    use std::sync::mpsc;

    fn orchestrator(client: MockClient) -> Orchestrator<MockClient> {
        Orchestrator::new(client).with_credential(Some(test_credential()))
    }

    fn settings() -> GenerationSettings {
        GenerationSettings::default()
    }

    /// Every id in results/loading must belong to a live image.
    fn assert_cascade_invariant<C: SeoClient>(orch: &Orchestrator<C>) {
        let state = lock(&orch.state);
        for id in state.results.keys().chain(state.loading.keys()) {
            assert!(state.find(id).is_some(), "orphaned state for {id}");
        }
    }

    // =========================================================================
    // Collection
    // =========================================================================

    #[test]
    fn add_images_preserves_arrival_order() {
        let orch = orchestrator(MockClient::new());
        orch.add_images(vec![sample_image("a.png"), sample_image("b.png")]);
        orch.add_images(vec![sample_image("c.png")]);
        let names: Vec<String> = orch.images().iter().map(|i| i.name.clone()).collect();
        assert_eq!(names, vec!["a.png", "b.png", "c.png"]);
        assert!(orch.results().is_empty());
    }

    #[test]
    fn add_images_skips_duplicate_ids() {
        let orch = orchestrator(MockClient::new());
        let a = sample_image("a.png");
        let ids = orch.add_images(vec![a.clone(), a.clone(), sample_image("b.png")]);
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], a.id);

        assert!(orch.add_images(vec![a]).is_empty());
        let names: Vec<String> = orch.images().iter().map(|i| i.name.clone()).collect();
        assert_eq!(names, vec!["a.png", "b.png"]);
    }

    #[tokio::test]
    async fn remove_image_cascades_to_results() {
        let orch = orchestrator(MockClient::new());
        let ids = orch.add_images(vec![sample_image("a.png"), sample_image("b.png")]);
        orch.generate_all(settings()).await.unwrap();
        assert_eq!(orch.results().len(), 2);

        assert!(orch.remove_image(&ids[0]));
        assert!(orch.result(&ids[0]).is_none());
        assert!(orch.result(&ids[1]).is_some());
        assert_eq!(orch.status(&ids[0]), None);
        assert_cascade_invariant(&orch);
    }

    #[test]
    fn remove_unknown_image_is_noop() {
        let orch = orchestrator(MockClient::new());
        orch.add_images(vec![sample_image("a.png")]);
        assert!(!orch.remove_image("missing"));
        assert_eq!(orch.images().len(), 1);
    }

    #[tokio::test]
    async fn remove_all_clears_everything() {
        let orch = orchestrator(MockClient::new());
        orch.add_images(vec![sample_image("a.png"), sample_image("b.png")]);
        orch.generate_all(settings()).await.unwrap();
        orch.remove_all();
        assert!(orch.images().is_empty());
        assert!(orch.results().is_empty());
        assert_cascade_invariant(&orch);
    }

    #[tokio::test]
    async fn cascade_invariant_holds_across_mixed_operations() {
        let orch = orchestrator(MockClient::new().with_error("b.png", "boom"));
        let ids = orch.add_images(vec![
            sample_image("a.png"),
            sample_image("b.png"),
            sample_image("c.png"),
        ]);
        orch.generate_all(settings()).await.unwrap();
        assert_cascade_invariant(&orch);
        orch.remove_image(&ids[1]);
        assert_cascade_invariant(&orch);
        orch.add_images(vec![sample_image("d.png")]);
        orch.generate_all(settings()).await.unwrap();
        assert_cascade_invariant(&orch);
        orch.remove_image(&ids[0]);
        orch.remove_image(&ids[2]);
        assert_cascade_invariant(&orch);
        assert_eq!(orch.results().len(), 1);
    }

    // =========================================================================
    // Preconditions
    // =========================================================================

    #[tokio::test]
    async fn generate_one_without_credential_is_rejected() {
        let orch = Orchestrator::new(MockClient::new());
        let ids = orch.add_images(vec![sample_image("a.png")]);
        let err = orch.generate_one(&ids[0], settings()).await.unwrap_err();
        assert_eq!(err, JobError::NoCredential);
        assert!(!orch.is_loading(&ids[0]));
        assert!(orch.result(&ids[0]).is_none());
        assert!(orch.client().calls().is_empty());
    }

    #[tokio::test]
    async fn generate_all_without_credential_is_rejected() {
        let orch = Orchestrator::new(MockClient::new());
        orch.add_images(vec![sample_image("a.png")]);
        assert_eq!(
            orch.generate_all(settings()).await,
            Err(JobError::NoCredential)
        );
        assert!(orch.results().is_empty());
    }

    #[tokio::test]
    async fn generate_one_unknown_id_is_rejected() {
        let orch = orchestrator(MockClient::new());
        let err = orch.generate_one("nope", settings()).await.unwrap_err();
        assert_eq!(err, JobError::UnknownImage("nope".into()));
    }

    // =========================================================================
    // generate_one
    // =========================================================================

    #[tokio::test]
    async fn generate_one_success_records_result() {
        let orch = orchestrator(MockClient::new());
        let ids = orch.add_images(vec![sample_image("a.png")]);
        let outcome = orch.generate_one(&ids[0], settings()).await.unwrap();
        assert_eq!(outcome, Some(JobOutcome::Succeeded));
        assert!(!orch.is_loading(&ids[0]));
        assert_eq!(
            orch.result(&ids[0]),
            Some(JobResult::Success(default_seo("a.png")))
        );
        assert_eq!(orch.status(&ids[0]), Some(JobStatus::Succeeded));
    }

    #[tokio::test]
    async fn generate_one_failure_is_captured_not_returned() {
        let orch = orchestrator(MockClient::new().with_error("a.png", "[503] overloaded"));
        let ids = orch.add_images(vec![sample_image("a.png")]);
        let outcome = orch.generate_one(&ids[0], settings()).await.unwrap();
        assert_eq!(outcome, Some(JobOutcome::Failed));
        assert!(!orch.is_loading(&ids[0]));
        assert_eq!(
            orch.result(&ids[0]),
            Some(JobResult::Failure {
                message: "Failed to process image with AI: [503] overloaded".into()
            })
        );
    }

    #[tokio::test]
    async fn missing_tags_recorded_as_failure() {
        let orch = orchestrator(
            MockClient::new().with_raw("a.png", r#"{"title": "t", "description": "d"}"#),
        );
        let ids = orch.add_images(vec![sample_image("a.png")]);
        orch.generate_one(&ids[0], settings()).await.unwrap();
        match orch.result(&ids[0]) {
            Some(JobResult::Failure { message }) => {
                assert!(message.contains("Invalid JSON structure received from API"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn loading_is_true_while_in_flight() {
        let orch = orchestrator(MockClient::gated());
        let ids = orch.add_images(vec![sample_image("a.png")]);
        let id = ids[0].clone();

        let (outcome, ()) = tokio::join!(orch.generate_one(&id, settings()), async {
            tokio::task::yield_now().await;
            assert!(orch.is_loading(&id));
            assert_eq!(orch.status(&id), Some(JobStatus::Loading));
            assert!(orch.result(&id).is_none());
            orch.client().release(1);
        });

        assert_eq!(outcome.unwrap(), Some(JobOutcome::Succeeded));
        assert!(!orch.is_loading(&id));
    }

    #[tokio::test]
    async fn concurrent_dispatch_for_same_id_is_noop() {
        let orch = orchestrator(MockClient::gated());
        let ids = orch.add_images(vec![sample_image("a.png")]);
        let id = ids[0].clone();

        let (first, second) = tokio::join!(orch.generate_one(&id, settings()), async {
            tokio::task::yield_now().await;
            let second = orch.generate_one(&id, settings()).await;
            orch.client().release(1);
            second
        });

        assert_eq!(first.unwrap(), Some(JobOutcome::Succeeded));
        assert_eq!(second.unwrap(), None);
        assert_eq!(orch.client().calls(), vec!["a.png"]);
    }

    #[tokio::test]
    async fn retry_replaces_prior_result() {
        let orch = orchestrator(MockClient::new().with_error("a.png", "first try failed"));
        let ids = orch.add_images(vec![sample_image("a.png")]);
        orch.generate_one(&ids[0], settings()).await.unwrap();
        assert_eq!(orch.status(&ids[0]), Some(JobStatus::Failed));

        orch.client().clear_reply("a.png");
        orch.generate_one(&ids[0], settings()).await.unwrap();
        assert_eq!(orch.status(&ids[0]), Some(JobStatus::Succeeded));
        assert_eq!(
            orch.result(&ids[0]),
            Some(JobResult::Success(default_seo("a.png")))
        );
    }

    #[tokio::test]
    async fn settings_are_passed_through() {
        let orch = orchestrator(MockClient::new());
        let ids = orch.add_images(vec![sample_image("a.png")]);
        let custom = GenerationSettings {
            tag_count: 12,
            max_title_length: 80,
            max_description_length: 180,
        };
        orch.generate_one(&ids[0], custom).await.unwrap();
        assert_eq!(orch.client().settings_seen(), vec![custom]);
    }

    // =========================================================================
    // generate_all
    // =========================================================================

    #[tokio::test]
    async fn generate_all_settles_every_job_despite_failures() {
        let orch = orchestrator(
            MockClient::new()
                .with_error("b.png", "boom")
                .with_raw("d.png", "not json"),
        );
        let ids = orch.add_images(vec![
            sample_image("a.png"),
            sample_image("b.png"),
            sample_image("c.png"),
            sample_image("d.png"),
        ]);

        let report = orch.generate_all(settings()).await.unwrap();
        assert_eq!(
            report,
            BatchReport {
                dispatched: 4,
                succeeded: 2,
                failed: 2,
                discarded: 0,
            }
        );
        for id in &ids {
            assert!(!orch.is_loading(id));
            assert!(orch.result(id).is_some());
        }
        assert_eq!(orch.status(&ids[1]), Some(JobStatus::Failed));
        assert_eq!(orch.status(&ids[3]), Some(JobStatus::Failed));
    }

    #[tokio::test]
    async fn generate_all_runs_jobs_concurrently() {
        let orch = orchestrator(MockClient::gated());
        let ids = orch.add_images(vec![
            sample_image("a.png"),
            sample_image("b.png"),
            sample_image("c.png"),
        ]);

        let (report, ()) = tokio::join!(orch.generate_all(settings()), async {
            tokio::task::yield_now().await;
            // Every job is parked at the gate at once.
            assert_eq!(orch.client().calls().len(), 3);
            assert!(ids.iter().all(|id| orch.is_loading(id)));
            orch.client().release(3);
        });
        assert_eq!(report.unwrap().succeeded, 3);
    }

    #[tokio::test]
    async fn generate_all_skips_images_with_results() {
        let orch = orchestrator(MockClient::new().with_error("b.png", "boom"));
        let ids = orch.add_images(vec![sample_image("a.png"), sample_image("b.png")]);
        orch.generate_all(settings()).await.unwrap();

        // b failed; a succeeded. Neither is eligible again.
        orch.client().clear_reply("b.png");
        orch.add_images(vec![sample_image("c.png")]);
        let report = orch.generate_all(settings()).await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(orch.status(&ids[1]), Some(JobStatus::Failed));
        assert_eq!(orch.client().calls(), vec!["a.png", "b.png", "c.png"]);
    }

    #[tokio::test]
    async fn generate_all_skips_images_in_flight() {
        let orch = orchestrator(MockClient::gated());
        let ids = orch.add_images(vec![sample_image("a.png"), sample_image("b.png")]);
        let a = ids[0].clone();

        let (_, report) = tokio::join!(orch.generate_one(&a, settings()), async {
            tokio::task::yield_now().await;
            orch.client().release(2);
            orch.generate_all(settings()).await
        });
        assert_eq!(report.unwrap().dispatched, 1);
        assert_eq!(orch.client().calls(), vec!["a.png", "b.png"]);
    }

    #[tokio::test]
    async fn generate_all_with_nothing_eligible() {
        let orch = orchestrator(MockClient::new());
        let report = orch.generate_all(settings()).await.unwrap();
        assert_eq!(report, BatchReport::default());
    }

    #[tokio::test]
    async fn scenario_single_then_bulk() {
        let orch = Orchestrator::new(MockClient::new());
        let ids = orch.add_images(vec![sample_image("a.png"), sample_image("b.png")]);
        let (a, b) = (ids[0].clone(), ids[1].clone());

        // No credential yet.
        assert_eq!(
            orch.generate_one(&a, settings()).await,
            Err(JobError::NoCredential)
        );
        assert!(!orch.is_loading(&a));
        assert_eq!(orch.status(&a), Some(JobStatus::Unstarted));

        orch.set_credential(test_credential());
        orch.generate_one(&a, settings()).await.unwrap();
        assert_eq!(orch.status(&a), Some(JobStatus::Succeeded));

        let report = orch.generate_all(settings()).await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(orch.status(&b), Some(JobStatus::Succeeded));
        assert_eq!(orch.client().calls(), vec!["a.png", "b.png"]);
    }

    // =========================================================================
    // Orphaned completions
    // =========================================================================

    #[tokio::test]
    async fn result_for_removed_image_is_discarded() {
        let orch = orchestrator(MockClient::gated());
        let ids = orch.add_images(vec![sample_image("a.png")]);
        let id = ids[0].clone();

        let (outcome, ()) = tokio::join!(orch.generate_one(&id, settings()), async {
            tokio::task::yield_now().await;
            assert!(orch.remove_image(&id));
            assert!(!orch.is_loading(&id));
            orch.client().release(1);
        });

        assert_eq!(outcome.unwrap(), Some(JobOutcome::Discarded));
        assert!(orch.results().is_empty());
        assert_cascade_invariant(&orch);
    }

    #[tokio::test]
    async fn stale_completion_after_readd_is_discarded() {
        let orch = orchestrator(MockClient::gated());
        let ids = orch.add_images(vec![sample_image("a.png")]);
        let id = ids[0].clone();
        let record = (*orch.image(&id).unwrap()).clone();

        let (first, second) = tokio::join!(orch.generate_one(&id, settings()), async {
            tokio::task::yield_now().await;
            assert!(orch.remove_image(&id));
            assert_eq!(orch.add_images(vec![record]), vec![id.clone()]);

            let (second, ()) = tokio::join!(orch.generate_one(&id, settings()), async {
                tokio::task::yield_now().await;
                assert!(orch.is_loading(&id));
                // The gate is FIFO: this permit goes to the first job.
                orch.client().release(1);
                for _ in 0..3 {
                    tokio::task::yield_now().await;
                }
                assert!(orch.is_loading(&id));
                assert!(orch.result(&id).is_none());
                orch.client().release(1);
            });
            second
        });

        assert_eq!(first.unwrap(), Some(JobOutcome::Discarded));
        assert_eq!(second.unwrap(), Some(JobOutcome::Succeeded));
        assert!(!orch.is_loading(&id));
        assert_eq!(orch.result(&id), Some(JobResult::Success(default_seo("a.png"))));
        assert_eq!(orch.client().calls(), vec!["a.png", "a.png"]);
        assert_cascade_invariant(&orch);
    }

    #[tokio::test]
    async fn loading_snapshot_lists_in_flight_ids() {
        let orch = orchestrator(MockClient::gated());
        let ids = orch.add_images(vec![sample_image("a.png"), sample_image("b.png")]);

        let (outcome, ()) = tokio::join!(orch.generate_one(&ids[1], settings()), async {
            tokio::task::yield_now().await;
            assert_eq!(orch.loading(), HashSet::from([ids[1].clone()]));
            orch.client().release(1);
        });
        assert_eq!(outcome.unwrap(), Some(JobOutcome::Succeeded));
        assert!(orch.loading().is_empty());
    }

    #[tokio::test]
    async fn remove_all_mid_batch_discards_everything() {
        let orch = orchestrator(MockClient::gated());
        orch.add_images(vec![sample_image("a.png"), sample_image("b.png")]);

        let (report, ()) = tokio::join!(orch.generate_all(settings()), async {
            tokio::task::yield_now().await;
            orch.remove_all();
            orch.client().release(2);
        });
        assert_eq!(report.unwrap().discarded, 2);
        assert!(orch.results().is_empty());
        assert_cascade_invariant(&orch);
    }

    // =========================================================================
    // Events and export
    // =========================================================================

    #[tokio::test]
    async fn events_trace_each_transition() {
        let (tx, rx) = mpsc::channel();
        let orch = orchestrator(MockClient::new().with_error("b.png", "boom")).with_events(tx);
        let ids = orch.add_images(vec![sample_image("a.png"), sample_image("b.png")]);
        orch.generate_all(settings()).await.unwrap();
        orch.remove_image(&ids[0]);
        orch.remove_all();
        drop(orch);

        let events: Vec<JobEvent> = rx.iter().collect();
        assert_eq!(events[0], JobEvent::ImagesAdded { count: 2 });
        assert!(matches!(&events[1], JobEvent::JobStarted { name, .. } if name == "a.png"));
        assert!(matches!(&events[2], JobEvent::JobStarted { name, .. } if name == "b.png"));
        let terminal: Vec<&JobEvent> = events[3..5].iter().collect();
        assert!(terminal
            .iter()
            .any(|e| matches!(e, JobEvent::JobSucceeded { name, .. } if name == "a.png")));
        assert!(terminal
            .iter()
            .any(|e| matches!(e, JobEvent::JobFailed { name, message, .. } if name == "b.png" && message.contains("boom"))));
        assert!(matches!(&events[5], JobEvent::ImageRemoved { name, .. } if name == "a.png"));
        assert_eq!(events[6], JobEvent::Cleared);
        assert_eq!(events.len(), 7);
    }

    #[tokio::test]
    async fn export_csv_uses_collection_order() {
        let orch = orchestrator(MockClient::new().with_error("b.png", "boom"));
        orch.add_images(vec![
            sample_image("c.png"),
            sample_image("b.png"),
            sample_image("a.png"),
        ]);
        orch.generate_all(settings()).await.unwrap();
        let csv = orch.export_csv().unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("\"c.png\""));
        assert!(lines[2].starts_with("\"a.png\""));
    }

    #[test]
    fn export_csv_with_no_results() {
        let orch = orchestrator(MockClient::new());
        orch.add_images(vec![sample_image("a.png")]);
        assert!(matches!(
            orch.export_csv(),
            Err(ExportError::NothingToExport)
        ));
    }
}
