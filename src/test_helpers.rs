//! Shared test utilities for the image-seo test suite.
//!
//! Provides a scripted [`MockClient`] standing in for the vision endpoint,
//! plus small builders for image records and credentials.
//!
//! # Usage
//!
//! ```ignore
//! use crate::test_helpers::*;
//!
//! let client = MockClient::new()
//!     .with_raw("b.png", r#"{"title": "t", "description": "d"}"#)
//!     .with_error("c.png", "[503 UNAVAILABLE] overloaded");
//! let orch = Orchestrator::new(client).with_credential(Some(test_credential()));
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;

use crate::ai::{Credential, GenerationError, SeoClient, parse_seo_response};
use crate::config::GenerationSettings;
use crate::types::{ImageRecord, SeoData};

// =========================================================================
// Builders
// =========================================================================

/// An image record with a PNG signature payload, named `name`.
pub fn sample_image(name: &str) -> ImageRecord {
    let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
    data.extend_from_slice(name.as_bytes());
    ImageRecord::new(name, "image/png", data)
}

pub fn test_credential() -> Credential {
    Credential::parse("AIzaSyTestCredential0000").unwrap()
}

/// The success payload the mock returns for an unscripted image.
pub fn default_seo(name: &str) -> SeoData {
    let stem = name.split('.').next().unwrap_or(name);
    SeoData {
        title: format!("Title for {stem}"),
        description: format!("Description of {stem}"),
        tags: vec![format!("{stem}_tag"), "photo".to_string()],
    }
}

// =========================================================================
// Mock client
// =========================================================================

#[derive(Debug, Clone)]
enum Reply {
    /// Raw model text, run through the real response parser.
    Raw(String),
    /// Provider-level failure with this message.
    Error(String),
}

/// Scripted [`SeoClient`]. Replies are keyed by image name; unscripted
/// images succeed with [`default_seo`].
///
/// A gated mock parks every `generate` call until [`MockClient::release`]
/// hands out permits, so tests can observe the in-flight state.
#[derive(Default)]
pub struct MockClient {
    replies: Mutex<HashMap<String, Reply>>,
    probe_error: Mutex<Option<String>>,
    probes: AtomicUsize,
    calls: Mutex<Vec<String>>,
    settings_seen: Mutex<Vec<GenerationSettings>>,
    gate: Option<Semaphore>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn with_raw(self, name: &str, raw: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(name.to_string(), Reply::Raw(raw.to_string()));
        self
    }

    pub fn with_error(self, name: &str, message: &str) -> Self {
        self.set_error(name, message);
        self
    }

    /// Script a failure after construction (e.g. between two dispatches).
    pub fn set_error(&self, name: &str, message: &str) {
        self.replies
            .lock()
            .unwrap()
            .insert(name.to_string(), Reply::Error(message.to_string()));
    }

    pub fn clear_reply(&self, name: &str) {
        self.replies.lock().unwrap().remove(name);
    }

    pub fn with_probe_error(self, message: &str) -> Self {
        *self.probe_error.lock().unwrap() = Some(message.to_string());
        self
    }

    /// Let `n` parked `generate` calls finish.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Image names passed to `generate`, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn settings_seen(&self) -> Vec<GenerationSettings> {
        self.settings_seen.lock().unwrap().clone()
    }
}

impl SeoClient for MockClient {
    async fn probe(&self, _credential: &Credential) -> Result<(), GenerationError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        match self.probe_error.lock().unwrap().clone() {
            Some(message) => Err(GenerationError::Provider(message)),
            None => Ok(()),
        }
    }

    async fn generate(
        &self,
        image: &ImageRecord,
        settings: &GenerationSettings,
        _credential: &Credential,
    ) -> Result<SeoData, GenerationError> {
        self.calls.lock().unwrap().push(image.name.clone());
        self.settings_seen.lock().unwrap().push(*settings);

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .expect("mock gate closed")
                .forget();
        }

        let reply = self.replies.lock().unwrap().get(&image.name).cloned();
        match reply {
            Some(Reply::Raw(raw)) => parse_seo_response(&raw),
            Some(Reply::Error(message)) => Err(GenerationError::Provider(message)),
            None => Ok(default_seo(&image.name)),
        }
    }
}
