//! Persistence for the API credential and generation settings.
//!
//! Both live in the state directory (default `.image-seo/`):
//!
//! ```text
//! .image-seo/
//! ├── config.toml      # provider / export config (see config module)
//! ├── credential       # the API key, one line
//! └── settings.json    # tag count, title/description limits
//! ```
//!
//! The stores sit behind traits so the CLI loads once at startup and saves
//! on change, while tests can swap in a temp directory. Nothing here is
//! global: callers pass the loaded values to the orchestrator explicitly.

use crate::ai::Credential;
use crate::config::GenerationSettings;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

const CREDENTIAL_FILENAME: &str = "credential";
const SETTINGS_FILENAME: &str = "settings.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persists a single API credential.
pub trait CredentialStore {
    /// The saved credential, or `None` if nothing usable is stored.
    fn load(&self) -> Result<Option<Credential>, StoreError>;
    fn save(&self, credential: &Credential) -> Result<(), StoreError>;
    /// Forget the saved credential. Removing an absent one is not an error.
    fn remove(&self) -> Result<(), StoreError>;
}

/// Persists the generation settings.
pub trait SettingsStore {
    /// Saved settings merged over the defaults. Never fails: unreadable or
    /// out-of-range files fall back to the defaults with a warning.
    fn load(&self) -> GenerationSettings;
    fn save(&self, settings: &GenerationSettings) -> Result<(), StoreError>;
}

// =========================================================================
// File-backed credential store
// =========================================================================

pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(CREDENTIAL_FILENAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Credential>, StoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match Credential::parse(&raw) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring stored API key");
                Ok(None)
            }
        }
    }

    fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, format!("{}\n", credential.expose()))?;
        restrict_permissions(&self.path)?;
        Ok(())
    }

    fn remove(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

// =========================================================================
// File-backed settings store
// =========================================================================

pub struct FileSettingsStore {
    path: PathBuf,
    fallback: GenerationSettings,
}

impl FileSettingsStore {
    /// `fallback` fills in any field the file doesn't set, and replaces the
    /// whole file when it can't be used.
    pub fn new(state_dir: &Path, fallback: GenerationSettings) -> Self {
        Self {
            path: state_dir.join(SETTINGS_FILENAME),
            fallback,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_load(&self) -> Result<Option<GenerationSettings>, String> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.to_string()),
        };
        let saved: serde_json::Value = serde_json::from_str(&content).map_err(|e| e.to_string())?;
        let serde_json::Value::Object(saved) = saved else {
            return Err("expected a JSON object".to_string());
        };

        let mut merged = serde_json::to_value(self.fallback).map_err(|e| e.to_string())?;
        if let serde_json::Value::Object(base) = &mut merged {
            base.extend(saved);
        }
        let settings: GenerationSettings =
            serde_json::from_value(merged).map_err(|e| e.to_string())?;
        settings.validate().map_err(|e| e.to_string())?;
        Ok(Some(settings))
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self) -> GenerationSettings {
        match self.try_load() {
            Ok(Some(settings)) => settings,
            Ok(None) => self.fallback,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring saved settings");
                self.fallback
            }
        }
    }

    fn save(&self, settings: &GenerationSettings) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}
