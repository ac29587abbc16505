//! Application configuration module.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! overridden by the user's file in the state directory; only the keys that
//! differ need to be present.
//!
//! ## Config File Location
//!
//! ```text
//! .image-seo/
//! ├── config.toml      # Optional overrides (this module)
//! ├── settings.json    # Persisted generation settings (see `store`)
//! └── credential       # Saved API key (see `store`)
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [generation]
//! tag_count = 5                 # 1-50
//! max_title_length = 60         # 20-200
//! max_description_length = 155  # 50-200
//!
//! [provider]
//! base_url = "https://generativelanguage.googleapis.com/v1beta"
//! model = "gemini-2.5-flash"
//! temperature = 0.4
//! timeout_secs = 60
//!
//! [export]
//! filename = "image_seo_data.csv"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

pub const TAG_COUNT_RANGE: (u32, u32) = (1, 50);
pub const TITLE_LENGTH_RANGE: (u32, u32) = (20, 200);
pub const DESCRIPTION_LENGTH_RANGE: (u32, u32) = (50, 200);

/// Application configuration loaded from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Initial generation settings, used when none have been persisted yet.
    pub generation: GenerationSettings,
    /// Vision endpoint settings.
    pub provider: ProviderConfig,
    /// CSV export settings.
    pub export: ExportConfig,
}

impl AppConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.generation.validate()?;
        if self.provider.model.trim().is_empty() {
            return Err(ConfigError::Validation(
                "provider.model must not be empty".into(),
            ));
        }
        if !self.provider.base_url.starts_with("http://")
            && !self.provider.base_url.starts_with("https://")
        {
            return Err(ConfigError::Validation(
                "provider.base_url must be an http(s) URL".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::Validation(
                "provider.temperature must be 0.0-2.0".into(),
            ));
        }
        if self.provider.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "provider.timeout_secs must be non-zero".into(),
            ));
        }
        if self.export.filename.trim().is_empty() {
            return Err(ConfigError::Validation(
                "export.filename must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// The three knobs embedded into every generation instruction.
///
/// One shared instance; read (never owned) by the AI client at call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationSettings {
    /// Exact number of tags to request.
    pub tag_count: u32,
    /// Upper bound on title length, in characters.
    pub max_title_length: u32,
    /// Upper bound on description length, in characters.
    pub max_description_length: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            tag_count: 5,
            max_title_length: 60,
            max_description_length: 155,
        }
    }
}

impl GenerationSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("generation.tag_count", self.tag_count, TAG_COUNT_RANGE)?;
        check_range(
            "generation.max_title_length",
            self.max_title_length,
            TITLE_LENGTH_RANGE,
        )?;
        check_range(
            "generation.max_description_length",
            self.max_description_length,
            DESCRIPTION_LENGTH_RANGE,
        )
    }

    /// Apply optional per-field overrides, then validate the result.
    pub fn with_overrides(
        mut self,
        tag_count: Option<u32>,
        max_title_length: Option<u32>,
        max_description_length: Option<u32>,
    ) -> Result<Self, ConfigError> {
        if let Some(n) = tag_count {
            self.tag_count = n;
        }
        if let Some(n) = max_title_length {
            self.max_title_length = n;
        }
        if let Some(n) = max_description_length {
            self.max_description_length = n;
        }
        self.validate()?;
        Ok(self)
    }
}

fn check_range(key: &str, value: u32, (min, max): (u32, u32)) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::Validation(format!(
            "{key} must be {min}-{max} (got {value})"
        )));
    }
    Ok(())
}

/// Vision endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    /// API root; the model path is appended to it.
    pub base_url: String,
    /// Model name, e.g. `gemini-2.5-flash`.
    pub model: String,
    /// Sampling temperature sent with every generation request.
    pub temperature: f64,
    /// Transport timeout per request, in seconds.
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash".to_string(),
            temperature: 0.4,
            timeout_secs: 60,
        }
    }
}

/// CSV export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    /// File name of the downloadable artifact.
    pub filename: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            filename: crate::export::DEFAULT_FILENAME.to_string(),
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(AppConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `config.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if no file exists, `Err` if it exists but is invalid.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = dir.join("config.toml");
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<AppConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: AppConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `config.toml` in the given directory.
pub fn load_config(dir: &Path) -> Result<AppConfig, ConfigError> {
    resolve_config(stock_defaults_value(), load_raw_config(dir)?)
}

/// Returns a fully-commented stock `config.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# image-seo Configuration
# =======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Generation defaults
# ---------------------------------------------------------------------------
# Used until settings are changed with `image-seo settings set`, after which
# the saved settings.json takes over.
[generation]
# Exact number of tags requested per image (1-50).
tag_count = 5

# Maximum title length in characters (20-200).
max_title_length = 60

# Maximum description length in characters (50-200).
max_description_length = 155

# ---------------------------------------------------------------------------
# Vision provider
# ---------------------------------------------------------------------------
[provider]
base_url = "https://generativelanguage.googleapis.com/v1beta"
model = "gemini-2.5-flash"

# Sampling temperature (0.0-2.0). Lower is more literal.
temperature = 0.4

# Per-request transport timeout in seconds.
timeout_secs = 60

# ---------------------------------------------------------------------------
# Export
# ---------------------------------------------------------------------------
[export]
filename = "image_seo_data.csv"
"##
}
