//! Vision-model client: credential checks, SEO generation, response cleanup.
//!
//! The [`SeoClient`] trait is the seam between the orchestrator and the
//! network. [`GeminiClient`] is the production implementation; tests swap in
//! a scripted mock.
//!
//! ## Credential validation
//!
//! [`validate_credential`] runs in two steps:
//!
//! 1. **Format check** (local). The key must be non-empty and start with
//!    [`CREDENTIAL_PREFIX`]. A failure here never touches the network.
//! 2. **Probe** (remote). A tiny text-only request. Errors carrying one of the
//!    provider's rejection markers mean the key itself was refused; anything
//!    else (quota, outage, DNS) is reported as "could not validate".
//!
//! ## Generation
//!
//! One request per image, one attempt, no retry. The instruction embeds the
//! three [`GenerationSettings`] values and asks for a JSON object with
//! `title`, `description` and `tags`. Models sometimes wrap that object in a
//! fenced code block even when asked not to, so [`clean_json_response`] strips
//! the fence before parsing.

use crate::config::{GenerationSettings, ProviderConfig};
use crate::types::{ImageRecord, SeoData};
use base64::Engine as _;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Every Gemini API key starts with this.
pub const CREDENTIAL_PREFIX: &str = "AI";

/// Substrings of a provider error that mean "this key was refused".
const REJECTION_MARKERS: &[&str] = &["API key not valid", "API_KEY_INVALID"];

/// Credential-level failures, local or network-confirmed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("API key cannot be empty.")]
    Empty,
    #[error("Invalid API key format.")]
    InvalidFormat,
    #[error("The provided API key is not valid. Please check it and try again.")]
    Rejected,
    #[error("Could not validate the API key. Ensure it is a correct Gemini API key and try again.")]
    Unverified,
}

/// Failure of a single generation (or probe) call.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Failed to process image with AI: API returned an empty response")]
    EmptyResponse,
    #[error("Failed to process image with AI: Invalid JSON structure received from API: {0}")]
    MalformedResponse(String),
    #[error("Failed to process image with AI: {0}")]
    Provider(String),
    #[error("Failed to process image with AI: {0}")]
    Transport(#[from] reqwest::Error),
}

impl GenerationError {
    /// Whether the provider said the credential itself is invalid.
    pub fn is_credential_rejection(&self) -> bool {
        let message = self.to_string();
        REJECTION_MARKERS.iter().any(|m| message.contains(m))
    }
}

/// A format-checked API key.
///
/// `Debug` and [`Credential::masked`] never print the full key.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Format-check a raw key (surrounding whitespace ignored).
    pub fn parse(raw: &str) -> Result<Self, CredentialError> {
        let key = raw.trim();
        if key.is_empty() {
            return Err(CredentialError::Empty);
        }
        if !key.starts_with(CREDENTIAL_PREFIX) {
            return Err(CredentialError::InvalidFormat);
        }
        Ok(Self(key.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// First four and last four characters, e.g. `AIza…9xQk`.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 8 {
            return format!("{}…", chars.iter().take(2).collect::<String>());
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}…{tail}")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.masked())
    }
}

/// Outcome of [`validate_credential`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialCheck {
    pub valid: bool,
    pub reason: Option<String>,
}

impl CredentialCheck {
    fn accepted() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn refused(err: CredentialError) -> Self {
        Self {
            valid: false,
            reason: Some(err.to_string()),
        }
    }
}

/// The external vision call, abstracted for testing.
#[allow(async_fn_in_trait)]
pub trait SeoClient {
    /// Lightweight round-trip used only to confirm a credential is accepted.
    async fn probe(&self, credential: &Credential) -> Result<(), GenerationError>;

    /// Generate SEO metadata for one image. Exactly one attempt.
    async fn generate(
        &self,
        image: &ImageRecord,
        settings: &GenerationSettings,
        credential: &Credential,
    ) -> Result<SeoData, GenerationError>;
}

/// Check a raw key locally, then confirm it with a probe request.
pub async fn validate_credential<C: SeoClient>(client: &C, raw: &str) -> CredentialCheck {
    let credential = match Credential::parse(raw) {
        Ok(c) => c,
        Err(e) => return CredentialCheck::refused(e),
    };
    match client.probe(&credential).await {
        Ok(()) => CredentialCheck::accepted(),
        Err(e) if e.is_credential_rejection() => {
            warn!(error = %e, "API key rejected by provider");
            CredentialCheck::refused(CredentialError::Rejected)
        }
        Err(e) => {
            warn!(error = %e, "API key validation failed");
            CredentialCheck::refused(CredentialError::Unverified)
        }
    }
}

/// Build the generation instruction for the given settings.
pub fn build_prompt(settings: &GenerationSettings) -> String {
    format!(
        r#"Analyze this image and generate SEO metadata.
Provide the output in JSON format with the following keys: "title", "description", "tags".

Constraints:
- "title": A compelling SEO title, maximum {title} characters.
- "description": An engaging meta description, maximum {description} characters.
- "tags": An array of exactly {tags} relevant SEO tags. Each tag must be in snake_case and lowercase.

Example format:
{{
  "title": "A short descriptive title",
  "description": "A slightly longer description of the image content.",
  "tags": ["example_tag_one", "example_tag_two"]
}}"#,
        title = settings.max_title_length,
        description = settings.max_description_length,
        tags = settings.tag_count,
    )
}

/// Strip a surrounding fenced code block (with optional language tag).
///
/// Both a three-backtick fence followed by `json` and a newline, and a bare
/// fence on one line, yield the enclosed text. Unfenced input is returned
/// trimmed. A fence with nothing inside is left as-is so the JSON parser
/// reports it.
pub fn clean_json_response(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed
        .strip_prefix("```")
        .and_then(|rest| rest.strip_suffix("```"))
    else {
        return trimmed;
    };
    let tag_len = inner
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(inner.len());
    let body = inner[tag_len..].trim();
    if body.is_empty() { trimmed } else { body }
}

/// Parse raw model text into [`SeoData`], enforcing the required shape.
///
/// `title` and `description` must be non-empty strings and `tags` an array
/// of strings.
pub fn parse_seo_response(raw: &str) -> Result<SeoData, GenerationError> {
    if raw.trim().is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    let value: serde_json::Value = serde_json::from_str(clean_json_response(raw))
        .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;

    let field = |key: &str| -> Result<String, GenerationError> {
        value
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| GenerationError::MalformedResponse(format!("missing \"{key}\"")))
    };
    let title = field("title")?;
    let description = field("description")?;

    let tags = value
        .get("tags")
        .and_then(|v| v.as_array())
        .ok_or_else(|| GenerationError::MalformedResponse("\"tags\" is not an array".into()))?
        .iter()
        .map(|t| {
            t.as_str().map(str::to_string).ok_or_else(|| {
                GenerationError::MalformedResponse("\"tags\" must contain strings".into())
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SeoData {
        title,
        description,
        tags,
    })
}

// =============================================================================
// Gemini implementation
// =============================================================================

/// `generateContent` client for the Gemini API.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f64,
}

impl GeminiClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    fn generation_body(&self, image: &ImageRecord, settings: &GenerationSettings) -> serde_json::Value {
        let data = base64::engine::general_purpose::STANDARD.encode(&image.data);
        serde_json::json!({
            "contents": [{
                "parts": [
                    {"inline_data": {"mime_type": image.mime_type, "data": data}},
                    {"text": build_prompt(settings)}
                ]
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "temperature": self.temperature
            }
        })
    }

    fn probe_body() -> serde_json::Value {
        serde_json::json!({"contents": [{"parts": [{"text": "test"}]}]})
    }

    /// POST a request and return the concatenated candidate text.
    async fn send(
        &self,
        body: &serde_json::Value,
        credential: &Credential,
    ) -> Result<String, GenerationError> {
        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", credential.expose())
            .json(body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        debug!(%status, bytes = text.len(), "generateContent response");

        if !status.is_success() {
            return Err(GenerationError::Provider(provider_error_message(
                status.as_u16(),
                &text,
            )));
        }
        let parsed: GenerateContentResponse = serde_json::from_str(&text)
            .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;
        Ok(parsed.text())
    }
}

impl SeoClient for GeminiClient {
    async fn probe(&self, credential: &Credential) -> Result<(), GenerationError> {
        self.send(&Self::probe_body(), credential).await.map(|_| ())
    }

    async fn generate(
        &self,
        image: &ImageRecord,
        settings: &GenerationSettings,
        credential: &Credential,
    ) -> Result<SeoData, GenerationError> {
        let body = self.generation_body(image, settings);
        let text = self.send(&body, credential).await?;
        parse_seo_response(&text)
    }
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Text parts of the first candidate, concatenated.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    reason: Option<String>,
}

/// Render a non-2xx response as `[400 INVALID_ARGUMENT] message (REASON)`.
fn provider_error_message(status: u16, body: &str) -> String {
    let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
        let body = body.trim();
        return if body.is_empty() {
            format!("[{status}] request failed")
        } else {
            format!("[{status}] {body}")
        };
    };
    let err = envelope.error;
    let mut message = match err.status {
        Some(s) => format!("[{status} {s}] {}", err.message),
        None => format!("[{status}] {}", err.message),
    };
    let reasons: Vec<&str> = err
        .details
        .iter()
        .filter_map(|d| d.reason.as_deref())
        .collect();
    if !reasons.is_empty() {
        message.push_str(&format!(" ({})", reasons.join(", ")));
    }
    message
}
