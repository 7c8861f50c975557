use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn, instrument};
use tracing_subscriber::{fmt, EnvFilter};
use backoff::{ExponentialBackoff, future::retry};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Public Gemini API host; overridable for tests via `GeminiConfig::base_url`
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_MAX_RETRY_ELAPSED_SECS: u64 = 60;

// --- Shared Utilities ---

/// Extract the domain/host from a URL string safely.
/// Returns "unknown" if the URL cannot be parsed.
pub fn extract_domain(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

// --- Shared Logging ---

/// Initialize structured logging with JSON format in production (when RUST_LOG is set),
/// or pretty format for local development.
pub fn init_logging() {
    let is_production = std::env::var("RUST_LOG").is_ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if is_production {
        let _ = fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    }
}

// --- Errors ---

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("HTTP request to Gemini failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gemini API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Gemini API Error: {0}")]
    Api(String),

    #[error("No content returned from Gemini")]
    NoContent,
}

impl GeminiError {
    /// Whether retrying the same request has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            GeminiError::Http(e) => e.is_timeout() || e.is_connect(),
            GeminiError::Status { status, .. } => *status == 429 || *status >= 500,
            GeminiError::Api(message) => is_transient_error(message),
            GeminiError::NoContent => false,
        }
    }
}

fn is_transient_error(err: &str) -> bool {
    let transient_patterns = [
        "timeout",
        "connection",
        "rate limit",
        "429",
        "500",
        "502",
        "503",
        "504",
        "temporarily",
        "overloaded",
    ];

    let err_lower = err.to_lowercase();
    transient_patterns.iter().any(|p| err_lower.contains(p))
}

// --- Gemini Structs ---
#[derive(Serialize, Deserialize, Debug)]
pub struct GeminiPart {
    #[serde(default)]
    pub text: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct GeminiContent {
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

#[derive(Serialize, Debug)]
pub struct GeminiRequest {
    pub contents: Vec<GeminiContent>,
}

impl GeminiRequest {
    /// Single-turn request carrying one text prompt.
    pub fn from_prompt(text: &str) -> Self {
        GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: text.to_string() }],
            }],
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct GeminiCandidate {
    // Absent when the candidate was blocked (finishReason SAFETY etc.)
    pub content: Option<GeminiContent>,
}

#[derive(Deserialize, Debug)]
pub struct GeminiResponse {
    pub candidates: Option<Vec<GeminiCandidate>>,
    pub error: Option<GeminiApiError>,
}

#[derive(Deserialize, Debug)]
pub struct GeminiApiError {
    pub message: String,
}

impl GeminiResponse {
    /// Text of the first candidate, with all of its parts concatenated.
    pub fn into_text(self) -> Result<String, GeminiError> {
        if let Some(error) = self.error {
            return Err(GeminiError::Api(error.message));
        }

        let content = self
            .candidates
            .and_then(|candidates| candidates.into_iter().next())
            .and_then(|candidate| candidate.content)
            .ok_or(GeminiError::NoContent)?;

        if content.parts.is_empty() {
            return Err(GeminiError::NoContent);
        }

        Ok(content.parts.into_iter().map(|p| p.text).collect())
    }
}

// --- Client ---

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    /// Upper bound on time spent retrying transient failures. Zero disables retries.
    pub max_retry_elapsed: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        GeminiConfig {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_retry_elapsed: Duration::from_secs(DEFAULT_MAX_RETRY_ELAPSED_SECS),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_max_retry_elapsed(mut self, max: Duration) -> Self {
        self.max_retry_elapsed = max;
        self
    }

    /// `models/gemini-2.5-flash` and `gemini-2.5-flash` name the same model.
    fn model_id(&self) -> &str {
        self.model.trim().trim_start_matches("models/")
    }

    fn endpoint(&self) -> String {
        // Note: API key in URL is required by Gemini API - never log this string
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model_id(),
            self.api_key
        )
    }
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("max_retry_elapsed", &self.max_retry_elapsed)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(http: reqwest::Client, config: GeminiConfig) -> Self {
        GeminiClient { http, config }
    }

    pub fn model(&self) -> &str {
        self.config.model_id()
    }

    /// Call Gemini API with exponential backoff retry for transient failures
    #[instrument(skip(self, prompt), fields(model = %self.model(), prompt_len = prompt.len()))]
    pub async fn generate(&self, prompt: &str) -> Result<String, GeminiError> {
        if self.config.max_retry_elapsed.is_zero() {
            return self.generate_once(prompt).await;
        }

        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.config.max_retry_elapsed),
            ..Default::default()
        };

        retry(backoff, move || async move {
            self.generate_once(prompt).await.map_err(|e| {
                // Retry on transient errors (network, rate limits, server errors)
                if e.is_transient() {
                    warn!(error = %e, "Transient Gemini error, retrying");
                    backoff::Error::transient(e)
                } else {
                    error!(error = %e, "Permanent Gemini error, not retrying");
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
    }

    async fn generate_once(&self, prompt: &str) -> Result<String, GeminiError> {
        let request = GeminiRequest::from_prompt(prompt);

        debug!("Sending request to Gemini API");

        let res = self.http.post(self.config.endpoint())
            .json(&request)
            .send()
            .await?;

        let status = res.status();
        debug!(status = %status, "Gemini API response received");

        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(GeminiError::Status { status: status.as_u16(), body });
        }

        let resp: GeminiResponse = res.json().await?;
        resp.into_text()
    }
}
