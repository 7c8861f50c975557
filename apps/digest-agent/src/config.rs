use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local, Utc};
use gemini_engine::GeminiConfig;
use thiserror::Error;

use crate::digest::{EditorialPolicy, PromptTemplate};

// --- Configuration Constants ---
pub const DEFAULT_FEED_URL: &str = "https://news.web.nhk/n-data/conf/na/rss/cat0.xml";
pub const DEFAULT_MAX_ENTRIES: usize = 15;
pub const DEFAULT_HEADER_TITLE: &str = "NHK重要ニュース";
pub const LEGACY_NOTIFY_URL: &str = "https://notify-api.line.me/api/notify";
pub const BROADCAST_URL: &str = "https://api.line.me/v2/bot/message/broadcast";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_GEMINI_RETRY_SECS: u64 = 60;
const DEFAULT_TIMEZONE: &str = "+09:00";
const DATE_FORMAT: &str = "%Y/%m/%d";

const GEMINI_API_KEY: &str = "GEMINI_API_KEY";
const LINE_NOTIFY_TOKEN: &str = "LINE_NOTIFY_TOKEN";
const LINE_CHANNEL_ACCESS_TOKEN: &str = "LINE_CHANNEL_ACCESS_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    MissingSecret(&'static str),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read prompt template {path}: {source}")]
    TemplateIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Which messaging backend delivers the digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// LINE Messaging API broadcast (JSON body)
    Broadcast,
    /// LINE Notify (form body)
    LegacyNotify,
    /// Print to standard output; for dry runs
    Stdout,
}

impl TransportKind {
    /// Environment variable holding the bearer token, if the transport needs one.
    pub fn token_var(self) -> Option<&'static str> {
        match self {
            TransportKind::Broadcast => Some(LINE_CHANNEL_ACCESS_TOKEN),
            TransportKind::LegacyNotify => Some(LINE_NOTIFY_TOKEN),
            TransportKind::Stdout => None,
        }
    }

    pub fn default_endpoint(self) -> &'static str {
        match self {
            TransportKind::Broadcast => BROADCAST_URL,
            TransportKind::LegacyNotify => LEGACY_NOTIFY_URL,
            TransportKind::Stdout => "",
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "broadcast" => Ok(TransportKind::Broadcast),
            "legacy" | "notify" => Ok(TransportKind::LegacyNotify),
            "stdout" => Ok(TransportKind::Stdout),
            other => Err(format!("unknown transport '{}', expected broadcast, legacy or stdout", other)),
        }
    }
}

#[derive(Clone)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub endpoint: String,
    pub token: String,
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Clock used for the date line of the digest header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateZone {
    /// Whatever timezone the scheduler host runs in
    Local,
    Fixed(FixedOffset),
}

impl DateZone {
    pub fn format_date(&self, now: DateTime<Utc>) -> String {
        match self {
            DateZone::Local => now.with_timezone(&Local).format(DATE_FORMAT).to_string(),
            DateZone::Fixed(offset) => now.with_timezone(offset).format(DATE_FORMAT).to_string(),
        }
    }
}

impl FromStr for DateZone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "local" => return Ok(DateZone::Local),
            "utc" | "z" => return Ok(DateZone::Fixed(FixedOffset::east_opt(0).ok_or("bad offset")?)),
            "jst" | "asia/tokyo" => {
                return Ok(DateZone::Fixed(FixedOffset::east_opt(9 * 3600).ok_or("bad offset")?))
            }
            _ => {}
        }
        s.parse::<FixedOffset>()
            .map(DateZone::Fixed)
            .map_err(|e| format!("expected 'local' or an offset like +09:00 ({})", e))
    }
}

/// What to do when the model call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryFailurePolicy {
    /// Log the failure and send nothing
    Suppress,
    /// Send the error description in place of the digest
    Deliver,
}

impl FromStr for SummaryFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "suppress" => Ok(SummaryFailurePolicy::Suppress),
            "deliver" => Ok(SummaryFailurePolicy::Deliver),
            other => Err(format!("unknown policy '{}', expected suppress or deliver", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub feed_url: String,
    pub max_entries: usize,
    pub gemini: GeminiConfig,
    pub transport: TransportConfig,
    pub template: PromptTemplate,
    pub header_title: String,
    pub date_zone: DateZone,
    pub on_summary_failure: SummaryFailurePolicy,
    pub http_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key/value source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        // Secrets first: nothing else matters if a credential is missing
        let api_key = get(GEMINI_API_KEY).ok_or(ConfigError::MissingSecret(GEMINI_API_KEY))?;

        let kind: TransportKind = parse_or(&get, "NOTIFY_TRANSPORT", TransportKind::Broadcast)?;
        let token = match kind.token_var() {
            Some(var) => get(var).ok_or(ConfigError::MissingSecret(var))?,
            None => String::new(),
        };
        let endpoint = get("NOTIFY_ENDPOINT").unwrap_or_else(|| kind.default_endpoint().to_string());

        let feed_url = get("FEED_URL").unwrap_or_else(|| DEFAULT_FEED_URL.to_string());
        url::Url::parse(&feed_url).map_err(|e| ConfigError::Invalid {
            key: "FEED_URL",
            value: feed_url.clone(),
            reason: e.to_string(),
        })?;

        let max_entries: usize = parse_or(&get, "FEED_MAX_ENTRIES", DEFAULT_MAX_ENTRIES)?;
        if max_entries == 0 {
            return Err(ConfigError::Invalid {
                key: "FEED_MAX_ENTRIES",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let retry_secs: u64 = parse_or(&get, "GEMINI_RETRY_SECS", DEFAULT_GEMINI_RETRY_SECS)?;
        let mut gemini = GeminiConfig::new(api_key)
            .with_max_retry_elapsed(Duration::from_secs(retry_secs));
        if let Some(model) = get("GEMINI_MODEL") {
            gemini = gemini.with_model(model);
        }
        if let Some(base_url) = get("GEMINI_BASE_URL") {
            gemini = gemini.with_base_url(base_url);
        }

        let template = match get("PROMPT_TEMPLATE_PATH") {
            Some(path) => {
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::TemplateIo {
                    path: path.clone(),
                    source,
                })?;
                PromptTemplate::custom(text).ok_or_else(|| ConfigError::Invalid {
                    key: "PROMPT_TEMPLATE_PATH",
                    value: path,
                    reason: format!("template does not contain {}", PromptTemplate::PLACEHOLDER),
                })?
            }
            None => {
                let policy: EditorialPolicy = parse_or(&get, "EDITORIAL_POLICY", EditorialPolicy::General)?;
                PromptTemplate::for_policy(policy)
            }
        };

        let zone_spec = get("DIGEST_TIMEZONE").unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        let date_zone: DateZone = zone_spec.parse().map_err(|reason| ConfigError::Invalid {
            key: "DIGEST_TIMEZONE",
            value: zone_spec.clone(),
            reason,
        })?;

        let timeout_secs: u64 = parse_or(&get, "HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "HTTP_TIMEOUT_SECS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let http_timeout = Duration::from_secs(timeout_secs);

        Ok(Config {
            feed_url,
            max_entries,
            gemini,
            transport: TransportConfig { kind, endpoint, token },
            template,
            header_title: get("DIGEST_HEADER").unwrap_or_else(|| DEFAULT_HEADER_TITLE.to_string()),
            date_zone,
            on_summary_failure: parse_or(&get, "ON_SUMMARY_FAILURE", SummaryFailurePolicy::Suppress)?,
            http_timeout,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
        None => Ok(default),
    }
}
