use std::io::Write;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::config::{TransportConfig, TransportKind};

/// LINE rejects text messages longer than this
const LINE_TEXT_LIMIT: usize = 5000;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint rejected message with {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("failed to write message: {0}")]
    Io(#[from] std::io::Error),
}

/// Delivers a finished digest somewhere a human will read it.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, message: &str) -> Result<(), NotifyError>;
}

pub fn build_notifier(config: &TransportConfig, client: reqwest::Client) -> Box<dyn Notifier> {
    match config.kind {
        TransportKind::Broadcast => Box::new(BroadcastNotifier::new(client, &config.endpoint, &config.token)),
        TransportKind::LegacyNotify => Box::new(LegacyNotifier::new(client, &config.endpoint, &config.token)),
        TransportKind::Stdout => Box::new(StdoutNotifier),
    }
}

// --- LINE Messaging API broadcast ---

#[derive(Serialize, Debug)]
struct BroadcastRequest<'a> {
    messages: Vec<TextMessage<'a>>,
}

#[derive(Serialize, Debug)]
struct TextMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

pub struct BroadcastNotifier {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl BroadcastNotifier {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        BroadcastNotifier {
            client,
            endpoint: endpoint.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    #[instrument(skip(self, message), fields(message_chars = message.chars().count()))]
    async fn send(&self, message: &str) -> Result<(), NotifyError> {
        if message.chars().count() > LINE_TEXT_LIMIT {
            warn!(limit = LINE_TEXT_LIMIT, "Message exceeds LINE text limit, sending anyway");
        }

        let request = BroadcastRequest {
            messages: vec![TextMessage { kind: "text", text: message }],
        };

        let res = self.client.post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await?;

        let status = res.status();
        if status.is_success() {
            info!(status = %status, "LINE broadcast delivered");
            return Ok(());
        }

        let body = res.text().await.unwrap_or_default();
        error!(status = status.as_u16(), body = %body, "LINE broadcast failed");
        Err(NotifyError::Rejected { status: status.as_u16(), body })
    }
}

// --- LINE Notify (legacy) ---

pub struct LegacyNotifier {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl LegacyNotifier {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        LegacyNotifier {
            client,
            endpoint: endpoint.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl Notifier for LegacyNotifier {
    fn name(&self) -> &'static str {
        "legacy"
    }

    #[instrument(skip(self, message), fields(message_chars = message.chars().count()))]
    async fn send(&self, message: &str) -> Result<(), NotifyError> {
        // Notify prefixes the bot name, so start the text on its own line
        let text = format!("\n{}", message);

        let res = self.client.post(&self.endpoint)
            .bearer_auth(&self.token)
            .form(&[("message", text.as_str())])
            .send()
            .await?;

        let status = res.status();
        if status.is_success() {
            info!(status = %status, "LINE Notify delivered");
            return Ok(());
        }

        let body = res.text().await.unwrap_or_default();
        error!(status = status.as_u16(), body = %body, "LINE Notify failed");
        Err(NotifyError::Rejected { status: status.as_u16(), body })
    }
}

// --- Console ---

pub struct StdoutNotifier;

#[async_trait]
impl Notifier for StdoutNotifier {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn send(&self, message: &str) -> Result<(), NotifyError> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", message)?;
        out.flush()?;
        Ok(())
    }
}
