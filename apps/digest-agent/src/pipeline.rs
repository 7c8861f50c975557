use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::config::{Config, DateZone, SummaryFailurePolicy};
use crate::digest::Summarizer;
use crate::fetcher::{render_entries, FeedSource};
use crate::message::{compose_message, error_body};
use crate::notifier::Notifier;

/// How a single run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Feed failed or was empty; nothing downstream was called
    NoNews,
    /// Model failed and the failure was not delivered
    SummaryFailed,
    Delivered,
    /// Message was built but the transport did not accept it
    DeliveryFailed,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub header_title: String,
    pub date_zone: DateZone,
    pub on_summary_failure: SummaryFailurePolicy,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        PipelineSettings {
            header_title: config.header_title.clone(),
            date_zone: config.date_zone,
            on_summary_failure: config.on_summary_failure,
        }
    }
}

/// fetch → summarize → format → notify, each step gated on the previous one.
pub struct Pipeline {
    source: Box<dyn FeedSource>,
    summarizer: Box<dyn Summarizer>,
    notifier: Box<dyn Notifier>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn FeedSource>,
        summarizer: Box<dyn Summarizer>,
        notifier: Box<dyn Notifier>,
        settings: PipelineSettings,
    ) -> Self {
        Pipeline { source, summarizer, notifier, settings }
    }

    pub async fn run(&self) -> RunOutcome {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> RunOutcome {
        info!("Fetching news feed");
        let entries = match self.source.fetch().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "No news fetched, nothing to send");
                return RunOutcome::NoNews;
            }
        };
        info!(count = entries.len(), "Fetched news entries");

        info!("Summarizing with Gemini");
        let body = match self.summarizer.summarize(&render_entries(&entries)).await {
            Ok(digest) => digest,
            Err(e) => match self.settings.on_summary_failure {
                SummaryFailurePolicy::Suppress => {
                    error!(error = %e, "Digest generation failed, notification suppressed");
                    return RunOutcome::SummaryFailed;
                }
                SummaryFailurePolicy::Deliver => {
                    error!(error = %e, "Digest generation failed, delivering error text");
                    error_body(&e)
                }
            },
        };

        let date = self.settings.date_zone.format_date(now);
        let message = compose_message(&self.settings.header_title, &date, &body);

        info!(transport = self.notifier.name(), date = %date, "Sending digest");
        match self.notifier.send(&message).await {
            Ok(()) => RunOutcome::Delivered,
            Err(e) => {
                warn!(transport = self.notifier.name(), error = %e, "Digest delivery failed");
                RunOutcome::DeliveryFailed
            }
        }
    }
}
