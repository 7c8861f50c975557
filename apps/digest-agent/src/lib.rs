//! Daily news digest: read a news feed, let Gemini pick and summarize the
//! important stories, push the result to LINE.

pub mod config;
pub mod digest;
pub mod fetcher;
pub mod message;
pub mod notifier;
pub mod pipeline;

pub use config::{Config, ConfigError};
pub use pipeline::{Pipeline, PipelineSettings, RunOutcome};
