use gemini_engine::{init_logging, GeminiClient};
use news_digest_agent::digest::GeminiSummarizer;
use news_digest_agent::fetcher::HttpFeedSource;
use news_digest_agent::notifier::build_notifier;
use news_digest_agent::{Config, Pipeline, PipelineSettings, RunOutcome};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            // Misconfigured runs end quietly: no feed, model or messaging call
            error!(error = %e, "Configuration incomplete, exiting without sending");
            return Ok(());
        }
    };

    info!(
        feed = %config.feed_url,
        transport = ?config.transport.kind,
        model = %config.gemini.model,
        "Starting News Digest Agent"
    );

    // Shared HTTP client (reused for connection pooling)
    let http_client = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()?;

    let pipeline = Pipeline::new(
        Box::new(HttpFeedSource::new(http_client.clone(), &config.feed_url, config.max_entries)),
        Box::new(GeminiSummarizer::new(
            GeminiClient::new(http_client.clone(), config.gemini.clone()),
            config.template.clone(),
        )),
        build_notifier(&config.transport, http_client),
        PipelineSettings::from(&config),
    );

    match pipeline.run().await {
        RunOutcome::Delivered => info!("News Digest Agent completed successfully"),
        outcome => warn!(?outcome, "News Digest Agent finished without delivering a digest"),
    }

    Ok(())
}
