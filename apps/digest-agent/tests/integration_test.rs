use chrono::{TimeZone, Utc};
use gemini_engine::GeminiClient;
use news_digest_agent::digest::GeminiSummarizer;
use news_digest_agent::fetcher::HttpFeedSource;
use news_digest_agent::notifier::build_notifier;
use news_digest_agent::{Config, ConfigError, Pipeline, PipelineSettings, RunOutcome};
use serial_test::serial;
use std::collections::HashMap;
use wiremock::matchers::{body_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DIGEST: &str = "📰 一つ目の見出し\n一つ目の要約です。\n🔗 https://news.example.jp/1.html\n\n\
📰 二つ目の見出し\n二つ目の要約です。\n🔗 https://news.example.jp/2.html\n\n\
📰 三つ目の見出し\n三つ目の要約です。\n🔗 https://news.example.jp/3.html";

const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>NHKニュース</title>
    <link>https://news.example.jp</link>
    <description>主要ニュース</description>
    <item><title>一つ目の見出し</title><link>https://news.example.jp/1.html</link></item>
    <item><title>二つ目の見出し</title><link>https://news.example.jp/2.html</link></item>
    <item><title>三つ目の見出し</title><link>https://news.example.jp/3.html</link></item>
  </channel>
</rss>"#;

fn gemini_reply(text: &str) -> serde_json::Value {
    serde_json::json!({
        "candidates": [{ "content": { "parts": [{ "text": text }] } }]
    })
}

fn config_for(server: &MockServer, extra: &[(&str, String)]) -> Config {
    let mut vars: HashMap<String, String> = HashMap::from([
        ("GEMINI_API_KEY".to_string(), "test-key".to_string()),
        ("LINE_CHANNEL_ACCESS_TOKEN".to_string(), "channel-token".to_string()),
        ("LINE_NOTIFY_TOKEN".to_string(), "notify-token".to_string()),
        ("FEED_URL".to_string(), format!("{}/rss/cat0.xml", server.uri())),
        ("GEMINI_BASE_URL".to_string(), server.uri()),
        ("GEMINI_MODEL".to_string(), "gemini-pro".to_string()),
        ("GEMINI_RETRY_SECS".to_string(), "0".to_string()),
    ]);
    for (key, value) in extra {
        vars.insert(key.to_string(), value.clone());
    }
    Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

fn pipeline_for(config: &Config) -> Pipeline {
    let http_client = reqwest::Client::new();
    Pipeline::new(
        Box::new(HttpFeedSource::new(http_client.clone(), &config.feed_url, config.max_entries)),
        Box::new(GeminiSummarizer::new(
            GeminiClient::new(http_client.clone(), config.gemini.clone()),
            config.template.clone(),
        )),
        build_notifier(&config.transport, http_client),
        PipelineSettings::from(config),
    )
}

async fn mount_feed(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/rss/cat0.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

// 2025-01-14 20:00 UTC is already the 15th in Japan
fn run_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 14, 20, 0, 0).unwrap()
}

#[tokio::test]
async fn test_end_to_end_broadcast() {
    let server = MockServer::start().await;
    mount_feed(&server, FEED).await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-pro:generateContent"))
        .and(body_string_contains("・一つ目の見出し (https://news.example.jp/1.html)"))
        .and(body_string_contains("・三つ目の見出し (https://news.example.jp/3.html)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply(DIGEST)))
        .expect(1)
        .mount(&server)
        .await;

    let expected_message = format!("【NHK重要ニュース】\n\n2025/01/15\n\n{}", DIGEST);
    Mock::given(method("POST"))
        .and(path("/v2/bot/message/broadcast"))
        .and(header("authorization", "Bearer channel-token"))
        .and(body_json(serde_json::json!({
            "messages": [{ "type": "text", "text": expected_message }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(
        &server,
        &[("NOTIFY_ENDPOINT", format!("{}/v2/bot/message/broadcast", server.uri()))],
    );

    assert_eq!(pipeline_for(&config).run_at(run_time()).await, RunOutcome::Delivered);
}

#[tokio::test]
async fn test_end_to_end_legacy_notify() {
    let server = MockServer::start().await;
    mount_feed(&server, FEED).await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-pro:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply(DIGEST)))
        .mount(&server)
        .await;

    // "\n【" form-encoded
    Mock::given(method("POST"))
        .and(path("/api/notify"))
        .and(header("authorization", "Bearer notify-token"))
        .and(body_string_contains("message=%0A%E3%80%90NHK"))
        .and(body_string_contains("2025%2F01%2F15"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": 200, "message": "ok"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(
        &server,
        &[
            ("NOTIFY_TRANSPORT", "legacy".to_string()),
            ("NOTIFY_ENDPOINT", format!("{}/api/notify", server.uri())),
        ],
    );

    assert_eq!(pipeline_for(&config).run_at(run_time()).await, RunOutcome::Delivered);
}

#[tokio::test]
async fn test_empty_feed_makes_no_downstream_calls() {
    let server = MockServer::start().await;
    mount_feed(
        &server,
        r#"<rss version="2.0"><channel><title>t</title><link>l</link><description>d</description></channel></rss>"#,
    )
    .await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = config_for(
        &server,
        &[("NOTIFY_ENDPOINT", format!("{}/v2/bot/message/broadcast", server.uri()))],
    );

    assert_eq!(pipeline_for(&config).run_at(run_time()).await, RunOutcome::NoNews);
}

#[tokio::test]
async fn test_feed_outage_makes_no_downstream_calls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = config_for(&server, &[]);

    assert_eq!(pipeline_for(&config).run_at(run_time()).await, RunOutcome::NoNews);
}

#[tokio::test]
async fn test_model_failure_delivered_as_error_text() {
    let server = MockServer::start().await;
    mount_feed(&server, FEED).await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-pro:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "error": { "message": "API key not valid" }
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v2/bot/message/broadcast"))
        .and(body_string_contains("AI生成エラー"))
        .and(body_string_contains("API key not valid"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(
        &server,
        &[
            ("ON_SUMMARY_FAILURE", "deliver".to_string()),
            ("NOTIFY_ENDPOINT", format!("{}/v2/bot/message/broadcast", server.uri())),
        ],
    );

    assert_eq!(pipeline_for(&config).run_at(run_time()).await, RunOutcome::Delivered);
}

#[tokio::test]
async fn test_model_failure_suppressed_by_default() {
    let server = MockServer::start().await;
    mount_feed(&server, FEED).await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-pro:generateContent"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/bot/message/broadcast"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = config_for(
        &server,
        &[("NOTIFY_ENDPOINT", format!("{}/v2/bot/message/broadcast", server.uri()))],
    );

    assert_eq!(pipeline_for(&config).run_at(run_time()).await, RunOutcome::SummaryFailed);
}

#[tokio::test]
async fn test_broadcast_rejection_does_not_fail_run() {
    let server = MockServer::start().await;
    mount_feed(&server, FEED).await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-pro:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply(DIGEST)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/bot/message/broadcast"))
        .respond_with(ResponseTemplate::new(429).set_body_string(r#"{"message":"You have reached your monthly limit."}"#))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(
        &server,
        &[("NOTIFY_ENDPOINT", format!("{}/v2/bot/message/broadcast", server.uri()))],
    );

    assert_eq!(pipeline_for(&config).run_at(run_time()).await, RunOutcome::DeliveryFailed);
}

#[test]
#[serial]
fn test_from_env_requires_secrets() {
    std::env::remove_var("GEMINI_API_KEY");
    std::env::set_var("LINE_CHANNEL_ACCESS_TOKEN", "channel-token");

    assert!(matches!(
        Config::from_env(),
        Err(ConfigError::MissingSecret("GEMINI_API_KEY"))
    ));

    std::env::set_var("GEMINI_API_KEY", "test-key");
    let config = Config::from_env().unwrap();
    assert_eq!(config.transport.token, "channel-token");

    std::env::remove_var("GEMINI_API_KEY");
    std::env::remove_var("LINE_CHANNEL_ACCESS_TOKEN");
}
