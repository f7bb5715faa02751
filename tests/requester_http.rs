//! End-to-end requester behavior against a mock HTTP endpoint

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chatload::config::{LoadConfig, RetryMode};
use chatload::messages::RandomMessageSource;
use chatload::payload::RequestBuilder;
use chatload::requester::{Clock, Requester};

const DEPLOYMENT_PATH: &str = "/openai/deployments/gpt-4o/chat/completions";

fn config_for(server: &MockServer, retry: RetryMode) -> LoadConfig {
    LoadConfig {
        api_base_endpoint: server.uri(),
        api_key: "secret".into(),
        deployment: "gpt-4o".into(),
        context_tokens: 10,
        retry,
        ..Default::default()
    }
}

fn requester_for(config: &LoadConfig) -> Requester {
    Requester::new(config, Clock::start()).expect("requester")
}

fn payload_for(config: &LoadConfig) -> chatload::payload::ChatCompletionBody {
    let source = Arc::new(RandomMessageSource::new(config.context_tokens, false));
    RequestBuilder::from_config(config, source).next_payload().0
}

fn sse_body() -> String {
    [
        r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
        "",
        r#"data: {"choices":[{"delta":{"content":"A"}}]}"#,
        "",
        ": keep-alive comment line",
        "data: {not valid json",
        r#"data: {"choices":[{"delta":{"content":"B"}}]}"#,
        "",
        "data: [DONE]",
        "",
    ]
    .join("\n")
}

#[tokio::test]
async fn stream_success_collects_token_timing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DEPLOYMENT_PATH))
        .and(header("api-key", "secret"))
        .and(header("x-ms-useragent", "chatload"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body(), "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = config_for(&server, RetryMode::None);
    config.log_request_content = true;
    let requester = requester_for(&config);

    let stats = requester.call(payload_for(&config)).await;

    assert_eq!(stats.response_status_code, 200);
    assert_eq!(stats.calls, 1);
    assert_eq!(stats.last_error, None);
    // The malformed frame and the comment line are skipped, not fatal.
    assert_eq!(stats.generated_tokens, Some(2));
    assert!(stats.first_token_time.is_some());
    assert!(stats.response_time.is_some());
    assert!(stats.response_end_time.is_some());
    assert!(stats.first_token_time <= stats.response_end_time);

    let output = stats.output_content.expect("content logging enabled");
    assert_eq!(output.len(), 1);
    assert_eq!(output[0].role, "assistant");
    assert_eq!(output[0].content, "AB");
    assert!(stats.input_messages.is_some());
}

#[tokio::test]
async fn throttled_request_honors_retry_after_hint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DEPLOYMENT_PATH))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after-ms", "150"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(DEPLOYMENT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body(), "text/event-stream"))
        .mount(&server)
        .await;

    let config = config_for(&server, RetryMode::Exponential);
    let requester = requester_for(&config);

    let started = Instant::now();
    let stats = requester.call(payload_for(&config)).await;

    assert_eq!(stats.response_status_code, 200);
    assert_eq!(stats.calls, 2);
    assert_eq!(stats.last_error, None);
    // The second attempt must not start before the hinted delay.
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn throttled_request_without_retry_records_and_returns() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DEPLOYMENT_PATH))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after-ms", "50"))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server, RetryMode::None);
    let requester = requester_for(&config);

    let stats = requester.call(payload_for(&config)).await;

    assert_eq!(stats.response_status_code, 429);
    assert_eq!(stats.calls, 1);
    assert_eq!(stats.last_error, None);
    assert!(stats.response_end_time.is_some());
}

#[tokio::test]
async fn terminal_server_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(DEPLOYMENT_PATH))
        .respond_with(ResponseTemplate::new(500).insert_header("apim-request-id", "req-123"))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server, RetryMode::Exponential);
    let requester = requester_for(&config);

    let stats = requester.call(payload_for(&config)).await;

    assert_eq!(stats.response_status_code, 500);
    assert_eq!(stats.calls, 1);
    let error = stats.last_error.expect("strict mode surfaces the failure");
    assert!(error.contains("500"));
    assert!(error.contains("req-123"));
    assert!(stats.response_end_time.is_some());
}

#[tokio::test]
async fn transport_error_still_sets_end_time() {
    // Nothing listens here; the connection is refused immediately.
    let config = LoadConfig {
        api_base_endpoint: "http://127.0.0.1:9".into(),
        api_key: "secret".into(),
        deployment: "gpt-4o".into(),
        retry: RetryMode::None,
        ..Default::default()
    };
    let requester = requester_for(&config);

    let stats = requester.call(payload_for(&config)).await;

    assert_eq!(stats.response_status_code, 0);
    assert!(stats.last_error.is_some());
    assert!(stats.response_end_time.is_some());
}

#[tokio::test]
async fn bearer_auth_used_for_openai_hosts() {
    // An openai.com-style host takes the endpoint as the full URL, so the
    // mock matches the bare root path here.
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body(), "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let config = LoadConfig {
        // Detection keys off the host string, exercised via the query side.
        api_base_endpoint: format!("{}/?host=openai.com", server.uri()),
        api_key: "secret".into(),
        deployment: "gpt-4o".into(),
        retry: RetryMode::None,
        ..Default::default()
    };
    assert!(config.is_openai_host());
    let requester = requester_for(&config);

    let stats = requester.call(payload_for(&config)).await;
    assert_eq!(stats.response_status_code, 200);
    assert_eq!(stats.generated_tokens, Some(2));
}
