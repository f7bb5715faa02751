//! Single-request execution with retry and streaming response parsing

use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::Serialize;

use crate::config::LoadConfig;
use crate::error::{Error, Result};
use crate::messages::ChatMessage;
use crate::payload::ChatCompletionBody;
use crate::stream::{parse_frame, Delta, Frame, LineBuffer};

/// Server-assigned request id header (Azure API management)
pub const REQUEST_ID_HEADER: &str = "apim-request-id";

/// Millisecond retry hint sent with 429 responses
pub const RETRY_AFTER_MS_HEADER: &str = "retry-after-ms";

/// Telemetry user-agent header
pub const TELEMETRY_USER_AGENT_HEADER: &str = "x-ms-useragent";

/// Telemetry user-agent value
pub const USER_AGENT: &str = "chatload";

/// Monotonic clock shared by every component of one run
///
/// All timestamps are offsets in seconds from the run origin, so differences
/// between any two of them are meaningful.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    /// Anchor a new clock at the current instant.
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Seconds elapsed since the run origin.
    pub fn elapsed_secs(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Statistics collected for one logical request
///
/// Timestamps are seconds since the run clock's origin; `response_end_time`
/// is always populated once `Requester::call` returns, so callers can compute
/// latency without branching on the outcome.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestStats {
    /// When the (last) HTTP attempt started
    pub request_start_time: Option<f64>,
    /// HTTP status of the last attempt, 0 until a response was obtained
    pub response_status_code: u16,
    /// When response headers were received
    pub response_time: Option<f64>,
    /// When the first content fragment arrived
    pub first_token_time: Option<f64>,
    /// When the exchange finished, success or not
    pub response_end_time: Option<f64>,
    /// Input size of this request, set by the caller
    pub context_tokens: usize,
    /// Content increments observed in the stream; None if none arrived
    pub generated_tokens: Option<usize>,
    /// HTTP attempts made, including retries
    pub calls: u32,
    /// Captured failure description, if any
    pub last_error: Option<String>,
    /// Request messages, retained only under content logging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_messages: Option<Vec<ChatMessage>>,
    /// Streamed output, retained only under content logging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_content: Option<Vec<ChatMessage>>,
}

/// Retry policy for throttled and transport-failed attempts
///
/// 429 is the only retryable HTTP status; transport errors are retryable
/// under the same total budget regardless of the throttle-retry setting.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Whether 429 responses are retried at all
    pub retry_throttled: bool,
    /// Total retry budget per logical request
    pub budget: Duration,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Cap on a single backoff delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy that never retries throttled responses.
    pub fn none() -> Self {
        Self {
            retry_throttled: false,
            ..Self::exponential()
        }
    }

    /// Exponential backoff with full jitter, bounded by a 60 s budget.
    pub fn exponential() -> Self {
        Self {
            retry_throttled: true,
            budget: Duration::from_secs(60),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }

    /// Backoff delay for the given zero-based attempt, with full jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max_delay);
        exp.mul_f64(fastrand::f64())
    }

    fn is_retryable(&self, err: &Error) -> bool {
        if !self.retry_throttled {
            return false;
        }
        match err {
            Error::Http(_) => true,
            Error::Status { status, .. } => *status == 429,
            _ => false,
        }
    }
}

/// Executes one streaming chat-completion exchange and collects statistics
///
/// `call` never fails: internal errors are captured into the returned
/// `RequestStats`.
pub struct Requester {
    client: reqwest::Client,
    url: String,
    api_key: String,
    bearer_auth: bool,
    policy: RetryPolicy,
    strict: bool,
    clock: Clock,
    log_content: bool,
}

impl Requester {
    /// Build a requester for the configured endpoint.
    pub fn new(config: &LoadConfig, clock: Clock) -> Result<Self> {
        // No overall request timeout: streams legitimately run for minutes.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(config.clients.max(32))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        let policy = match config.retry {
            crate::config::RetryMode::Exponential => RetryPolicy::exponential(),
            crate::config::RetryMode::None => RetryPolicy::none(),
        };

        Ok(Self {
            client,
            url: config.url(),
            api_key: config.api_key.clone(),
            bearer_auth: config.is_openai_host(),
            strict: policy.retry_throttled,
            policy,
            clock,
            log_content: config.log_request_content,
        })
    }

    /// The run clock this requester stamps timestamps from.
    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// Make a single logical call and return its statistics.
    ///
    /// The request is forced into streaming mode so token-generation latency
    /// can be observed. Throttled responses are retried per the policy; any
    /// other failure is recorded on the stats. `response_end_time` is set
    /// before returning on every path.
    pub async fn call(&self, mut body: ChatCompletionBody) -> RequestStats {
        let mut stats = RequestStats::default();
        if self.log_content {
            stats.input_messages = Some(body.messages.clone());
        }
        body.stream = true;

        if let Err(err) = self.call_with_backoff(&body, &mut stats).await {
            stats.last_error = Some(err.to_string());
        }
        if stats.response_end_time.is_none() {
            stats.response_end_time = Some(self.clock.elapsed_secs());
        }
        stats
    }

    /// Retry loop around `attempt` for transport errors and throttled
    /// responses that carried no retry hint.
    async fn call_with_backoff(
        &self,
        body: &ChatCompletionBody,
        stats: &mut RequestStats,
    ) -> Result<()> {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            match self.attempt(body, stats).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if !self.policy.is_retryable(&err) {
                        return Err(err);
                    }
                    if started.elapsed() >= self.policy.budget {
                        return Err(match err {
                            Error::Status { status, .. } => Error::RetriesExhausted {
                                budget: self.policy.budget,
                                calls: stats.calls,
                                status,
                            },
                            other => other,
                        });
                    }
                    let delay = self.policy.backoff_delay(attempt);
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// One HTTP attempt, including same-attempt retry-after-ms waits.
    async fn attempt(&self, body: &ChatCompletionBody, stats: &mut RequestStats) -> Result<()> {
        stats.request_start_time = Some(self.clock.elapsed_secs());
        let attempt_started = Instant::now();

        let response = loop {
            stats.calls += 1;
            let mut request = self
                .client
                .post(&self.url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .header(TELEMETRY_USER_AGENT_HEADER, USER_AGENT);
            request = if self.bearer_auth {
                request.bearer_auth(&self.api_key)
            } else {
                request.header("api-key", &self.api_key)
            };
            let response = request.json(body).send().await?;
            stats.response_status_code = response.status().as_u16();

            if stats.response_status_code != 429 || !self.policy.retry_throttled {
                break response;
            }
            let Some(retry_after_ms) = retry_after_hint(&response) else {
                // No usable hint: fall back to generic backoff.
                break response;
            };
            if attempt_started.elapsed() >= self.policy.budget {
                break response;
            }
            tracing::debug!(retry_after_ms, "server throttled, honoring retry-after hint");
            tokio::time::sleep(Duration::from_secs_f64(retry_after_ms / 1000.0)).await;
        };

        let status = stats.response_status_code;
        if status != 200 {
            stats.response_end_time = Some(self.clock.elapsed_secs());
        }
        if status != 200 && status != 429 {
            tracing::warn!(
                status,
                request_id = ?header_str(&response, REQUEST_ID_HEADER),
                "call failed"
            );
        }
        if self.strict && status != 200 {
            return Err(Error::Status {
                status,
                request_id: header_str(&response, REQUEST_ID_HEADER),
            });
        }
        if status == 200 {
            self.consume_stream(response, stats).await?;
        }
        Ok(())
    }

    /// Drain the streamed response body, collecting token timing.
    async fn consume_stream(
        &self,
        response: reqwest::Response,
        stats: &mut RequestStats,
    ) -> Result<()> {
        stats.response_time = Some(self.clock.elapsed_secs());

        let mut output: Vec<ChatMessage> = Vec::new();
        let mut buffer = LineBuffer::new();
        let mut stream = response.bytes_stream();

        let result: Result<()> = async {
            'body: while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                for line in buffer.feed(&chunk) {
                    match parse_frame(&line) {
                        Frame::Done => break 'body,
                        Frame::Delta(delta) => self.apply_delta(delta, &mut output, stats),
                        Frame::Skip => {}
                    }
                }
            }
            Ok(())
        }
        .await;

        // Always stamp the end, even when the stream errored mid-body.
        stats.response_end_time = Some(self.clock.elapsed_secs());
        if self.log_content && !output.is_empty() {
            stats.output_content = Some(output);
        }
        result
    }

    /// Fold one delta frame into the accumulated output.
    fn apply_delta(&self, delta: Delta, output: &mut Vec<ChatMessage>, stats: &mut RequestStats) {
        stats.generated_tokens.get_or_insert(0);

        if let Some(role) = delta.role {
            output.push(ChatMessage::empty(role));
        } else if let Some(content) = delta.content {
            if stats.first_token_time.is_none() {
                stats.first_token_time = Some(self.clock.elapsed_secs());
            }
            if output.is_empty() {
                // Content before any role frame: open an entry anyway rather
                // than faulting the whole call.
                output.push(ChatMessage::empty(""));
            }
            if let Some(entry) = output.last_mut() {
                entry.content.push_str(&content);
            }
            stats.generated_tokens = Some(stats.generated_tokens.unwrap_or(0) + 1);
        }
    }
}

impl std::fmt::Debug for Requester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Requester")
            .field("url", &self.url)
            .field("bearer_auth", &self.bearer_auth)
            .field("policy", &self.policy)
            .field("strict", &self.strict)
            .finish()
    }
}

fn retry_after_hint(response: &reqwest::Response) -> Option<f64> {
    let raw = response.headers().get(RETRY_AFTER_MS_HEADER)?.to_str().ok()?;
    match raw.parse::<f64>() {
        Ok(ms) if ms >= 0.0 => Some(ms),
        _ => {
            tracing::warn!(value = raw, "unable to parse retry-after header value");
            None
        }
    }
}

fn header_str(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
