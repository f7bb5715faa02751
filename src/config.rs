//! Run configuration and validation

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Retry behavior for throttled (429) responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    /// Record the 429 and give up
    #[default]
    None,
    /// Honor retry-after-ms hints, otherwise exponential backoff with jitter
    Exponential,
}

/// Periodic snapshot output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Human-readable key-value line
    #[default]
    Human,
    /// One JSON object per tick
    Jsonl,
}

/// Resolved configuration for one load run
///
/// Callers (the CLI, or an embedding front-end) are responsible for
/// collecting these values; the core only consumes them after `validate()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Base endpoint, e.g. `https://myresource.openai.azure.com`
    /// or `https://api.openai.com/v1/chat/completions`
    pub api_base_endpoint: String,

    /// API key (bearer token for openai.com hosts)
    #[serde(skip_serializing)]
    pub api_key: String,

    /// API version query parameter (Azure-style hosts only)
    pub api_version: String,

    /// Deployment (Azure) or model (openai.com) name
    pub deployment: String,

    /// Number of concurrent clients
    pub clients: usize,

    /// Optional run duration in seconds; None runs until interrupted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,

    /// Optional admission rate in requests per minute; None or 0 disables pacing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,

    /// Context tokens to generate per request
    pub context_tokens: usize,

    /// max_tokens generation parameter (also the expected tokens per response)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,

    /// `n` generation parameter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completions: Option<usize>,

    /// frequency_penalty generation parameter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,

    /// presence_penalty generation parameter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,

    /// temperature generation parameter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// top_p generation parameter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    /// Retry behavior for throttled responses
    pub retry: RetryMode,

    /// Sliding aggregation window in seconds
    pub aggregation_window_secs: u64,

    /// Interval between periodic snapshot ticks, in seconds
    pub dump_interval_secs: u64,

    /// Label attached to every snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_label: Option<String>,

    /// Periodic snapshot format
    pub output_format: OutputFormat,

    /// Retain request/response content on the raw record dump
    pub log_request_content: bool,

    /// Prefix each request with a unique marker to defeat server-side caching
    pub prevent_server_caching: bool,

    /// Seconds subtracted from every latency sample
    pub network_latency_adjustment: f64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            api_base_endpoint: String::new(),
            api_key: String::new(),
            api_version: "2024-02-01".to_string(),
            deployment: String::new(),
            clients: 12,
            duration_secs: None,
            rate: None,
            context_tokens: 1000,
            max_tokens: Some(500),
            completions: None,
            frequency_penalty: None,
            presence_penalty: None,
            temperature: None,
            top_p: None,
            retry: RetryMode::None,
            aggregation_window_secs: 60,
            dump_interval_secs: 1,
            custom_label: None,
            output_format: OutputFormat::Human,
            log_request_content: false,
            prevent_server_caching: true,
            network_latency_adjustment: 0.0,
        }
    }
}

impl LoadConfig {
    /// Whether the endpoint is an openai.com host (bearer auth, model param)
    /// as opposed to an Azure OpenAI deployment (api-key header, versioned path).
    pub fn is_openai_host(&self) -> bool {
        self.api_base_endpoint.contains("openai.com")
    }

    /// Full deployment URL for chat completions.
    ///
    /// openai.com endpoints are used as-is; Azure hosts get the deployment
    /// path and an api-version query parameter appended.
    pub fn url(&self) -> String {
        if self.is_openai_host() {
            self.api_base_endpoint.clone()
        } else {
            format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.api_base_endpoint.trim_end_matches('/'),
                self.deployment,
                self.api_version
            )
        }
    }

    /// Configured run duration, if bounded
    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs)
    }

    /// Sliding window duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.aggregation_window_secs)
    }

    /// Snapshot tick interval
    pub fn dump_interval(&self) -> Duration {
        Duration::from_secs(self.dump_interval_secs.max(1))
    }

    /// Validate the configuration, failing fast before a run starts.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(Error::Config("api-key is required".into()));
        }
        if !self.is_openai_host() && self.api_version.is_empty() {
            return Err(Error::Config("api-version is required".into()));
        }
        if self.api_base_endpoint.is_empty() {
            return Err(Error::Config("api-base-endpoint is required".into()));
        }
        if self.clients < 1 {
            return Err(Error::Config("clients must be > 0".into()));
        }
        if let Some(duration) = self.duration_secs {
            if duration < 30 {
                return Err(Error::Config("duration must be >= 30".into()));
            }
        }
        if let Some(rate) = self.rate {
            if rate < 0.0 {
                return Err(Error::Config("rate must be >= 0".into()));
            }
        }
        if let Some(penalty) = self.frequency_penalty {
            if !(-2.0..=2.0).contains(&penalty) {
                return Err(Error::Config(
                    "frequency-penalty must be between -2.0 and 2.0".into(),
                ));
            }
        }
        if let Some(penalty) = self.presence_penalty {
            if !(-2.0..=2.0).contains(&penalty) {
                return Err(Error::Config(
                    "presence-penalty must be between -2.0 and 2.0".into(),
                ));
            }
        }
        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(Error::Config(
                    "temperature must be between 0 and 2.0".into(),
                ));
            }
        }
        Ok(())
    }
}
