//! Command-line interface

use clap::Parser;

use crate::config::{LoadConfig, OutputFormat, RetryMode};

/// Generate load against a streaming chat-completion endpoint
#[derive(Parser, Debug)]
#[command(name = "chatload", version, about)]
pub struct Cli {
    /// Base endpoint, e.g. https://myresource.openai.azure.com, or a full
    /// chat-completions URL for openai.com hosts
    pub api_base_endpoint: String,

    /// Deployment to benchmark (model name for openai.com hosts)
    #[arg(short, long)]
    pub deployment: String,

    /// API key; Azure hosts send it as api-key, openai.com as a bearer token
    #[arg(short = 'k', long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// api-version query parameter for Azure hosts
    #[arg(short = 'a', long, default_value = "2024-02-01")]
    pub api_version: String,

    /// Concurrent clients
    #[arg(short, long, default_value_t = 12)]
    pub clients: usize,

    /// Run duration in seconds; unlimited when omitted
    #[arg(long)]
    pub duration: Option<u64>,

    /// Admission rate limit in requests per minute; unlimited when omitted
    #[arg(short, long)]
    pub rate: Option<f64>,

    /// Context tokens to send per request
    #[arg(short = 's', long, default_value_t = 1000)]
    pub context_tokens: usize,

    /// max_tokens to request per completion
    #[arg(short, long, default_value_t = 500)]
    pub max_tokens: usize,

    /// Number of completions per request
    #[arg(long)]
    pub completions: Option<usize>,

    /// frequency_penalty request parameter
    #[arg(long)]
    pub frequency_penalty: Option<f64>,

    /// presence_penalty request parameter
    #[arg(long)]
    pub presence_penalty: Option<f64>,

    /// temperature request parameter
    #[arg(long)]
    pub temperature: Option<f64>,

    /// top_p request parameter
    #[arg(long)]
    pub top_p: Option<f64>,

    /// Whether to retry throttled requests
    #[arg(long, value_enum, default_value_t = RetryMode::None)]
    pub retry: RetryMode,

    /// Sliding aggregation window in seconds
    #[arg(short = 'w', long, default_value_t = 60)]
    pub aggregation_window: u64,

    /// Seconds between periodic statistics dumps
    #[arg(long, default_value_t = 1)]
    pub dump_interval: u64,

    /// Label attached to every statistics line
    #[arg(long)]
    pub label: Option<String>,

    /// Periodic statistics format
    #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Human)]
    pub output_format: OutputFormat,

    /// Retain request and response content in the end-of-run record dump
    #[arg(long)]
    pub log_request_content: bool,

    /// Prefix every request with a unique marker to defeat server-side caching
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub prevent_server_caching: bool,

    /// Seconds to subtract from every latency measurement
    #[arg(long, default_value_t = 0.0)]
    pub network_latency_adjustment: f64,
}

impl Cli {
    /// Resolve the parsed arguments into a run configuration.
    pub fn into_config(self) -> LoadConfig {
        LoadConfig {
            api_base_endpoint: self.api_base_endpoint,
            api_key: self.api_key,
            api_version: self.api_version,
            deployment: self.deployment,
            clients: self.clients,
            duration_secs: self.duration,
            rate: self.rate,
            context_tokens: self.context_tokens,
            max_tokens: Some(self.max_tokens),
            completions: self.completions,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
            temperature: self.temperature,
            top_p: self.top_p,
            retry: self.retry,
            aggregation_window_secs: self.aggregation_window,
            dump_interval_secs: self.dump_interval,
            custom_label: self.label,
            output_format: self.output_format,
            log_request_content: self.log_request_content,
            prevent_server_caching: self.prevent_server_caching,
            network_latency_adjustment: self.network_latency_adjustment,
        }
    }
}
