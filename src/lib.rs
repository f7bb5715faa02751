//! Load generator for streaming chat-completion endpoints
//!
//! Drives concurrent streaming requests against Azure OpenAI deployments or
//! openai.com-style endpoints, paces admissions with a token-bucket rate
//! gate, and aggregates latency and token-throughput statistics over a
//! sliding window.
//!
//! The pieces compose bottom-up: a [`limiter::RateGate`] controls admission,
//! an [`executor::Executor`] bounds concurrency, a [`requester::Requester`]
//! performs one streaming exchange with retry, and a
//! [`stats::StatsAggregator`] folds every [`requester::RequestStats`] into
//! periodic [`stats::MetricsSnapshot`]s. A [`runner::RunManager`] owns the
//! wiring for one run at a time.

pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod limiter;
pub mod messages;
pub mod payload;
pub mod requester;
pub mod runner;
pub mod stats;
pub mod stream;

pub use config::{LoadConfig, OutputFormat, RetryMode};
pub use error::{Error, Result};
pub use requester::{RequestStats, Requester};
pub use runner::RunManager;
pub use stats::{MetricsSnapshot, StatsAggregator};
