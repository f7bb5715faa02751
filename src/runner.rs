//! Run lifecycle management
//!
//! A [`RunManager`] owns at most one active run. Starting a run is an
//! explicit transition on the manager, and external consumers (exporters,
//! front-ends) read the active run's latest snapshot through it rather than
//! through any global state.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::LoadConfig;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::limiter::RateGate;
use crate::messages::RandomMessageSource;
use crate::payload::RequestBuilder;
use crate::requester::{Clock, Requester};
use crate::stats::{MetricsSnapshot, StatsAggregator};

/// Handle to the currently active run
struct RunHandle {
    label: String,
    aggregator: Arc<StatsAggregator>,
    shutdown: broadcast::Sender<()>,
}

/// Owns at most one active load run
///
/// `run` drives a complete run to completion; `request_stop` asks the active
/// run to stop admitting and drain. Both are safe to call from different
/// tasks.
#[derive(Default)]
pub struct RunManager {
    active: Mutex<Option<RunHandle>>,
}

impl RunManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a run is currently active.
    pub fn is_active(&self) -> bool {
        self.lock_active().is_some()
    }

    /// Latest snapshot of the active run, if any.
    pub fn latest_snapshot(&self) -> Option<MetricsSnapshot> {
        self.lock_active()
            .as_ref()
            .and_then(|handle| handle.aggregator.latest_snapshot())
    }

    /// Ask the active run to stop admitting requests and drain.
    ///
    /// Returns false when no run is active.
    pub fn request_stop(&self) -> bool {
        match self.lock_active().as_ref() {
            Some(handle) => handle.shutdown.send(()).is_ok(),
            None => false,
        }
    }

    /// Drive one complete load run.
    ///
    /// Validates the configuration, wires the rate gate, executor, requester
    /// and aggregator together, runs until the duration elapses or a stop is
    /// requested, then emits the final snapshot and the raw record dump.
    pub async fn run(&self, config: LoadConfig) -> Result<()> {
        config.validate()?;
        if let (Some(duration), window) = (config.duration(), config.window()) {
            if duration < window {
                tracing::warn!(
                    duration_secs = duration.as_secs(),
                    window_secs = window.as_secs(),
                    "run duration is shorter than the aggregation window; \
                     the window will never fill"
                );
            }
        }

        let clock = Clock::start();
        let requester = Arc::new(Requester::new(&config, clock)?);
        let aggregator = Arc::new(StatsAggregator::new(&config, clock));
        let source = Arc::new(RandomMessageSource::new(
            config.context_tokens,
            config.prevent_server_caching,
        ));
        let builder = Arc::new(RequestBuilder::from_config(&config, source));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        {
            let mut active = self.lock_active();
            if let Some(handle) = active.as_ref() {
                return Err(Error::RunActive(handle.label.clone()));
            }
            *active = Some(RunHandle {
                label: config.custom_label.clone().unwrap_or_default(),
                aggregator: Arc::clone(&aggregator),
                shutdown: shutdown_tx,
            });
        }

        tracing::info!(
            url = %config.url(),
            clients = config.clients,
            rate = ?config.rate,
            duration_secs = ?config.duration_secs,
            "starting load run"
        );

        let gate = match config.rate {
            Some(rate) if rate > 0.0 => RateGate::new(rate, Duration::from_secs(60)),
            _ => RateGate::none(),
        };
        let mut executor = Executor::new(gate, config.clients, config.duration());

        aggregator.start();
        let dispatch = {
            let requester = Arc::clone(&requester);
            let aggregator = Arc::clone(&aggregator);
            let builder = Arc::clone(&builder);
            move || {
                let (body, context_tokens) = builder.next_payload();
                aggregator.record_new_request();
                let requester = Arc::clone(&requester);
                let aggregator = Arc::clone(&aggregator);
                async move {
                    let mut stats = requester.call(body).await;
                    stats.context_tokens = context_tokens;
                    aggregator.aggregate(stats);
                }
            }
        };
        executor
            .run(dispatch, shutdown_rx, || {
                tracing::info!("load run finished");
            })
            .await;
        aggregator.stop().await;
        aggregator.dump_raw_records();

        *self.lock_active() = None;
        Ok(())
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<RunHandle>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for RunManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunManager")
            .field("active", &self.is_active())
            .finish()
    }
}
