//! Thread-safe sink for per-request statistics
//!
//! All mutable state lives behind one mutex; `record_new_request`,
//! `aggregate`, `tick`, and `prune_window` serialize on it, so a snapshot
//! never observes a half-applied record. The periodic tick runs as its own
//! task and never blocks request completions for longer than one lock hold.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{LoadConfig, OutputFormat};
use crate::requester::{Clock, RequestStats};
use crate::stats::snapshot::MetricsSnapshot;
use crate::stats::window::{mean, percentile, SlidingWindow};

/// Minimum seconds of run time between low-generation-rate warnings
const LOW_GEN_WARN_INTERVAL_SECS: f64 = 10.0;

/// Fraction of the expected generation size below which we warn
const LOW_GEN_WARN_RATIO: f64 = 0.9;

#[derive(Default)]
struct AggregatorState {
    processing_count: usize,
    total_completed: usize,
    total_failed: usize,
    total_throttled: usize,
    call_tries: SlidingWindow,
    request_timestamps: SlidingWindow,
    e2e_latency: SlidingWindow,
    response_latency: SlidingWindow,
    ttft: SlidingWindow,
    tbt: SlidingWindow,
    context_tokens: SlidingWindow,
    generated_tokens: SlidingWindow,
    raw_records: Vec<RequestStats>,
    latest: Option<MetricsSnapshot>,
    last_low_gen_warning: f64,
}

/// Sliding-window statistics aggregator for one run
///
/// Constructed fresh per run; windows are never shared across runs. Feed it
/// with `record_new_request` at submission and `aggregate` at completion,
/// and run the periodic snapshot loop with `start`/`stop`.
pub struct StatsAggregator {
    clock: Clock,
    window_secs: f64,
    dump_interval: Duration,
    clients: usize,
    expected_gen_tokens: Option<usize>,
    label: Option<String>,
    output_format: OutputFormat,
    network_latency_adjustment: f64,
    state: Mutex<AggregatorState>,
    shutdown: watch::Sender<bool>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl StatsAggregator {
    pub fn new(config: &LoadConfig, clock: Clock) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            clock,
            window_secs: config.window().as_secs_f64(),
            dump_interval: config.dump_interval(),
            clients: config.clients,
            expected_gen_tokens: config.max_tokens,
            label: config.custom_label.clone(),
            output_format: config.output_format,
            network_latency_adjustment: config.network_latency_adjustment,
            state: Mutex::new(AggregatorState::default()),
            shutdown,
            ticker: Mutex::new(None),
        }
    }

    /// Note a request entering flight. Called at submission time, before the
    /// outcome is known.
    pub fn record_new_request(&self) {
        self.lock_state().processing_count += 1;
    }

    /// Fold one finished request into the aggregate.
    ///
    /// The raw record is always retained, even when the sample computation
    /// finds the record inconsistent.
    pub fn aggregate(&self, stats: RequestStats) {
        let mut state = self.lock_state();
        state.processing_count = state.processing_count.saturating_sub(1);
        state.total_completed += 1;

        // Attempt counts are recorded for every outcome; retried throttles
        // are exactly where they matter.
        if let Some(start) = stats.request_start_time {
            state.call_tries.push(start, stats.calls as f64);
        }

        if stats.response_status_code != 200 {
            state.total_failed += 1;
            if stats.response_status_code == 429 {
                state.total_throttled += 1;
            }
            tracing::warn!(
                status = stats.response_status_code,
                calls = stats.calls,
                error = ?stats.last_error,
                "request finished with failure"
            );
        } else if let Err(field) =
            record_windows(&mut state, &stats, self.network_latency_adjustment, self.window_secs)
        {
            // One bad record must not corrupt the counters or lose the raw
            // record, so it is logged and dropped from the windows only.
            tracing::warn!(missing = field, "request record is inconsistent, samples skipped");
        }

        state.raw_records.push(stats);
    }

    /// Compute a snapshot from the current window contents, publish it as the
    /// latest, and emit it in the configured format.
    pub fn tick(&self) {
        let snapshot = {
            let mut state = self.lock_state();
            let snapshot = self.compute_snapshot(&state);
            self.maybe_warn_low_gen(&mut state, &snapshot);
            state.latest = Some(snapshot.clone());
            snapshot
        };
        self.emit(&snapshot);
    }

    /// Evict samples older than the window from every sliding window.
    pub fn prune_window(&self) {
        let horizon = self.clock.elapsed_secs() - self.window_secs;
        let mut state = self.lock_state();
        state.call_tries.trim(horizon);
        state.request_timestamps.trim(horizon);
        state.e2e_latency.trim(horizon);
        state.response_latency.trim(horizon);
        state.ttft.trim(horizon);
        state.tbt.trim(horizon);
        state.context_tokens.trim(horizon);
        state.generated_tokens.trim(horizon);
    }

    /// Immutable copy of the most recently published snapshot.
    pub fn latest_snapshot(&self) -> Option<MetricsSnapshot> {
        self.lock_state().latest.clone()
    }

    /// Copy of every raw record accumulated this run.
    pub fn raw_records(&self) -> Vec<RequestStats> {
        self.lock_state().raw_records.clone()
    }

    /// Emit all raw per-call records as JSON lines, for offline inspection.
    pub fn dump_raw_records(&self) {
        for record in self.raw_records() {
            match serde_json::to_string(&record) {
                Ok(line) => println!("{line}"),
                Err(err) => tracing::warn!(error = %err, "failed to serialize raw record"),
            }
        }
    }

    /// Start the periodic tick loop.
    pub fn start(self: &Arc<Self>) {
        let aggregator = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let interval_duration = self.dump_interval;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_duration);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of a tokio interval fires immediately.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        aggregator.tick();
                        aggregator.prune_window();
                    }
                    _ = shutdown.changed() => break,
                }
            }
            // One final tick so the last partial interval is captured.
            aggregator.tick();
        });
        *self.lock_ticker() = Some(handle);
    }

    /// Stop the tick loop, waiting for its final tick.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.lock_ticker().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn compute_snapshot(&self, state: &AggregatorState) -> MetricsSnapshot {
        let run_seconds = self.clock.elapsed_secs();
        // Use the elapsed run time while it is shorter than the window, so
        // early-run rates are not underestimated.
        let dynamic_window_mins = run_seconds.min(self.window_secs).max(f64::EPSILON) / 60.0;

        let e2e = state.e2e_latency.values();
        let response = state.response_latency.values();
        let ttft = state.ttft.values();
        let tbt = state.tbt.values();
        let gen_tpr = state.generated_tokens.values();

        MetricsSnapshot {
            label: self.label.clone(),
            run_seconds,
            timestamp: Utc::now(),
            rpm: state.request_timestamps.len() as f64 / dynamic_window_mins,
            processing: state.processing_count.min(self.clients),
            completed_requests: state.total_completed,
            failed_requests: state.total_failed,
            throttled_requests: state.total_throttled,
            tpm_context: state.context_tokens.sum() / dynamic_window_mins,
            tpm_gen: state.generated_tokens.sum() / dynamic_window_mins,
            tpm_total: (state.context_tokens.sum() + state.generated_tokens.sum())
                / dynamic_window_mins,
            e2e_avg: mean(&e2e),
            e2e_95th: percentile(&e2e, 95.0),
            response_avg: mean(&response),
            response_95th: percentile(&response, 95.0),
            ttft_avg: mean(&ttft),
            ttft_95th: percentile(&ttft, 95.0),
            tbt_avg: mean(&tbt),
            tbt_95th: percentile(&tbt, 95.0),
            calls_avg: mean(&state.call_tries.values()),
            context_tpr_avg: mean(&state.context_tokens.values()),
            gen_tpr_avg: mean(&gen_tpr),
            gen_tpr_10th: percentile(&gen_tpr, 10.0),
            gen_tpr_90th: percentile(&gen_tpr, 90.0),
        }
    }

    fn maybe_warn_low_gen(&self, state: &mut AggregatorState, snapshot: &MetricsSnapshot) {
        let (Some(expected), Some(avg)) = (self.expected_gen_tokens, snapshot.gen_tpr_avg) else {
            return;
        };
        if avg >= LOW_GEN_WARN_RATIO * expected as f64 {
            return;
        }
        if snapshot.run_seconds - state.last_low_gen_warning < LOW_GEN_WARN_INTERVAL_SECS {
            return;
        }
        state.last_low_gen_warning = snapshot.run_seconds;
        tracing::warn!(
            gen_tpr_avg = avg,
            expected_tokens = expected,
            "average generated tokens per response is below the requested size; \
             token-rate figures may be optimistic"
        );
    }

    fn emit(&self, snapshot: &MetricsSnapshot) {
        match self.output_format {
            OutputFormat::Human => tracing::info!("{}", snapshot.render_human()),
            OutputFormat::Jsonl => println!("{}", snapshot.render_jsonl()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, AggregatorState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_ticker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.ticker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for StatsAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsAggregator")
            .field("window_secs", &self.window_secs)
            .field("dump_interval", &self.dump_interval)
            .field("clients", &self.clients)
            .field("output_format", &self.output_format)
            .finish()
    }
}

/// Append one successful record's samples, keyed by its start time.
fn record_windows(
    state: &mut AggregatorState,
    stats: &RequestStats,
    adjustment: f64,
    window_secs: f64,
) -> std::result::Result<(), &'static str> {
    let start = stats.request_start_time.ok_or("request_start_time")?;
    let end = stats.response_end_time.ok_or("response_end_time")?;

    state.request_timestamps.push(start, start);

    let e2e = (end - start - adjustment).max(0.0);
    if e2e > window_secs {
        tracing::warn!(
            e2e_latency = e2e,
            window_secs,
            "request latency exceeds the aggregation window; recent-window statistics will lag"
        );
    }
    state.e2e_latency.push(start, e2e);

    if let Some(response) = stats.response_time {
        state
            .response_latency
            .push(start, (response - start - adjustment).max(0.0));
    }
    if let Some(first) = stats.first_token_time {
        state.ttft.push(start, (first - start - adjustment).max(0.0));
        if let Some(generated) = stats.generated_tokens.filter(|g| *g > 0) {
            state
                .tbt
                .push(start, ((end - first - adjustment) / generated as f64).max(0.0));
        }
    }
    state.context_tokens.push(start, stats.context_tokens as f64);
    state
        .generated_tokens
        .push(start, stats.generated_tokens.unwrap_or(0) as f64);
    Ok(())
}
