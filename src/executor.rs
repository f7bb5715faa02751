//! Concurrency-bounded request scheduling
//!
//! The executor admits request tasks through the rate gate, keeps the
//! in-flight set bounded, and drains outstanding work on shutdown. The
//! pipelined "next" request means the in-flight count can momentarily reach
//! `max_concurrency + 1`, never more.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::limiter::RateGate;

/// Grace period for draining in-flight requests at shutdown
pub const DRAIN_GRACE: Duration = Duration::from_secs(30);

/// Admission wait beyond which the configured concurrency cannot sustain the
/// target rate
const LAG_WARN_DURATION: Duration = Duration::from_secs(1);

/// Lifecycle of one executor run; `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Schedules request tasks against a rate gate and a concurrency bound
///
/// A graceful shutdown signal stops admissions and drains in-flight tasks up
/// to [`DRAIN_GRACE`]; forcing an immediate exit on a second signal is the
/// caller's responsibility.
#[derive(Debug)]
pub struct Executor {
    gate: RateGate,
    max_concurrency: usize,
    duration: Option<Duration>,
    state: RunState,
}

impl Executor {
    pub fn new(gate: RateGate, max_concurrency: usize, duration: Option<Duration>) -> Self {
        Self {
            gate,
            max_concurrency,
            duration,
            state: RunState::Idle,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run the admission loop until the duration deadline elapses or a
    /// shutdown signal arrives, then drain and invoke `on_finish` once.
    ///
    /// `dispatch` produces one request task per admission; tasks run
    /// concurrently and their completion order is not assumed. A task that
    /// panics is logged and does not stop the run.
    pub async fn run<F, Fut, Fin>(
        &mut self,
        mut dispatch: F,
        mut shutdown: broadcast::Receiver<()>,
        on_finish: Fin,
    ) where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
        Fin: FnOnce(),
    {
        // Stopped is terminal; a finished executor never runs again.
        if self.state == RunState::Stopped {
            tracing::warn!("executor already stopped, ignoring run request");
            return;
        }
        self.state = RunState::Running;
        let deadline = self.duration.map(|d| tokio::time::Instant::now() + d);
        let mut tasks: JoinSet<()> = JoinSet::new();

        'admission: loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break 'admission,
                _ = sleep_until_opt(deadline) => break 'admission,
                _ = self.gate.acquire() => {}
            }

            // Reap whatever already finished before measuring in-flight size.
            while let Some(result) = tasks.try_join_next() {
                log_task_result(result);
            }

            let wait_started = Instant::now();
            while tasks.len() > self.max_concurrency {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => break 'admission,
                    result = tasks.join_next() => {
                        if let Some(result) = result {
                            log_task_result(result);
                        }
                    }
                }
            }
            let lag = wait_started.elapsed();
            if lag > LAG_WARN_DURATION && self.gate.is_active() {
                tracing::warn!(
                    lag_secs = lag.as_secs_f64(),
                    "admission lagging behind the target rate; increase clients to sustain it"
                );
            }

            tasks.spawn(dispatch());
        }

        self.state = RunState::Draining;
        if !tasks.is_empty() {
            tracing::info!(in_flight = tasks.len(), "draining in-flight requests");
        }
        let drained = tokio::time::timeout(DRAIN_GRACE, async {
            while let Some(result) = tasks.join_next().await {
                log_task_result(result);
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                abandoned = tasks.len(),
                "drain grace period elapsed, abandoning remaining requests"
            );
            tasks.abort_all();
        }

        on_finish();
        self.state = RunState::Stopped;
    }
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn log_task_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(err) = result {
        tracing::error!(error = %err, "request task failed");
    }
}
