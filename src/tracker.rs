//! In-flight accounting and the end-of-run completion barrier.
//!
//! All run-scoped counters and the latency histogram live behind one mutex so
//! that dispatches and completions from any task serialize. The barrier fires
//! exactly once, the first time the stream is exhausted with nothing in
//! flight; that condition is re-checked after every completion and when the
//! stream is marked exhausted, whichever happens last.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use hdrhistogram::CreationError;
use tokio::sync::watch;
use tracing::debug;

use crate::executor::RequestOutcome;
use crate::histogram::LatencyHistogram;
use crate::metrics::{
    REQUESTS_IN_FLIGHT, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS, REQUEST_ERRORS_TOTAL,
};
use crate::report::RunReport;

struct RunState {
    dispatched: u64,
    in_flight: u64,
    successes: u64,
    errors: u64,
    errors_by_kind: BTreeMap<String, u64>,
    stream_exhausted: bool,
    completed: bool,
    histogram: LatencyHistogram,
}

/// Shared by the scheduler and every dispatched request task.
pub struct CompletionTracker {
    state: Mutex<RunState>,
    done: watch::Sender<bool>,
}

impl CompletionTracker {
    pub fn new() -> Result<Self, CreationError> {
        let (done, _) = watch::channel(false);
        Ok(Self {
            state: Mutex::new(RunState {
                dispatched: 0,
                in_flight: 0,
                successes: 0,
                errors: 0,
                errors_by_kind: BTreeMap::new(),
                stream_exhausted: false,
                completed: false,
                histogram: LatencyHistogram::new()?,
            }),
            done,
        })
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A request is about to start.
    pub fn on_dispatch(&self) {
        let mut state = self.lock();
        state.dispatched += 1;
        state.in_flight += 1;
        REQUESTS_TOTAL.inc();
        REQUESTS_IN_FLIGHT.inc();
    }

    /// A dispatched request produced its outcome.
    pub fn on_finish(&self, outcome: &RequestOutcome) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        REQUESTS_IN_FLIGHT.dec();

        state.histogram.record(outcome.latency_nanos);
        REQUEST_DURATION_SECONDS.observe(outcome.latency_nanos as f64 / 1e9);

        if outcome.success {
            state.successes += 1;
        } else {
            state.errors += 1;
            if let Some(kind) = outcome.error_kind {
                *state.errors_by_kind.entry(kind.code()).or_insert(0) += 1;
                REQUEST_ERRORS_TOTAL.with_label_values(&[kind.label()]).inc();
            }
        }

        self.check_completion(&mut state);
    }

    /// No more requests will be dispatched.
    pub fn mark_exhausted(&self) {
        let mut state = self.lock();
        state.stream_exhausted = true;
        self.check_completion(&mut state);
    }

    fn check_completion(&self, state: &mut RunState) {
        if state.completed || !state.stream_exhausted || state.in_flight > 0 {
            return;
        }
        state.completed = true;
        debug!(
            dispatched = state.dispatched,
            errors = state.errors,
            "All dispatched requests finished"
        );
        self.done.send_replace(true);
    }

    /// Resolves once the stream is exhausted and nothing is in flight.
    pub async fn wait(&self) {
        let mut done = self.done.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = done.wait_for(|complete| *complete).await;
    }

    pub fn is_complete(&self) -> bool {
        self.lock().completed
    }

    pub fn dispatched(&self) -> u64 {
        self.lock().dispatched
    }

    pub fn in_flight(&self) -> u64 {
        self.lock().in_flight
    }

    /// Snapshot of the aggregate statistics.
    pub fn report(&self) -> RunReport {
        let state = self.lock();
        RunReport {
            total: state.dispatched,
            successful: state.successes,
            errors: state.errors,
            errors_by_kind: state.errors_by_kind.clone(),
            latency: state.histogram.stats(),
        }
    }
}
