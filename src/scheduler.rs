//! Timed replay of a record stream.
//!
//! The scheduling loop walks the records strictly in order, sleeps until each
//! record's fire time, and spawns its request without waiting for it. Fire
//! times are anchored to the first record: a record recorded `d` ms after the
//! first fires `floor(d / accelerator)` ms after the run started. The loop only
//! ever suspends on the timer; requests run independently until they finish.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{self, Instant};
use tracing::{debug, error, info};

use crate::connection_pool::PoolManager;
use crate::executor::{execute, RequestOutcome};
use crate::record_stream::{Record, RecordError};
use crate::report::RunReport;
use crate::tracker::CompletionTracker;
use crate::url_transform::transform_url;

/// Upper bound on how far ahead a record can be scheduled (~30 years).
const MAX_SCHEDULE_AHEAD: Duration = Duration::from_secs(30 * 365 * 24 * 3600);

/// Run-fatal errors.
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Failed to read records: {0}")]
    Record(#[from] RecordError),

    #[error("Failed to create latency histogram: {0}")]
    Histogram(#[from] hdrhistogram::CreationError),
}

/// Knobs that shape how records are turned into requests.
#[derive(Debug, Clone)]
pub struct ReplaySettings {
    /// Per-request deadline
    pub timeout: Duration,
    /// Divisor applied to recorded gaps; must be finite and > 0
    pub accelerator: f64,
    /// Authority override for every request
    pub host: Option<String>,
    /// Force `cache=false` on every request
    pub no_cache: bool,
    /// Stop after this many records
    pub limit: Option<usize>,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(60_000),
            accelerator: 1.0,
            host: None,
            no_cache: false,
            limit: None,
        }
    }
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplaySummary {
    /// The stream held no records; nothing was sent.
    NoRequests,
    /// Every dispatched request finished.
    Completed(RunReport),
}

/// Maps recorded timestamps onto the wall clock.
#[derive(Debug, Clone, Copy)]
pub struct ReplayClock {
    first_record_time: f64,
    run_start: Instant,
    accelerator: f64,
}

impl ReplayClock {
    pub fn new(first_record_time: f64, run_start: Instant, accelerator: f64) -> Self {
        Self {
            first_record_time,
            run_start,
            accelerator,
        }
    }

    /// Offset from run start at which a record recorded at `scheduled_time`
    /// fires. Records at or before the first record fire immediately.
    pub fn offset(&self, scheduled_time: f64) -> Duration {
        let accelerated = ((scheduled_time - self.first_record_time) / self.accelerator).floor();
        if accelerated.is_nan() || accelerated <= 0.0 {
            return Duration::ZERO;
        }
        let millis = accelerated.min(MAX_SCHEDULE_AHEAD.as_millis() as f64) as u64;
        Duration::from_millis(millis)
    }

    /// Wall-clock instant at which the record fires.
    pub fn fire_time(&self, scheduled_time: f64) -> Instant {
        self.run_start + self.offset(scheduled_time)
    }
}

/// Replays `records` against the target and waits for every request.
///
/// A record-stream error stops scheduling; requests already dispatched are
/// still awaited and the pool closed before the error is returned.
pub async fn run_replay<I>(
    records: I,
    settings: &ReplaySettings,
    pool: &PoolManager,
) -> Result<ReplaySummary, ReplayError>
where
    I: IntoIterator<Item = Result<Record, RecordError>>,
{
    let tracker = Arc::new(CompletionTracker::new()?);
    let mut clock: Option<ReplayClock> = None;
    let mut fatal: Option<RecordError> = None;

    let records = records
        .into_iter()
        .take(settings.limit.unwrap_or(usize::MAX));

    for item in records {
        let record = match item {
            Ok(record) => record,
            Err(e) => {
                error!(line = ?e.line(), reason = e.reason(), error = %e, "Stopping replay on malformed input");
                fatal = Some(e);
                break;
            }
        };

        let clock = *clock.get_or_insert_with(|| {
            info!(
                first_record_time = record.scheduled_time,
                accelerator = settings.accelerator,
                "Replay clock started"
            );
            ReplayClock::new(record.scheduled_time, Instant::now(), settings.accelerator)
        });

        time::sleep_until(clock.fire_time(record.scheduled_time)).await;
        dispatch(record, settings, pool, &tracker);
    }

    tracker.mark_exhausted();

    if clock.is_none() {
        pool.close_final().await;
        return match fatal {
            Some(e) => Err(e.into()),
            None => {
                info!("No requests found");
                Ok(ReplaySummary::NoRequests)
            }
        };
    }

    debug!(
        dispatched = tracker.dispatched(),
        in_flight = tracker.in_flight(),
        "Record stream exhausted, waiting for in-flight requests"
    );
    tracker.wait().await;
    pool.close_final().await;

    match fatal {
        Some(e) => Err(e.into()),
        None => Ok(ReplaySummary::Completed(tracker.report())),
    }
}

fn dispatch(
    record: Record,
    settings: &ReplaySettings,
    pool: &PoolManager,
    tracker: &Arc<CompletionTracker>,
) {
    tracker.on_dispatch();

    let url = match transform_url(&record.url, settings.host.as_deref(), settings.no_cache) {
        Ok(url) => url,
        Err(e) => {
            let outcome = RequestOutcome::invalid_url(&record.url, &e);
            outcome.emit();
            tracker.on_finish(&outcome);
            return;
        }
    };

    let Some(lease) = pool.lease() else {
        let outcome = RequestOutcome::pool_closed(url.as_str());
        outcome.emit();
        tracker.on_finish(&outcome);
        return;
    };
    pool.rotate_if_due();

    let tracker = tracker.clone();
    let timeout = settings.timeout;
    tokio::spawn(async move {
        let outcome = execute(lease.client(), url, timeout).await;
        drop(lease);
        tracker.on_finish(&outcome);
    });
}
