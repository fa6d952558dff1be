//! Historical backfill: replay a filtered event set through the pipeline.
//!
//! The job filters the input by event type, domain, and time window,
//! applies the `max_events` cap, then processes fixed-size batches strictly
//! in order. After each batch it emits a progress snapshot and checks the
//! abort flag; an aborted run finishes its current batch and reports
//! `has_more = true` with a resume cursor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::cfd::domain_of;
use crate::models::RawEvent;
use crate::pipeline::Pipeline;
use crate::progress::BackfillProgressReporter;

/// Backfill run parameters. Empty filters match everything.
#[derive(Debug, Clone)]
pub struct BackfillOptions {
    pub event_types: Vec<String>,
    pub domains: Vec<String>,
    pub start_timestamp_ms: Option<i64>,
    pub end_timestamp_ms: Option<i64>,
    /// Hard cap on processed events; 0 means unlimited.
    pub max_events: usize,
    pub batch_size: usize,
    /// Count filtered events as succeeded without running the pipeline.
    pub dry_run: bool,
    /// Resume after this event id (exclusive) within the filtered set.
    pub resume_cursor: Option<String>,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            event_types: Vec::new(),
            domains: Vec::new(),
            start_timestamp_ms: None,
            end_timestamp_ms: None,
            max_events: 0,
            batch_size: 50,
            dry_run: false,
            resume_cursor: None,
        }
    }
}

/// Snapshot emitted after each completed batch.
#[derive(Debug, Clone)]
pub struct BackfillProgress {
    pub processed: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Planned total for this run (after filters, cursor, and cap).
    pub total: usize,
    pub percent_complete: f64,
    pub events_per_sec: f64,
    pub elapsed_ms: u64,
    /// Last event id of the completed batch.
    pub cursor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BackfillError {
    pub event_id: String,
    pub message: String,
}

/// Final summary of a backfill run.
#[derive(Debug)]
pub struct BackfillResult {
    /// Events matching the filters (before the cap).
    pub total_matched: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub dry_run: bool,
    /// True when the cap or an abort left matching events unprocessed.
    pub has_more: bool,
    /// Resume point for a future run: last processed event id.
    pub final_cursor: Option<String>,
    pub errors: Vec<BackfillError>,
    pub elapsed_ms: u64,
}

/// Cooperative cancellation handle. Cloneable; `abort()` takes effect at
/// the next batch boundary.
#[derive(Clone)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub struct BackfillJob<'a> {
    pipeline: &'a Pipeline,
    options: BackfillOptions,
    abort: Arc<AtomicBool>,
    reporter: Option<Box<dyn BackfillProgressReporter>>,
}

impl<'a> BackfillJob<'a> {
    pub fn new(pipeline: &'a Pipeline, options: BackfillOptions) -> Self {
        Self {
            pipeline,
            options,
            abort: Arc::new(AtomicBool::new(false)),
            reporter: None,
        }
    }

    pub fn with_reporter(mut self, reporter: Box<dyn BackfillProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            flag: Arc::clone(&self.abort),
        }
    }

    fn matches(&self, event: &RawEvent) -> bool {
        if !self.options.event_types.is_empty()
            && !self.options.event_types.contains(&event.event_type)
        {
            return false;
        }
        if !self.options.domains.is_empty() {
            let domain = domain_of(&event.event_type).to_string();
            if !self.options.domains.contains(&domain) {
                return false;
            }
        }
        if let Some(start) = self.options.start_timestamp_ms {
            if event.timestamp_ms < start {
                return false;
            }
        }
        if let Some(end) = self.options.end_timestamp_ms {
            if event.timestamp_ms > end {
                return false;
            }
        }
        true
    }

    /// Run the backfill over the supplied events.
    pub async fn run(&self, events: &[RawEvent]) -> BackfillResult {
        let started = Instant::now();

        let filtered: Vec<&RawEvent> = events.iter().filter(|e| self.matches(e)).collect();
        let total_matched = filtered.len();

        // Resume: skip through and including the cursor id. An unknown
        // cursor starts from the beginning rather than silently matching
        // nothing.
        let after_cursor: Vec<&RawEvent> = match &self.options.resume_cursor {
            Some(cursor) => match filtered.iter().position(|e| &e.event_id == cursor) {
                Some(index) => filtered[index + 1..].to_vec(),
                None => filtered,
            },
            None => filtered,
        };

        let planned: Vec<&RawEvent> = if self.options.max_events > 0 {
            after_cursor
                .iter()
                .take(self.options.max_events)
                .copied()
                .collect()
        } else {
            after_cursor.clone()
        };
        let capped = planned.len() < after_cursor.len();

        let mut result = BackfillResult {
            total_matched,
            processed: 0,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            dry_run: self.options.dry_run,
            has_more: capped,
            final_cursor: None,
            errors: Vec::new(),
            elapsed_ms: 0,
        };

        if self.options.dry_run {
            result.processed = planned.len();
            result.succeeded = planned.len();
            result.final_cursor = planned.last().map(|e| e.event_id.clone());
            result.elapsed_ms = started.elapsed().as_millis() as u64;
            self.report(&result, planned.len(), started);
            return result;
        }

        let batch_size = self.options.batch_size.max(1);
        let mut remaining = planned.as_slice();

        while !remaining.is_empty() {
            if self.abort.load(Ordering::SeqCst) {
                result.has_more = true;
                break;
            }

            let take = batch_size.min(remaining.len());
            let (batch, rest) = remaining.split_at(take);
            remaining = rest;

            let owned: Vec<RawEvent> = batch.iter().map(|e| (*e).clone()).collect();
            let summary = self.pipeline.process_batch(&owned).await;

            result.processed += summary.processed;
            result.succeeded += summary.succeeded;
            result.skipped += summary.skipped;
            result.failed += summary.failed;
            for event_result in &summary.results {
                if let Some(message) = &event_result.error {
                    result.errors.push(BackfillError {
                        event_id: event_result.event_id.clone(),
                        message: message.clone(),
                    });
                }
            }
            result.final_cursor = batch.last().map(|e| e.event_id.clone());

            self.report(&result, planned.len(), started);
        }

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        result
    }

    fn report(&self, result: &BackfillResult, total: usize, started: Instant) {
        let Some(reporter) = &self.reporter else {
            return;
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let elapsed_secs = (elapsed_ms as f64 / 1000.0).max(0.001);
        reporter.report(&BackfillProgress {
            processed: result.processed,
            succeeded: result.succeeded,
            skipped: result.skipped,
            failed: result.failed,
            total,
            percent_complete: if total > 0 {
                result.processed as f64 * 100.0 / total as f64
            } else {
                100.0
            },
            events_per_sec: result.processed as f64 / elapsed_secs,
            elapsed_ms,
            cursor: result.final_cursor.clone(),
        });
    }
}
