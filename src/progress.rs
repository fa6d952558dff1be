//! Backfill progress reporting.
//!
//! Progress is emitted on **stderr** so stdout remains parseable for
//! scripts. The human reporter prints one line per batch; the JSON reporter
//! emits one JSON object per line for machine consumption.

use std::io::Write;

use crate::backfill::BackfillProgress;

/// Receives one snapshot per completed batch.
pub trait BackfillProgressReporter: Send + Sync {
    fn report(&self, progress: &BackfillProgress);
}

/// Closures work as reporters, which the QA harness and tests rely on.
impl<F> BackfillProgressReporter for F
where
    F: Fn(&BackfillProgress) + Send + Sync,
{
    fn report(&self, progress: &BackfillProgress) {
        self(progress)
    }
}

/// Human-friendly progress: "backfill  1,250 / 5,000 (25.0%)  41.7 ev/s".
pub struct StderrProgress;

impl BackfillProgressReporter for StderrProgress {
    fn report(&self, progress: &BackfillProgress) {
        let line = format!(
            "backfill  {} / {} ({:.1}%)  {:.1} ev/s  ok {} skip {} fail {}\n",
            format_number(progress.processed as u64),
            format_number(progress.total as u64),
            progress.percent_complete,
            progress.events_per_sec,
            progress.succeeded,
            progress.skipped,
            progress.failed,
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl BackfillProgressReporter for JsonProgress {
    fn report(&self, progress: &BackfillProgress) {
        let obj = serde_json::json!({
            "event": "progress",
            "processed": progress.processed,
            "succeeded": progress.succeeded,
            "skipped": progress.skipped,
            "failed": progress.failed,
            "total": progress.total,
            "percent": progress.percent_complete,
            "eventsPerSec": progress.events_per_sec,
            "elapsedMs": progress.elapsed_ms,
            "cursor": progress.cursor,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl BackfillProgressReporter for NoProgress {
    fn report(&self, _progress: &BackfillProgress) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(mode: &str) -> anyhow::Result<Self> {
        match mode {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => anyhow::bail!("Unknown progress mode: {}. Use off, human, or json.", other),
        }
    }

    pub fn reporter(&self) -> Box<dyn BackfillProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn parse_modes() {
        assert_eq!(ProgressMode::parse("json").unwrap(), ProgressMode::Json);
        assert!(ProgressMode::parse("loud").is_err());
    }
}
