//! Run-local failure accounting: an append-safe error log plus an atomic
//! counter.
//!
//! Every tolerated per-unit failure in a run lands here, giving operators a
//! post-hoc audit trail that distinguishes "clean answer" from "best-effort
//! fallback" without re-running the batch. The log is created per run and
//! torn down with it — there is no global or cross-run state.
//!
//! Concurrency discipline: workers call [`ReportLog::record`] from up to
//! `concurrency` tasks at once. The sink is guarded by a `std::sync::Mutex`
//! held only for the duration of one synchronous write — never across an
//! await point — and the counter is a plain atomic increment.

use crate::error::UnitError;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::warn;

enum Sink {
    File(std::fs::File),
    Memory(Vec<String>),
}

/// Append-only error log for one run.
pub struct ReportLog {
    sink: Mutex<Sink>,
    errors: AtomicUsize,
}

impl ReportLog {
    /// Log to a file, creating it (truncated) at `path`.
    pub fn to_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self {
            sink: Mutex::new(Sink::File(file)),
            errors: AtomicUsize::new(0),
        })
    }

    /// Keep log lines in memory. Used by tests and library embedders that
    /// surface errors their own way.
    pub fn in_memory() -> Self {
        Self {
            sink: Mutex::new(Sink::Memory(Vec::new())),
            errors: AtomicUsize::new(0),
        }
    }

    /// Record one tolerated unit failure: increments the counter, appends
    /// one line, and emits a `warn!`.
    pub fn record(&self, error: &UnitError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let line = format!("stage={} key={} error={}", error.stage(), error.key(), error);
        warn!("{line}");

        let mut sink = self.sink.lock().expect("report log poisoned");
        match &mut *sink {
            Sink::File(f) => {
                // A failing log write must not take the batch down with it.
                if let Err(e) = writeln!(f, "{line}") {
                    warn!("error log write failed: {e}");
                }
            }
            Sink::Memory(lines) => lines.push(line),
        }
    }

    /// Total failures recorded so far.
    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    /// Snapshot of recorded lines (in-memory sink only; empty for files).
    pub fn lines(&self) -> Vec<String> {
        match &*self.sink.lock().expect("report log poisoned") {
            Sink::Memory(lines) => lines.clone(),
            Sink::File(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UnitError;

    #[test]
    fn records_count_and_lines() {
        let log = ReportLog::in_memory();
        log.record(&UnitError::Extraction {
            document_id: 9,
            detail: "corrupt header".into(),
        });
        log.record(&UnitError::RetrievalCall {
            qid: 4,
            retries: 3,
            detail: "unparsable".into(),
        });

        assert_eq!(log.error_count(), 2);
        let lines = log.lines();
        assert!(lines[0].starts_with("stage=extract key=doc=9"));
        assert!(lines[1].starts_with("stage=retrieve key=qid=4"));
    }

    #[test]
    fn file_sink_appends_one_line_per_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("error_log.txt");
        let log = ReportLog::to_file(&path).unwrap();
        log.record(&UnitError::Aggregation {
            document_id: 3,
            detail: "page gap".into(),
        });
        log.record(&UnitError::Aggregation {
            document_id: 8,
            detail: "duplicate page".into(),
        });
        drop(log);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("doc=3"));
    }

    #[test]
    fn concurrent_appends_are_all_recorded() {
        use std::sync::Arc;
        let log = Arc::new(ReportLog::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        log.record(&UnitError::Tagging {
                            document_id: i,
                            page: j,
                            detail: "x".into(),
                        });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(log.error_count(), 400);
        assert_eq!(log.lines().len(), 400);
    }
}
