//! The rewrite change log and the series-count progress logger.
//!
//! Each modification applied during a rewrite appends exactly one line to
//! the change log. The line format is stable and used by tests as a
//! behavioral oracle:
//!
//! ```text
//! Deleted {a="1", b="2"} [{0 20}]
//! ```

use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use blockdb::{Intervals, Labels};

/// Sink for modification records. Implementations must be shareable across
/// the modifier pipeline, hence `&self` methods.
pub trait ChangeLogger: Send + Sync {
    /// Record that samples of `labels` in `intervals` were deleted.
    fn delete_series(&self, labels: &Labels, intervals: &Intervals) -> std::io::Result<()>;
}

/// Append-only textual change log over any writer.
pub struct ChangeLog<W: Write + Send> {
    w: Mutex<W>,
}

impl<W: Write + Send> ChangeLog<W> {
    pub fn new(w: W) -> Self {
        Self { w: Mutex::new(w) }
    }

    /// Hand back the underlying writer, e.g. to read a buffered log.
    pub fn into_inner(self) -> W {
        self.w.into_inner().expect("change log lock poisoned")
    }
}

impl<W: Write + Send> ChangeLogger for ChangeLog<W> {
    fn delete_series(&self, labels: &Labels, intervals: &Intervals) -> std::io::Result<()> {
        let mut w = self.w.lock().expect("change log lock poisoned");
        writeln!(w, "Deleted {} {}", labels, intervals)
    }
}

/// Reports rewrite progress as a fraction of the expected series count.
pub trait ProgressLogger: Send + Sync {
    fn series_processed(&self);
}

/// Logs a line every ~10% of the expected series count.
pub struct SeriesProgressLogger {
    total: usize,
    interval: usize,
    done: AtomicUsize,
}

impl SeriesProgressLogger {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            interval: (total / 10).max(1),
            done: AtomicUsize::new(0),
        }
    }
}

impl ProgressLogger for SeriesProgressLogger {
    fn series_processed(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if done % self.interval == 0 {
            tracing::info!(
                "processed {}/{} series ({}%)",
                done,
                self.total,
                if self.total == 0 {
                    100
                } else {
                    done * 100 / self.total
                }
            );
        }
    }
}
