//! The series store: translates remote series/label queries into local
//! database reads and streams size-bounded frames to a sink.
//!
//! # Querier lifetime
//!
//! Every call opens its own querier, which pins the database until it is
//! released. For `series`, the release point is negotiated with the sink:
//! if the sink accepts delegation, it owns the querier after the call
//! returns and database flush/close block until the sink drops it;
//! otherwise the adapter releases the querier before returning and the
//! call's chunk bytes must already have been consumed.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use blockdb::{ChunkMeta, Labels, Matcher, Querier, Tsdb};

use crate::error::{Error, Result};
use crate::frame::{Frame, FrameSink, SeriesFrame};
use crate::metrics::StoreMetrics;
use crate::request::{
    LabelNamesRequest, LabelNamesResponse, LabelValuesRequest, LabelValuesResponse,
    PartialResponseStrategy, SeriesRequest, StoreInfo, StoreType,
};

/// Default frame budget: roughly one wire message per mebibyte.
pub const DEFAULT_MAX_BYTES_PER_FRAME: usize = 1024 * 1024;

/// A remote series-query adapter over one database handle.
///
/// Stateless beyond its configuration; safe to share across tasks, with
/// each call opening its own querier.
pub struct SeriesStore {
    db: Tsdb,
    store_type: StoreType,
    external_labels: Labels,
    max_bytes_per_frame: usize,
    metrics: Arc<StoreMetrics>,
}

impl SeriesStore {
    pub fn new(db: Tsdb, store_type: StoreType, external_labels: Labels) -> Self {
        Self {
            db,
            store_type,
            external_labels,
            max_bytes_per_frame: DEFAULT_MAX_BYTES_PER_FRAME,
            metrics: Arc::new(StoreMetrics::new()),
        }
    }

    pub fn with_max_bytes_per_frame(mut self, max_bytes_per_frame: usize) -> Self {
        self.max_bytes_per_frame = max_bytes_per_frame;
        self
    }

    pub fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }

    /// Report this store's labels, type, and data time range. An empty
    /// database reports the `i64::MAX` sentinel for both bounds; otherwise
    /// the lower bound is the first sample time and the upper bound stays
    /// unbounded because the head is still growing.
    pub fn info(&self) -> StoreInfo {
        StoreInfo {
            labels: self.external_labels.clone(),
            store_type: self.store_type,
            min_time: self.db.min_time().unwrap_or(i64::MAX),
            max_time: i64::MAX,
        }
    }

    /// Stream all series matching the request to `sink`, in ascending
    /// label-set order with each series' frames contiguous.
    pub async fn series(
        &self,
        req: &SeriesRequest,
        sink: &mut dyn FrameSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.metrics.series_requests_total.inc();
        if req.min_time > req.max_time {
            return Err(Error::InvalidArgument(format!(
                "invalid time range: min {} > max {}",
                req.min_time, req.max_time
            )));
        }

        let matchers = match self.strip_external_matchers(&req.matchers) {
            // An external-label matcher that does not match our external
            // labels: this store has nothing for the caller.
            None => return Ok(()),
            Some(matchers) if matchers.is_empty() => {
                return Err(Error::InvalidArgument(
                    "no matchers specified (excluding external labels)".into(),
                ));
            }
            Some(matchers) => matchers,
        };

        let mut querier = self.db.querier(req.min_time, req.max_time)?;
        match self.stream_series(req, &matchers, &querier, sink, cancel).await {
            Ok(()) => match sink.delegate(querier) {
                Ok(()) => {
                    tracing::debug!("querier close delegated to sink");
                    Ok(())
                }
                Err(mut querier) => {
                    querier.close()?;
                    Ok(())
                }
            },
            Err(err) => {
                querier.close()?;
                Err(err)
            }
        }
    }

    async fn stream_series(
        &self,
        req: &SeriesRequest,
        matchers: &[Matcher],
        querier: &Querier,
        sink: &mut dyn FrameSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut cursor = querier.select(matchers, req.skip_chunks)?;
        loop {
            if cancel.is_cancelled() {
                cursor.close()?;
                return Err(Error::Canceled);
            }
            let entry = match cursor.next() {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => match req.partial_response_strategy {
                    PartialResponseStrategy::Warn => {
                        self.metrics.series_warnings_total.inc();
                        sink.send(Frame::Warning(err.to_string())).await?;
                        break;
                    }
                    PartialResponseStrategy::Abort => {
                        cursor.close()?;
                        return Err(Error::Internal(err.to_string()));
                    }
                },
            };

            let (labels, collided) = entry.labels.merge(&self.external_labels);
            if collided {
                tracing::warn!(
                    series = %entry.labels,
                    external = %self.external_labels,
                    "series labels collide with external labels; keeping the series values"
                );
            }
            self.send_framed(labels, entry.chunks, sink).await?;
        }
        cursor.close()?;

        if let Some(hints) = &req.hints {
            sink.send(Frame::Hints(hints.clone())).await?;
        }
        Ok(())
    }

    /// Emit one series as one or more frames under the byte budget. The
    /// last chunk always ships even with the budget spent, so every series
    /// produces at least one frame.
    async fn send_framed(
        &self,
        labels: Labels,
        chunks: Vec<ChunkMeta>,
        sink: &mut dyn FrameSink,
    ) -> Result<()> {
        let budget = self.max_bytes_per_frame as i64 - labels.byte_size() as i64;
        let mut bytes_left = budget;
        let mut frame = SeriesFrame::new(labels.clone());

        let last = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.into_iter().enumerate() {
            bytes_left -= chunk.data.len() as i64;
            frame.chunks.push(chunk);

            if i == last || bytes_left > 0 {
                continue;
            }
            self.metrics.series_frames_sent_total.inc();
            sink.send(Frame::Series(frame)).await?;
            frame = SeriesFrame::new(labels.clone());
            bytes_left = budget;
        }

        self.metrics.series_frames_sent_total.inc();
        sink.send(Frame::Series(frame)).await
    }

    /// Sorted label names with data in the window, unioned with the
    /// external label names. A window entirely outside the data range
    /// yields an empty response without error.
    pub async fn label_names(
        &self,
        req: &LabelNamesRequest,
        cancel: &CancellationToken,
    ) -> Result<LabelNamesResponse> {
        self.metrics.label_queries_total.inc();
        if req.start > req.end {
            return Err(Error::InvalidArgument(format!(
                "invalid time range: min {} > max {}",
                req.start, req.end
            )));
        }
        if cancel.is_cancelled() {
            return Err(Error::Canceled);
        }
        if self.outside_data_range(req.end) {
            return Ok(LabelNamesResponse::default());
        }

        let matchers = match self.strip_external_matchers(&req.matchers) {
            None => return Ok(LabelNamesResponse::default()),
            Some(matchers) => matchers,
        };

        let mut querier = self.db.querier(req.start, req.end)?;
        let names = querier.label_names(&matchers)?;
        querier.close()?;

        let mut set: BTreeSet<String> = names.into_iter().collect();
        for label in &self.external_labels {
            set.insert(label.name.clone());
        }
        Ok(LabelNamesResponse {
            names: set.into_iter().collect(),
            warnings: Vec::new(),
        })
    }

    /// Sorted values of one label with data in the window; the external
    /// value is unioned in when the label is an external one.
    pub async fn label_values(
        &self,
        req: &LabelValuesRequest,
        cancel: &CancellationToken,
    ) -> Result<LabelValuesResponse> {
        self.metrics.label_queries_total.inc();
        if req.start > req.end {
            return Err(Error::InvalidArgument(format!(
                "invalid time range: min {} > max {}",
                req.start, req.end
            )));
        }
        if cancel.is_cancelled() {
            return Err(Error::Canceled);
        }
        if self.outside_data_range(req.end) {
            return Ok(LabelValuesResponse::default());
        }

        let matchers = match self.strip_external_matchers(&req.matchers) {
            None => return Ok(LabelValuesResponse::default()),
            Some(matchers) => matchers,
        };

        let mut querier = self.db.querier(req.start, req.end)?;
        let values = querier.label_values(&req.label, &matchers)?;
        querier.close()?;

        let mut set: BTreeSet<String> = values.into_iter().collect();
        if let Some(value) = self.external_labels.get(&req.label) {
            set.insert(value.to_string());
        }
        Ok(LabelValuesResponse {
            values: set.into_iter().collect(),
            warnings: Vec::new(),
        })
    }

    /// Drop matchers on external label names, checking each against the
    /// external value. `None` means an external matcher did not match and
    /// the whole result is empty.
    fn strip_external_matchers(&self, matchers: &[Matcher]) -> Option<Vec<Matcher>> {
        let mut remaining = Vec::new();
        for matcher in matchers {
            match self.external_labels.get(&matcher.name) {
                Some(value) => {
                    if !matcher.matches(value) {
                        return None;
                    }
                }
                None => remaining.push(matcher.clone()),
            }
        }
        Some(remaining)
    }

    fn outside_data_range(&self, end: i64) -> bool {
        match self.db.min_time() {
            Some(min) => end < min,
            None => true,
        }
    }
}
