//! The modifier pipeline: cursor decorators applied during a rewrite.
//!
//! A [`Modifier`] wraps the merged series cursor and may drop series,
//! restrict chunk ranges, or emit fewer samples. Modifiers compose
//! left-to-right, each closing over its own configuration; deletion is the
//! canonical one.

use blockdb::{
    ChunkMeta, ChunkPool, DEFAULT_SAMPLES_PER_CHUNK, Interval, Intervals, Labels, Matcher, Sample,
    SeriesCursor, SeriesEntry, matches_all, rechunk,
};

use crate::changelog::ChangeLogger;

/// One deletion to apply during a rewrite.
///
/// A series is affected only when it matches **every** matcher. An empty
/// interval set is an explicit no-op: matching without intervals deletes
/// nothing. Whole-series deletion is requested with a full-range wildcard
/// interval (`i64::MIN..=i64::MAX`).
#[derive(Debug, Clone)]
pub struct DeletionRequest {
    pub matchers: Vec<Matcher>,
    pub intervals: Intervals,
}

impl DeletionRequest {
    pub fn new(matchers: Vec<Matcher>, intervals: Intervals) -> Self {
        Self {
            matchers,
            intervals,
        }
    }

    /// Delete everything a series holds.
    pub fn full_range(matchers: Vec<Matcher>) -> Self {
        Self::new(
            matchers,
            Intervals::from_iter([Interval::new(i64::MIN, i64::MAX)]),
        )
    }
}

/// A series-cursor decorator applied during a rewrite.
pub trait Modifier: Send + Sync {
    fn modify<'a>(
        &'a self,
        cursor: Box<dyn SeriesCursor + 'a>,
        changes: &'a dyn ChangeLogger,
        pool: &'a ChunkPool,
    ) -> Box<dyn SeriesCursor + 'a>;
}

/// Physically removes deleted samples while rewriting.
///
/// Chunks untouched by any deletion interval pass through byte-identical;
/// intersecting chunks are decoded and rebuilt from the surviving samples.
/// A series whose samples are all deleted is dropped entirely. Each
/// modified series logs one change line with the deleted intervals clamped
/// to the series' observed data range. No tombstones are emitted.
#[derive(Debug, Default)]
pub struct DeletionModifier {
    requests: Vec<DeletionRequest>,
}

impl DeletionModifier {
    pub fn new(requests: Vec<DeletionRequest>) -> Self {
        Self { requests }
    }
}

impl Modifier for DeletionModifier {
    fn modify<'a>(
        &'a self,
        cursor: Box<dyn SeriesCursor + 'a>,
        changes: &'a dyn ChangeLogger,
        pool: &'a ChunkPool,
    ) -> Box<dyn SeriesCursor + 'a> {
        Box::new(DeletionCursor {
            inner: cursor,
            requests: &self.requests,
            changes,
            pool,
        })
    }
}

struct DeletionCursor<'a> {
    inner: Box<dyn SeriesCursor + 'a>,
    requests: &'a [DeletionRequest],
    changes: &'a dyn ChangeLogger,
    pool: &'a ChunkPool,
}

impl DeletionCursor<'_> {
    /// Union of all intervals from requests whose matchers all match.
    fn deletion_intervals(&self, labels: &Labels) -> Intervals {
        let mut union = Intervals::new();
        for request in self.requests {
            if !matches_all(labels, &request.matchers) {
                continue;
            }
            for iv in request.intervals.iter() {
                union.add(*iv);
            }
        }
        union
    }

    fn log_deleted(&self, labels: &Labels, intervals: &Intervals) -> blockdb::Result<()> {
        self.changes
            .delete_series(labels, intervals)
            .map_err(blockdb::Error::Io)
    }

    /// Rebuild the chunk list with deleted samples removed. Returns the
    /// surviving chunks and whether anything was actually removed.
    fn rebuild_chunks(
        &self,
        chunks: Vec<ChunkMeta>,
        union: &Intervals,
    ) -> blockdb::Result<(Vec<ChunkMeta>, bool)> {
        let mut out = Vec::with_capacity(chunks.len());
        let mut modified = false;
        let mut buf = self.pool.get();
        for chunk in chunks {
            if !union.overlaps(&Interval::new(chunk.min_time, chunk.max_time)) {
                out.push(chunk);
                continue;
            }
            modified = true;
            chunk.samples_into(&mut buf)?;
            let survivors: Vec<Sample> = buf
                .iter()
                .filter(|s| !union.contains(s.t))
                .copied()
                .collect();
            if survivors.is_empty() {
                continue;
            }
            out.extend(rechunk(&survivors, DEFAULT_SAMPLES_PER_CHUNK)?);
        }
        self.pool.put(buf);
        Ok((out, modified))
    }
}

impl SeriesCursor for DeletionCursor<'_> {
    fn next(&mut self) -> blockdb::Result<Option<SeriesEntry>> {
        loop {
            let Some(entry) = self.inner.next()? else {
                return Ok(None);
            };

            let union = self.deletion_intervals(&entry.labels);
            if union.is_empty() {
                return Ok(Some(entry));
            }
            let Some((series_min, series_max)) = entry.time_range() else {
                return Ok(Some(entry));
            };
            if !union.overlaps(&Interval::new(series_min, series_max)) {
                return Ok(Some(entry));
            }

            let clamped = union.intersect(series_min, series_max);
            if union.covers(series_min, series_max) {
                self.log_deleted(&entry.labels, &clamped)?;
                continue;
            }

            let SeriesEntry { labels, chunks } = entry;
            let (chunks, modified) = self.rebuild_chunks(chunks, &union)?;
            if modified {
                self.log_deleted(&labels, &clamped)?;
            }
            if chunks.is_empty() {
                // Every sample fell inside the union even though the union
                // left gaps in the series range.
                continue;
            }
            return Ok(Some(SeriesEntry::new(labels, chunks)));
        }
    }

    fn close(&mut self) -> blockdb::Result<()> {
        self.inner.close()
    }
}
