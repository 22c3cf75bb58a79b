//! The database handle: an in-memory head plus attached immutable blocks,
//! queried through scoped, pinning queriers.
//!
//! # Lifecycle
//!
//! A [`Querier`] pins the database for its lifetime: [`Tsdb::flush_wal`]
//! and [`Tsdb::close`] block until every querier has been released (closed
//! or dropped). This is the invariant that lets callers stream chunk bytes
//! without a database-wide lock: whoever ends up holding the querier is
//! responsible for releasing it once the bytes have been consumed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::Notify;

use crate::block::Block;
use crate::chunk::{DEFAULT_SAMPLES_PER_CHUNK, rechunk};
use crate::cursor::{ListCursor, MergeCursor, SeriesCursor, SeriesEntry};
use crate::error::{Error, Result};
use crate::model::{Labels, Matcher, Sample, matches_all};

#[derive(Default)]
struct Head {
    series: BTreeMap<Labels, Vec<Sample>>,
    min_time: Option<i64>,
}

struct DbInner {
    head: RwLock<Head>,
    blocks: RwLock<Vec<Arc<Block>>>,
    open_queriers: AtomicUsize,
    querier_released: Notify,
    closed: AtomicBool,
}

/// An in-memory time-series database handle.
///
/// Reads go through [`Tsdb::querier`]; writes through [`Tsdb::appender`].
/// The handle is cheap to clone and safe to share across tasks.
#[derive(Clone)]
pub struct Tsdb {
    inner: Arc<DbInner>,
}

impl Default for Tsdb {
    fn default() -> Self {
        Self::new()
    }
}

impl Tsdb {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DbInner {
                head: RwLock::new(Head::default()),
                blocks: RwLock::new(Vec::new()),
                open_queriers: AtomicUsize::new(0),
                querier_released: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Attach an opened immutable block. Its series become visible to
    /// subsequent queriers.
    pub fn attach_block(&self, block: Block) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        self.inner
            .blocks
            .write()
            .expect("blocks lock poisoned")
            .push(Arc::new(block));
        Ok(())
    }

    pub fn appender(&self) -> Appender {
        Appender {
            inner: self.inner.clone(),
            pending: Vec::new(),
        }
    }

    /// Earliest sample time across the head and all blocks, `None` when
    /// the database holds no data.
    pub fn min_time(&self) -> Option<i64> {
        let head_min = self
            .inner
            .head
            .read()
            .expect("head lock poisoned")
            .min_time;
        let block_min = self
            .inner
            .blocks
            .read()
            .expect("blocks lock poisoned")
            .iter()
            .map(|b| b.meta().min_time)
            .min();
        match (head_min, block_min) {
            (Some(h), Some(b)) => Some(h.min(b)),
            (Some(h), None) => Some(h),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Number of queriers currently pinning the database.
    pub fn open_queriers(&self) -> usize {
        self.inner.open_queriers.load(Ordering::Acquire)
    }

    /// Open a querier over `[mint, maxt]`. The querier pins the database
    /// until it is closed or dropped.
    pub fn querier(&self, mint: i64, maxt: i64) -> Result<Querier> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        if mint > maxt {
            return Err(Error::InvalidInput(format!(
                "invalid time range: min {} > max {}",
                mint, maxt
            )));
        }

        let blocks: Vec<Arc<Block>> = self
            .inner
            .blocks
            .read()
            .expect("blocks lock poisoned")
            .iter()
            .filter(|b| b.meta().min_time <= maxt && mint <= b.meta().max_time)
            .cloned()
            .collect();

        self.inner.open_queriers.fetch_add(1, Ordering::AcqRel);
        Ok(Querier {
            inner: self.inner.clone(),
            blocks,
            mint,
            maxt,
            closed: false,
        })
    }

    /// Flush the write-ahead state. Blocks until every open querier has
    /// been released.
    pub async fn flush_wal(&self) -> Result<()> {
        self.wait_for_queriers().await;
        tracing::debug!("WAL flush completed");
        Ok(())
    }

    /// Close the database. New queriers are rejected immediately; the call
    /// blocks until every already-open querier has been released.
    pub async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Release);
        self.wait_for_queriers().await;

        {
            let mut head = self.inner.head.write().expect("head lock poisoned");
            head.series.clear();
            head.min_time = None;
        }
        self.inner
            .blocks
            .write()
            .expect("blocks lock poisoned")
            .clear();
        Ok(())
    }

    async fn wait_for_queriers(&self) {
        loop {
            // Register interest before checking the count so a release
            // between the check and the await cannot be missed.
            let released = self.inner.querier_released.notified();
            if self.inner.open_queriers.load(Ordering::Acquire) == 0 {
                return;
            }
            released.await;
        }
    }
}

/// Buffered write handle. Samples become visible atomically on `commit`.
pub struct Appender {
    inner: Arc<DbInner>,
    pending: Vec<(Labels, Sample)>,
}

impl Appender {
    pub fn append(&mut self, labels: Labels, t: i64, v: f64) -> Result<()> {
        if labels.is_empty() {
            return Err(Error::InvalidInput(
                "cannot append a series with no labels".into(),
            ));
        }
        self.pending.push((labels, Sample::new(t, v)));
        Ok(())
    }

    pub fn commit(self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let mut head = self.inner.head.write().expect("head lock poisoned");
        for (labels, sample) in self.pending {
            let samples = head.series.entry(labels).or_default();
            match samples.binary_search_by_key(&sample.t, |s| s.t) {
                // Duplicate timestamps overwrite the previous value.
                Ok(idx) => samples[idx] = sample,
                Err(idx) => samples.insert(idx, sample),
            }
            head.min_time = Some(head.min_time.map_or(sample.t, |t| t.min(sample.t)));
        }
        Ok(())
    }
}

/// A scoped read handle over `[mint, maxt]`.
///
/// Holding a `Querier` keeps the database pinned; see the module docs.
/// Chunk bytes returned by [`Querier::select`] reference block buffers via
/// ref-counted [`bytes::Bytes`], so the release protocol governs database
/// lifecycle progress rather than memory validity.
pub struct Querier {
    inner: Arc<DbInner>,
    blocks: Vec<Arc<Block>>,
    mint: i64,
    maxt: i64,
    closed: bool,
}

impl Querier {
    pub fn mint(&self) -> i64 {
        self.mint
    }

    pub fn maxt(&self) -> i64 {
        self.maxt
    }

    /// Cursor over all series matching every matcher, in label-set order.
    /// Head samples are clipped to the window and chunked on the fly;
    /// block chunks are included whole when they overlap the window.
    pub fn select(
        &self,
        matchers: &[Matcher],
        skip_chunks: bool,
    ) -> Result<Box<dyn SeriesCursor>> {
        let mut cursors: Vec<Box<dyn SeriesCursor>> =
            vec![Box::new(ListCursor::new(self.head_entries(matchers, skip_chunks)?))];
        for block in &self.blocks {
            cursors.push(block.select(matchers, self.mint, self.maxt, skip_chunks)?);
        }
        if cursors.len() == 1 {
            Ok(cursors.pop().expect("single cursor"))
        } else {
            Ok(Box::new(MergeCursor::new(cursors)))
        }
    }

    /// Sorted, deduplicated names of labels on series with data in the
    /// window that satisfy the matchers.
    pub fn label_names(&self, matchers: &[Matcher]) -> Result<Vec<String>> {
        let mut names = BTreeSet::new();
        self.visit_matching_labels(matchers, |labels| {
            for label in labels {
                names.insert(label.name.clone());
            }
        })?;
        Ok(names.into_iter().collect())
    }

    /// Sorted, deduplicated values of the named label on series with data
    /// in the window that satisfy the matchers.
    pub fn label_values(&self, name: &str, matchers: &[Matcher]) -> Result<Vec<String>> {
        let mut values = BTreeSet::new();
        self.visit_matching_labels(matchers, |labels| {
            if let Some(value) = labels.get(name) {
                values.insert(value.to_string());
            }
        })?;
        Ok(values.into_iter().collect())
    }

    /// Release the pin. Idempotent; also performed on drop.
    pub fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.inner.open_queriers.fetch_sub(1, Ordering::AcqRel);
            self.inner.querier_released.notify_waiters();
        }
        Ok(())
    }

    fn head_entries(&self, matchers: &[Matcher], skip_chunks: bool) -> Result<Vec<SeriesEntry>> {
        let head = self.inner.head.read().expect("head lock poisoned");
        let mut entries = Vec::new();
        for (labels, samples) in &head.series {
            if !matches_all(labels, matchers) {
                continue;
            }
            let clipped: Vec<Sample> = samples
                .iter()
                .filter(|s| self.mint <= s.t && s.t <= self.maxt)
                .copied()
                .collect();
            if clipped.is_empty() {
                continue;
            }
            let chunks = if skip_chunks {
                Vec::new()
            } else {
                rechunk(&clipped, DEFAULT_SAMPLES_PER_CHUNK)?
            };
            entries.push(SeriesEntry::new(labels.clone(), chunks));
        }
        Ok(entries)
    }

    fn visit_matching_labels(
        &self,
        matchers: &[Matcher],
        mut visit: impl FnMut(&Labels),
    ) -> Result<()> {
        {
            let head = self.inner.head.read().expect("head lock poisoned");
            for (labels, samples) in &head.series {
                if !matches_all(labels, matchers) {
                    continue;
                }
                if samples.iter().any(|s| self.mint <= s.t && s.t <= self.maxt) {
                    visit(labels);
                }
            }
        }
        for block in &self.blocks {
            let mut cursor = block.select(matchers, self.mint, self.maxt, true)?;
            while let Some(entry) = cursor.next()? {
                visit(&entry.labels);
            }
            cursor.close()?;
        }
        Ok(())
    }
}

impl Drop for Querier {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
