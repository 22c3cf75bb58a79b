//! Series cursors: the lazy, label-ordered view over series shared by the
//! store adapter and the block rewriter.
//!
//! Cursors are single-pass and not restartable. The common operation set is
//! `next() -> Result<Option<SeriesEntry>>` plus `close()`; merge and
//! modifier cursors wrap other cursors behind the same trait.

use crate::chunk::ChunkMeta;
use crate::error::Result;
use crate::model::Labels;

/// One series yielded by a cursor: its label set and its chunk metas in
/// ascending `min_time` order. Chunk payloads are resolved but not decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesEntry {
    pub labels: Labels,
    pub chunks: Vec<ChunkMeta>,
}

impl SeriesEntry {
    pub fn new(labels: Labels, chunks: Vec<ChunkMeta>) -> Self {
        Self { labels, chunks }
    }

    /// Observed data range of this series, `None` when it has no chunks.
    pub fn time_range(&self) -> Option<(i64, i64)> {
        match (self.chunks.first(), self.chunks.last()) {
            (Some(first), Some(last)) => Some((first.min_time, last.max_time)),
            _ => None,
        }
    }
}

/// A label-ordered cursor over series.
pub trait SeriesCursor: Send {
    /// Advance to the next series, or `None` when exhausted.
    fn next(&mut self) -> Result<Option<SeriesEntry>>;

    /// Release any resources held by the cursor. Idempotent.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Cursor over a pre-built, pre-sorted list of entries.
pub struct ListCursor {
    entries: std::vec::IntoIter<SeriesEntry>,
}

impl ListCursor {
    /// `entries` must already be in ascending label-set order.
    pub fn new(entries: Vec<SeriesEntry>) -> Self {
        Self {
            entries: entries.into_iter(),
        }
    }
}

impl SeriesCursor for ListCursor {
    fn next(&mut self) -> Result<Option<SeriesEntry>> {
        Ok(self.entries.next())
    }
}

/// K-way merge of label-ordered cursors.
///
/// When several inputs yield the same label set, their chunk sequences are
/// concatenated in input order and then stably sorted by `min_time`.
/// Overlapping chunks from different inputs are preserved; sample-level
/// deduplication is a downstream concern.
pub struct MergeCursor {
    inputs: Vec<MergeInput>,
}

struct MergeInput {
    cursor: Box<dyn SeriesCursor>,
    peeked: Option<SeriesEntry>,
    exhausted: bool,
}

impl MergeCursor {
    pub fn new(cursors: Vec<Box<dyn SeriesCursor>>) -> Self {
        Self {
            inputs: cursors
                .into_iter()
                .map(|cursor| MergeInput {
                    cursor,
                    peeked: None,
                    exhausted: false,
                })
                .collect(),
        }
    }
}

impl SeriesCursor for MergeCursor {
    fn next(&mut self) -> Result<Option<SeriesEntry>> {
        for input in &mut self.inputs {
            if input.peeked.is_none() && !input.exhausted {
                match input.cursor.next()? {
                    Some(entry) => input.peeked = Some(entry),
                    None => input.exhausted = true,
                }
            }
        }

        let min_labels = self
            .inputs
            .iter()
            .filter_map(|input| input.peeked.as_ref().map(|e| &e.labels))
            .min()
            .cloned();
        let Some(min_labels) = min_labels else {
            return Ok(None);
        };

        // Take matching entries in input order so equal-label chunk
        // sequences concatenate deterministically.
        let mut chunks = Vec::new();
        for input in &mut self.inputs {
            if input
                .peeked
                .as_ref()
                .is_some_and(|e| e.labels == min_labels)
            {
                let entry = input.peeked.take().expect("peeked entry present");
                chunks.extend(entry.chunks);
            }
        }
        chunks.sort_by_key(|c| c.min_time);

        Ok(Some(SeriesEntry::new(min_labels, chunks)))
    }

    fn close(&mut self) -> Result<()> {
        for input in &mut self.inputs {
            input.cursor.close()?;
        }
        Ok(())
    }
}
