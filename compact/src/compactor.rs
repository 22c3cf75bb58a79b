//! The block rewriter: merge N block readers, run the modifier pipeline,
//! and write one new immutable block.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use blockdb::block::BlockReader;
use blockdb::{
    BlockMeta, BlockStats, BlockWriter, ChunkPool, MergeCursor, NullWriter, SeriesCursor,
    SeriesEntry,
};

use crate::changelog::{ChangeLogger, ProgressLogger};
use crate::error::{Error, Result};
use crate::modifiers::Modifier;

/// Rewrites one or more blocks into a new block, optionally applying
/// modifiers. Offline and single-task: inputs must be sealed blocks.
pub struct Compactor {
    pool: Arc<ChunkPool>,
    dry_run: bool,
}

impl Compactor {
    pub fn new(pool: Arc<ChunkPool>) -> Self {
        Self {
            pool,
            dry_run: false,
        }
    }

    /// A rewriter that produces stats and a change log but no disk output,
    /// regardless of the writer handed to [`Compactor::write_series`].
    pub fn new_dry_run(pool: Arc<ChunkPool>) -> Self {
        Self {
            pool,
            dry_run: true,
        }
    }

    /// Merge all series from `readers` through `modifiers` into `writer`.
    ///
    /// Series are written in label-set order; series whose samples are all
    /// removed are omitted. Returns the stats reported by the writer's
    /// flush. On error the partially written output is the caller's to
    /// remove.
    pub fn write_series(
        &self,
        cancel: &CancellationToken,
        readers: &[&dyn BlockReader],
        writer: &mut dyn BlockWriter,
        changes: &dyn ChangeLogger,
        progress: &dyn ProgressLogger,
        modifiers: &[&dyn Modifier],
    ) -> Result<BlockStats> {
        if readers.is_empty() {
            return Err(Error::NoReaders);
        }

        let mut null_writer = NullWriter::new();
        let writer: &mut dyn BlockWriter = if self.dry_run {
            &mut null_writer
        } else {
            writer
        };

        let mut cursors: Vec<Box<dyn SeriesCursor>> = Vec::with_capacity(readers.len());
        for reader in readers {
            cursors.push(reader.series_cursor()?);
        }
        let mut cursor: Box<dyn SeriesCursor + '_> = Box::new(MergeCursor::new(cursors));
        for modifier in modifiers {
            cursor = modifier.modify(cursor, changes, &self.pool);
        }

        // The writer needs every symbol up front, in order. Modifiers only
        // ever drop data, so the union of the input symbol tables suffices.
        let mut symbols = BTreeSet::new();
        for reader in readers {
            for symbol in reader.symbols() {
                symbols.insert(symbol.as_str());
            }
        }
        for symbol in symbols {
            writer.add_symbol(symbol)?;
        }

        loop {
            if cancel.is_cancelled() {
                cursor.close()?;
                return Err(Error::Canceled);
            }
            let entry = match cursor.next() {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    cursor.close()?;
                    return Err(err.into());
                }
            };

            let SeriesEntry { labels, mut chunks } = entry;
            if chunks.is_empty() {
                progress.series_processed();
                continue;
            }
            writer.write_chunks(&mut chunks)?;
            writer.add_series(&labels, &chunks)?;
            progress.series_processed();
        }
        cursor.close()?;

        let stats = writer.flush()?;
        tracing::debug!(
            series = stats.num_series,
            chunks = stats.num_chunks,
            samples = stats.num_samples,
            dry_run = self.dry_run,
            "rewrite finished"
        );
        Ok(stats)
    }
}

/// Build the meta document for a rewritten block: a fresh id, the covered
/// time range, the writer's stats, and the input blocks as compaction
/// sources.
pub fn compacted_meta(
    readers: &[&dyn BlockReader],
    stats: BlockStats,
    time_range: Option<(i64, i64)>,
) -> BlockMeta {
    let (min_time, max_time) = time_range.unwrap_or((i64::MAX, i64::MIN));
    let mut meta = BlockMeta::new(Uuid::new_v4(), min_time, max_time);
    meta.stats = stats;
    meta.compaction.sources = readers.iter().map(|r| r.meta().ulid).collect();
    meta
}
