//! Immutable on-disk blocks: the meta document, the chunk file, and the
//! read path over both.
//!
//! A block directory holds four files:
//!
//! ```text
//! meta.json     block identity, time range, stats, compaction sources
//! index         symbols, series records, postings (see `index`)
//! chunks        length-prefixed chunk payloads addressed by byte offset
//! tombstones    persisted deletion intervals (normally empty)
//! ```
//!
//! The chunks file is read into a single [`Bytes`] buffer; every chunk
//! handed out is a zero-copy slice of it, valid for as long as any clone
//! of the buffer lives.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chunk::ChunkMeta;
use crate::cursor::{SeriesCursor, SeriesEntry};
use crate::error::{Error, Result};
use crate::index::{BlockIndex, ChunkRecord};
use crate::model::{Interval, Intervals, Matcher, MatcherType, matches_all};
use crate::serde::{check_header, get_i64, get_u32, get_u64, put_header};

pub const META_FILENAME: &str = "meta.json";
pub const INDEX_FILENAME: &str = "index";
pub const CHUNKS_FILENAME: &str = "chunks";
pub const TOMBSTONES_FILENAME: &str = "tombstones";

pub const CHUNKS_MAGIC: u32 = 0x4b48_4342; // "BCHK"
pub const TOMBSTONES_MAGIC: u32 = 0x424d_5442; // "BTMB"

/// Byte length of the chunks file header; the first valid chunk ref.
pub const CHUNKS_HEADER_LEN: u64 = 5;

pub const META_VERSION: u32 = 1;

/// Counts reported by a block writer and recorded in the meta document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStats {
    pub num_samples: u64,
    pub num_series: u64,
    pub num_chunks: u64,
}

/// Provenance of a compacted block: the ids of its input blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCompaction {
    #[serde(default)]
    pub sources: Vec<Uuid>,
}

/// The block meta document, persisted as `meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub version: u32,
    pub ulid: Uuid,
    pub min_time: i64,
    pub max_time: i64,
    pub stats: BlockStats,
    #[serde(default)]
    pub compaction: BlockCompaction,
}

impl BlockMeta {
    pub fn new(id: Uuid, min_time: i64, max_time: i64) -> Self {
        Self {
            version: META_VERSION,
            ulid: id,
            min_time,
            max_time,
            stats: BlockStats::default(),
            compaction: BlockCompaction::default(),
        }
    }

    pub fn write_to_dir(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(dir.join(META_FILENAME), json)?;
        Ok(())
    }

    pub fn read_from_dir(dir: &Path) -> Result<Self> {
        let bytes = fs::read(dir.join(META_FILENAME))?;
        let meta: BlockMeta = serde_json::from_slice(&bytes)?;
        if meta.version != META_VERSION {
            return Err(Error::Encoding(format!(
                "unsupported block meta version {}",
                meta.version
            )));
        }
        Ok(meta)
    }
}

/// Read interface over a block, consumed by the rewriter.
pub trait BlockReader: Send + Sync {
    fn meta(&self) -> &BlockMeta;
    fn symbols(&self) -> &[String];
    /// Cursor over every series in the block, in label-set order.
    fn series_cursor(&self) -> Result<Box<dyn SeriesCursor>>;
}

/// An opened, immutable block.
pub struct Block {
    dir: PathBuf,
    meta: BlockMeta,
    index: Arc<BlockIndex>,
    chunk_data: Bytes,
    tombstones: Vec<(u64, Intervals)>,
}

impl Block {
    /// Open a block directory, loading the index and chunk file into memory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let meta = BlockMeta::read_from_dir(&dir)?;

        let index_bytes = fs::read(dir.join(INDEX_FILENAME))?;
        let index = Arc::new(BlockIndex::decode(&index_bytes)?);

        let chunk_data = Bytes::from(fs::read(dir.join(CHUNKS_FILENAME))?);
        {
            let mut header = chunk_data.as_ref();
            check_header(&mut header, CHUNKS_MAGIC, "chunks")?;
        }

        let tombstones = read_tombstones(&dir)?;

        Ok(Self {
            dir,
            meta,
            index,
            chunk_data,
            tombstones,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn meta(&self) -> &BlockMeta {
        &self.meta
    }

    pub fn symbols(&self) -> &[String] {
        self.index.symbols()
    }

    pub fn tombstones(&self) -> &[(u64, Intervals)] {
        &self.tombstones
    }

    /// Series matching every matcher, restricted to chunks overlapping
    /// `[mint, maxt]`. Equality matchers resolve through postings; the
    /// rest filter the candidate set. With `skip_chunks` the entries carry
    /// labels only.
    pub fn select(
        &self,
        matchers: &[Matcher],
        mint: i64,
        maxt: i64,
        skip_chunks: bool,
    ) -> Result<Box<dyn SeriesCursor>> {
        let mut ordinals = self.index.all_postings();
        let mut residual = Vec::new();
        for matcher in matchers {
            match matcher.typ {
                MatcherType::Eq => match self.index.postings(&matcher.name, &matcher.value) {
                    Some(postings) => ordinals &= postings,
                    None => {
                        ordinals.clear();
                        break;
                    }
                },
                _ => residual.push(matcher.clone()),
            }
        }

        Ok(Box::new(BlockCursor {
            index: self.index.clone(),
            chunk_data: self.chunk_data.clone(),
            ordinals: ordinals.into_iter().collect::<Vec<_>>().into_iter(),
            residual,
            mint,
            maxt,
            skip_chunks,
        }))
    }
}

impl BlockReader for Block {
    fn meta(&self) -> &BlockMeta {
        Block::meta(self)
    }

    fn symbols(&self) -> &[String] {
        Block::symbols(self)
    }

    fn series_cursor(&self) -> Result<Box<dyn SeriesCursor>> {
        self.select(&[], i64::MIN, i64::MAX, false)
    }
}

/// Lazy cursor over a block's series. Ordinal order is label-set order
/// because the writer adds series sorted.
struct BlockCursor {
    index: Arc<BlockIndex>,
    chunk_data: Bytes,
    ordinals: std::vec::IntoIter<u32>,
    residual: Vec<Matcher>,
    mint: i64,
    maxt: i64,
    skip_chunks: bool,
}

impl SeriesCursor for BlockCursor {
    fn next(&mut self) -> Result<Option<SeriesEntry>> {
        for ordinal in self.ordinals.by_ref() {
            let (labels, records) = self
                .index
                .series(ordinal)
                .ok_or_else(|| Error::Encoding(format!("series ordinal {} out of range", ordinal)))?;
            if !matches_all(labels, &self.residual) {
                continue;
            }

            let overlapping: Vec<&ChunkRecord> = records
                .iter()
                .filter(|r| r.min_time <= self.maxt && self.mint <= r.max_time)
                .collect();
            if overlapping.is_empty() {
                continue;
            }

            let labels = labels.clone();
            if self.skip_chunks {
                return Ok(Some(SeriesEntry::new(labels, Vec::new())));
            }

            let mut chunks = Vec::with_capacity(overlapping.len());
            for record in overlapping {
                chunks.push(resolve_chunk(&self.chunk_data, record)?);
            }
            return Ok(Some(SeriesEntry::new(labels, chunks)));
        }
        Ok(None)
    }
}

/// Slice one chunk payload out of the chunks file buffer.
fn resolve_chunk(chunk_data: &Bytes, record: &ChunkRecord) -> Result<ChunkMeta> {
    let offset = record.chunk_ref as usize;
    if record.chunk_ref < CHUNKS_HEADER_LEN || offset + 4 > chunk_data.len() {
        return Err(Error::Encoding(format!(
            "chunk ref {} out of range",
            record.chunk_ref
        )));
    }
    let mut slice = &chunk_data[offset..];
    let len = get_u32(&mut slice)? as usize;
    let start = offset + 4;
    if start + len > chunk_data.len() {
        return Err(Error::Encoding(format!(
            "chunk at ref {} overruns the chunks file",
            record.chunk_ref
        )));
    }
    Ok(ChunkMeta {
        min_time: record.min_time,
        max_time: record.max_time,
        chunk_ref: record.chunk_ref,
        data: chunk_data.slice(start..start + len),
    })
}

/// Encode a tombstone set. Deletion in the rewriter is physical, so this
/// is normally called with an empty slice.
pub fn encode_tombstones(stones: &[(u64, Intervals)]) -> Vec<u8> {
    use bytes::BufMut;

    let mut buf = Vec::new();
    put_header(&mut buf, TOMBSTONES_MAGIC);
    buf.put_u32_le(stones.len() as u32);
    for (series_ref, intervals) in stones {
        buf.put_u64_le(*series_ref);
        buf.put_u32_le(intervals.iter().count() as u32);
        for iv in intervals.iter() {
            buf.put_i64_le(iv.mint);
            buf.put_i64_le(iv.maxt);
        }
    }
    buf
}

fn read_tombstones(dir: &Path) -> Result<Vec<(u64, Intervals)>> {
    let bytes = fs::read(dir.join(TOMBSTONES_FILENAME))?;
    let mut buf = bytes.as_slice();
    let buf = &mut buf;
    check_header(buf, TOMBSTONES_MAGIC, "tombstones")?;

    let count = get_u32(buf)? as usize;
    let mut stones = Vec::with_capacity(count);
    for _ in 0..count {
        let series_ref = get_u64(buf)?;
        let interval_count = get_u32(buf)? as usize;
        let mut intervals = Intervals::new();
        for _ in 0..interval_count {
            let mint = get_i64(buf)?;
            let maxt = get_i64(buf)?;
            intervals.add(Interval::new(mint, maxt));
        }
        stones.push((series_ref, intervals));
    }
    Ok(stones)
}
