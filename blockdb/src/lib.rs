//! Time-series block engine.
//!
//! This crate holds the data model shared by the store adapter and the
//! block rewriter: label-identified series of XOR-compressed sample
//! chunks, immutable on-disk blocks (symbols, postings index, chunks,
//! tombstones, meta document), label-ordered series cursors with k-way
//! merging, and an in-memory head database whose queriers pin the
//! database lifecycle.
//!
//! # Key concepts
//!
//! - **Labels**: a series is its sorted label set; cursors and indexes
//!   order series by label-set comparison.
//! - **Chunks**: immutable, Gorilla-compressed sample runs carried as
//!   ref-counted [`bytes::Bytes`], so block reads are zero-copy.
//! - **Queriers**: scoped read handles; `flush_wal`/`close` on the
//!   database block until every querier is released.

pub mod block;
pub mod chunk;
pub mod cursor;
pub mod db;
mod error;
pub mod index;
pub mod model;
pub mod serde;
pub mod writer;

pub use block::{Block, BlockCompaction, BlockMeta, BlockReader, BlockStats};
pub use chunk::{ChunkMeta, ChunkPool, DEFAULT_SAMPLES_PER_CHUNK, encode_samples, rechunk};
pub use cursor::{ListCursor, MergeCursor, SeriesCursor, SeriesEntry};
pub use db::{Appender, Querier, Tsdb};
pub use error::{Error, Result};
pub use model::{Interval, Intervals, Label, Labels, Matcher, MatcherType, Sample, matches_all};
pub use writer::{BlockWriter, DiskWriter, NullWriter};
