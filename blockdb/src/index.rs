//! Block index: symbol table, series records, and roaring postings.
//!
//! The index is built append-only under strict ordering invariants
//! (symbols ascending, series in label-set order, chunk refs assigned
//! before the series that references them) and serialized as a single
//! buffer. Postings map each `(name, value)` symbol pair to the bitmap of
//! series ordinals carrying that label.

use std::collections::BTreeMap;

use roaring::RoaringBitmap;

use crate::chunk::ChunkMeta;
use crate::error::{Error, Result};
use crate::model::Labels;
use crate::serde::{
    check_header, get_i64, get_str, get_u16, get_u32, get_u64, put_header, put_str,
};

pub const INDEX_MAGIC: u32 = 0x5844_4942; // "BIDX"

/// Location of one chunk: its time range and its ref into the chunks file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRecord {
    pub min_time: i64,
    pub max_time: i64,
    pub chunk_ref: u64,
}

#[derive(Debug, Clone)]
struct SeriesRecord {
    label_refs: Vec<(u32, u32)>,
    chunks: Vec<ChunkRecord>,
}

/// Append-only index builder enforcing the writer's ordering invariants.
#[derive(Debug, Default)]
pub struct IndexBuilder {
    symbols: Vec<String>,
    series: Vec<SeriesRecord>,
    postings: BTreeMap<(u32, u32), RoaringBitmap>,
    last_labels: Option<Labels>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a symbol. Symbols must arrive in strictly ascending order.
    pub fn add_symbol(&mut self, symbol: &str) -> Result<()> {
        if let Some(last) = self.symbols.last() {
            if symbol <= last.as_str() {
                return Err(Error::Writer(format!(
                    "symbol {:?} out of order (last was {:?})",
                    symbol, last
                )));
            }
        }
        self.symbols.push(symbol.to_string());
        Ok(())
    }

    /// Register a series. Series must arrive in ascending label-set order,
    /// every label name and value must be a registered symbol, and every
    /// chunk must carry an assigned ref.
    pub fn add_series(&mut self, labels: &Labels, chunks: &[ChunkMeta]) -> Result<()> {
        if let Some(last) = &self.last_labels {
            if labels <= last {
                return Err(Error::Writer(format!(
                    "series {} out of order (last was {})",
                    labels, last
                )));
            }
        }

        let mut label_refs = Vec::with_capacity(labels.len());
        for label in labels {
            let name_ref = self.symbol_ref(&label.name)?;
            let value_ref = self.symbol_ref(&label.value)?;
            label_refs.push((name_ref, value_ref));
        }

        let mut records = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if chunk.chunk_ref == 0 {
                return Err(Error::Writer(format!(
                    "series {} references a chunk with no assigned ref",
                    labels
                )));
            }
            records.push(ChunkRecord {
                min_time: chunk.min_time,
                max_time: chunk.max_time,
                chunk_ref: chunk.chunk_ref,
            });
        }

        let ordinal = self.series.len() as u32;
        for &refs in &label_refs {
            self.postings.entry(refs).or_default().insert(ordinal);
        }
        self.series.push(SeriesRecord {
            label_refs,
            chunks: records,
        });
        self.last_labels = Some(labels.clone());
        Ok(())
    }

    pub fn num_series(&self) -> u64 {
        self.series.len() as u64
    }

    fn symbol_ref(&self, symbol: &str) -> Result<u32> {
        self.symbols
            .binary_search_by(|s| s.as_str().cmp(symbol))
            .map(|idx| idx as u32)
            .map_err(|_| Error::Writer(format!("label symbol {:?} was never registered", symbol)))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        use bytes::BufMut;

        let mut buf = Vec::new();
        put_header(&mut buf, INDEX_MAGIC);

        buf.put_u32_le(self.symbols.len() as u32);
        for symbol in &self.symbols {
            put_str(&mut buf, symbol);
        }

        buf.put_u32_le(self.series.len() as u32);
        for series in &self.series {
            buf.put_u16_le(series.label_refs.len() as u16);
            for &(name_ref, value_ref) in &series.label_refs {
                buf.put_u32_le(name_ref);
                buf.put_u32_le(value_ref);
            }
            buf.put_u16_le(series.chunks.len() as u16);
            for chunk in &series.chunks {
                buf.put_i64_le(chunk.min_time);
                buf.put_i64_le(chunk.max_time);
                buf.put_u64_le(chunk.chunk_ref);
            }
        }

        buf.put_u32_le(self.postings.len() as u32);
        for (&(name_ref, value_ref), bitmap) in &self.postings {
            buf.put_u32_le(name_ref);
            buf.put_u32_le(value_ref);
            let mut serialized = Vec::with_capacity(bitmap.serialized_size());
            bitmap
                .serialize_into(&mut serialized)
                .map_err(|e| Error::Encoding(format!("failed to serialize postings: {}", e)))?;
            buf.put_u32_le(serialized.len() as u32);
            buf.put_slice(&serialized);
        }

        Ok(buf)
    }
}

/// Decoded, read-only block index.
#[derive(Debug)]
pub struct BlockIndex {
    symbols: Vec<String>,
    series: Vec<(Labels, Vec<ChunkRecord>)>,
    postings: BTreeMap<(u32, u32), RoaringBitmap>,
}

impl BlockIndex {
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let buf = &mut buf;
        check_header(buf, INDEX_MAGIC, "index")?;

        let symbol_count = get_u32(buf)? as usize;
        let mut symbols = Vec::with_capacity(symbol_count);
        for _ in 0..symbol_count {
            symbols.push(get_str(buf)?);
        }

        let series_count = get_u32(buf)? as usize;
        let mut series = Vec::with_capacity(series_count);
        for _ in 0..series_count {
            let label_count = get_u16(buf)? as usize;
            let mut pairs = Vec::with_capacity(label_count);
            for _ in 0..label_count {
                let name_ref = get_u32(buf)? as usize;
                let value_ref = get_u32(buf)? as usize;
                let name = symbols.get(name_ref).ok_or_else(|| {
                    Error::Encoding(format!("label name symbol ref {} out of range", name_ref))
                })?;
                let value = symbols.get(value_ref).ok_or_else(|| {
                    Error::Encoding(format!("label value symbol ref {} out of range", value_ref))
                })?;
                pairs.push((name.clone(), value.clone()));
            }
            let labels = Labels::from_pairs(pairs);

            let chunk_count = get_u16(buf)? as usize;
            let mut chunks = Vec::with_capacity(chunk_count);
            for _ in 0..chunk_count {
                chunks.push(ChunkRecord {
                    min_time: get_i64(buf)?,
                    max_time: get_i64(buf)?,
                    chunk_ref: get_u64(buf)?,
                });
            }
            series.push((labels, chunks));
        }

        let postings_count = get_u32(buf)? as usize;
        let mut postings = BTreeMap::new();
        for _ in 0..postings_count {
            let name_ref = get_u32(buf)?;
            let value_ref = get_u32(buf)?;
            let len = get_u32(buf)? as usize;
            if buf.len() < len {
                return Err(Error::Encoding(
                    "buffer too short for postings bitmap".into(),
                ));
            }
            let bitmap = RoaringBitmap::deserialize_from(&buf[..len])
                .map_err(|e| Error::Encoding(format!("failed to deserialize postings: {}", e)))?;
            bytes::Buf::advance(buf, len);
            postings.insert((name_ref, value_ref), bitmap);
        }

        Ok(Self {
            symbols,
            series,
            postings,
        })
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn num_series(&self) -> usize {
        self.series.len()
    }

    pub fn series(&self, ordinal: u32) -> Option<(&Labels, &[ChunkRecord])> {
        self.series
            .get(ordinal as usize)
            .map(|(labels, chunks)| (labels, chunks.as_slice()))
    }

    /// Postings bitmap for an exact `name=value` pair, if any series carries it.
    pub fn postings(&self, name: &str, value: &str) -> Option<&RoaringBitmap> {
        let name_ref = self.symbol_ref(name)?;
        let value_ref = self.symbol_ref(value)?;
        self.postings.get(&(name_ref, value_ref))
    }

    /// Bitmap over every series ordinal in the block.
    pub fn all_postings(&self) -> RoaringBitmap {
        (0..self.series.len() as u32).collect()
    }

    fn symbol_ref(&self, symbol: &str) -> Option<u32> {
        self.symbols
            .binary_search_by(|s| s.as_str().cmp(symbol))
            .ok()
            .map(|idx| idx as u32)
    }
}
