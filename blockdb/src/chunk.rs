//! XOR-compressed sample chunks built on the `tsz` Gorilla codec.
//!
//! A chunk payload is a two-byte little-endian sample count followed by the
//! Gorilla bit stream. Payloads are [`Bytes`], so chunks read from a block
//! file are zero-copy slices of that file's buffer and stay valid for as
//! long as any reference to them is held.

use std::sync::Mutex;

use bytes::{BufMut, Bytes, BytesMut};
use tsz::stream::{BufferedWriter, Error as TszError, Read as TszRead};
use tsz::{Bit, DataPoint, Decode, Encode, StdDecoder, StdEncoder};

use crate::error::{Error, Result};
use crate::model::Sample;

/// Maximum samples encoded into a single chunk, matching the upstream
/// engine's decoder limits.
pub const DEFAULT_SAMPLES_PER_CHUNK: usize = 120;

const COUNT_HEADER_LEN: usize = 2;

/// A chunk reference within a block: byte offset of the chunk record in the
/// block's chunks file. Zero means "not yet assigned".
pub type ChunkRef = u64;

/// Chunk metadata plus its encoded payload.
///
/// `data` may be empty when the producer was asked to skip chunk bytes
/// (label-only queries).
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMeta {
    pub min_time: i64,
    pub max_time: i64,
    pub chunk_ref: ChunkRef,
    pub data: Bytes,
}

impl ChunkMeta {
    /// Number of samples in the encoded payload.
    pub fn num_samples(&self) -> usize {
        if self.data.len() < COUNT_HEADER_LEN {
            return 0;
        }
        u16::from_le_bytes([self.data[0], self.data[1]]) as usize
    }

    /// Streaming iterator over the decoded samples.
    pub fn iter(&self) -> SampleIter<'_> {
        SampleIter::new(&self.data)
    }

    /// Decode all samples into `buf` (cleared first). Pairs with
    /// [`ChunkPool`] for buffer reuse.
    pub fn samples_into(&self, buf: &mut Vec<Sample>) -> Result<()> {
        buf.clear();
        for sample in self.iter() {
            buf.push(sample?);
        }
        Ok(())
    }

    /// Whether `[min_time, max_time]` overlaps the closed interval
    /// `[mint, maxt]`.
    pub fn overlaps(&self, mint: i64, maxt: i64) -> bool {
        self.min_time <= maxt && mint <= self.max_time
    }
}

/// Encode samples into a single chunk. Timestamps must be non-negative and
/// non-decreasing; the caller is responsible for ordering.
pub fn encode_samples(samples: &[Sample]) -> Result<ChunkMeta> {
    if samples.is_empty() {
        return Err(Error::InvalidInput("cannot encode an empty chunk".into()));
    }
    if samples.len() > u16::MAX as usize {
        return Err(Error::InvalidInput(format!(
            "chunk too large: {} samples",
            samples.len()
        )));
    }

    let writer = BufferedWriter::new();
    let mut encoder = StdEncoder::new(samples[0].t as u64, writer);
    for sample in samples {
        if sample.t < 0 {
            return Err(Error::InvalidInput(format!(
                "negative timestamp {} cannot be chunk-encoded",
                sample.t
            )));
        }
        encoder.encode(DataPoint::new(sample.t as u64, sample.v));
    }
    let stream = encoder.close();

    let mut buf = BytesMut::with_capacity(COUNT_HEADER_LEN + stream.len());
    buf.put_u16_le(samples.len() as u16);
    buf.extend_from_slice(&stream);

    Ok(ChunkMeta {
        min_time: samples[0].t,
        max_time: samples[samples.len() - 1].t,
        chunk_ref: 0,
        data: buf.freeze(),
    })
}

/// Split samples into chunks of at most `target` samples each.
pub fn rechunk(samples: &[Sample], target: usize) -> Result<Vec<ChunkMeta>> {
    let target = target.max(1);
    samples.chunks(target).map(encode_samples).collect()
}

/// Iterator decoding a chunk payload sample by sample.
pub struct SampleIter<'a> {
    decoder: StdDecoder<BitCursor<'a>>,
    remaining: usize,
}

impl<'a> SampleIter<'a> {
    fn new(data: &'a [u8]) -> Self {
        let remaining = if data.len() < COUNT_HEADER_LEN {
            0
        } else {
            u16::from_le_bytes([data[0], data[1]]) as usize
        };
        let body = if data.len() < COUNT_HEADER_LEN {
            &[][..]
        } else {
            &data[COUNT_HEADER_LEN..]
        };
        Self {
            decoder: StdDecoder::new(BitCursor::new(body)),
            remaining,
        }
    }
}

impl Iterator for SampleIter<'_> {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        match self.decoder.next() {
            Ok(dp) => Some(Ok(Sample::new(dp.get_time() as i64, dp.get_value()))),
            Err(tsz::decode::Error::EndOfStream) => {
                self.remaining = 0;
                Some(Err(Error::Encoding(
                    "chunk stream ended before the declared sample count".into(),
                )))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(Error::Encoding(format!("chunk decode failed: {}", e))))
            }
        }
    }
}

/// A bit cursor over borrowed bytes implementing `tsz::stream::Read`.
///
/// The stock `tsz` reader takes ownership of its buffer; this one tracks a
/// single absolute bit position over a slice so decoding block chunks never
/// copies payload bytes.
struct BitCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BitCursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }
}

impl TszRead for BitCursor<'_> {
    fn read_bit(&mut self) -> std::result::Result<Bit, TszError> {
        let byte = *self.bytes.get(self.pos >> 3).ok_or(TszError::EOF)?;
        let bit = (byte >> (7 - (self.pos & 7))) & 1;
        self.pos += 1;
        Ok(if bit == 0 { Bit::Zero } else { Bit::One })
    }

    fn read_byte(&mut self) -> std::result::Result<u8, TszError> {
        self.read_bits(8).map(|bits| bits as u8)
    }

    fn read_bits(&mut self, mut num: u32) -> std::result::Result<u64, TszError> {
        if num > 64 {
            num = 64;
        }
        let mut bits = 0u64;
        for _ in 0..num {
            bits = bits.wrapping_shl(1) | self.read_bit()?.to_u64();
        }
        Ok(bits)
    }

    fn peak_bits(&mut self, num: u32) -> std::result::Result<u64, TszError> {
        let saved = self.pos;
        let bits = self.read_bits(num);
        self.pos = saved;
        bits
    }
}

/// Pool of decoded-sample buffers, shared by rewrites that decode and
/// re-encode many chunks.
#[derive(Debug, Default)]
pub struct ChunkPool {
    buffers: Mutex<Vec<Vec<Sample>>>,
}

const MAX_POOLED_BUFFERS: usize = 64;

impl ChunkPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Vec<Sample> {
        self.buffers
            .lock()
            .expect("chunk pool lock poisoned")
            .pop()
            .unwrap_or_default()
    }

    pub fn put(&self, mut buf: Vec<Sample>) {
        buf.clear();
        let mut buffers = self.buffers.lock().expect("chunk pool lock poisoned");
        if buffers.len() < MAX_POOLED_BUFFERS {
            buffers.push(buf);
        }
    }
}
