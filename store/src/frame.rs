//! Response frames and the streaming sink they are delivered to.
//!
//! A series response is a sequence of typed envelopes. Frames for one
//! series are contiguous in the stream; a series whose chunks exceed the
//! frame budget is split across several frames carrying the same labels.

use async_trait::async_trait;
use bytes::Bytes;

use blockdb::{ChunkMeta, Labels, Querier};

use crate::error::Result;

/// One unit of a streamed response.
#[derive(Debug, Clone)]
pub enum Frame {
    Series(SeriesFrame),
    /// A non-fatal problem encountered while producing the stream.
    Warning(String),
    /// Opaque hints passed through from the request.
    Hints(Bytes),
}

/// A series (or a size-bounded slice of one): its output labels and a run
/// of its chunks in ascending `min_time` order.
#[derive(Debug, Clone)]
pub struct SeriesFrame {
    pub labels: Labels,
    pub chunks: Vec<ChunkMeta>,
}

impl SeriesFrame {
    pub fn new(labels: Labels) -> Self {
        Self {
            labels,
            chunks: Vec::new(),
        }
    }
}

/// Where response frames go.
///
/// `send` may apply backpressure; the adapter never buffers a full result
/// set. `delegate` is an optional capability: a sink that accepts the
/// querier takes over responsibility for releasing it once every consumer
/// of the emitted chunk bytes is done, and until then database flush/close
/// block. The default implementation declines by handing the querier back,
/// in which case the adapter releases it before returning.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Frame) -> Result<()>;

    fn delegate(&mut self, querier: Querier) -> std::result::Result<(), Querier> {
        Err(querier)
    }
}

/// A sink that collects frames in memory. Useful for tests and for callers
/// that do not stream.
#[derive(Default, Debug)]
pub struct VecSink {
    pub frames: Vec<Frame>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All series frames, in stream order.
    pub fn series_frames(&self) -> Vec<&SeriesFrame> {
        self.frames
            .iter()
            .filter_map(|f| match f {
                Frame::Series(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn warnings(&self) -> Vec<&str> {
        self.frames
            .iter()
            .filter_map(|f| match f {
                Frame::Warning(w) => Some(w.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl FrameSink for VecSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.frames.push(frame);
        Ok(())
    }
}
