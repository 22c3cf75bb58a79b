//! Remote series-query adapter.
//!
//! [`SeriesStore`] exposes a local [`blockdb::Tsdb`] as a remote series
//! service: `info`, streamed `series`, `label_names`, and `label_values`,
//! with static external labels merged into every result, responses framed
//! under a byte budget, and chunk lifetime negotiated with the sink
//! through querier delegation.
//!
//! Transport encoding is external: this crate produces typed [`Frame`]s
//! through the [`FrameSink`] abstraction and nothing else.

mod adapter;
mod error;
mod frame;
mod metrics;
mod request;

pub use adapter::{DEFAULT_MAX_BYTES_PER_FRAME, SeriesStore};
pub use error::{Error, Result};
pub use frame::{Frame, FrameSink, SeriesFrame, VecSink};
pub use metrics::StoreMetrics;
pub use request::{
    LabelNamesRequest, LabelNamesResponse, LabelValuesRequest, LabelValuesResponse,
    PartialResponseStrategy, SeriesRequest, StoreInfo, StoreType,
};
