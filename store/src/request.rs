//! Request and response types for the series-query surface.
//!
//! These mirror the wire-level request shapes one-to-one; the transport
//! encoding itself is external to this crate.

use bytes::Bytes;

use blockdb::{Labels, Matcher};

/// The component type a store reports about itself in `Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    Query,
    Rule,
    Sidecar,
    Store,
    Receive,
}

impl StoreType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreType::Query => "query",
            StoreType::Rule => "rule",
            StoreType::Sidecar => "sidecar",
            StoreType::Store => "store",
            StoreType::Receive => "receive",
        }
    }
}

impl std::fmt::Display for StoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the adapter treats recoverable per-block errors mid-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartialResponseStrategy {
    /// Convert recoverable errors into warning frames and keep going.
    #[default]
    Warn,
    /// Abort the stream on the first error.
    Abort,
}

/// A streamed series request.
#[derive(Debug, Clone)]
pub struct SeriesRequest {
    pub min_time: i64,
    pub max_time: i64,
    pub matchers: Vec<Matcher>,
    /// Return label sets only, without chunk payloads.
    pub skip_chunks: bool,
    pub partial_response_strategy: PartialResponseStrategy,
    /// Accepted for wire compatibility; this store serves raw data only.
    pub max_resolution_millis: i64,
    /// Opaque hints, passed back to the caller untouched.
    pub hints: Option<Bytes>,
}

impl SeriesRequest {
    pub fn new(min_time: i64, max_time: i64, matchers: Vec<Matcher>) -> Self {
        Self {
            min_time,
            max_time,
            matchers,
            skip_chunks: false,
            partial_response_strategy: PartialResponseStrategy::default(),
            max_resolution_millis: 0,
            hints: None,
        }
    }
}

/// What a store reports about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
    pub labels: Labels,
    pub store_type: StoreType,
    pub min_time: i64,
    pub max_time: i64,
}

#[derive(Debug, Clone, Default)]
pub struct LabelNamesRequest {
    pub start: i64,
    pub end: i64,
    pub matchers: Vec<Matcher>,
}

#[derive(Debug, Clone)]
pub struct LabelValuesRequest {
    pub label: String,
    pub start: i64,
    pub end: i64,
    pub matchers: Vec<Matcher>,
}

/// Sorted, deduplicated label names plus any non-fatal warnings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelNamesResponse {
    pub names: Vec<String>,
    pub warnings: Vec<String>,
}

/// Sorted, deduplicated label values plus any non-fatal warnings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelValuesResponse {
    pub values: Vec<String>,
    pub warnings: Vec<String>,
}
