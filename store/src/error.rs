/// Errors surfaced by the store adapter.
///
/// Empty results are never errors: a query window with no data yields an
/// empty success. The adapter never retries; retry policy belongs to the
/// client.
#[derive(Debug)]
pub enum Error {
    /// The request is malformed (bad time range, external-only matchers,
    /// unknown matcher type).
    InvalidArgument(String),
    /// The caller's cancellation signal fired.
    Canceled,
    /// The underlying database failed.
    Internal(String),
    /// The frame sink rejected a write.
    Sink(String),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "{}", msg),
            Error::Canceled => write!(f, "request canceled"),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
            Error::Sink(msg) => write!(f, "sink error: {}", msg),
        }
    }
}

impl From<blockdb::Error> for Error {
    fn from(err: blockdb::Error) -> Self {
        match err {
            blockdb::Error::InvalidInput(msg) => Error::InvalidArgument(msg),
            other => Error::Internal(other.to_string()),
        }
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;
