use thiserror::Error;

/// Errors surfaced by the block rewriter. The rewriter never retries; a
/// failed run leaves its partial output directory for the caller to remove.
#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot write from no readers")]
    NoReaders,

    #[error("rewrite canceled")]
    Canceled,

    #[error(transparent)]
    Block(#[from] blockdb::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type alias for rewriter operations.
pub type Result<T> = std::result::Result<T, Error>;
