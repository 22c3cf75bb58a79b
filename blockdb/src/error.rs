/// Error type for block engine operations
#[derive(Debug)]
pub enum Error {
    /// I/O errors while reading or writing block files
    Io(std::io::Error),
    /// Encoding/decoding errors
    Encoding(String),
    /// Invalid input or parameter errors
    InvalidInput(String),
    /// Writer invariant violations (unsorted symbols, unsorted series,
    /// unassigned chunk refs). Fatal; partial output is the caller's to remove.
    Writer(String),
    /// The database has been closed
    Closed,
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Encoding(msg) => write!(f, "Encoding error: {}", msg),
            Error::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Error::Writer(msg) => write!(f, "Writer error: {}", msg),
            Error::Closed => write!(f, "database is closed"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Encoding(format!("meta document: {}", err))
    }
}

/// Result type alias for block engine operations
pub type Result<T> = std::result::Result<T, Error>;
