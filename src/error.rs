//! Error types for ingestion and retrieval.
//!
//! Every failure in this crate is fatal for the operation that hit it: there is no
//! partial-success mode. Errors carry enough context (file, field, bucket, operation)
//! for the binary to report what went wrong before exiting non-zero.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Crate error type.
#[derive(Error, Debug)]
pub enum Error {
    /// A column required by the schema is absent from a source file.
    #[error("source format error: column {column} required but not found in {}", file.display())]
    SourceFormat { file: PathBuf, column: String },

    /// A chunk or column payload could not be decoded.
    #[error("decode error in {context}: {message}")]
    Decode { context: String, message: String },

    /// Open/read/write failure.
    #[error("I/O error during {op} on {}: {source}", path.display())]
    Io {
        op: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// No encoder/decoder is registered for a declared type name.
    #[error("unknown column type: {0}")]
    UnknownType(String),

    /// Invalid configuration or dataset metadata.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON metadata (`conf.json`, `dtypes.json`, code tables) failed to (de)serialize.
    #[error("JSON error in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The task stopped because another task of the same run failed first.
    #[error("run aborted after an earlier failure")]
    Aborted,
}

impl Error {
    /// Wrap an I/O error with the operation and path it happened on.
    pub fn io(op: impl Into<String>, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            op: op.into(),
            path: path.into(),
            source,
        }
    }

    /// Create a decode error.
    pub fn decode(context: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Decode {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Whether retrying the failed operation could succeed.
    ///
    /// Only a handful of I/O error kinds are considered transient; everything else,
    /// including every non-I/O error, is permanent.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}
