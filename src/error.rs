//! Crate-wide error type.
//!
//! Mirrors the taxonomy from the design: configuration errors surface at
//! construction time, I/O errors wrap the underlying `std::io::Error`,
//! and a handful of protocol/field errors are distinguished so callers
//! can match on them instead of matching strings.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbezError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("field not found: {0}")]
    UnknownField(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, ProbezError>;
