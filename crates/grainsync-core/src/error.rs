//! Core error types.

use crate::score::ElementRef;
use thiserror::Error;

/// Core errors raised by the schema model, the status store and database adapters.
#[derive(Debug, Error)]
pub enum Error {
    /// Error reported by the database adapter.
    #[error("database error: {0}")]
    Database(String),

    /// Version string could not be parsed.
    #[error("invalid version string: {0}")]
    InvalidVersion(String),

    /// The schema model is malformed.
    #[error("invalid schema model: {0}")]
    InvalidModel(String),

    /// A reference points at an element the model does not declare.
    #[error("unknown element reference: {0}")]
    UnknownReference(ElementRef),

    /// A status row holds data that cannot be interpreted.
    #[error("invalid status row: {0}")]
    InvalidStatus(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Shorthand for a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Error::Database(message.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
