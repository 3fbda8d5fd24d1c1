/// Error types shared by the store, tracker, engine and session components
use thiserror::Error;

/// Errors returned by tab-persistence operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Malformed URL or record shape, rejected before persistence.
    #[error("validation error: {0}")]
    Validation(String),
    /// Unknown record or session id.
    #[error("not found: {0}")]
    NotFound(String),
    /// The host messaging, tab or storage channel is gone.
    #[error("host unavailable: {0}")]
    HostUnavailable(String),
    /// Stored or imported JSON could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn host(msg: impl Into<String>) -> Self {
        Error::HostUnavailable(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
