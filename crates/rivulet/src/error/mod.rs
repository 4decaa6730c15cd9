use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Errors raised by the suspense bridge.
///
/// The enum is clonable and serializable so a rejection stored in the cache
/// can be re-raised verbatim to every later caller of the same key within a
/// pass.
#[derive(ThisError, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RivuletError {
    #[error("key cannot be canonicalized: {0}")]
    InvalidKey(String),

    #[error("{0}")]
    Producer(String),

    #[error("payload could not be decoded: {0}")]
    PayloadDecode(String),

    #[error("value could not be serialized: {0}")]
    Serialization(String),
}

impl RivuletError {
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey(message.into())
    }

    pub fn producer(message: impl Into<String>) -> Self {
        Self::Producer(message.into())
    }

    pub fn payload_decode(message: impl Into<String>) -> Self {
        Self::PayloadDecode(message.into())
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidKey(_) => "INVALID_KEY",
            Self::Producer(_) => "PRODUCER_ERROR",
            Self::PayloadDecode(_) => "PAYLOAD_DECODE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

impl From<serde_json::Error> for RivuletError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<String> for RivuletError {
    fn from(error: String) -> Self {
        Self::Producer(error)
    }
}

impl From<&str> for RivuletError {
    fn from(error: &str) -> Self {
        Self::Producer(error.to_string())
    }
}
