//! Error types for AdChoices

use crate::types::SessionId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("access denied: {what}")]
    AccessDenied { what: String },

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("no player created for session {0}")]
    PlayerNotFound(SessionId),

    #[error("frame not found: {0}")]
    FrameNotFound(u64),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("id space exhausted: {live} live sessions in a space of {space}")]
    IdSpaceExhausted { live: usize, space: u32 },

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn access_denied(what: impl Into<String>) -> Self {
        Self::AccessDenied { what: what.into() }
    }

    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::InvalidMessage(message.into())
    }

    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    /// Cross-origin reads surface as this variant; callers treat it as
    /// classification data rather than a failure.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied { .. })
    }
}
