//! Error handling for the profile client

use std::fmt;
use thiserror::Error;

use profile_sync_api::ApiError;
use profile_sync_media::MediaError;

/// Result alias for synchronizer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the profile client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A remote call failed; the kind is passed through unchanged
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Images were rejected before any upload started
    #[error(transparent)]
    Media(#[from] MediaError),

    /// Another state-changing operation is in flight
    #[error("Another operation is in progress")]
    Busy,

    /// The operation needs a signed-in session
    #[error("Not signed in")]
    NotSignedIn,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A background task ended without producing a result
    #[error("Task error: {0}")]
    Task(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<T: fmt::Display>(msg: T) -> Self {
        Error::Config(msg.to_string())
    }

    /// Whether the server rejected the session
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Api(ApiError::Unauthorized))
    }
}
