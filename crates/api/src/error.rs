//! Error type for the remote profile API

use std::fmt;
use thiserror::Error;

/// Result alias used throughout the API client
pub type Result<T> = std::result::Result<T, ApiError>;

/// Failure of a single remote call.
///
/// Cloneable so it can be stored per item in an upload batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Validation error{}: {message}", field_suffix(.field))]
    Validation {
        field: Option<String>,
        message: String,
    },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found")]
    NotFound,

    #[error("Payload too large")]
    PayloadTooLarge,

    #[error("Unsupported media type")]
    UnsupportedMediaType,

    #[error("Network error: {0}")]
    Network(String),
}

impl ApiError {
    /// Create a validation error that is not tied to a field
    pub fn validation<T: fmt::Display>(msg: T) -> Self {
        ApiError::Validation {
            field: None,
            message: msg.to_string(),
        }
    }

    /// Create a validation error for a named field
    pub fn invalid_field<T: fmt::Display>(field: &str, msg: T) -> Self {
        ApiError::Validation {
            field: Some(field.to_string()),
            message: msg.to_string(),
        }
    }

    /// Create a network error
    pub fn network<T: fmt::Display>(msg: T) -> Self {
        ApiError::Network(msg.to_string())
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}

fn field_suffix(field: &Option<String>) -> String {
    match field {
        Some(name) => format!(" on `{}`", name),
        None => String::new(),
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Network(err.to_string())
    }
}

impl From<url::ParseError> for ApiError {
    fn from(err: url::ParseError) -> Self {
        ApiError::Network(format!("invalid URL: {}", err))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Network(format!("malformed response: {}", err))
    }
}
