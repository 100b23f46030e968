//! Decoding of the service's `{success, data?, message?}` envelope

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ApiError, Result};
use crate::fetch::RawResponse;

/// The remote operation a response belongs to.
///
/// Decides how a `success: false` body and status codes are classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    Authenticate,
    Register,
    FetchProfile,
    FetchProfileByToken,
    MutateProfile,
    UploadImage,
    ListGallery,
    DeleteGalleryItem,
    DeleteAccount,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    /// Extra top-level fields, e.g. the `userId` of a login response
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Envelope {
    /// Deserialize `data`, treating a missing or mismatched payload as malformed
    pub fn data<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.data {
            Some(value) => Ok(T::deserialize(value)?),
            None => Err(ApiError::network("malformed response: missing `data`")),
        }
    }

    /// Deserialize `data` when present
    pub fn data_opt<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match &self.data {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(T::deserialize(value)?)),
        }
    }
}

/// Classify a raw response into a successful envelope or an `ApiError`
pub(crate) fn decode(op: Operation, raw: RawResponse) -> Result<Envelope> {
    if let Some(err) = classify_status(op, raw.status) {
        log::debug!("{:?} rejected with status {}", op, raw.status);
        return Err(err);
    }

    let envelope: Envelope = serde_json::from_slice(&raw.body).map_err(|e| {
        ApiError::network(format!(
            "unexpected response ({}) for {:?}: {}",
            raw.status, op, e
        ))
    })?;

    if envelope.success {
        return Ok(envelope);
    }

    let message = envelope
        .message
        .clone()
        .unwrap_or_else(|| "request was not successful".to_string());
    Err(match op {
        Operation::Authenticate => ApiError::InvalidCredentials(message),
        Operation::FetchProfileByToken => ApiError::Unauthorized,
        Operation::FetchProfile
        | Operation::ListGallery
        | Operation::DeleteGalleryItem
        | Operation::DeleteAccount => ApiError::NotFound,
        Operation::Register | Operation::MutateProfile | Operation::UploadImage => {
            ApiError::validation(message)
        }
    })
}

fn classify_status(op: Operation, status: StatusCode) -> Option<ApiError> {
    // A login only fails with bad credentials or a transport problem
    if op == Operation::Authenticate {
        return match status {
            StatusCode::BAD_REQUEST
            | StatusCode::UNAUTHORIZED
            | StatusCode::FORBIDDEN
            | StatusCode::NOT_FOUND => Some(ApiError::InvalidCredentials(format!("status {}", status))),
            s if !s.is_success() => Some(ApiError::network(format!("login failed with status {}", s))),
            _ => None,
        };
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Some(ApiError::Unauthorized),
        StatusCode::NOT_FOUND => Some(ApiError::NotFound),
        StatusCode::PAYLOAD_TOO_LARGE => Some(ApiError::PayloadTooLarge),
        StatusCode::UNSUPPORTED_MEDIA_TYPE => Some(ApiError::UnsupportedMediaType),
        s if s.is_server_error() => Some(ApiError::network(format!("server error {}", s))),
        _ => None,
    }
}
