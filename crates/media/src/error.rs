use std::fmt;
use thiserror::Error;

/// Result alias for pipeline operations
pub type Result<T> = std::result::Result<T, MediaError>;

/// Why a selected image was refused before upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationReason {
    /// Declared type is not `image/*` or the content is not a known image format
    NotAnImage { declared: String },
    TooLarge { size: u64, limit: u64 },
    /// The picker's declared length does not match the bytes supplied
    LengthMismatch { declared: u64, actual: u64 },
}

impl fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationReason::NotAnImage { declared } => {
                write!(f, "not an image (declared `{}`)", declared)
            }
            ViolationReason::TooLarge { size, limit } => {
                write!(f, "{} bytes exceeds the {} byte limit", size, limit)
            }
            ViolationReason::LengthMismatch { declared, actual } => {
                write!(f, "declared {} bytes but {} were supplied", declared, actual)
            }
        }
    }
}

/// A single pre-flight failure, identified by selection index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub index: usize,
    pub file_name: String,
    pub reason: ViolationReason,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}: {}", self.index + 1, self.file_name, self.reason)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("No images selected")]
    EmptyBatch,

    #[error("A profile photo upload takes exactly one image, got {0}")]
    TooManyForProfilePhoto(usize),

    #[error("{} image(s) failed validation: {}", .0.len(), join(.0))]
    Validation(Vec<Violation>),
}

fn join(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
