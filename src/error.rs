//! Error handling and custom error types
//!
//! Provides unified error handling across the pipeline using thiserror.
//! Per-asset and per-document failures are turned into outcome records by
//! the orchestrator; only [`Error::CriticalCompression`] on a critical asset
//! ever escapes a batch.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// The file could not be read or decoded as an image.
    #[error("Compression error for '{}': {reason}", path.display())]
    Compression { path: PathBuf, reason: String },

    /// The file cannot be brought under the hard size limit.
    #[error(
        "Cannot bring '{}' under {limit} bytes (smallest result: {size} bytes)",
        path.display()
    )]
    CriticalCompression {
        path: PathBuf,
        size: u64,
        limit: u64,
    },

    #[error("Upload error: {0}")]
    Upload(String),

    /// Mailchimp accepted the request but the reply is unusable. The
    /// resource may already exist remotely, so this is never retried.
    #[error("Unexpected Mailchimp response: {0}")]
    InvalidResponse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] dotenvy::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invariant violated: {0}")]
    Invariant(String),
}

impl Error {
    pub(crate) fn compression(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Compression {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// True for the size-limit failure that may abort a batch.
    pub fn is_critical(&self) -> bool {
        matches!(self, Error::CriticalCompression { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_compression_message() {
        let err = Error::CriticalCompression {
            path: PathBuf::from("/img/hero.png"),
            size: 2_000_000,
            limit: 1_048_576,
        };
        assert!(err.is_critical());
        assert_eq!(
            err.to_string(),
            "Cannot bring '/img/hero.png' under 1048576 bytes (smallest result: 2000000 bytes)"
        );
    }

    #[test]
    fn test_encoder_errors_convert_to_image_variant() {
        let limit =
            image::error::LimitError::from_kind(image::error::LimitErrorKind::DimensionError);
        let err: Error = image::ImageError::Limits(limit).into();
        assert!(matches!(err, Error::Image(_)));
        assert!(!err.is_critical());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_invalid_response_is_not_retryable() {
        let err = Error::InvalidResponse("No template ID returned from Mailchimp".to_string());
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Unexpected Mailchimp response: No template ID returned from Mailchimp"
        );
    }

    #[test]
    fn test_compression_error_is_not_critical() {
        let err = Error::compression("/img/empty.png", "file is empty");
        assert!(!err.is_critical());
        assert!(err.to_string().contains("file is empty"));
    }
}
