//! Image compression to the hosting API's hard size limit
//!
//! Mailchimp's file manager rejects files over 1 MiB. [`ImageCompressor`]
//! walks a ladder of JPEG quality / dimension strategies until a file fits,
//! and [`CompressionService::validate_under_limit`] re-checks any file just
//! before it is uploaded.

pub mod compressor;
pub mod mime;
pub mod mock;

pub use compressor::{ImageCompressor, Strategy, DEFAULT_LADDER, HARD_LIMIT_BYTES};
pub use mime::detect_image_mime;
pub use mock::MockCompressor;

use crate::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait CompressionService: Send + Sync {
    /// Returns a path whose file is within the hard limit: the input itself
    /// when it is already small enough, otherwise a freshly written JPEG.
    async fn ensure_under_limit(&self, path: &Path) -> Result<PathBuf>;

    /// Returns the file size if it is within the hard limit.
    fn validate_under_limit(&self, path: &Path) -> Result<u64>;
}
