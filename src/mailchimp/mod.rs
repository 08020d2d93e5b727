//! Mailchimp Marketing API integration
//!
//! Uploads images to the file manager (Content Studio) and HTML documents
//! as templates. The real client talks HTTP; the mock keeps everything in
//! memory and is used for dry runs and tests.

pub mod client;
pub mod mock;

pub use client::MailchimpClient;
pub use mock::MockMailchimpClient;

use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait MailchimpService: Send + Sync {
    /// Uploads raw image bytes and returns the hosted `full_size_url`.
    async fn upload_image(&self, name: &str, data: &[u8]) -> Result<String>;

    /// Creates a template and returns its remote id.
    async fn upload_template(&self, name: &str, html: &str) -> Result<String>;
}
