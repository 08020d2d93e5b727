//! Batch media upload pipeline for Mailchimp newsletters
//!
//! Compresses images under the file manager's size limit, deduplicates them
//! by content, uploads them through a bounded worker pool with a persistent
//! content cache, then uploads the rendered newsletter HTML as templates with
//! local image references rewritten to the hosted URLs.

pub mod app;
pub mod cache;
pub mod error;
pub mod image;
pub mod mailchimp;
pub mod models;
pub mod progress;
pub mod retry;
pub mod templates;
pub mod uploader;

pub use error::{Error, Result};
