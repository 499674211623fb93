//! Secondary source: FurAffinity, scraped with session cookies.

pub mod client;
pub mod extractor;

use async_trait::async_trait;
use serde::Serialize;

use crate::app::Result;

pub use client::FaClient;

/// Metadata scraped from a submission page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub id: String,
    pub view_url: String,
    pub download_url: Option<String>,
    /// Slugged artist name, if the page or download URL revealed one.
    pub artist: Option<String>,
    pub tags: Vec<String>,
    /// `s`, `q` or `e`
    pub rating: String,
}

#[async_trait]
pub trait SubmissionSource: Send + Sync {
    async fn fetch_submission(&self, id: &str) -> Result<Submission>;
}
