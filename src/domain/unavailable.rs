use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Source;

pub const REASON_MISSING_FILE_URL: &str = "missing_file_url";
pub const REASON_DOWNLOAD_FAILED: &str = "download_failed";

/// A post that was seen during a sync but could not be archived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnavailableRecord {
    pub source: Source,
    pub source_id: String,
    pub reason: String,
    pub seen_at: DateTime<Utc>,
    /// External provenance links for manual follow-up.
    pub sources: Vec<String>,
}

impl UnavailableRecord {
    pub fn new(source: Source, source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            source,
            source_id: source_id.into(),
            reason: reason.into(),
            seen_at: Utc::now(),
            sources: Vec::new(),
        }
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }
}
