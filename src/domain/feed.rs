use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A saved query against the primary source, browsed read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    pub query: String,
    pub created_at: DateTime<Utc>,
}

impl Feed {
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            query: query.into(),
            created_at: Utc::now(),
        }
    }
}
