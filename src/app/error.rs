use thiserror::Error;

#[derive(Error, Debug)]
pub enum BurrowError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Rejected credentials. Terminal for a sync run.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Network or remote hiccup worth retrying.
    #[error("Transient fetch error: {0}")]
    TransientFetch(String),

    /// The post exists remotely but has nothing downloadable.
    #[error("Content unavailable: {0}")]
    UnavailableContent(String),

    /// Writing into the managed library failed.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Sync already running for {0}")]
    AlreadyRunning(String),

    #[error("No sync running for {0}")]
    NotRunning(String),

    #[error("Missing credentials for {0}")]
    MissingCredentials(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Library root is not configured")]
    LibraryNotConfigured,

    /// Another row already holds this content hash.
    #[error("Content already archived: {0}")]
    DuplicateContent(String),

    #[error("Item not found: {0}")]
    ItemNotFound(i64),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl BurrowError {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BurrowError::TransientFetch(_) => true,
            BurrowError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, BurrowError::Authentication(_))
    }

    /// Local disk or database failure.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            BurrowError::Storage(_) | BurrowError::Io(_) | BurrowError::Database(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BurrowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BurrowError::TransientFetch("503".into()).is_transient());
        assert!(!BurrowError::Authentication("401".into()).is_transient());
        assert!(!BurrowError::Storage("disk full".into()).is_transient());
    }

    #[test]
    fn test_storage_classification() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert!(BurrowError::from(io).is_storage());
        assert!(BurrowError::Storage("x".into()).is_storage());
        assert!(!BurrowError::TransientFetch("x".into()).is_storage());
        assert!(!BurrowError::DuplicateContent("abc".into()).is_storage());
    }
}
