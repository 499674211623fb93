//! Per-source authentication kept in the settings table.
//!
//! e621 stores `username` + API key. FurAffinity stores cookie `a` as the
//! username and cookie `b` as the secret.

use std::sync::Arc;

use serde::Serialize;

use crate::app::{BurrowError, Result};
use crate::domain::Source;
use crate::store::Store;

/// What callers may see about stored credentials. Never carries the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredInfo {
    pub username: Option<String>,
    pub has_secret: bool,
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

pub struct CredentialStore {
    store: Arc<dyn Store + Send + Sync>,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn Store + Send + Sync>) -> Self {
        Self { store }
    }

    fn username_key(source: Source) -> String {
        format!("{}_username", source.as_str())
    }

    fn secret_key(source: Source) -> String {
        format!("{}_secret", source.as_str())
    }

    pub fn get_cred_info(&self, source: Source) -> Result<CredInfo> {
        let username = self.store.get_setting(&Self::username_key(source))?;
        let has_secret = self
            .store
            .get_setting(&Self::secret_key(source))?
            .is_some_and(|s| !s.is_empty());

        Ok(CredInfo {
            username,
            has_secret,
        })
    }

    /// Saves credentials. A blank `secret` keeps whatever secret is stored.
    pub fn set_credentials(&self, source: Source, username: &str, secret: &str) -> Result<()> {
        let username = username.trim();
        if username.is_empty() {
            return Err(BurrowError::InvalidOptions(
                "username must not be empty".to_string(),
            ));
        }

        self.store
            .set_setting(&Self::username_key(source), username)?;

        let secret = secret.trim();
        if !secret.is_empty() {
            self.store.set_setting(&Self::secret_key(source), secret)?;
        }

        Ok(())
    }

    pub fn clear_credentials(&self, source: Source) -> Result<()> {
        self.store.delete_setting(&Self::username_key(source))?;
        self.store.delete_setting(&Self::secret_key(source))?;
        Ok(())
    }

    /// Full credentials for a client. Fails unless both parts are stored.
    pub fn load(&self, source: Source) -> Result<Credentials> {
        let username = self.store.get_setting(&Self::username_key(source))?;
        let secret = self.store.get_setting(&Self::secret_key(source))?;

        match (username, secret) {
            (Some(username), Some(secret)) if !username.is_empty() && !secret.is_empty() => {
                Ok(Credentials { username, secret })
            }
            _ => Err(BurrowError::MissingCredentials(source.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn creds() -> CredentialStore {
        CredentialStore::new(Arc::new(SqliteStore::in_memory().unwrap()))
    }

    #[test]
    fn test_empty_info() {
        let creds = creds();
        let info = creds.get_cred_info(Source::E621).unwrap();
        assert_eq!(info.username, None);
        assert!(!info.has_secret);
    }

    #[test]
    fn test_set_and_load() {
        let creds = creds();
        creds.set_credentials(Source::E621, "fox", "key123").unwrap();

        let info = creds.get_cred_info(Source::E621).unwrap();
        assert_eq!(info.username.as_deref(), Some("fox"));
        assert!(info.has_secret);

        let loaded = creds.load(Source::E621).unwrap();
        assert_eq!(loaded.secret, "key123");
        assert!(!format!("{:?}", loaded).contains("key123"));
    }

    #[test]
    fn test_blank_secret_keeps_existing() {
        let creds = creds();
        creds.set_credentials(Source::FurAffinity, "cookie-a", "cookie-b").unwrap();
        creds.set_credentials(Source::FurAffinity, "cookie-a2", "  ").unwrap();

        let loaded = creds.load(Source::FurAffinity).unwrap();
        assert_eq!(loaded.username, "cookie-a2");
        assert_eq!(loaded.secret, "cookie-b");
    }

    #[test]
    fn test_blank_username_rejected() {
        let creds = creds();
        let result = creds.set_credentials(Source::E621, " ", "key");
        assert!(matches!(result, Err(BurrowError::InvalidOptions(_))));
    }

    #[test]
    fn test_clear_and_missing() {
        let creds = creds();
        creds.set_credentials(Source::E621, "fox", "key").unwrap();
        creds.clear_credentials(Source::E621).unwrap();

        assert!(matches!(
            creds.load(Source::E621),
            Err(BurrowError::MissingCredentials(_))
        ));
    }

    #[test]
    fn test_sources_are_separate() {
        let creds = creds();
        creds.set_credentials(Source::E621, "fox", "key").unwrap();
        assert!(creds.load(Source::FurAffinity).is_err());
    }
}
