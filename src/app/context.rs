use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::app::error::{BurrowError, Result};
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::domain::Source;
use crate::e621::E621Client;
use crate::library::Library;
use crate::store::sqlite::SqliteStore;
use crate::store::Store;
use crate::sync::SyncController;

pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub library: Option<Arc<Library>>,
    pub credentials: Arc<CredentialStore>,
    pub sync: SyncController,
}

impl AppContext {
    /// Opens the library named by `library_root`, falling back to the configured one.
    ///
    /// Without any library the database lives in the user data directory, so
    /// credentials can be managed before a library exists.
    pub fn new(config: Config, library_root: Option<PathBuf>) -> Result<Self> {
        let root = library_root.or_else(|| config.library_root.clone());

        let (library, db_path) = match root {
            Some(root) => {
                let library = Library::open(&root)?;
                let db_path = library.db_path();
                (Some(Arc::new(library)), db_path)
            }
            None => (None, Self::default_db_path()?),
        };

        debug!(db = %db_path.display(), "Opening store");
        let store = Arc::new(SqliteStore::new(&db_path)?);
        Ok(Self::assemble(config, store, library))
    }

    /// In-memory store with an optional on-disk library, for tests.
    pub fn in_memory(library_root: Option<&Path>) -> Result<Self> {
        let library = match library_root {
            Some(root) => Some(Arc::new(Library::open(root)?)),
            None => None,
        };
        let store = Arc::new(SqliteStore::in_memory()?);
        Ok(Self::assemble(Config::default(), store, library))
    }

    fn assemble(config: Config, store: Arc<SqliteStore>, library: Option<Arc<Library>>) -> Self {
        let shared: Arc<dyn Store + Send + Sync> = store.clone();
        let credentials = Arc::new(CredentialStore::new(shared.clone()));
        let sync = SyncController::new(shared, library.clone(), credentials.clone(), config.clone());

        Self {
            config,
            store,
            library,
            credentials,
            sync,
        }
    }

    pub fn library(&self) -> Result<&Library> {
        self.library.as_deref().ok_or(BurrowError::LibraryNotConfigured)
    }

    /// Authenticated e621 client from the stored credentials.
    pub fn e621_client(&self) -> Result<E621Client> {
        let credentials = self.credentials.load(Source::E621)?;
        E621Client::new(&self.config.e621, credentials)
    }

    fn default_db_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| BurrowError::Config("Could not find data directory".into()))?;
        let app_dir = data_dir.join("tailburrow");
        std::fs::create_dir_all(&app_dir)?;
        Ok(app_dir.join("tailburrow.db"))
    }
}
