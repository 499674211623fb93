//! Sync engines and their control surface.
//!
//! - [`PrimaryEngine`]: e621 favorites, API-backed
//! - [`SecondaryEngine`] + [`Reconciler`]: FurAffinity favorites, hash-matched
//!   against the library and e621
//! - [`SyncController`]: start/cancel/status per source, one run at a time

pub mod handle;
pub mod primary;
pub mod reconciler;

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::app::{BurrowError, Result};
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::domain::{PrimaryCounters, RunState, SecondaryCounters, SecondaryRun, Source, SyncRun};
use crate::e621::E621Client;
use crate::fetcher::http_fetcher::HttpDownloader;
use crate::fetcher::{Downloader, NoLookup, PrimaryLookup};
use crate::furaffinity::FaClient;
use crate::library::Library;
use crate::store::Store;

pub use handle::{RunContext, RunHandle};
pub use primary::PrimaryEngine;
pub use reconciler::{RecheckReport, ReconcileOutcome, Reconciler, SecondaryEngine};

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Stop after this many committed items.
    pub max_new_downloads: Option<u32>,
}

/// Status snapshot of either engine.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SyncStatus {
    Primary(SyncRun),
    Secondary(SecondaryRun),
}

impl SyncStatus {
    pub fn state(&self) -> RunState {
        match self {
            SyncStatus::Primary(run) => run.state(),
            SyncStatus::Secondary(run) => run.state(),
        }
    }
}

pub struct SyncController {
    store: Arc<dyn Store + Send + Sync>,
    library: Option<Arc<Library>>,
    credentials: Arc<CredentialStore>,
    config: Config,
    primary: RunHandle<PrimaryCounters>,
    secondary: RunHandle<SecondaryCounters>,
}

impl SyncController {
    pub fn new(
        store: Arc<dyn Store + Send + Sync>,
        library: Option<Arc<Library>>,
        credentials: Arc<CredentialStore>,
        config: Config,
    ) -> Self {
        Self {
            store,
            library,
            credentials,
            config,
            primary: RunHandle::new(Source::E621.as_str()),
            secondary: RunHandle::new(Source::FurAffinity.as_str()),
        }
    }

    fn library(&self) -> Result<Arc<Library>> {
        self.library.clone().ok_or(BurrowError::LibraryNotConfigured)
    }

    fn e621_client(&self) -> Result<E621Client> {
        let credentials = self.credentials.load(Source::E621)?;
        E621Client::new(&self.config.e621, credentials)
    }

    /// Hash lookup and file downloads against e621; anonymous when no
    /// credentials are stored, in which case nothing ever matches.
    fn primary_collaborators(&self) -> Result<(Arc<dyn PrimaryLookup>, Arc<dyn Downloader>)> {
        match self.e621_client() {
            Ok(client) => {
                let client = Arc::new(client);
                let lookup: Arc<dyn PrimaryLookup> = client.clone();
                let downloader: Arc<dyn Downloader> = client;
                Ok((lookup, downloader))
            }
            Err(BurrowError::MissingCredentials(_)) => {
                let lookup: Arc<dyn PrimaryLookup> = Arc::new(NoLookup);
                let downloader: Arc<dyn Downloader> =
                    Arc::new(HttpDownloader::new(&self.config.e621.user_agent)?);
                Ok((lookup, downloader))
            }
            Err(e) => Err(e),
        }
    }

    fn is_running(&self, source: Source) -> bool {
        match source {
            Source::E621 => self.primary.is_running(),
            Source::FurAffinity => self.secondary.is_running(),
        }
    }

    /// Starts a background run. Fails synchronously when preconditions are not met.
    pub fn start(&self, source: Source, options: SyncOptions) -> Result<JoinHandle<()>> {
        let library = self.library()?;
        if options.max_new_downloads == Some(0) {
            return Err(BurrowError::InvalidOptions(
                "max_new_downloads must be positive".to_string(),
            ));
        }
        if self.is_running(source) {
            return Err(BurrowError::AlreadyRunning(source.to_string()));
        }

        let retry = self.config.sync.retry_policy();
        let max_storage_errors = self.config.sync.max_consecutive_storage_errors;

        match source {
            Source::E621 => {
                let client = Arc::new(self.e621_client()?);
                let engine = PrimaryEngine::new(
                    self.store.clone(),
                    library,
                    client.clone(),
                    client.clone(),
                    client.favorites_query(),
                )
                .with_retry(retry)
                .with_max_storage_errors(max_storage_errors);

                self.primary
                    .start(options.max_new_downloads, move |ctx| engine.run(ctx))
            }
            Source::FurAffinity => {
                let credentials = self.credentials.load(Source::FurAffinity)?;
                let fa = Arc::new(FaClient::new(&self.config.furaffinity, &credentials)?);
                let (lookup, primary_downloader) = self.primary_collaborators()?;

                let reconciler = Reconciler::new(
                    self.store.clone(),
                    library,
                    fa.clone(),
                    primary_downloader,
                    lookup,
                );
                let engine = SecondaryEngine::new(self.store.clone(), fa.clone(), fa, reconciler)
                    .with_retry(retry)
                    .with_max_storage_errors(max_storage_errors);

                self.secondary
                    .start(options.max_new_downloads, move |ctx| engine.run(ctx))
            }
        }
    }

    pub fn cancel(&self, source: Source) -> Result<()> {
        match source {
            Source::E621 => self.primary.cancel(),
            Source::FurAffinity => self.secondary.cancel(),
        }
    }

    pub fn status(&self, source: Source) -> SyncStatus {
        match source {
            Source::E621 => SyncStatus::Primary(self.primary.status()),
            Source::FurAffinity => SyncStatus::Secondary(self.secondary.status()),
        }
    }

    /// Re-queries e621 for every FurAffinity exclusive. Requires e621 credentials.
    pub async fn recheck_exclusives(&self) -> Result<RecheckReport> {
        let library = self.library()?;
        let client = Arc::new(self.e621_client()?);
        let reconciler = Reconciler::new(
            self.store.clone(),
            library,
            client.clone(),
            client.clone(),
            client,
        )
        .with_retry(self.config.sync.retry_policy());

        reconciler.recheck_exclusives().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use tempfile::TempDir;

    fn controller(library: Option<Arc<Library>>) -> SyncController {
        let store: Arc<dyn Store + Send + Sync> = Arc::new(SqliteStore::in_memory().unwrap());
        let credentials = Arc::new(CredentialStore::new(store.clone()));
        SyncController::new(store, library, credentials, Config::default())
    }

    #[tokio::test]
    async fn test_start_requires_library() {
        let controller = controller(None);
        let result = controller.start(Source::E621, SyncOptions::default());
        assert!(matches!(result, Err(BurrowError::LibraryNotConfigured)));
    }

    #[tokio::test]
    async fn test_start_requires_credentials() {
        let dir = TempDir::new().unwrap();
        let controller = controller(Some(Arc::new(Library::open(dir.path()).unwrap())));

        let result = controller.start(Source::FurAffinity, SyncOptions::default());
        assert!(matches!(result, Err(BurrowError::MissingCredentials(_))));
        assert_eq!(controller.status(Source::FurAffinity).state(), RunState::Idle);
    }

    #[tokio::test]
    async fn test_invalid_options() {
        let dir = TempDir::new().unwrap();
        let controller = controller(Some(Arc::new(Library::open(dir.path()).unwrap())));
        let options = SyncOptions {
            max_new_downloads: Some(0),
        };
        assert!(matches!(
            controller.start(Source::E621, options),
            Err(BurrowError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_cancel_when_idle() {
        let controller = controller(None);
        assert!(matches!(
            controller.cancel(Source::E621),
            Err(BurrowError::NotRunning(_))
        ));
    }

    #[test]
    fn test_status_shapes() {
        let controller = controller(None);
        let primary = serde_json::to_value(controller.status(Source::E621)).unwrap();
        let secondary = serde_json::to_value(controller.status(Source::FurAffinity)).unwrap();
        assert!(primary.get("downloaded_ok").is_some());
        assert!(secondary.get("skipped_md5").is_some());
        assert_eq!(primary["running"], false);
    }
}
