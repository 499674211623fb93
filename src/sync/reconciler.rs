//! Cross-source reconciliation and the secondary-source sync engine.
//!
//! Each secondary candidate is hashed and matched against the library and
//! then against the primary source, so one artwork ends up as one row.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::app::{BurrowError, Result};
use crate::domain::unavailable::REASON_MISSING_FILE_URL;
use crate::domain::{
    NewItem, RunOutcome, SecondaryCounters, Source, Tag, UnavailableRecord,
};
use crate::fetcher::{
    with_retry, Cursor, Downloader, PageFetcher, PostSummary, PrimaryLookup, RetryPolicy,
};
use crate::furaffinity::{Submission, SubmissionSource};
use crate::hasher::content_hash;
use crate::library::{ext_from_url, primary_file_name, sanitize_slug, secondary_file_name, Library};
use crate::store::Store;
use crate::sync::handle::{RunContext, StorageStreak};

const DEFAULT_MAX_STORAGE_ERRORS: u32 = 5;

#[derive(Debug)]
pub enum ReconcileOutcome {
    /// An item already points at this remote file.
    SkippedExistingUrl,
    /// Identical content is already archived.
    SkippedExistingHash,
    /// Committed (or re-linked) under the primary source.
    Upgraded { item_id: i64 },
    /// Committed under the secondary source.
    ImportedExclusive { item_id: i64 },
    Error(BurrowError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecheckReport {
    pub checked: u32,
    pub upgraded: u32,
    pub errors: u32,
}

pub struct Reconciler {
    store: Arc<dyn Store + Send + Sync>,
    library: Arc<Library>,
    secondary: Arc<dyn Downloader>,
    primary: Arc<dyn Downloader>,
    lookup: Arc<dyn PrimaryLookup>,
    retry: RetryPolicy,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store + Send + Sync>,
        library: Arc<Library>,
        secondary: Arc<dyn Downloader>,
        primary: Arc<dyn Downloader>,
        lookup: Arc<dyn PrimaryLookup>,
    ) -> Self {
        Self {
            store,
            library,
            secondary,
            primary,
            lookup,
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn reconcile(&self, candidate: &Submission) -> ReconcileOutcome {
        match self.try_reconcile(candidate).await {
            Ok(outcome) => outcome,
            Err(e) => ReconcileOutcome::Error(e),
        }
    }

    async fn try_reconcile(&self, candidate: &Submission) -> Result<ReconcileOutcome> {
        let remote_url = candidate.download_url.as_deref().ok_or_else(|| {
            BurrowError::UnavailableContent(format!("submission {} has no download link", candidate.id))
        })?;

        if self.store.exists_by_url(remote_url)? {
            return Ok(ReconcileOutcome::SkippedExistingUrl);
        }

        let bytes = with_retry(&self.retry, "secondary download", || {
            self.secondary.download(remote_url)
        })
        .await?;
        let hash = content_hash(&bytes);

        if let Some(existing) = self.store.exists_by_hash(&hash)? {
            if existing.source.is_primary() && !existing.has_source_link(&candidate.view_url) {
                self.store
                    .add_source_links(existing.id, &[candidate.view_url.clone()])?;
                info!(submission = %candidate.id, item = existing.id, "Linked submission to primary item");
                return Ok(ReconcileOutcome::Upgraded { item_id: existing.id });
            }
            return Ok(ReconcileOutcome::SkippedExistingHash);
        }

        match self.lookup.find_by_hash(&hash).await {
            Ok(Some(post)) => return self.commit_primary(candidate, &post, bytes, hash).await,
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Primary lookup failed, importing as exclusive"),
        }

        self.commit_exclusive(candidate, remote_url, &bytes, hash)
    }

    /// Commits under the primary source, preferring the primary's copy of the file.
    async fn commit_primary(
        &self,
        candidate: &Submission,
        post: &PostSummary,
        secondary_bytes: Bytes,
        secondary_hash: String,
    ) -> Result<ReconcileOutcome> {
        if self.store.exists(post.source, &post.source_id)? {
            return Ok(ReconcileOutcome::SkippedExistingHash);
        }

        let (bytes, hash) = match post.file_url.as_deref() {
            Some(url) => match with_retry(&self.retry, "primary download", || self.primary.download(url)).await {
                Ok(bytes) => {
                    let hash = content_hash(&bytes);
                    (bytes, hash)
                }
                Err(e) => {
                    warn!(post = %post.source_id, error = %e, "Primary file unavailable, keeping secondary copy");
                    (secondary_bytes, secondary_hash)
                }
            },
            None => (secondary_bytes, secondary_hash),
        };

        if self.store.exists_by_hash(&hash)?.is_some() {
            return Ok(ReconcileOutcome::SkippedExistingHash);
        }

        let ext = post
            .ext
            .clone()
            .or_else(|| post.file_url.as_deref().map(ext_from_url))
            .unwrap_or_else(|| "jpg".to_string());
        let name = primary_file_name(&post.primary_artist(), &post.source_id, &ext);

        let mut item = post.to_new_item(String::new(), hash, &[candidate.view_url.clone()]);
        item.ext = Some(ext);
        let Some(item_id) = self.place_and_insert(&name, &bytes, item)? else {
            return Ok(ReconcileOutcome::SkippedExistingHash);
        };

        info!(submission = %candidate.id, post = %post.source_id, "Imported submission as primary post");
        Ok(ReconcileOutcome::Upgraded { item_id })
    }

    fn commit_exclusive(
        &self,
        candidate: &Submission,
        remote_url: &str,
        bytes: &[u8],
        hash: String,
    ) -> Result<ReconcileOutcome> {
        let artist = sanitize_slug(candidate.artist.as_deref().unwrap_or_default());
        let ext = ext_from_url(remote_url);
        let name = secondary_file_name(&artist, &candidate.id, &ext);

        let mut item = NewItem::new(Source::FurAffinity, &candidate.id, String::new());
        item.remote_url = Some(remote_url.to_string());
        item.content_hash = Some(hash);
        item.ext = Some(ext);
        item.rating = Some(candidate.rating.clone());
        item.primary_artist = Some(artist.clone());
        item.sources = vec![candidate.view_url.clone()];
        item.tags = std::iter::once(Tag::artist(&artist))
            .chain(candidate.tags.iter().map(|t| Tag::general(t)))
            .collect();

        let Some(item_id) = self.place_and_insert(&name, bytes, item)? else {
            return Ok(ReconcileOutcome::SkippedExistingHash);
        };

        info!(submission = %candidate.id, "Imported secondary exclusive");
        Ok(ReconcileOutcome::ImportedExclusive { item_id })
    }

    /// `None` when a concurrent writer committed the same content first.
    fn place_and_insert(&self, name: &str, bytes: &[u8], mut item: NewItem) -> Result<Option<i64>> {
        let file_path = self.library.place_file(name, bytes)?;
        item.file_path = file_path.clone();

        match self.store.insert(&item) {
            Ok(id) => Ok(Some(id)),
            Err(e) => {
                if let Err(cleanup) = self.library.remove_file(&file_path) {
                    warn!(file = %file_path, error = %cleanup, "Could not remove orphaned file");
                }
                match e {
                    BurrowError::DuplicateContent(hash) => {
                        debug!(%hash, "Lost insert race to an identical item");
                        Ok(None)
                    }
                    e => Err(e),
                }
            }
        }
    }

    /// Asks the primary source about every secondary exclusive again and
    /// promotes the ones it now knows.
    pub async fn recheck_exclusives(&self) -> Result<RecheckReport> {
        let mut report = RecheckReport::default();

        for item in self.store.list_by_source(Source::FurAffinity)? {
            let Some(hash) = item.content_hash.as_deref() else {
                continue;
            };
            report.checked += 1;

            let post = match self.lookup.find_by_hash(hash).await {
                Ok(Some(post)) => post,
                Ok(None) => continue,
                Err(e) if e.is_authentication() => return Err(e),
                Err(e) => {
                    warn!(item = item.id, error = %e, "Lookup failed");
                    report.errors += 1;
                    continue;
                }
            };

            if self.store.exists(post.source, &post.source_id)? {
                debug!(item = item.id, post = %post.source_id, "Primary post already archived separately");
                continue;
            }

            match self.store.upgrade_to_primary(item.id, &post.to_upgrade(&[])) {
                Ok(()) => {
                    report.upgraded += 1;
                    info!(item = item.id, post = %post.source_id, "Upgraded exclusive to primary");
                }
                Err(e) => {
                    warn!(item = item.id, error = %e, "Upgrade failed");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }
}

/// Scans the secondary favorites listing and feeds candidates to the reconciler.
pub struct SecondaryEngine {
    store: Arc<dyn Store + Send + Sync>,
    fetcher: Arc<dyn PageFetcher>,
    submissions: Arc<dyn SubmissionSource>,
    reconciler: Reconciler,
    retry: RetryPolicy,
    max_storage_errors: u32,
}

impl SecondaryEngine {
    pub fn new(
        store: Arc<dyn Store + Send + Sync>,
        fetcher: Arc<dyn PageFetcher>,
        submissions: Arc<dyn SubmissionSource>,
        reconciler: Reconciler,
    ) -> Self {
        Self {
            store,
            fetcher,
            submissions,
            reconciler,
            retry: RetryPolicy::none(),
            max_storage_errors: DEFAULT_MAX_STORAGE_ERRORS,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.reconciler.retry = retry.clone();
        self.retry = retry;
        self
    }

    pub fn with_max_storage_errors(mut self, max: u32) -> Self {
        self.max_storage_errors = max.max(1);
        self
    }

    pub async fn run(self, ctx: RunContext<SecondaryCounters>) {
        let outcome = self.execute(&ctx).await;
        ctx.finish(outcome);
    }

    async fn execute(&self, ctx: &RunContext<SecondaryCounters>) -> RunOutcome {
        let mut cursor = Cursor::Page(1);
        let mut storage = StorageStreak::new(self.max_storage_errors);

        loop {
            if ctx.is_cancelled() {
                return RunOutcome::Cancelled;
            }

            let label = cursor.to_string();
            ctx.update(|s| {
                s.current_message = format!("Scanning page {}...", label);
                s.cursor = Some(label);
            });

            let page = match with_retry(&self.retry, "favorites page", || {
                self.fetcher.fetch_page("", Some(&cursor))
            })
            .await
            {
                Ok(page) => page,
                Err(e) => {
                    error!(error = %e, "Favorites page failed, ending run");
                    ctx.record_error(&e);
                    return RunOutcome::Failed;
                }
            };
            ctx.update(|s| s.scanned_pages += 1);

            if page.posts.is_empty() {
                info!(page = %cursor, "No favorites on page, ending");
                return RunOutcome::Completed;
            }

            for post in &page.posts {
                if ctx.is_cancelled() {
                    return RunOutcome::Cancelled;
                }

                let result = match self.precheck(ctx, post) {
                    Ok(true) => continue,
                    Ok(false) => self.process(ctx, post).await,
                    Err(e) => {
                        warn!(submission = %post.source_id, error = %e, "Existence check failed");
                        ctx.record_error(&e);
                        if storage.record(&e) {
                            return RunOutcome::Failed;
                        }
                        continue;
                    }
                };

                match result {
                    Ok(committed) => {
                        if committed {
                            storage.reset();
                        }
                        if ctx.reached_limit() {
                            info!("Reached max new downloads");
                            return RunOutcome::Completed;
                        }
                    }
                    Err(e) if e.is_authentication() => {
                        error!(error = %e, "Session rejected, ending run");
                        ctx.record_error(&e);
                        return RunOutcome::Failed;
                    }
                    Err(e) => {
                        warn!(submission = %post.source_id, error = %e, "Candidate failed");
                        let message = e.to_string();
                        ctx.update(|s| {
                            s.counters.errors += 1;
                            s.last_error = Some(message);
                        });
                        if storage.record(&e) {
                            return RunOutcome::Failed;
                        }
                    }
                }
            }

            match page.next_cursor {
                Some(next) => cursor = next,
                None => return RunOutcome::Completed,
            }
        }
    }

    /// Counts the favorite as scanned and reports whether any item already
    /// covers it, by key or by its view link.
    fn precheck(&self, ctx: &RunContext<SecondaryCounters>, post: &PostSummary) -> Result<bool> {
        ctx.update(|s| {
            s.counters.scanned += 1;
            s.current_message = format!("Processing #{}...", post.source_id);
        });

        let known = self.store.exists(post.source, &post.source_id)?
            || self.store.has_source_link(&post.page_url())?;
        if known {
            ctx.update(|s| s.counters.skipped_url += 1);
        }
        Ok(known)
    }

    /// Returns whether a row was committed or upgraded.
    async fn process(&self, ctx: &RunContext<SecondaryCounters>, post: &PostSummary) -> Result<bool> {
        let view_url = post.page_url();

        let submission = with_retry(&self.retry, "submission page", || {
            self.submissions.fetch_submission(&post.source_id)
        })
        .await?;

        if submission.download_url.is_none() {
            let record = UnavailableRecord::new(post.source, &post.source_id, REASON_MISSING_FILE_URL)
                .with_sources(vec![view_url]);
            self.store.upsert_unavailable(&record)?;
            ctx.update(|s| {
                s.counters.errors += 1;
                s.counters.unavailable += 1;
            });
            info!(submission = %post.source_id, "No download link, recorded as unavailable");
            return Ok(false);
        }

        match self.reconciler.reconcile(&submission).await {
            ReconcileOutcome::SkippedExistingUrl => {
                ctx.update(|s| s.counters.skipped_url += 1);
                Ok(false)
            }
            ReconcileOutcome::SkippedExistingHash => {
                ctx.update(|s| s.counters.skipped_md5 += 1);
                Ok(false)
            }
            ReconcileOutcome::Upgraded { .. } => {
                ctx.update(|s| s.counters.upgraded += 1);
                Ok(true)
            }
            ReconcileOutcome::ImportedExclusive { .. } => {
                ctx.update(|s| s.counters.imported += 1);
                Ok(true)
            }
            ReconcileOutcome::Error(e) => Err(e),
        }
    }
}
