//! Sync engine for the primary (API-backed) source.
//!
//! Walks the favorites listing newest-first with a before-id cursor. Re-runs
//! start from the newest page again and rely on the existence check to skip
//! what is already archived.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::app::{BurrowError, Result};
use crate::domain::unavailable::{REASON_DOWNLOAD_FAILED, REASON_MISSING_FILE_URL};
use crate::domain::{PrimaryCounters, RunOutcome, UnavailableRecord};
use crate::fetcher::{with_retry, Cursor, Downloader, PageFetcher, PostSummary, RetryPolicy};
use crate::hasher::content_hash;
use crate::library::{ext_from_url, primary_file_name, Library};
use crate::store::Store;
use crate::sync::handle::{RunContext, StorageStreak};

const DEFAULT_MAX_STORAGE_ERRORS: u32 = 5;

/// What happened to a single post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Skipped,
    Upgraded,
    Unavailable,
    Committed,
}

pub struct PrimaryEngine {
    store: Arc<dyn Store + Send + Sync>,
    library: Arc<Library>,
    fetcher: Arc<dyn PageFetcher>,
    downloader: Arc<dyn Downloader>,
    query: String,
    retry: RetryPolicy,
    max_storage_errors: u32,
}

impl PrimaryEngine {
    pub fn new(
        store: Arc<dyn Store + Send + Sync>,
        library: Arc<Library>,
        fetcher: Arc<dyn PageFetcher>,
        downloader: Arc<dyn Downloader>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            store,
            library,
            fetcher,
            downloader,
            query: query.into(),
            retry: RetryPolicy::none(),
            max_storage_errors: DEFAULT_MAX_STORAGE_ERRORS,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_storage_errors(mut self, max: u32) -> Self {
        self.max_storage_errors = max.max(1);
        self
    }

    /// Drives one run to its end and publishes the outcome.
    pub async fn run(self, ctx: RunContext<PrimaryCounters>) {
        let outcome = self.execute(&ctx).await;
        ctx.finish(outcome);
    }

    async fn execute(&self, ctx: &RunContext<PrimaryCounters>) -> RunOutcome {
        let mut cursor: Option<Cursor> = None;
        let mut storage = StorageStreak::new(self.max_storage_errors);

        loop {
            if ctx.is_cancelled() {
                return RunOutcome::Cancelled;
            }

            let cursor_label = cursor.as_ref().map(ToString::to_string);
            ctx.update(|s| {
                s.cursor = cursor_label;
                s.current_message = format!("Fetching page {}...", s.scanned_pages + 1);
            });

            let page = match with_retry(&self.retry, "page fetch", || {
                self.fetcher.fetch_page(&self.query, cursor.as_ref())
            })
            .await
            {
                Ok(page) => page,
                Err(e) => {
                    error!(error = %e, "Page fetch failed, ending run");
                    ctx.record_error(&e);
                    return RunOutcome::Failed;
                }
            };

            ctx.update(|s| s.scanned_pages += 1);
            debug!(posts = page.posts.len(), next = ?page.next_cursor, "Fetched page");

            for post in &page.posts {
                if ctx.is_cancelled() {
                    return RunOutcome::Cancelled;
                }

                let result = match self.precheck(ctx, post) {
                    Ok(true) => continue,
                    Ok(false) => self.process(ctx, post).await,
                    Err(e) => {
                        warn!(post = %post.source_id, error = %e, "Existence check failed");
                        ctx.record_error(&e);
                        if storage.record(&e) {
                            return RunOutcome::Failed;
                        }
                        continue;
                    }
                };

                match result {
                    Ok(Step::Committed) => {
                        storage.reset();
                        if ctx.reached_limit() {
                            info!("Reached max new downloads");
                            return RunOutcome::Completed;
                        }
                    }
                    Ok(_) => {}
                    Err(e) if e.is_authentication() => {
                        error!(error = %e, "Authentication rejected, ending run");
                        ctx.record_error(&e);
                        return RunOutcome::Failed;
                    }
                    Err(e) => {
                        warn!(post = %post.source_id, error = %e, "Post failed");
                        let message = e.to_string();
                        ctx.update(|s| {
                            s.counters.failed_downloads += 1;
                            s.last_error = Some(message);
                        });
                        if storage.record(&e) {
                            return RunOutcome::Failed;
                        }
                    }
                }
            }

            match page.next_cursor {
                Some(next) if !page.posts.is_empty() => cursor = Some(next),
                _ => return RunOutcome::Completed,
            }
        }
    }

    /// Counts the post as scanned and reports whether it is already archived.
    fn precheck(&self, ctx: &RunContext<PrimaryCounters>, post: &PostSummary) -> Result<bool> {
        ctx.update(|s| {
            s.counters.scanned_posts += 1;
            s.current_message = format!("Checking #{}", post.source_id);
        });

        let known = self.store.exists(post.source, &post.source_id)?;
        if known {
            ctx.update(|s| s.counters.skipped_existing += 1);
        }
        Ok(known)
    }

    async fn process(&self, ctx: &RunContext<PrimaryCounters>, post: &PostSummary) -> Result<Step> {
        if let Some(md5) = &post.md5 {
            if let Some(step) = self.match_local_hash(ctx, post, md5)? {
                return Ok(step);
            }
        }

        ctx.update(|s| s.counters.new_attempted += 1);

        let Some(file_url) = post.file_url.as_deref() else {
            let record = UnavailableRecord::new(post.source, &post.source_id, REASON_MISSING_FILE_URL)
                .with_sources(post.sources.clone());
            self.store.upsert_unavailable(&record)?;
            ctx.update(|s| s.counters.unavailable += 1);
            info!(post = %post.source_id, "No file URL, recorded as unavailable");
            return Ok(Step::Unavailable);
        };

        ctx.set_message(format!("Downloading #{}", post.source_id));
        let bytes = match with_retry(&self.retry, "download", || self.downloader.download(file_url)).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if !e.is_authentication() {
                    let record = UnavailableRecord::new(
                        post.source,
                        &post.source_id,
                        format!("{}: {}", REASON_DOWNLOAD_FAILED, e),
                    )
                    .with_sources(post.sources.clone());
                    if let Err(log_err) = self.store.upsert_unavailable(&record) {
                        warn!(error = %log_err, "Could not record unavailable post");
                    }
                }
                return Err(e);
            }
        };

        let hash = content_hash(&bytes);
        if post.md5.as_deref() != Some(hash.as_str()) {
            if let Some(step) = self.match_local_hash(ctx, post, &hash)? {
                return Ok(step);
            }
        }

        let ext = post.ext.clone().unwrap_or_else(|| ext_from_url(file_url));
        let name = primary_file_name(&post.primary_artist(), &post.source_id, &ext);
        let file_path = self.library.place_file(&name, &bytes)?;

        let mut item = post.to_new_item(file_path.clone(), hash, &[]);
        item.ext = Some(ext);
        if let Err(e) = self.store.insert(&item) {
            if let Err(cleanup) = self.library.remove_file(&file_path) {
                warn!(file = %file_path, error = %cleanup, "Could not remove orphaned file");
            }
            if let BurrowError::DuplicateContent(_) = e {
                ctx.update(|s| s.counters.skipped_existing += 1);
                info!(post = %post.source_id, "Same content archived concurrently, skipping");
                return Ok(Step::Skipped);
            }
            return Err(e);
        }

        ctx.update(|s| s.counters.downloaded_ok += 1);
        info!(post = %post.source_id, file = %file_path, "Archived post");
        Ok(Step::Committed)
    }

    /// A secondary row with the same content is promoted in place; any other
    /// match means the post is already archived.
    fn match_local_hash(
        &self,
        ctx: &RunContext<PrimaryCounters>,
        post: &PostSummary,
        hash: &str,
    ) -> Result<Option<Step>> {
        let Some(existing) = self.store.exists_by_hash(hash)? else {
            return Ok(None);
        };

        if existing.source.is_primary() {
            ctx.update(|s| s.counters.skipped_existing += 1);
            return Ok(Some(Step::Skipped));
        }

        self.store
            .upgrade_to_primary(existing.id, &post.to_upgrade(&[]))?;
        ctx.update(|s| s.counters.upgraded += 1);
        info!(post = %post.source_id, item = existing.id, "Upgraded secondary item to primary");
        Ok(Some(Step::Upgraded))
    }
}
