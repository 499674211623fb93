pub mod http_fetcher;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::warn;

use crate::app::Result;
use crate::domain::{ItemUpgrade, NewItem, Source, Tag, TagKind};
use crate::library::pick_primary_artist;

/// Opaque pagination token handed back by a [`PageFetcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    /// Results strictly older than this post id.
    BeforeId(u64),
    /// One-based page number.
    Page(u32),
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::BeforeId(id) => write!(f, "b{}", id),
            Cursor::Page(n) => write!(f, "{}", n),
        }
    }
}

/// One candidate post as listed by a remote source.
#[derive(Debug, Clone, PartialEq)]
pub struct PostSummary {
    pub source: Source,
    pub source_id: String,
    /// Original file. `None` when the source hides it or lists it elsewhere.
    pub file_url: Option<String>,
    pub ext: Option<String>,
    pub md5: Option<String>,
    pub tags: Vec<Tag>,
    pub rating: Option<String>,
    pub fav_count: Option<i64>,
    pub score: Option<i64>,
    pub created_at: Option<String>,
    /// External provenance links advertised by the post.
    pub sources: Vec<String>,
}

impl PostSummary {
    pub fn new(source: Source, source_id: impl Into<String>) -> Self {
        Self {
            source,
            source_id: source_id.into(),
            file_url: None,
            ext: None,
            md5: None,
            tags: Vec::new(),
            rating: None,
            fav_count: None,
            score: None,
            created_at: None,
            sources: Vec::new(),
        }
    }

    pub fn page_url(&self) -> String {
        self.source.post_url(&self.source_id)
    }

    pub fn artists(&self) -> Vec<String> {
        self.tags
            .iter()
            .filter(|t| t.kind == TagKind::Artist)
            .map(|t| t.name.clone())
            .collect()
    }

    pub fn primary_artist(&self) -> String {
        pick_primary_artist(&self.artists())
    }

    /// Provenance links for a committed row: the post page plus advertised sources.
    fn links(&self, extra: &[String]) -> Vec<String> {
        let mut links = vec![self.page_url()];
        for link in self.sources.iter().chain(extra) {
            if !links.contains(link) {
                links.push(link.clone());
            }
        }
        links
    }

    pub fn to_new_item(&self, file_path: String, content_hash: String, extra_links: &[String]) -> NewItem {
        NewItem {
            source: self.source,
            source_id: self.source_id.clone(),
            remote_url: self.file_url.clone(),
            content_hash: Some(content_hash),
            file_path,
            ext: self.ext.clone(),
            tags: self.tags.clone(),
            sources: self.links(extra_links),
            rating: self.rating.clone(),
            fav_count: self.fav_count,
            score: self.score,
            created_at: self.created_at.clone(),
            primary_artist: Some(self.primary_artist()),
        }
    }

    pub fn to_upgrade(&self, extra_links: &[String]) -> ItemUpgrade {
        ItemUpgrade {
            source_id: self.source_id.clone(),
            remote_url: self.file_url.clone(),
            rating: self.rating.clone(),
            fav_count: self.fav_count,
            score: self.score,
            created_at: self.created_at.clone(),
            primary_artist: Some(self.primary_artist()),
            tags: self.tags.clone(),
            links: self.links(extra_links),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub posts: Vec<PostSummary>,
    /// `None` means there are no further pages.
    pub next_cursor: Option<Cursor>,
}

/// Walks a remote listing one page at a time. Stateless between calls.
///
/// Authentication failures must come back as `BurrowError::Authentication`,
/// never as an empty page.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, query: &str, cursor: Option<&Cursor>) -> Result<Page>;
}

#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, url: &str) -> Result<Bytes>;
}

/// Cross-reference into the primary source by content hash.
#[async_trait]
pub trait PrimaryLookup: Send + Sync {
    async fn find_by_hash(&self, hash: &str) -> Result<Option<PostSummary>>;
}

/// Lookup strategy for setups without primary credentials: never matches.
pub struct NoLookup;

#[async_trait]
impl PrimaryLookup for NoLookup {
    async fn find_by_hash(&self, _hash: &str) -> Result<Option<PostSummary>> {
        Ok(None)
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

/// Runs `op` until it succeeds, fails with a non-transient error, or the
/// attempts run out. Backoff grows linearly with the attempt number.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.attempts => {
                warn!(attempt, error = %e, "{} failed, retrying", what);
                tokio::time::sleep(policy.delay * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
