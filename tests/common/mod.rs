#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use tailburrow::app::{BurrowError, Result};
use tailburrow::domain::{Feed, Item, ItemUpgrade, NewItem, Source, Tag, UnavailableRecord};
use tailburrow::fetcher::{Cursor, Downloader, Page, PageFetcher, PostSummary, PrimaryLookup};
use tailburrow::furaffinity::{Submission, SubmissionSource};
use tailburrow::hasher::content_hash;
use tailburrow::library::Library;
use tailburrow::store::{SqliteStore, Store};

pub struct Fixture {
    pub dir: TempDir,
    pub store: Arc<dyn Store + Send + Sync>,
    pub library: Arc<Library>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let library = Arc::new(Library::open(dir.path()).unwrap());
        let store: Arc<dyn Store + Send + Sync> = Arc::new(SqliteStore::in_memory().unwrap());
        Self { dir, store, library }
    }

    pub fn media_files(&self) -> usize {
        std::fs::read_dir(self.library.media_dir()).unwrap().count()
    }
}

pub fn image_bytes(seed: &str) -> Bytes {
    Bytes::from(format!("image-bytes-{}", seed))
}

pub fn e621_file_url(id: u64) -> String {
    format!("https://static.test/data/{}.png", id)
}

/// An e621 post whose file is `image_bytes("e{id}")`.
pub fn e621_post(id: u64) -> PostSummary {
    let mut post = PostSummary::new(Source::E621, id.to_string());
    post.file_url = Some(e621_file_url(id));
    post.ext = Some("png".to_string());
    post.md5 = Some(content_hash(&image_bytes(&format!("e{}", id))));
    post.rating = Some("s".to_string());
    post.tags = vec![Tag::artist("painter"), Tag::general("fox")];
    post
}

pub fn fa_post(id: &str) -> PostSummary {
    PostSummary::new(Source::FurAffinity, id)
}

pub fn fa_download_url(id: &str) -> String {
    format!("https://d.test/art/sketcher/{}/image.png", id)
}

pub fn submission(id: &str) -> Submission {
    Submission {
        id: id.to_string(),
        view_url: Source::FurAffinity.post_url(id),
        download_url: Some(fa_download_url(id)),
        artist: Some("sketcher".to_string()),
        tags: vec!["wolf".to_string()],
        rating: "s".to_string(),
    }
}

/// Serves fixed pages; the cursor of page `n` is `Cursor::Page(n + 1)`.
pub struct MockFetcher {
    pages: Vec<Vec<PostSummary>>,
    reject: bool,
}

impl MockFetcher {
    pub fn new(pages: Vec<Vec<PostSummary>>) -> Self {
        Self {
            pages,
            reject: false,
        }
    }

    pub fn paged(posts: Vec<PostSummary>, per_page: usize) -> Self {
        Self::new(posts.chunks(per_page).map(|c| c.to_vec()).collect())
    }

    pub fn rejecting() -> Self {
        Self {
            pages: Vec::new(),
            reject: true,
        }
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch_page(&self, _query: &str, cursor: Option<&Cursor>) -> Result<Page> {
        if self.reject {
            return Err(BurrowError::Authentication("401 Unauthorized".to_string()));
        }
        let index = match cursor {
            None => 0,
            Some(Cursor::Page(n)) => (*n as usize).saturating_sub(1),
            Some(Cursor::BeforeId(_)) => panic!("mock pages are numbered"),
        };
        let posts = self.pages.get(index).cloned().unwrap_or_default();
        let next_cursor = (index + 1 < self.pages.len()).then(|| Cursor::Page(index as u32 + 2));
        Ok(Page { posts, next_cursor })
    }
}

/// Serves registered bytes by URL; unknown URLs fail transiently.
#[derive(Default)]
pub struct MockDownloader {
    files: HashMap<String, Bytes>,
    forbidden: HashSet<String>,
    pub calls: AtomicU32,
}

impl MockDownloader {
    pub fn with(mut self, url: impl Into<String>, bytes: Bytes) -> Self {
        self.files.insert(url.into(), bytes);
        self
    }

    /// The URL answers 403, as a withheld file does.
    pub fn forbidding(mut self, url: impl Into<String>) -> Self {
        self.forbidden.insert(url.into());
        self
    }

    /// Registers the files of the given e621 posts.
    pub fn for_posts(posts: &[PostSummary]) -> Self {
        posts.iter().fold(Self::default(), |d, p| {
            d.with(
                p.file_url.clone().unwrap_or_default(),
                image_bytes(&format!("e{}", p.source_id)),
            )
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    async fn download(&self, url: &str) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.forbidden.contains(url) {
            return Err(BurrowError::UnavailableContent(format!("{} returned 403 Forbidden", url)));
        }
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| BurrowError::TransientFetch(format!("503 for {}", url)))
    }
}

#[derive(Default)]
pub struct MockLookup {
    posts: HashMap<String, PostSummary>,
}

impl MockLookup {
    pub fn with(mut self, hash: String, post: PostSummary) -> Self {
        self.posts.insert(hash, post);
        self
    }
}

#[async_trait]
impl PrimaryLookup for MockLookup {
    async fn find_by_hash(&self, hash: &str) -> Result<Option<PostSummary>> {
        Ok(self.posts.get(hash).cloned())
    }
}

#[derive(Default)]
pub struct MockSubmissions {
    submissions: HashMap<String, Submission>,
    pub calls: AtomicU32,
}

impl MockSubmissions {
    pub fn with(mut self, submission: Submission) -> Self {
        self.submissions.insert(submission.id.clone(), submission);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubmissionSource for MockSubmissions {
    async fn fetch_submission(&self, id: &str) -> Result<Submission> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.submissions
            .get(id)
            .cloned()
            .ok_or_else(|| BurrowError::Parse(format!("no submission {}", id)))
    }
}

/// A `SqliteStore` whose named operations can be switched to fail.
pub struct FaultyStore {
    inner: SqliteStore,
    failing: Mutex<HashSet<&'static str>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::in_memory().unwrap(),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    fn check(&self, op: &'static str) -> Result<()> {
        if self.failing.lock().unwrap().contains(op) {
            return Err(BurrowError::Storage(format!("{}: disk I/O error", op)));
        }
        Ok(())
    }
}

impl Store for FaultyStore {
    fn exists(&self, source: Source, source_id: &str) -> Result<bool> {
        self.check("exists")?;
        self.inner.exists(source, source_id)
    }
    fn exists_by_hash(&self, hash: &str) -> Result<Option<Item>> {
        self.check("exists_by_hash")?;
        self.inner.exists_by_hash(hash)
    }
    fn exists_by_url(&self, url: &str) -> Result<bool> {
        self.inner.exists_by_url(url)
    }
    fn has_source_link(&self, url: &str) -> Result<bool> {
        self.inner.has_source_link(url)
    }
    fn insert(&self, item: &NewItem) -> Result<i64> {
        self.check("insert")?;
        self.inner.insert(item)
    }
    fn get_item(&self, id: i64) -> Result<Option<Item>> {
        self.inner.get_item(id)
    }
    fn list_items(&self, limit: u32, offset: u32) -> Result<Vec<Item>> {
        self.inner.list_items(limit, offset)
    }
    fn list_by_source(&self, source: Source) -> Result<Vec<Item>> {
        self.inner.list_by_source(source)
    }
    fn count_items(&self) -> Result<i64> {
        self.inner.count_items()
    }
    fn update_item_tags(&self, id: i64, tags: &[String]) -> Result<()> {
        self.inner.update_item_tags(id, tags)
    }
    fn add_source_links(&self, id: i64, urls: &[String]) -> Result<()> {
        self.inner.add_source_links(id, urls)
    }
    fn upgrade_to_primary(&self, id: i64, upgrade: &ItemUpgrade) -> Result<()> {
        self.inner.upgrade_to_primary(id, upgrade)
    }
    fn soft_delete(&self, id: i64) -> Result<()> {
        self.check("soft_delete")?;
        self.inner.soft_delete(id)
    }
    fn restore(&self, id: i64) -> Result<()> {
        self.check("restore")?;
        self.inner.restore(id)
    }
    fn trashed_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Item>> {
        self.inner.trashed_before(cutoff)
    }
    fn purge_item(&self, id: i64) -> Result<()> {
        self.inner.purge_item(id)
    }
    fn upsert_unavailable(&self, record: &UnavailableRecord) -> Result<()> {
        self.inner.upsert_unavailable(record)
    }
    fn list_unavailable(&self, limit: u32) -> Result<Vec<UnavailableRecord>> {
        self.inner.list_unavailable(limit)
    }
    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.inner.get_setting(key)
    }
    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set_setting(key, value)
    }
    fn delete_setting(&self, key: &str) -> Result<()> {
        self.inner.delete_setting(key)
    }
    fn add_feed(&self, feed: &Feed) -> Result<i64> {
        self.inner.add_feed(feed)
    }
    fn get_feed(&self, name: &str) -> Result<Option<Feed>> {
        self.inner.get_feed(name)
    }
    fn list_feeds(&self) -> Result<Vec<Feed>> {
        self.inner.list_feeds()
    }
    fn delete_feed(&self, name: &str) -> Result<bool> {
        self.inner.delete_feed(name)
    }
}
