pub mod sqlite;

use chrono::{DateTime, Utc};

use crate::app::Result;
use crate::domain::{Feed, Item, ItemUpgrade, NewItem, Source, UnavailableRecord};

pub use sqlite::SqliteStore;

/// Durable storage for the library.
///
/// Existence checks include trashed rows: a trashed item still occupies its
/// `(source, source_id)` key and its content hash until it is purged.
pub trait Store {
    // Item operations
    fn exists(&self, source: Source, source_id: &str) -> Result<bool>;
    fn exists_by_hash(&self, hash: &str) -> Result<Option<Item>>;
    fn exists_by_url(&self, url: &str) -> Result<bool>;
    fn has_source_link(&self, url: &str) -> Result<bool>;
    /// Commits metadata, tags and links in one transaction.
    fn insert(&self, item: &NewItem) -> Result<i64>;
    fn get_item(&self, id: i64) -> Result<Option<Item>>;
    fn list_items(&self, limit: u32, offset: u32) -> Result<Vec<Item>>;
    fn list_by_source(&self, source: Source) -> Result<Vec<Item>>;
    fn count_items(&self) -> Result<i64>;
    fn update_item_tags(&self, id: i64, tags: &[String]) -> Result<()>;
    fn add_source_links(&self, id: i64, urls: &[String]) -> Result<()>;
    fn upgrade_to_primary(&self, id: i64, upgrade: &ItemUpgrade) -> Result<()>;

    // Trash operations
    fn soft_delete(&self, id: i64) -> Result<()>;
    fn restore(&self, id: i64) -> Result<()>;
    fn trashed_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Item>>;
    fn purge_item(&self, id: i64) -> Result<()>;

    // Unavailable log
    fn upsert_unavailable(&self, record: &UnavailableRecord) -> Result<()>;
    fn list_unavailable(&self, limit: u32) -> Result<Vec<UnavailableRecord>>;

    // Settings
    fn get_setting(&self, key: &str) -> Result<Option<String>>;
    fn set_setting(&self, key: &str, value: &str) -> Result<()>;
    fn delete_setting(&self, key: &str) -> Result<()>;

    // Feed operations
    fn add_feed(&self, feed: &Feed) -> Result<i64>;
    fn get_feed(&self, name: &str) -> Result<Option<Feed>>;
    fn list_feeds(&self) -> Result<Vec<Feed>>;
    fn delete_feed(&self, name: &str) -> Result<bool>;
}
