use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use rusqlite_migration::{Migrations, M};

use crate::app::{BurrowError, Result};
use crate::domain::{Feed, Item, ItemUpgrade, NewItem, Source, Tag, UnavailableRecord};
use crate::store::Store;

const ITEM_SELECT: &str = "
    SELECT
      i.item_id, i.source, i.source_id, i.md5, i.remote_url, i.file_rel, i.ext,
      i.rating, i.fav_count, i.score_total, i.created_at, i.added_at,
      i.primary_artist, i.trashed_at,
      COALESCE((
        SELECT GROUP_CONCAT(t.name, char(9))
        FROM tags t
        JOIN item_tags it ON it.tag_id = t.tag_id
        WHERE it.item_id = i.item_id
      ), '') AS tags,
      COALESCE((
        SELECT GROUP_CONCAT(t.name, char(9))
        FROM tags t
        JOIN item_tags it ON it.tag_id = t.tag_id
        WHERE it.item_id = i.item_id AND t.type = 'artist'
      ), '') AS artists,
      COALESCE((
        SELECT GROUP_CONCAT(s.url, char(9))
        FROM sources s
        JOIN item_sources isrc ON isrc.source_row_id = s.source_row_id
        WHERE isrc.item_id = i.item_id
      ), '') AS sources
    FROM items i";

impl ToSql for Source {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Source {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: BurrowError| FromSqlError::Other(Box::new(e)))
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.conn()?;

        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        migrations
            .to_latest(&mut conn)
            .map_err(|e| BurrowError::Other(format!("Migration failed: {}", e)))?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            BurrowError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<DateTime<Utc>>().ok())
    }

    /// A hash collision surfaces as `DuplicateContent` so callers can treat
    /// it as already archived; every other failure stays a database error.
    fn classify_insert_error(e: rusqlite::Error, item: &NewItem) -> BurrowError {
        match &e {
            rusqlite::Error::SqliteFailure(err, Some(msg))
                if err.code == ErrorCode::ConstraintViolation && msg.contains("items.md5") =>
            {
                BurrowError::DuplicateContent(item.content_hash.clone().unwrap_or_default())
            }
            _ => BurrowError::Database(e),
        }
    }

    /// Fixed-width UTC timestamps so stored values compare lexically.
    fn timestamp(dt: DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn split_tab(s: String) -> Vec<String> {
        if s.is_empty() {
            return Vec::new();
        }
        let mut parts: Vec<String> = s.split('\t').map(String::from).collect();
        parts.sort();
        parts.dedup();
        parts
    }

    fn row_to_item(row: &Row<'_>) -> rusqlite::Result<Item> {
        Ok(Item {
            id: row.get(0)?,
            source: row.get(1)?,
            source_id: row.get(2)?,
            content_hash: row.get(3)?,
            remote_url: row.get(4)?,
            file_path: row.get(5)?,
            ext: row.get(6)?,
            rating: row.get(7)?,
            fav_count: row.get(8)?,
            score: row.get(9)?,
            created_at: row.get(10)?,
            added_at: row
                .get::<_, String>(11)
                .ok()
                .and_then(|s| Self::parse_datetime(&s))
                .unwrap_or_else(Utc::now),
            primary_artist: row.get(12)?,
            trashed_at: row
                .get::<_, Option<String>>(13)?
                .and_then(|s| Self::parse_datetime(&s)),
            tags: Self::split_tab(row.get(14)?),
            artists: Self::split_tab(row.get(15)?),
            sources: Self::split_tab(row.get(16)?),
        })
    }

    fn query_items(conn: &Connection, clause: &str, params: impl rusqlite::Params) -> Result<Vec<Item>> {
        let sql = format!("{} {}", ITEM_SELECT, clause);
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params, Self::row_to_item)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Typed kinds win over `general`, so an untyped re-tag never demotes an artist.
    fn upsert_tag(conn: &Connection, tag: &Tag) -> rusqlite::Result<i64> {
        conn.execute(
            "INSERT INTO tags (name, type) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET type =
               CASE WHEN excluded.type = 'general' THEN tags.type ELSE excluded.type END",
            params![tag.name, tag.kind.as_str()],
        )?;
        conn.query_row(
            "SELECT tag_id FROM tags WHERE name = ?1",
            params![tag.name],
            |row| row.get(0),
        )
    }

    fn link_tags(conn: &Connection, item_id: i64, tags: &[Tag]) -> rusqlite::Result<()> {
        for tag in tags {
            if tag.name.is_empty() {
                continue;
            }
            let tag_id = Self::upsert_tag(conn, tag)?;
            conn.execute(
                "INSERT OR IGNORE INTO item_tags (item_id, tag_id) VALUES (?1, ?2)",
                params![item_id, tag_id],
            )?;
        }
        Ok(())
    }

    fn link_sources(conn: &Connection, item_id: i64, urls: &[String]) -> rusqlite::Result<()> {
        for url in urls {
            let url = url.trim();
            if url.is_empty() {
                continue;
            }
            conn.execute(
                "INSERT INTO sources (url) VALUES (?1) ON CONFLICT(url) DO NOTHING",
                params![url],
            )?;
            let source_row_id: i64 = conn.query_row(
                "SELECT source_row_id FROM sources WHERE url = ?1",
                params![url],
                |row| row.get(0),
            )?;
            conn.execute(
                "INSERT OR IGNORE INTO item_sources (item_id, source_row_id) VALUES (?1, ?2)",
                params![item_id, source_row_id],
            )?;
        }
        Ok(())
    }

    fn row_exists(conn: &Connection, id: i64) -> Result<bool> {
        let found: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM items WHERE item_id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        Ok(found)
    }
}

impl Store for SqliteStore {
    fn exists(&self, source: Source, source_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM items WHERE source = ?1 AND source_id = ?2)",
            params![source, source_id],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    fn exists_by_hash(&self, hash: &str) -> Result<Option<Item>> {
        let conn = self.conn()?;
        let hash = hash.to_lowercase();
        let items = Self::query_items(
            &conn,
            "WHERE i.md5 = ?1 ORDER BY i.item_id LIMIT 1",
            params![hash],
        )?;
        Ok(items.into_iter().next())
    }

    fn exists_by_url(&self, url: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM items WHERE remote_url = ?1)",
            params![url],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    fn has_source_link(&self, url: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found: bool = conn.query_row(
            "SELECT EXISTS(
               SELECT 1 FROM sources s
               JOIN item_sources isrc ON isrc.source_row_id = s.source_row_id
               WHERE s.url = ?1)",
            params![url],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    fn insert(&self, item: &NewItem) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO items (source, source_id, md5, remote_url, file_rel, ext, rating,
                                fav_count, score_total, created_at, added_at, primary_artist)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                item.source,
                item.source_id,
                item.content_hash.as_ref().map(|h| h.to_lowercase()),
                item.remote_url,
                item.file_path,
                item.ext,
                item.rating,
                item.fav_count,
                item.score,
                item.created_at,
                Self::timestamp(Utc::now()),
                item.primary_artist,
            ],
        )
        .map_err(|e| Self::classify_insert_error(e, item))?;
        let item_id = tx.last_insert_rowid();

        Self::link_tags(&tx, item_id, &item.tags)?;
        Self::link_sources(&tx, item_id, &item.sources)?;

        tx.commit()?;
        Ok(item_id)
    }

    fn get_item(&self, id: i64) -> Result<Option<Item>> {
        let conn = self.conn()?;
        let items = Self::query_items(&conn, "WHERE i.item_id = ?1", params![id])?;
        Ok(items.into_iter().next())
    }

    fn list_items(&self, limit: u32, offset: u32) -> Result<Vec<Item>> {
        let conn = self.conn()?;
        Self::query_items(
            &conn,
            "WHERE i.trashed_at IS NULL
             ORDER BY i.added_at DESC, i.item_id DESC
             LIMIT ?1 OFFSET ?2",
            params![limit, offset],
        )
    }

    fn list_by_source(&self, source: Source) -> Result<Vec<Item>> {
        let conn = self.conn()?;
        Self::query_items(
            &conn,
            "WHERE i.source = ?1 AND i.trashed_at IS NULL ORDER BY i.item_id",
            params![source],
        )
    }

    fn count_items(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM items WHERE trashed_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn update_item_tags(&self, id: i64, tags: &[String]) -> Result<()> {
        let mut conn = self.conn()?;
        if !Self::row_exists(&conn, id)? {
            return Err(BurrowError::ItemNotFound(id));
        }

        let tx = conn.transaction()?;
        tx.execute("DELETE FROM item_tags WHERE item_id = ?1", params![id])?;
        let tags: Vec<Tag> = tags.iter().map(|t| Tag::general(t)).collect();
        Self::link_tags(&tx, id, &tags)?;
        tx.commit()?;

        Ok(())
    }

    fn add_source_links(&self, id: i64, urls: &[String]) -> Result<()> {
        let mut conn = self.conn()?;
        if !Self::row_exists(&conn, id)? {
            return Err(BurrowError::ItemNotFound(id));
        }

        let tx = conn.transaction()?;
        Self::link_sources(&tx, id, urls)?;
        tx.commit()?;
        Ok(())
    }

    fn upgrade_to_primary(&self, id: i64, upgrade: &ItemUpgrade) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE items SET
               source = ?1,
               source_id = ?2,
               remote_url = COALESCE(?3, remote_url),
               rating = COALESCE(?4, rating),
               fav_count = COALESCE(?5, fav_count),
               score_total = COALESCE(?6, score_total),
               created_at = COALESCE(?7, created_at),
               primary_artist = COALESCE(?8, primary_artist)
             WHERE item_id = ?9",
            params![
                Source::PRIMARY,
                upgrade.source_id,
                upgrade.remote_url,
                upgrade.rating,
                upgrade.fav_count,
                upgrade.score,
                upgrade.created_at,
                upgrade.primary_artist,
                id,
            ],
        )?;
        if updated == 0 {
            return Err(BurrowError::ItemNotFound(id));
        }

        Self::link_tags(&tx, id, &upgrade.tags)?;
        Self::link_sources(&tx, id, &upgrade.links)?;

        tx.commit()?;
        Ok(())
    }

    fn soft_delete(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE items SET trashed_at = ?1 WHERE item_id = ?2 AND trashed_at IS NULL",
            params![Self::timestamp(Utc::now()), id],
        )?;
        if updated == 0 {
            return Err(BurrowError::ItemNotFound(id));
        }
        Ok(())
    }

    fn restore(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE items SET trashed_at = NULL WHERE item_id = ?1 AND trashed_at IS NOT NULL",
            params![id],
        )?;
        if updated == 0 {
            return Err(BurrowError::ItemNotFound(id));
        }
        Ok(())
    }

    fn trashed_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Item>> {
        let conn = self.conn()?;
        Self::query_items(
            &conn,
            "WHERE i.trashed_at IS NOT NULL AND i.trashed_at < ?1 ORDER BY i.item_id",
            params![Self::timestamp(cutoff)],
        )
    }

    fn purge_item(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM items WHERE item_id = ?1", params![id])?;
        Ok(())
    }

    fn upsert_unavailable(&self, record: &UnavailableRecord) -> Result<()> {
        let conn = self.conn()?;
        let sources_json = serde_json::to_string(&record.sources)?;

        conn.execute(
            "INSERT INTO unavailable_posts (source, source_id, seen_at, reason, sources_json)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(source, source_id)
             DO UPDATE SET seen_at = excluded.seen_at, reason = excluded.reason,
                           sources_json = excluded.sources_json",
            params![
                record.source,
                record.source_id,
                Self::timestamp(record.seen_at),
                record.reason,
                sources_json,
            ],
        )?;

        Ok(())
    }

    fn list_unavailable(&self, limit: u32) -> Result<Vec<UnavailableRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT source, source_id, seen_at, reason, sources_json
             FROM unavailable_posts
             ORDER BY seen_at DESC
             LIMIT ?1",
        )?;

        let records = stmt
            .query_map(params![limit], |row| {
                let sources_json: String = row.get(4)?;
                Ok(UnavailableRecord {
                    source: row.get(0)?,
                    source_id: row.get(1)?,
                    seen_at: row
                        .get::<_, String>(2)
                        .ok()
                        .and_then(|s| Self::parse_datetime(&s))
                        .unwrap_or_else(Utc::now),
                    reason: row.get(3)?,
                    sources: serde_json::from_str(&sources_json).unwrap_or_default(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete_setting(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn add_feed(&self, feed: &Feed) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO feeds (name, query, created_at) VALUES (?1, ?2, ?3)",
            params![feed.name, feed.query, Self::timestamp(feed.created_at)],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_feed(&self, name: &str) -> Result<Option<Feed>> {
        let conn = self.conn()?;
        let feed = conn
            .query_row(
                "SELECT id, name, query, created_at FROM feeds WHERE name = ?1",
                params![name],
                |row| {
                    Ok(Feed {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        query: row.get(2)?,
                        created_at: row
                            .get::<_, String>(3)
                            .ok()
                            .and_then(|s| Self::parse_datetime(&s))
                            .unwrap_or_else(Utc::now),
                    })
                },
            )
            .optional()?;
        Ok(feed)
    }

    fn list_feeds(&self) -> Result<Vec<Feed>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name, query, created_at FROM feeds ORDER BY name")?;
        let feeds = stmt
            .query_map([], |row| {
                Ok(Feed {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    query: row.get(2)?,
                    created_at: row
                        .get::<_, String>(3)
                        .ok()
                        .and_then(|s| Self::parse_datetime(&s))
                        .unwrap_or_else(Utc::now),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(feeds)
    }

    fn delete_feed(&self, name: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM feeds WHERE name = ?1", params![name])?;
        Ok(deleted > 0)
    }
}
