//! The managed library directory.
//!
//! ```text
//! <root>/
//!   db/library.sqlite
//!   media/              archived files
//!   cache/tmp/          in-flight downloads (*.part)
//!   .trash/media/       files of trashed items
//! ```

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use crate::app::{BurrowError, Result};
use crate::store::Store;

const DB_DIR: &str = "db";
const DB_FILE: &str = "library.sqlite";
const MEDIA_DIR: &str = "media";
const TMP_DIR: &str = "cache/tmp";
const TRASH_DIR: &str = ".trash";

const UNKNOWN_ARTIST: &str = "unknown_artist";
const ARTIST_DENY_LIST: [&str; 2] = ["sound_warning", "conditional_dnp"];

pub struct Library {
    root: PathBuf,
}

impl Library {
    /// Opens a library root, creating the directory layout if needed.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        Self::ensure_layout(&root)?;
        Ok(Self { root })
    }

    pub fn ensure_layout(root: &Path) -> Result<()> {
        for dir in [DB_DIR, MEDIA_DIR, TMP_DIR] {
            fs::create_dir_all(root.join(dir))
                .map_err(|e| BurrowError::Storage(format!("{}: {}", root.join(dir).display(), e)))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join(DB_DIR).join(DB_FILE)
    }

    pub fn media_dir(&self) -> PathBuf {
        self.root.join(MEDIA_DIR)
    }

    /// Absolute path for a root-relative `file_path`.
    pub fn absolute(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    fn trash_path(&self, rel: &str) -> PathBuf {
        self.root.join(TRASH_DIR).join(rel)
    }

    /// Writes `bytes` into `media/` under `file_name` (or a `_dup{n}` variant)
    /// and returns the root-relative path.
    ///
    /// The bytes go to `cache/tmp/<name>.part` first and are renamed into
    /// place, so `media/` never holds a half-written file.
    pub fn place_file(&self, file_name: &str, bytes: &[u8]) -> Result<String> {
        let media = self.media_dir();
        let name = unique_name(&media, file_name);
        let part = self.root.join(TMP_DIR).join(format!("{}.part", name));

        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&part)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&part, media.join(&name))
        };

        if let Err(e) = write() {
            if let Err(cleanup) = fs::remove_file(&part) {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!(file = %part.display(), error = %cleanup, "Could not remove partial file");
                }
            }
            return Err(BurrowError::Storage(format!("writing {}: {}", name, e)));
        }

        debug!(file = %name, size = bytes.len(), "Placed file");
        Ok(format!("{}/{}", MEDIA_DIR, name))
    }

    /// Removes a placed file. Missing files are not an error.
    pub fn remove_file(&self, rel: &str) -> Result<()> {
        remove_if_present(&self.absolute(rel))
    }

    pub fn move_to_trash(&self, rel: &str) -> Result<()> {
        let src = self.absolute(rel);
        let dst = self.trash_path(rel);
        move_file(&src, &dst)
    }

    pub fn restore_from_trash(&self, rel: &str) -> Result<()> {
        let src = self.trash_path(rel);
        let dst = self.absolute(rel);
        move_file(&src, &dst)
    }

    pub fn purge_trashed_file(&self, rel: &str) -> Result<()> {
        remove_if_present(&self.trash_path(rel))
    }
}

fn move_file(src: &Path, dst: &Path) -> Result<()> {
    if !src.exists() {
        warn!(path = %src.display(), "File missing, nothing to move");
        return Ok(());
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(src, dst)
        .map_err(|e| BurrowError::Storage(format!("moving {}: {}", src.display(), e)))
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn unique_name(dir: &Path, file_name: &str) -> String {
    if !dir.join(file_name).exists() {
        return file_name.to_string();
    }

    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (file_name, None),
    };

    (1..)
        .map(|n| match ext {
            Some(ext) => format!("{}_dup{}.{}", stem, n, ext),
            None => format!("{}_dup{}", stem, n),
        })
        .find(|candidate| !dir.join(candidate).exists())
        .unwrap_or_else(|| file_name.to_string())
}

/// Filesystem-safe artist slug.
pub fn sanitize_slug(s: &str) -> String {
    let slug: String = s
        .trim()
        .to_lowercase()
        .replace(' ', "_")
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ';' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .collect();

    if slug.is_empty() {
        UNKNOWN_ARTIST.to_string()
    } else {
        slug
    }
}

/// First artist tag that names a person rather than a warning tag.
pub fn pick_primary_artist(artists: &[String]) -> String {
    artists
        .iter()
        .find(|a| !ARTIST_DENY_LIST.contains(&a.as_str()))
        .cloned()
        .unwrap_or_else(|| UNKNOWN_ARTIST.to_string())
}

pub fn primary_file_name(artist: &str, post_id: &str, ext: &str) -> String {
    format!("{}_e621_{}.{}", sanitize_slug(artist), post_id, ext)
}

pub fn secondary_file_name(artist: &str, submission_id: &str, ext: &str) -> String {
    format!("{}_fa_{}.{}", sanitize_slug(artist), submission_id, ext)
}

/// Extension from the last path segment of a URL, `jpg` when absent.
pub fn ext_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .and_then(|segment| segment.rsplit_once('.'))
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "jpg".to_string())
}

/// Soft-deletes an item and moves its file into `.trash/`.
pub fn trash_item(store: &dyn Store, library: &Library, item_id: i64) -> Result<()> {
    let item = store
        .get_item(item_id)?
        .filter(|item| !item.is_trashed())
        .ok_or(BurrowError::ItemNotFound(item_id))?;

    library.move_to_trash(&item.file_path)?;
    if let Err(e) = store.soft_delete(item_id) {
        if let Err(rollback) = library.restore_from_trash(&item.file_path) {
            warn!(item = item_id, file = %item.file_path, error = %rollback, "Could not restore file after failed trash");
        }
        return Err(e);
    }
    Ok(())
}

pub fn restore_item(store: &dyn Store, library: &Library, item_id: i64) -> Result<()> {
    let item = store
        .get_item(item_id)?
        .filter(|item| item.is_trashed())
        .ok_or(BurrowError::ItemNotFound(item_id))?;

    library.restore_from_trash(&item.file_path)?;
    if let Err(e) = store.restore(item_id) {
        if let Err(rollback) = library.move_to_trash(&item.file_path) {
            warn!(item = item_id, file = %item.file_path, error = %rollback, "Could not return file to trash after failed restore");
        }
        return Err(e);
    }
    Ok(())
}

/// Hard-deletes items trashed longer than `retention_days` ago.
pub fn purge_expired_trash(store: &dyn Store, library: &Library, retention_days: i64) -> Result<usize> {
    let cutoff = Utc::now() - Duration::days(retention_days);
    let expired = store.trashed_before(cutoff)?;

    for item in &expired {
        library.purge_trashed_file(&item.file_path)?;
        store.purge_item(item.id)?;
    }

    Ok(expired.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewItem, Source};
    use crate::store::SqliteStore;
    use tempfile::TempDir;

    #[test]
    fn test_layout_created() {
        let dir = TempDir::new().unwrap();
        let library = Library::open(dir.path()).unwrap();

        assert!(dir.path().join("db").is_dir());
        assert!(dir.path().join("media").is_dir());
        assert!(dir.path().join("cache/tmp").is_dir());
        assert_eq!(library.db_path(), dir.path().join("db/library.sqlite"));
    }

    #[test]
    fn test_place_file_and_dup_names() {
        let dir = TempDir::new().unwrap();
        let library = Library::open(dir.path()).unwrap();

        let first = library.place_file("artist_e621_1.png", b"one").unwrap();
        let second = library.place_file("artist_e621_1.png", b"two").unwrap();
        let third = library.place_file("artist_e621_1.png", b"three").unwrap();

        assert_eq!(first, "media/artist_e621_1.png");
        assert_eq!(second, "media/artist_e621_1_dup1.png");
        assert_eq!(third, "media/artist_e621_1_dup2.png");
        assert_eq!(fs::read(library.absolute(&second)).unwrap(), b"two");

        let leftovers = fs::read_dir(dir.path().join("cache/tmp")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_failed_place_leaves_no_partial() {
        let dir = TempDir::new().unwrap();
        let library = Library::open(dir.path()).unwrap();
        fs::remove_dir(library.media_dir()).unwrap();
        fs::write(library.media_dir(), b"").unwrap();

        let result = library.place_file("a_e621_1.png", b"data");
        assert!(matches!(result, Err(BurrowError::Storage(_))));
        assert_eq!(fs::read_dir(dir.path().join("cache/tmp")).unwrap().count(), 0);
    }

    #[test]
    fn test_remove_file_ignores_missing() {
        let dir = TempDir::new().unwrap();
        let library = Library::open(dir.path()).unwrap();
        library.remove_file("media/nothing.png").unwrap();
    }

    #[test]
    fn test_sanitize_slug() {
        assert_eq!(sanitize_slug("Some Artist"), "some_artist");
        assert_eq!(sanitize_slug("a/b:c*d?"), "abcd");
        assert_eq!(sanitize_slug("  "), "unknown_artist");
        assert_eq!(sanitize_slug("???"), "unknown_artist");
    }

    #[test]
    fn test_pick_primary_artist() {
        let artists = vec!["conditional_dnp".to_string(), "painter".to_string()];
        assert_eq!(pick_primary_artist(&artists), "painter");
        assert_eq!(pick_primary_artist(&["sound_warning".to_string()]), "unknown_artist");
        assert_eq!(pick_primary_artist(&[]), "unknown_artist");
    }

    #[test]
    fn test_file_names() {
        assert_eq!(primary_file_name("Big Cat", "42", "png"), "big_cat_e621_42.png");
        assert_eq!(secondary_file_name("painter", "7", "jpg"), "painter_fa_7.jpg");
    }

    #[test]
    fn test_ext_from_url() {
        assert_eq!(ext_from_url("https://d.furaffinity.net/art/x/123/file.PNG"), "png");
        assert_eq!(ext_from_url("https://static1.e621.net/data/ab/cd/h.webm?x=1"), "webm");
        assert_eq!(ext_from_url("https://example.com/noext"), "jpg");
    }

    #[test]
    fn test_trash_restore_and_purge() {
        let dir = TempDir::new().unwrap();
        let library = Library::open(dir.path()).unwrap();
        let store = SqliteStore::in_memory().unwrap();

        let rel = library.place_file("a_e621_1.png", b"data").unwrap();
        let id = store.insert(&NewItem::new(Source::E621, "1", rel.clone())).unwrap();

        trash_item(&store, &library, id).unwrap();
        assert!(!library.absolute(&rel).exists());
        assert!(dir.path().join(".trash").join(&rel).exists());
        assert!(trash_item(&store, &library, id).is_err());

        restore_item(&store, &library, id).unwrap();
        assert!(library.absolute(&rel).exists());

        trash_item(&store, &library, id).unwrap();
        assert_eq!(purge_expired_trash(&store, &library, 30).unwrap(), 0);
        assert_eq!(purge_expired_trash(&store, &library, -1).unwrap(), 1);
        assert!(store.get_item(id).unwrap().is_none());
        assert!(!dir.path().join(".trash").join(&rel).exists());
    }
}
