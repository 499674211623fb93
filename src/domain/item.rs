use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::BurrowError;

/// Remote site an item was archived from.
///
/// e621 is the primary source (structured API); FurAffinity is the secondary,
/// scraped source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    E621,
    FurAffinity,
}

impl Source {
    pub const PRIMARY: Source = Source::E621;
    pub const SECONDARY: Source = Source::FurAffinity;

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::E621 => "e621",
            Source::FurAffinity => "furaffinity",
        }
    }

    pub fn is_primary(&self) -> bool {
        *self == Self::PRIMARY
    }

    /// Public page for a post on this source.
    pub fn post_url(&self, source_id: &str) -> String {
        match self {
            Source::E621 => format!("https://e621.net/posts/{}", source_id),
            Source::FurAffinity => format!("https://www.furaffinity.net/view/{}/", source_id),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = BurrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "e621" => Ok(Source::E621),
            "furaffinity" | "fa" => Ok(Source::FurAffinity),
            other => Err(BurrowError::InvalidOptions(format!("unknown source: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    General,
    Species,
    Character,
    Artist,
    Meta,
    Lore,
    Copyright,
}

impl TagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagKind::General => "general",
            TagKind::Species => "species",
            TagKind::Character => "character",
            TagKind::Artist => "artist",
            TagKind::Meta => "meta",
            TagKind::Lore => "lore",
            TagKind::Copyright => "copyright",
        }
    }
}

impl FromStr for TagKind {
    type Err = BurrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(TagKind::General),
            "species" => Ok(TagKind::Species),
            "character" => Ok(TagKind::Character),
            "artist" => Ok(TagKind::Artist),
            "meta" => Ok(TagKind::Meta),
            "lore" => Ok(TagKind::Lore),
            "copyright" => Ok(TagKind::Copyright),
            other => Err(BurrowError::Parse(format!("unknown tag kind: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub kind: TagKind,
}

impl Tag {
    pub fn new(name: &str, kind: TagKind) -> Self {
        Self {
            name: Self::normalize(name),
            kind,
        }
    }

    pub fn general(name: &str) -> Self {
        Self::new(name, TagKind::General)
    }

    pub fn artist(name: &str) -> Self {
        Self::new(name, TagKind::Artist)
    }

    /// Tags are stored trimmed and lowercased.
    pub fn normalize(name: &str) -> String {
        name.trim().to_lowercase()
    }
}

/// An archived artwork as stored in the library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub source: Source,
    pub source_id: String,
    pub remote_url: Option<String>,
    pub content_hash: Option<String>,
    /// Relative to the library root, e.g. `media/artist_e621_1.png`.
    pub file_path: String,
    pub ext: Option<String>,
    pub tags: Vec<String>,
    pub artists: Vec<String>,
    pub sources: Vec<String>,
    pub rating: Option<String>,
    pub fav_count: Option<i64>,
    pub score: Option<i64>,
    pub created_at: Option<String>,
    pub added_at: DateTime<Utc>,
    pub primary_artist: Option<String>,
    pub trashed_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn is_trashed(&self) -> bool {
        self.trashed_at.is_some()
    }

    pub fn has_source_link(&self, url: &str) -> bool {
        self.sources.iter().any(|s| s == url)
    }
}

/// Everything needed to commit a new row. The file must already be in place.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub source: Source,
    pub source_id: String,
    pub remote_url: Option<String>,
    pub content_hash: Option<String>,
    pub file_path: String,
    pub ext: Option<String>,
    pub tags: Vec<Tag>,
    pub sources: Vec<String>,
    pub rating: Option<String>,
    pub fav_count: Option<i64>,
    pub score: Option<i64>,
    pub created_at: Option<String>,
    pub primary_artist: Option<String>,
}

impl NewItem {
    pub fn new(source: Source, source_id: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            source,
            source_id: source_id.into(),
            remote_url: None,
            content_hash: None,
            file_path: file_path.into(),
            ext: None,
            tags: Vec::new(),
            sources: Vec::new(),
            rating: None,
            fav_count: None,
            score: None,
            created_at: None,
            primary_artist: None,
        }
    }
}

/// Primary-source metadata applied to an existing secondary row.
///
/// The row keeps its file; provenance and descriptive fields are replaced.
#[derive(Debug, Clone, Default)]
pub struct ItemUpgrade {
    pub source_id: String,
    pub remote_url: Option<String>,
    pub rating: Option<String>,
    pub fav_count: Option<i64>,
    pub score: Option<i64>,
    pub created_at: Option<String>,
    pub primary_artist: Option<String>,
    pub tags: Vec<Tag>,
    pub links: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_round_trips_through_str() {
        assert_eq!("e621".parse::<Source>().unwrap(), Source::E621);
        assert_eq!("FurAffinity".parse::<Source>().unwrap(), Source::FurAffinity);
        assert_eq!("fa".parse::<Source>().unwrap(), Source::FurAffinity);
        assert_eq!(Source::FurAffinity.to_string(), "furaffinity");
        assert!("pixiv".parse::<Source>().is_err());
    }

    #[test]
    fn test_primary_and_secondary() {
        assert!(Source::PRIMARY.is_primary());
        assert!(!Source::SECONDARY.is_primary());
    }

    #[test]
    fn test_post_urls() {
        assert_eq!(Source::E621.post_url("42"), "https://e621.net/posts/42");
        assert_eq!(
            Source::FurAffinity.post_url("7"),
            "https://www.furaffinity.net/view/7/"
        );
    }

    #[test]
    fn test_tag_normalization() {
        let tag = Tag::general("  Red Panda ");
        assert_eq!(tag.name, "red panda");
        assert_eq!(tag.kind, TagKind::General);
    }

    #[test]
    fn test_tag_kind_parse() {
        assert_eq!("lore".parse::<TagKind>().unwrap(), TagKind::Lore);
        assert!("weird".parse::<TagKind>().is_err());
    }
}
