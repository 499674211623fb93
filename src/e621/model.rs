//! Wire shapes of the e621 posts API.

use serde::Deserialize;

use crate::domain::{Source, Tag, TagKind};
use crate::fetcher::PostSummary;
use crate::hasher::normalize_hash;

#[derive(Debug, Deserialize)]
pub(crate) struct PostsResponse {
    #[serde(default)]
    pub posts: Vec<ApiPost>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiPost {
    pub id: u64,
    #[serde(default)]
    pub file: ApiFile,
    #[serde(default)]
    pub tags: ApiTags,
    pub rating: Option<String>,
    pub fav_count: Option<i64>,
    pub score: Option<ApiScore>,
    pub created_at: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// `url` is null for posts hidden from anonymous or filtered users.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiFile {
    pub url: Option<String>,
    pub ext: Option<String>,
    pub md5: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ApiTags {
    pub general: Vec<String>,
    pub species: Vec<String>,
    pub character: Vec<String>,
    pub artist: Vec<String>,
    pub meta: Vec<String>,
    pub lore: Vec<String>,
    pub copyright: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiScore {
    pub total: i64,
}

impl ApiTags {
    fn into_tags(self) -> Vec<Tag> {
        let groups = [
            (self.artist, TagKind::Artist),
            (self.copyright, TagKind::Copyright),
            (self.character, TagKind::Character),
            (self.species, TagKind::Species),
            (self.general, TagKind::General),
            (self.meta, TagKind::Meta),
            (self.lore, TagKind::Lore),
        ];

        groups
            .into_iter()
            .flat_map(|(names, kind)| names.into_iter().map(move |name| Tag::new(&name, kind)))
            .filter(|tag| !tag.name.is_empty())
            .collect()
    }
}

impl From<ApiPost> for PostSummary {
    fn from(post: ApiPost) -> Self {
        let mut summary = PostSummary::new(Source::E621, post.id.to_string());
        summary.file_url = post.file.url.filter(|u| !u.is_empty());
        summary.ext = post.file.ext;
        summary.md5 = post.file.md5.as_deref().and_then(normalize_hash);
        summary.tags = post.tags.into_tags();
        summary.rating = post.rating;
        summary.fav_count = post.fav_count;
        summary.score = post.score.map(|s| s.total);
        summary.created_at = post.created_at;
        summary.sources = post
            .sources
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        summary
    }
}
