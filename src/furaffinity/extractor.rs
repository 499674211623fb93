//! HTML extraction for FurAffinity pages.

use scraper::{ElementRef, Html, Selector};

use crate::app::{BurrowError, Result};
use crate::config::FaSelectors;
use crate::furaffinity::Submission;

/// Compiled selectors, built once per client.
pub struct Extractor {
    favorite: Selector,
    download: Selector,
    tags: Selector,
    artist: Vec<Selector>,
    rating: Selector,
}

fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| BurrowError::Parse(format!("bad selector {:?}: {}", selector, e)))
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

impl Extractor {
    pub fn new(selectors: &FaSelectors) -> Result<Self> {
        Ok(Self {
            favorite: compile(&selectors.favorite)?,
            download: compile(&selectors.download)?,
            tags: compile(&selectors.tags)?,
            artist: selectors
                .artist
                .iter()
                .map(|s| compile(s))
                .collect::<Result<Vec<_>>>()?,
            rating: compile(&selectors.rating)?,
        })
    }

    /// Submission ids listed on a favorites page, in page order.
    pub fn favorite_ids(&self, html: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        document
            .select(&self.favorite)
            .filter_map(|figure| figure.value().attr("id"))
            .map(|id| id.trim_start_matches("sid-").to_string())
            .filter(|id| !id.is_empty())
            .collect()
    }

    pub fn submission(&self, id: &str, view_url: &str, html: &str) -> Submission {
        let document = Html::parse_document(html);

        let download_url = document
            .select(&self.download)
            .next()
            .and_then(|el| el.value().attr("href"))
            .map(absolute_url)
            .filter(|url| !url.is_empty());

        let tags = document
            .select(&self.tags)
            .map(text_of)
            .filter(|t| !t.is_empty())
            .collect();

        let artist = self
            .artist
            .iter()
            .find_map(|selector| {
                document
                    .select(selector)
                    .map(text_of)
                    .find(|text| !text.is_empty())
            })
            .or_else(|| download_url.as_deref().and_then(artist_from_download_url))
            .map(|name| name.replace(' ', "_").to_lowercase());

        let rating = document
            .select(&self.rating)
            .next()
            .map(text_of)
            .map(|text| map_rating(&text))
            .unwrap_or("s")
            .to_string();

        Submission {
            id: id.to_string(),
            view_url: view_url.to_string(),
            download_url,
            artist,
            tags,
            rating,
        }
    }
}

/// FA serves protocol-relative links (`//d.furaffinity.net/...`).
fn absolute_url(href: &str) -> String {
    let href = href.trim();
    if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.to_string()
    }
}

/// `/art/<artist>/<timestamp>/<file>` in FA download URLs.
fn artist_from_download_url(url: &str) -> Option<String> {
    let start = url.find("/art/")? + "/art/".len();
    let rest = &url[start..];
    let end = rest.find('/')?;
    Some(rest[..end].to_string()).filter(|a| !a.is_empty())
}

fn map_rating(text: &str) -> &'static str {
    match text.trim().to_lowercase().as_str() {
        "adult" => "e",
        "mature" => "q",
        _ => "s",
    }
}

/// The session cookies were rejected and FA served its login form instead.
pub fn is_login_page(final_url: &str) -> bool {
    final_url.contains("/login")
}
