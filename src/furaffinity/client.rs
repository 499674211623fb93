use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::COOKIE;
use reqwest::{Client, Response};
use tracing::debug;
use url::Url;

use crate::app::{BurrowError, Result};
use crate::config::FurAffinityConfig;
use crate::credentials::Credentials;
use crate::domain::Source;
use crate::fetcher::http_fetcher::{build_client, check_status, Throttle};
use crate::fetcher::{Cursor, Downloader, Page, PageFetcher, PostSummary};
use crate::furaffinity::extractor::{is_login_page, Extractor};
use crate::furaffinity::{Submission, SubmissionSource};

/// Cookie-authenticated FurAffinity client.
///
/// Favorites pages are numbered from 1; the listing ends at an empty page or
/// after `max_pages`.
pub struct FaClient {
    client: Client,
    base_url: Url,
    cookie: String,
    max_pages: u32,
    extractor: Extractor,
    throttle: Throttle,
}

impl FaClient {
    /// `credentials.username` holds cookie `a`, `credentials.secret` cookie `b`.
    pub fn new(config: &FurAffinityConfig, credentials: &Credentials) -> Result<Self> {
        Ok(Self {
            client: build_client(&config.user_agent)?,
            base_url: Url::parse(&config.base_url)?,
            cookie: format!("a={}; b={}", credentials.username, credentials.secret),
            max_pages: config.max_pages.max(1),
            extractor: Extractor::new(&config.selectors)?,
            throttle: Throttle::new(config.request_delay()),
        })
    }

    fn favorites_url(&self, page: u32) -> Result<Url> {
        let path = if page <= 1 {
            "controls/favorites/".to_string()
        } else {
            format!("controls/favorites/{}/", page)
        };
        Ok(self.base_url.join(&path)?)
    }

    pub fn view_url(&self, id: &str) -> Result<Url> {
        Ok(self.base_url.join(&format!("view/{}/", id))?)
    }

    async fn send(&self, url: Url) -> Result<Response> {
        self.throttle.wait().await;
        debug!(url = %url, "Fetching");

        Ok(self
            .client
            .get(url)
            .header(COOKIE, &self.cookie)
            .send()
            .await?)
    }

    fn ensure_session(response: Response) -> Result<Response> {
        if is_login_page(response.url().as_str()) {
            return Err(BurrowError::Authentication(
                "FurAffinity redirected to login; cookies expired?".to_string(),
            ));
        }
        Ok(response)
    }

    async fn get(&self, url: Url) -> Result<Response> {
        let response = check_status(self.send(url).await?)?;
        Self::ensure_session(response)
    }

    async fn get_html(&self, url: Url) -> Result<String> {
        Ok(self.get(url).await?.text().await?)
    }
}

#[async_trait]
impl PageFetcher for FaClient {
    /// `query` is unused: the listing is always the cookie owner's favorites.
    async fn fetch_page(&self, _query: &str, cursor: Option<&Cursor>) -> Result<Page> {
        let page = match cursor {
            Some(Cursor::Page(n)) => *n,
            Some(Cursor::BeforeId(_)) => {
                return Err(BurrowError::InvalidOptions(
                    "FurAffinity pages are numbered".to_string(),
                ))
            }
            None => 1,
        };

        let html = self.get_html(self.favorites_url(page)?).await?;
        let posts: Vec<PostSummary> = self
            .extractor
            .favorite_ids(&html)
            .into_iter()
            .map(|id| PostSummary::new(Source::FurAffinity, id))
            .collect();

        let next_cursor = if posts.is_empty() || page >= self.max_pages {
            None
        } else {
            Some(Cursor::Page(page + 1))
        };

        Ok(Page { posts, next_cursor })
    }
}

#[async_trait]
impl SubmissionSource for FaClient {
    async fn fetch_submission(&self, id: &str) -> Result<Submission> {
        let html = self.get_html(self.view_url(id)?).await?;
        // Provenance links always use the public host, whatever base_url points at.
        let view_url = Source::FurAffinity.post_url(id);
        Ok(self.extractor.submission(id, &view_url, &html))
    }
}

#[async_trait]
impl Downloader for FaClient {
    /// A 401/403 on a single file means that file is withheld, not that the
    /// session is gone; only a login redirect rejects the cookies.
    async fn download(&self, url: &str) -> Result<Bytes> {
        let url = Url::parse(url)?;
        let response = check_status(self.send(url).await?).map_err(|e| match e {
            BurrowError::Authentication(msg) => BurrowError::UnavailableContent(msg),
            other => other,
        })?;
        Ok(Self::ensure_session(response)?.bytes().await?)
    }
}
