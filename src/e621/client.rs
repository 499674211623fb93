use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, StatusCode};
use tracing::{debug, info};
use url::Url;

use crate::app::{BurrowError, Result};
use crate::config::E621Config;
use crate::credentials::Credentials;
use crate::e621::model::PostsResponse;
use crate::fetcher::http_fetcher::{build_client, check_status, Throttle};
use crate::fetcher::{Cursor, Downloader, Page, PageFetcher, PostSummary, PrimaryLookup};

/// Authenticated client for the e621 JSON API.
pub struct E621Client {
    client: Client,
    base_url: Url,
    credentials: Credentials,
    page_limit: u32,
    throttle: Throttle,
}

impl E621Client {
    pub fn new(config: &E621Config, credentials: Credentials) -> Result<Self> {
        Ok(Self {
            client: build_client(&config.user_agent)?,
            base_url: Url::parse(&config.base_url)?,
            credentials,
            page_limit: config.page_limit.clamp(1, 320),
            throttle: Throttle::new(config.request_delay()),
        })
    }

    /// Tag query listing a user's favorites.
    pub fn favorites_query(&self) -> String {
        format!("fav:{}", self.credentials.username)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.credentials.username, Some(&self.credentials.secret))
    }

    async fn get_posts(&self, url: Url) -> Result<Vec<PostSummary>> {
        self.throttle.wait().await;
        debug!(url = %url, "Fetching posts");

        let response = self.authed(self.client.get(url)).send().await?;
        let body = check_status(response)?.bytes().await?;
        let parsed: PostsResponse = serde_json::from_slice(&body)?;

        Ok(parsed.posts.into_iter().map(PostSummary::from).collect())
    }

    /// One authenticated request; fails with `Authentication` on bad credentials.
    pub async fn test_connection(&self) -> Result<()> {
        let mut url = self.endpoint("posts.json")?;
        url.query_pairs_mut()
            .append_pair("tags", &self.favorites_query())
            .append_pair("limit", "1");
        self.get_posts(url).await?;
        info!(user = %self.credentials.username, "e621 connection ok");
        Ok(())
    }

    /// Adds a remote favorite. Already-favorited posts count as success.
    pub async fn favorite(&self, post_id: u64) -> Result<()> {
        self.throttle.wait().await;
        let url = self.endpoint("favorites.json")?;
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("post_id", &post_id.to_string())
            .finish();

        let response = self
            .authed(self.client.post(url))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            debug!(post_id, "Post already favorited");
            return Ok(());
        }
        check_status(response)?;
        Ok(())
    }
}

#[async_trait]
impl PageFetcher for E621Client {
    async fn fetch_page(&self, query: &str, cursor: Option<&Cursor>) -> Result<Page> {
        let mut url = self.endpoint("posts.json")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("tags", query)
                .append_pair("limit", &self.page_limit.to_string());
            match cursor {
                Some(Cursor::BeforeId(id)) => {
                    pairs.append_pair("page", &format!("b{}", id));
                }
                Some(Cursor::Page(n)) => {
                    pairs.append_pair("page", &n.to_string());
                }
                None => {}
            }
        }

        let posts = self.get_posts(url).await?;

        // The API may return fewer than `limit` posts mid-listing (hidden or
        // filtered posts), so only an empty page ends it.
        let next_cursor = posts
            .iter()
            .filter_map(|p| p.source_id.parse::<u64>().ok())
            .min()
            .map(Cursor::BeforeId);

        Ok(Page { posts, next_cursor })
    }
}

#[async_trait]
impl PrimaryLookup for E621Client {
    async fn find_by_hash(&self, hash: &str) -> Result<Option<PostSummary>> {
        let mut url = self.endpoint("posts.json")?;
        url.query_pairs_mut()
            .append_pair("tags", &format!("md5:{}", hash))
            .append_pair("limit", "1");
        Ok(self.get_posts(url).await?.into_iter().next())
    }
}

#[async_trait]
impl Downloader for E621Client {
    async fn download(&self, url: &str) -> Result<Bytes> {
        if url.is_empty() {
            return Err(BurrowError::UnavailableContent("empty file url".to_string()));
        }
        let response = self.client.get(url).send().await?;
        // Static files are not behind the API key; a 403 here is per-file.
        let response = check_status(response).map_err(|e| match e {
            BurrowError::Authentication(msg) => BurrowError::UnavailableContent(msg),
            other => other,
        })?;
        Ok(response.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, page_limit: u32) -> E621Client {
        let config = E621Config {
            base_url: server.uri(),
            page_limit,
            request_delay_ms: 0,
            ..Default::default()
        };
        let credentials = Credentials {
            username: "fox".to_string(),
            secret: "key".to_string(),
        };
        E621Client::new(&config, credentials).unwrap()
    }

    fn posts_body(ids: &[u64]) -> serde_json::Value {
        let posts: Vec<_> = ids
            .iter()
            .map(|id| {
                serde_json::json!({
                    "id": id,
                    "file": { "url": format!("https://static.example/{}.png", id), "ext": "png", "md5": null },
                    "tags": { "artist": ["painter"] },
                    "rating": "s",
                })
            })
            .collect();
        serde_json::json!({ "posts": posts })
    }

    #[tokio::test]
    async fn test_fetch_page_full_page_yields_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/posts.json"))
            .and(query_param("tags", "fav:fox"))
            .and(query_param("limit", "3"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(posts_body(&[30, 20, 10])))
            .mount(&server)
            .await;

        let client = client(&server, 3);
        let page = client.fetch_page(&client.favorites_query(), None).await.unwrap();

        assert_eq!(page.posts.len(), 3);
        assert_eq!(page.next_cursor, Some(Cursor::BeforeId(10)));
    }

    #[tokio::test]
    async fn test_short_page_continues_until_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/posts.json"))
            .and(query_param("page", "b10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(posts_body(&[5])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/posts.json"))
            .and(query_param("page", "b5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(posts_body(&[])))
            .mount(&server)
            .await;

        let client = client(&server, 3);
        let short = client
            .fetch_page("fav:fox", Some(&Cursor::BeforeId(10)))
            .await
            .unwrap();
        assert_eq!(short.posts.len(), 1);
        assert_eq!(short.next_cursor, Some(Cursor::BeforeId(5)));

        let last = client
            .fetch_page("fav:fox", short.next_cursor.as_ref())
            .await
            .unwrap();
        assert!(last.posts.is_empty());
        assert!(last.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_auth_failure_is_distinct() {
        let server = MockServer::start().await;
        Mock::given(path("/posts.json"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = client(&server, 3);
        let result = client.fetch_page("fav:fox", None).await;
        assert!(matches!(result, Err(BurrowError::Authentication(_))));
        assert!(client.test_connection().await.is_err());
    }

    #[tokio::test]
    async fn test_find_by_hash() {
        let server = MockServer::start().await;
        Mock::given(path("/posts.json"))
            .and(query_param("tags", "md5:abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(posts_body(&[99])))
            .mount(&server)
            .await;
        Mock::given(path("/posts.json"))
            .and(query_param("tags", "md5:none"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "posts": [] })))
            .mount(&server)
            .await;

        let client = client(&server, 3);
        let found = client.find_by_hash("abc").await.unwrap().unwrap();
        assert_eq!(found.source_id, "99");
        assert!(client.find_by_hash("none").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_favorite_treats_422_as_ok() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/favorites.json"))
            .and(body_string("post_id=5"))
            .respond_with(ResponseTemplate::new(422))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/favorites.json"))
            .and(body_string("post_id=6"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let client = client(&server, 3);
        client.favorite(5).await.unwrap();
        client.favorite(6).await.unwrap();
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let server = MockServer::start().await;
        Mock::given(path("/posts.json"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = client(&server, 3);
        let err = client.fetch_page("fav:fox", None).await.unwrap_err();
        assert!(err.is_transient());
    }
}
