use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Response, StatusCode};
use tokio::sync::Mutex;

use crate::app::{BurrowError, Result};
use crate::fetcher::Downloader;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn build_client(user_agent: &str) -> Result<Client> {
    let client = Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .gzip(true)
        .brotli(true)
        .user_agent(user_agent)
        .build()?;
    Ok(client)
}

/// Maps HTTP failures onto the error taxonomy the sync engines act on.
pub fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(BurrowError::Authentication(format!("{} returned {}", url, status)))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            Err(BurrowError::TransientFetch(format!("{} returned {}", url, status)))
        }
        s if s.is_server_error() => {
            Err(BurrowError::TransientFetch(format!("{} returned {}", url, status)))
        }
        _ => Err(response.error_for_status().err().map_or_else(
            || BurrowError::Other(format!("{} returned {}", url, status)),
            BurrowError::Http,
        )),
    }
}

/// Spaces out requests to one host.
pub struct Throttle {
    delay: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last: Mutex::new(None),
        }
    }

    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Anonymous file downloader.
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(user_agent: &str) -> Result<Self> {
        Ok(Self {
            client: build_client(user_agent)?,
        })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str) -> Result<Bytes> {
        let response = self.client.get(url).send().await?;
        let response = check_status(response)?;
        Ok(response.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_download_sends_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file.png"))
            .and(header("user-agent", "test/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-bytes".to_vec()))
            .mount(&server)
            .await;

        let downloader = HttpDownloader::new("test/1.0").unwrap();
        let bytes = downloader
            .download(&format!("{}/file.png", server.uri()))
            .await
            .unwrap();

        assert_eq!(&bytes[..], b"png-bytes");
    }

    #[tokio::test]
    async fn test_status_classification() {
        let server = MockServer::start().await;
        Mock::given(path("/denied"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(path("/busy"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let downloader = HttpDownloader::new("test/1.0").unwrap();

        let denied = downloader.download(&format!("{}/denied", server.uri())).await;
        assert!(matches!(denied, Err(BurrowError::Authentication(_))));

        let busy = downloader.download(&format!("{}/busy", server.uri())).await;
        assert!(busy.unwrap_err().is_transient());

        let gone = downloader.download(&format!("{}/gone", server.uri())).await;
        let gone = gone.unwrap_err();
        assert!(!gone.is_transient());
        assert!(!gone.is_authentication());
    }

    #[tokio::test]
    async fn test_throttle_spaces_requests() {
        let throttle = Throttle::new(Duration::from_millis(30));
        let start = Instant::now();
        throttle.wait().await;
        throttle.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
