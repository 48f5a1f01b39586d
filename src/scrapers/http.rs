use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::crawl::until_cancelled;
use crate::error::ScrapeError;

pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
pub const ACCEPT_LANGUAGE: &str = "en-AU,en;q=0.9";

/// Markers left by bot-defence interstitials on a 403 page.
const CHALLENGE_MARKERS: &[&str] = &["KPSDK", "captcha", "cf-challenge", "challenge-platform"];

/// A successful response body with its headers.
#[derive(Debug)]
pub struct Fetched {
    pub body: String,
    pub headers: HeaderMap,
}

impl Fetched {
    /// Integer value of a response header such as `X-Total-Count`.
    pub fn header_u64(&self, name: &str) -> Option<u64> {
        self.headers.get(name)?.to_str().ok()?.trim().parse().ok()
    }
}

/// Shared HTTP client with block-aware response classification.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// GET an HTML page with browser-like headers plus `extra_headers`.
    pub async fn get_html(
        &self,
        cancel: &CancellationToken,
        url: &str,
        extra_headers: &[(&str, &str)],
    ) -> Result<Fetched, ScrapeError> {
        let mut request = self
            .client
            .get(url)
            .header("Accept", HTML_ACCEPT)
            .header("Accept-Language", ACCEPT_LANGUAGE);
        for (name, value) in extra_headers {
            request = request.header(*name, *value);
        }
        self.send(cancel, url, request).await
    }

    /// Sends a prepared request and classifies the response.
    pub async fn send(
        &self,
        cancel: &CancellationToken,
        url: &str,
        request: RequestBuilder,
    ) -> Result<Fetched, ScrapeError> {
        until_cancelled(cancel, async {
            let response = request.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.text().await?;
            debug!("GET {} -> {} ({} bytes)", url, status, body.len());

            if let Some(signature) = block_signature(status.as_u16(), &body) {
                return Err(ScrapeError::blocked(url, signature));
            }
            if !status.is_success() {
                return Err(ScrapeError::Http {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }
            Ok::<_, ScrapeError>(Fetched { body, headers })
        })
        .await
    }
}

/// Recognises bot-defence responses, returning the matched signature.
pub fn block_signature(status: u16, body: &str) -> Option<&'static str> {
    if body.len() < 2_000 && body.contains("KPSDK") {
        return Some("KPSDK");
    }
    if body.len() < 10_000 {
        if let Some(marker) = ["Access Denied", "403 Forbidden"]
            .into_iter()
            .find(|marker| body.contains(marker))
        {
            return Some(marker);
        }
    }
    match status {
        429 => Some("HTTP 429"),
        403 => CHALLENGE_MARKERS
            .iter()
            .copied()
            .find(|marker| body.contains(marker)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn recognises_block_pages() {
        assert_eq!(
            block_signature(200, "<script>KPSDK.load()</script>"),
            Some("KPSDK")
        );
        assert_eq!(block_signature(200, "<h1>Access Denied</h1>"), Some("Access Denied"));
        assert_eq!(block_signature(429, "slow down"), Some("HTTP 429"));
        assert_eq!(block_signature(403, "please solve the captcha"), Some("captcha"));
        assert_eq!(block_signature(403, "no entry"), None);

        let big_page = format!("{}KPSDK", "x".repeat(5_000));
        assert_eq!(block_signature(200, &big_page), None);
    }

    #[tokio::test]
    async fn returns_body_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/buy/nsw"))
            .and(header("Accept-Language", ACCEPT_LANGUAGE))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Total-Count", "250")
                    .set_body_string("<html>ok</html>"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let page = fetcher
            .get_html(
                &CancellationToken::new(),
                &format!("{}/buy/nsw", server.uri()),
                &[],
            )
            .await
            .unwrap();
        assert_eq!(page.body, "<html>ok</html>");
        assert_eq!(page.header_u64("X-Total-Count"), Some(250));
    }

    #[tokio::test]
    async fn classifies_block_and_http_errors() {
        let server = MockServer::start().await;
        Mock::given(path("/blocked"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<script src=\"/KPSDK.js\"></script>"))
            .mount(&server)
            .await;
        Mock::given(path("/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let cancel = CancellationToken::new();

        let blocked = fetcher
            .get_html(&cancel, &format!("{}/blocked", server.uri()), &[])
            .await
            .unwrap_err();
        assert_eq!(blocked.kind(), FailureKind::Blocked);

        let gone = fetcher
            .get_html(&cancel, &format!("{}/gone", server.uri()), &[])
            .await
            .unwrap_err();
        assert!(matches!(gone, ScrapeError::Http { status: 404, .. }));
    }

    #[tokio::test]
    async fn cancelled_token_aborts_fetch() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let fetcher = HttpFetcher::new().unwrap();
        let err = fetcher
            .get_html(&cancel, "http://127.0.0.1:9/never", &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Cancelled);
    }
}
