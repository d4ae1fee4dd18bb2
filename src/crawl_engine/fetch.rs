//! Fetch collaborator boundary
//!
//! The scheduler never performs HTTP itself; it hands URLs to a [`Fetcher`]
//! and routes whatever comes back. [`HttpFetcher`] is the `reqwest`-backed
//! implementation used by the binary.

use futures::future::BoxFuture;
use log::debug;
use std::error::Error as _;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Response returned by a fetch collaborator
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
    pub elapsed_ms: u64,
}

/// Fetch failures the collaborator may report
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// The fetch did not finish in time and was cancelled
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("TLS error: {0}")]
    Tls(String),

    /// The body exceeded the configured maximum content length
    #[error("Response body exceeds {limit} bytes")]
    ContentTooLarge { limit: usize },
}

impl FetchError {
    /// Whether retrying could plausibly succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::ContentTooLarge { .. })
    }
}

/// External fetch collaborator
///
/// Implementations should honour `timeout` themselves; the dispatcher also
/// cancels the returned future when the timeout elapses.
pub trait Fetcher: Send + Sync {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<FetchResponse, FetchError>>;
}

/// Run a fetch future under an explicit timeout
///
/// Dropping the inner future on expiry is what cancels an in-flight fetch.
pub async fn with_fetch_timeout<F>(
    operation: F,
    timeout: Duration,
) -> Result<FetchResponse, FetchError>
where
    F: Future<Output = Result<FetchResponse, FetchError>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(timeout)),
    }
}

/// `reqwest`-backed fetcher
///
/// Follows up to five redirects. Bodies beyond the configured maximum
/// content length fail with [`FetchError::ContentTooLarge`] instead of being
/// cut short.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    max_content_length: usize,
}

impl HttpFetcher {
    /// Build a fetcher with the given user agent and body cap
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(user_agent: &str, max_content_length: usize) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self {
            client,
            max_content_length,
        })
    }

    async fn fetch_inner(&self, url: &str, timeout: Duration) -> Result<FetchResponse, FetchError> {
        let started = Instant::now();
        let mut response = self
            .client
            .get(url)
            .timeout(timeout)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .send()
            .await
            .map_err(|e| map_reqwest_error(&e, timeout))?;

        let status = response.status().as_u16();
        let limit = self.max_content_length;
        let limit_u64 = u64::try_from(limit).unwrap_or(u64::MAX);
        if let Some(declared) = response.content_length().filter(|&len| len > limit_u64) {
            debug!("Rejecting {url}: Content-Length {declared} exceeds {limit}");
            return Err(FetchError::ContentTooLarge { limit });
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| map_reqwest_error(&e, timeout))?
        {
            if chunk.len() > limit.saturating_sub(body.len()) {
                debug!("Rejecting {url}: body exceeds {limit} bytes");
                return Err(FetchError::ContentTooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchResponse {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<FetchResponse, FetchError>> {
        Box::pin(with_fetch_timeout(self.fetch_inner(url, timeout), timeout))
    }
}

fn map_reqwest_error(err: &reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        return FetchError::Timeout(timeout);
    }

    // reqwest has no TLS predicate; look through the source chain
    let mut source = err.source();
    while let Some(inner) = source {
        let msg = inner.to_string().to_lowercase();
        if msg.contains("certificate") || msg.contains("tls") || msg.contains("handshake") {
            return FetchError::Tls(inner.to_string());
        }
        source = inner.source();
    }

    FetchError::Connection(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_fetcher_reports_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/page")
            .with_status(200)
            .with_body("hello")
            .create_async()
            .await;

        let fetcher = HttpFetcher::new("TestBot/1.0", 1024).expect("client builds");
        let url = format!("{}/page", server.url());
        let resp = fetcher
            .fetch(&url, Duration::from_secs(5))
            .await
            .expect("fetch should succeed");

        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "hello");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_fetcher_rejects_large_bodies() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/big")
            .with_status(200)
            .with_body("x".repeat(100))
            .create_async()
            .await;

        let fetcher = HttpFetcher::new("TestBot/1.0", 10).expect("client builds");
        let url = format!("{}/big", server.url());
        let err = fetcher
            .fetch(&url, Duration::from_secs(5))
            .await
            .expect_err("oversized body must fail");
        assert!(matches!(err, FetchError::ContentTooLarge { limit: 10 }));
        assert!(!err.is_transient());

        // a body exactly at the limit is accepted
        let _exact = server
            .mock("GET", "/exact")
            .with_status(200)
            .with_body("y".repeat(10))
            .create_async()
            .await;
        let resp = fetcher
            .fetch(&format!("{}/exact", server.url()), Duration::from_secs(5))
            .await
            .expect("body at the limit fits");
        assert_eq!(resp.body.len(), 10);
    }

    #[tokio::test]
    async fn test_http_fetcher_passes_error_statuses_through() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;

        let fetcher = HttpFetcher::new("TestBot/1.0", 1024).expect("client builds");
        let url = format!("{}/missing", server.url());
        let resp = fetcher
            .fetch(&url, Duration::from_secs(5))
            .await
            .expect("a 404 is still a response");
        assert_eq!(resp.status, 404);
    }

    #[tokio::test]
    async fn test_connection_refused_maps_to_connection_error() {
        let fetcher = HttpFetcher::new("TestBot/1.0", 1024).expect("client builds");
        let result = fetcher
            .fetch("http://127.0.0.1:1/", Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(FetchError::Connection(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_fetch_timeout_cancels() {
        let never = futures::future::pending::<Result<FetchResponse, FetchError>>();
        let result = with_fetch_timeout(never, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(FetchError::Timeout(_))));
    }
}
