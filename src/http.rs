//! Shared HTTP client
//!
//! One `reqwest::Client` per run, carrying the configured headers and
//! connect timeout. Pages, API calls and manifests get `request_timeout` as a
//! whole-request limit; media bodies are streamed by the executor, which
//! applies the same limit to each read instead. Every helper here retries transient failures through
//! [`download_with_retry_counted`] and reports non-success statuses as
//! [`FetchError::Status`].

use crate::config::{Config, RetryConfig};
use crate::error::{Error, FetchError, Result};
use crate::retry::download_with_retry_counted;
use crate::types::MediaAccess;
use reqwest::header::{
    ACCEPT, ACCEPT_ENCODING, CONTENT_TYPE, COOKIE, HeaderMap, HeaderName, HeaderValue, SET_COOKIE,
};
use std::sync::atomic::AtomicU32;
use std::time::Duration;
use url::Url;

/// Body and cookies of a player API call
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// Response body
    pub body: String,
    /// `name=value` pairs from every `Set-Cookie` header, joined for a `Cookie` header
    pub cookie: Option<String>,
}

/// HTTP client shared by every stage of a run (cheap to clone)
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl HttpClient {
    /// Build the client from configuration
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.http.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                Error::config(format!("invalid header name '{}': {}", name, e), "headers")
            })?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::config(format!("invalid header value: {}", e), "headers"))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(config.http.connect_timeout)
            .build()
            .map_err(|e| Error::Config {
                message: format!("failed to create HTTP client: {}", e),
                key: None,
            })?;

        Ok(Self {
            client,
            retry: config.retry.clone(),
            request_timeout: config.http.request_timeout,
        })
    }

    /// The underlying reqwest client
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }

    /// Retry policy applied by this client
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Limit for one small request, and for each read of a streamed body
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Send a request once and reject non-success statuses
    pub async fn send_checked(
        &self,
        request: reqwest::RequestBuilder,
        url: &Url,
    ) -> std::result::Result<reqwest::Response, FetchError> {
        let response = request
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url.as_str(), e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    /// GET a page as text
    pub async fn get_text(&self, url: &Url, retries: &AtomicU32) -> Result<String> {
        let text = download_with_retry_counted(&self.retry, retries, || {
            let request = self.client.get(url.clone()).timeout(self.request_timeout);
            async move {
                let response = self.send_checked(request, url).await?;
                response
                    .text()
                    .await
                    .map_err(|e| FetchError::from_reqwest(url.as_str(), e))
            }
        })
        .await?;
        Ok(text)
    }

    /// GET a small resource (manifest, segment) as bytes, with media request headers
    pub async fn get_bytes(
        &self,
        url: &Url,
        access: &MediaAccess,
        retries: &AtomicU32,
    ) -> Result<Vec<u8>> {
        let headers = media_headers(access);
        let bytes = download_with_retry_counted(&self.retry, retries, || {
            let request = self
                .client
                .get(url.clone())
                .headers(headers.clone())
                .timeout(self.request_timeout);
            async move {
                let response = self.send_checked(request, url).await?;
                response
                    .bytes()
                    .await
                    .map(|b| b.to_vec())
                    .map_err(|e| FetchError::from_reqwest(url.as_str(), e))
            }
        })
        .await?;
        Ok(bytes)
    }

    /// POST a url-encoded form body and collect the cookies the server sets
    pub async fn post_form(
        &self,
        url: &Url,
        body: &str,
        retries: &AtomicU32,
    ) -> Result<ApiResponse> {
        let response = download_with_retry_counted(&self.retry, retries, || {
            let request = self
                .client
                .post(url.clone())
                .timeout(self.request_timeout)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(body.to_string());
            async move {
                let response = self.send_checked(request, url).await?;
                let cookie = collect_cookies(response.headers());
                let body = response
                    .text()
                    .await
                    .map_err(|e| FetchError::from_reqwest(url.as_str(), e))?;
                Ok::<_, FetchError>(ApiResponse { body, cookie })
            }
        })
        .await?;
        Ok(response)
    }
}

/// Headers sent with media and manifest requests
pub fn media_headers(access: &MediaAccess) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity;q=1, *;q=0"));
    if let Some(cookie) = &access.cookie {
        match HeaderValue::from_str(cookie) {
            Ok(value) => {
                headers.insert(COOKIE, value);
            }
            Err(e) => tracing::warn!(error = %e, "Dropping cookie that is not a valid header value"),
        }
    }
    headers
}

/// Join the `name=value` part of every `Set-Cookie` header
fn collect_cookies(headers: &HeaderMap) -> Option<String> {
    let pairs: Vec<&str> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('='))
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client() -> HttpClient {
        let mut config = Config::default();
        config.http.headers.insert("x-test".into(), "anime1-dl".into());
        config.retry = RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 2.0,
            jitter: false,
        };
        HttpClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn get_text_sends_configured_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .and(header("x-test", "anime1-dl"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/page", server.uri())).unwrap();
        let retries = AtomicU32::new(0);
        let body = test_client().get_text(&url, &retries).await.unwrap();
        assert_eq!(body, "hello");
        assert_eq!(retries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn get_text_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/flaky", server.uri())).unwrap();
        let retries = AtomicU32::new(0);
        let body = test_client().get_text(&url, &retries).await.unwrap();
        assert_eq!(body, "ok");
        assert_eq!(retries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/missing", server.uri())).unwrap();
        let err = test_client()
            .get_text(&url, &AtomicU32::new(0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Fetch(FetchError::Status { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn stalled_page_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("late")
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let mut config = Config::default();
        config.http.request_timeout = Duration::from_millis(200);
        config.retry.max_attempts = 0;
        let client = HttpClient::new(&config).unwrap();

        let url = Url::parse(&format!("{}/slow", server.uri())).unwrap();
        let err = client.get_text(&url, &AtomicU32::new(0)).await.unwrap_err();
        assert!(matches!(err, Error::Fetch(FetchError::Timeout { .. })), "{err:?}");
    }

    #[tokio::test]
    async fn post_form_collects_cookies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api"))
            .and(body_string("d=%7B%22c%22%3A1%7D"))
            .respond_with(
                ResponseTemplate::new(200)
                    .append_header("set-cookie", "e=123; path=/; HttpOnly")
                    .append_header("set-cookie", "p=abc; path=/")
                    .append_header("set-cookie", "h=xyz; HttpOnly")
                    .set_body_string(r#"{"s":[]}"#),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/api", server.uri())).unwrap();
        let response = test_client()
            .post_form(&url, "d=%7B%22c%22%3A1%7D", &AtomicU32::new(0))
            .await
            .unwrap();
        assert_eq!(response.body, r#"{"s":[]}"#);
        assert_eq!(response.cookie.as_deref(), Some("e=123; p=abc; h=xyz"));
    }

    #[test]
    fn media_headers_carry_cookie() {
        let headers = media_headers(&MediaAccess {
            cookie: Some("e=1; p=2".into()),
        });
        assert_eq!(headers.get(COOKIE).unwrap(), "e=1; p=2");
        assert_eq!(headers.get(ACCEPT).unwrap(), "*/*");

        let bare = media_headers(&MediaAccess::default());
        assert!(bare.get(COOKIE).is_none());
    }
}
