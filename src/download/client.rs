//! HTTP client wrapper shared by resolution, segment fetching, and live
//! tailing.
//!
//! One `reqwest::Client` is created per run and reused everywhere for
//! connection pooling. Session headers and the accumulated cookie map are
//! attached to every request; segment bodies are streamed to disk through a
//! staged temporary file that is atomically renamed on success.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{CONTENT_TYPE, COOKIE};
use reqwest::{Client, Response};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use url::Url;

use super::error::FetchError;
use crate::session::cookie_header;

/// Connect timeout for all requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Overall request timeout; generous because media segments can be large.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// A text response plus the transport facts resolution needs.
#[derive(Debug, Clone)]
pub struct TextResponse {
    /// The response body.
    pub body: String,
    /// The URL after transport-level redirects.
    pub final_url: String,
    /// The `Content-Type` header value, empty when absent.
    pub content_type: String,
}

impl TextResponse {
    /// Whether the response is an HTML document.
    #[must_use]
    pub fn is_html(&self) -> bool {
        self.content_type
            .split(';')
            .next()
            .is_some_and(|t| t.trim().eq_ignore_ascii_case("text/html"))
    }
}

/// HTTP client for playlist, token, and segment fetches.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default timeouts.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .gzip(true)
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Issues a GET with the session headers and cookie map attached.
    ///
    /// Non-2xx statuses are turned into [`FetchError::HttpStatus`].
    async fn get(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        cookies: &BTreeMap<String, String>,
    ) -> Result<Response, FetchError> {
        Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;

        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(cookie) = cookie_header(cookies) {
            request = request.header(COOKIE, cookie);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::request(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::http_status(url, status.as_u16()));
        }
        Ok(response)
    }

    /// Fetches a text document, capturing any `Set-Cookie` headers into the
    /// cookie map.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on transport failure or non-2xx status.
    #[instrument(skip(self, headers, cookies), fields(url = %url))]
    pub async fn get_text(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        cookies: &mut BTreeMap<String, String>,
    ) -> Result<TextResponse, FetchError> {
        let response = self.get(url, headers, &*cookies).await?;
        crate::session::capture_cookies(cookies, &response);

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::request(url, e))?;

        debug!(final_url = %final_url, content_type = %content_type, bytes = body.len(), "fetched text");
        Ok(TextResponse {
            body,
            final_url,
            content_type,
        })
    }

    /// Fetches a JSON document (token endpoints), capturing cookies.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on transport failure, non-2xx status, or a
    /// body that is not valid JSON.
    #[instrument(skip(self, headers, cookies), fields(url = %url))]
    pub async fn get_json(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        cookies: &mut BTreeMap<String, String>,
    ) -> Result<serde_json::Value, FetchError> {
        let response = self.get(url, headers, &*cookies).await?;
        crate::session::capture_cookies(cookies, &response);
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::request(url, e))?;
        serde_json::from_str(&body).map_err(|e| FetchError::body(url, e.to_string()))
    }

    /// Streams a response body into `staging` and atomically renames it to
    /// `destination` on success, removing any stale destination file first.
    ///
    /// Returns the number of bytes written. The caller owns cleanup of the
    /// staging file on error.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on transport or file system failure.
    #[instrument(skip(self, headers, cookies, staging, destination), fields(url = %url))]
    pub async fn fetch_to_file(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        cookies: &BTreeMap<String, String>,
        staging: &Path,
        destination: &Path,
    ) -> Result<u64, FetchError> {
        let response = self.get(url, headers, cookies).await?;

        let mut file = File::create(staging)
            .await
            .map_err(|e| FetchError::io(staging, e))?;
        let mut bytes: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::request(url, e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::io(staging, e))?;
            bytes += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| FetchError::io(staging, e))?;
        drop(file);

        match tokio::fs::remove_file(destination).await {
            Ok(()) => debug!(path = %destination.display(), "removed stale cache file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(FetchError::io(destination, e)),
        }
        tokio::fs::rename(staging, destination)
            .await
            .map_err(|e| FetchError::io(destination, e))?;

        debug!(bytes, path = %destination.display(), "segment stored");
        Ok(bytes)
    }
}
