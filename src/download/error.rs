//! Error types for the transport layer.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while fetching over HTTP or writing a fetched body
/// to disk.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS resolution, connection refused, TLS, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error while writing the body.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The response body was not the expected shape (e.g. a token endpoint
    /// returning something other than JSON).
    #[error("unexpected response body from {url}: {detail}")]
    Body {
        /// The URL whose body was unusable.
        url: String,
        /// What was wrong with it.
        detail: String,
    },
}

impl FetchError {
    /// Creates a network error from a reqwest error, mapping timeouts to
    /// their own variant.
    pub fn request(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network { url, source }
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an unexpected-body error.
    pub fn body(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Body {
            url: url.into(),
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_display() {
        let error = FetchError::http_status("https://example.com/seg.ts", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "missing status in: {msg}");
        assert!(msg.contains("seg.ts"), "missing URL in: {msg}");
    }

    #[test]
    fn test_io_display_includes_path() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let error = FetchError::io("/tmp/0.seg.part", io);
        assert!(error.to_string().contains("0.seg.part"));
    }

    #[test]
    fn test_invalid_url_display() {
        let error = FetchError::invalid_url("not a url");
        assert!(error.to_string().contains("not a url"));
    }
}
