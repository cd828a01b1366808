//! Error types for source resolution.

use thiserror::Error;

use crate::download::FetchError;
use crate::playlist::ParseError;

/// Errors that can occur while reducing a starting URL to a media playlist.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// An HTTP round trip failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The fetched document could not be parsed as a playlist.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The source never resolved to a playlist (still HTML after every
    /// resolution step).
    #[error("{url} did not resolve to a playlist")]
    NotAPlaylist {
        /// The URL that still served HTML.
        url: String,
    },

    /// A known host was matched but the URL's path shape is not supported.
    #[error("unsupported {host} URL: {url}")]
    UnsupportedUrl {
        /// The matched host.
        host: String,
        /// The full URL.
        url: String,
    },

    /// A host token exchange returned an unusable response.
    #[error("token exchange with {host} failed: {detail}")]
    TokenExchange {
        /// The host whose endpoint misbehaved.
        host: String,
        /// What was wrong with the response.
        detail: String,
    },

    /// A URL produced during resolution is malformed.
    #[error("invalid URL produced during resolution: {url}")]
    InvalidUrl {
        /// The malformed URL string.
        url: String,
    },

    /// The user backed out of variant selection.
    #[error("resolution cancelled")]
    Cancelled,
}

impl ResolveError {
    /// Creates an unsupported-URL error.
    pub fn unsupported(host: impl Into<String>, url: impl Into<String>) -> Self {
        Self::UnsupportedUrl {
            host: host.into(),
            url: url.into(),
        }
    }

    /// Creates a token-exchange error.
    pub fn token_exchange(host: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::TokenExchange {
            host: host.into(),
            detail: detail.into(),
        }
    }

    /// Creates an invalid-URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }
}
