//! Resolver for channel and archived-broadcast pages (`twitch.tv`-style).
//!
//! Two path shapes are supported: `/videos/<id>` is an archived broadcast
//! (VOD access token, signed VOD manifest), and a bare `/<channel>` is a
//! live channel (channel access token, signed live manifest, marks the
//! session as a livestream).

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{Resolution, ResolveError, SourceResolver};
use crate::download::HttpClient;

const DEFAULT_API_BASE: &str = "https://api.twitch.tv";
const DEFAULT_USHER_BASE: &str = "https://usher.ttvnw.net";

const HOSTS: [&str; 3] = ["twitch.tv", "www.twitch.tv", "m.twitch.tv"];

/// The shape of the page under a channel host.
#[derive(Debug, PartialEq, Eq)]
enum PageKind<'a> {
    /// `/videos/<id>`: an archived broadcast.
    Archive(&'a str),
    /// `/<channel>`: a live channel page.
    Live(&'a str),
}

/// Resolver for live channel and archived broadcast pages.
#[derive(Debug)]
pub struct ChannelResolver {
    api_base: String,
    usher_base: String,
}

impl Default for ChannelResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelResolver {
    /// Creates a resolver against the production endpoints.
    #[must_use]
    pub fn new() -> Self {
        Self::with_bases(DEFAULT_API_BASE, DEFAULT_USHER_BASE)
    }

    /// Creates a resolver with custom endpoints for tests.
    #[must_use]
    pub fn with_bases(api_base: impl Into<String>, usher_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            usher_base: usher_base.into(),
        }
    }

    fn page_kind(url: &Url) -> Option<PageKind<'_>> {
        let mut segments = url.path_segments()?;
        match (segments.next(), segments.next(), segments.next()) {
            (Some("videos"), Some(id), None) if !id.is_empty() => Some(PageKind::Archive(id)),
            (Some(channel), None, None) if !channel.is_empty() => Some(PageKind::Live(channel)),
            _ => None,
        }
    }

    /// Pulls `token` and `sig` out of an access-token response.
    fn token_pair(host: &str, access: &Value) -> Result<(String, String), ResolveError> {
        let token = access
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| ResolveError::token_exchange(host, "missing token field"))?;
        let sig = access
            .get("sig")
            .and_then(Value::as_str)
            .ok_or_else(|| ResolveError::token_exchange(host, "missing sig field"))?;
        Ok((token.to_string(), sig.to_string()))
    }

    fn signed_manifest_url(
        &self,
        path: &str,
        token: &str,
        sig: &str,
    ) -> Result<String, ResolveError> {
        let raw = format!("{}{path}", self.usher_base);
        let mut manifest = Url::parse(&raw).map_err(|_| ResolveError::invalid_url(&raw))?;
        manifest
            .query_pairs_mut()
            .append_pair("nauth", token)
            .append_pair("nauthsig", sig)
            .append_pair("allow_source", "true");
        Ok(manifest.to_string())
    }
}

#[async_trait]
impl SourceResolver for ChannelResolver {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn matches(&self, url: &Url) -> bool {
        url.host_str().is_some_and(|host| HOSTS.contains(&host))
    }

    async fn resolve(
        &self,
        url: &Url,
        client: &HttpClient,
        headers: &BTreeMap<String, String>,
        cookies: &mut BTreeMap<String, String>,
    ) -> Result<Resolution, ResolveError> {
        let host = url.host_str().unwrap_or_default().to_string();
        let Some(kind) = Self::page_kind(url) else {
            return Err(ResolveError::unsupported(host, url.as_str()));
        };

        match kind {
            PageKind::Archive(id) => {
                debug!(vod = id, "requesting VOD access token");
                let endpoint = format!("{}/api/vods/{id}/access_token", self.api_base);
                let access = client.get_json(&endpoint, headers, cookies).await?;
                let (token, sig) = Self::token_pair(&host, &access)?;
                Ok(Resolution {
                    playlist_url: self.signed_manifest_url(
                        &format!("/vod/{id}.m3u8"),
                        &token,
                        &sig,
                    )?,
                    livestream: false,
                })
            }
            PageKind::Live(channel) => {
                debug!(channel, "requesting channel access token");
                let endpoint = format!("{}/api/channels/{channel}/access_token", self.api_base);
                let access = client.get_json(&endpoint, headers, cookies).await?;
                let (token, sig) = Self::token_pair(&host, &access)?;
                Ok(Resolution {
                    playlist_url: self.signed_manifest_url(
                        &format!("/api/channel/hls/{channel}.m3u8"),
                        &token,
                        &sig,
                    )?,
                    livestream: true,
                })
            }
        }
    }
}
