//! Resolver for broadcast replay pages (`pscp.tv`-style `/w/<id>` URLs).
//!
//! The page itself is HTML; the replay manifest URL comes from a public
//! access endpoint keyed by the broadcast identifier.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use super::{Resolution, ResolveError, SourceResolver};
use crate::download::HttpClient;

const DEFAULT_API_BASE: &str = "https://api.pscp.tv";

const HOSTS: [&str; 4] = ["pscp.tv", "www.pscp.tv", "periscope.tv", "www.periscope.tv"];

/// Resolver for broadcast replay pages.
#[derive(Debug)]
pub struct BroadcastResolver {
    api_base: String,
}

impl Default for BroadcastResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastResolver {
    /// Creates a resolver against the production access endpoint.
    #[must_use]
    pub fn new() -> Self {
        Self::with_api_base(DEFAULT_API_BASE)
    }

    /// Creates a resolver with a custom endpoint for tests.
    #[must_use]
    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
        }
    }

    fn broadcast_id(url: &Url) -> Option<&str> {
        let mut segments = url.path_segments()?;
        match (segments.next(), segments.next(), segments.next()) {
            (Some("w"), Some(id), None) if !id.is_empty() => Some(id),
            _ => None,
        }
    }
}

#[async_trait]
impl SourceResolver for BroadcastResolver {
    fn name(&self) -> &'static str {
        "broadcast"
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
        let Some(id) = Self::broadcast_id(url) else {
            return Err(ResolveError::unsupported(host, url.as_str()));
        };

        let mut endpoint = Url::parse(&format!("{}/api/v2/accessVideoPublic", self.api_base))
            .map_err(|_| ResolveError::invalid_url(&self.api_base))?;
        endpoint.query_pairs_mut().append_pair("broadcast_id", id);

        debug!(broadcast = id, "requesting replay access");
        let access = client.get_json(endpoint.as_str(), headers, cookies).await?;
        let replay_url = access
            .get("replay_url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ResolveError::token_exchange(&host, "missing replay_url field"))?;

        Ok(Resolution {
            playlist_url: replay_url.to_string(),
            livestream: false,
        })
    }
}
