//! Source resolution: reducing a starting URL to a concrete media playlist.
//!
//! The pipeline follows at most one HTML meta-refresh hop, hands known hosts
//! to their [`SourceResolver`] for a token exchange, rejects sources that
//! stay HTML, and walks master playlists down to a single media playlist
//! (asking the UI to pick a variant when there is more than one).
//!
//! Host resolvers are tried in registration order; the first whose
//! [`matches`](SourceResolver::matches) accepts the URL wins.

mod broadcast;
mod channel;
mod error;

pub use broadcast::BroadcastResolver;
pub use channel::ChannelResolver;
pub use error::ResolveError;

use std::collections::BTreeMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::download::HttpClient;
use crate::playlist::{self, Playlist};
use crate::ui::Ui;

/// Extracts the `url=` parameter of an HTML meta-refresh tag.
static META_REFRESH_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?is)<meta[^>]+http-equiv\s*=\s*["']?refresh["']?[^>]*content\s*=\s*["'][^"']*url\s*=\s*([^"'\s>]+)"#,
    )
});

/// Compiles a pattern known to be valid at build time.
#[allow(clippy::expect_used)]
fn compile_static_regex(pattern: &'static str) -> Regex {
    Regex::new(pattern).expect("static regex must compile")
}

/// What a host resolver produces: a playlist URL ready to fetch plus
/// whether the source is a still-running broadcast.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The manifest URL to fetch next.
    pub playlist_url: String,
    /// True when the source is live.
    pub livestream: bool,
}

/// A site-specific token exchange turning a page URL into a manifest URL.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    /// Stable name for logging.
    fn name(&self) -> &'static str;

    /// Whether this resolver handles the given URL's host.
    fn matches(&self, url: &Url) -> bool;

    /// Performs the host's token exchange.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::UnsupportedUrl`] for path shapes the host
    /// resolver does not recognize, or a fetch/token error otherwise.
    async fn resolve(
        &self,
        url: &Url,
        client: &HttpClient,
        headers: &BTreeMap<String, String>,
        cookies: &mut BTreeMap<String, String>,
    ) -> Result<Resolution, ResolveError>;
}

/// Ordered collection of host resolvers.
#[derive(Default)]
pub struct ResolverRegistry {
    resolvers: Vec<Box<dyn SourceResolver>>,
}

impl ResolverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a resolver; earlier registrations take priority.
    pub fn register(&mut self, resolver: Box<dyn SourceResolver>) {
        self.resolvers.push(resolver);
    }

    /// Finds the first resolver that matches the URL.
    #[must_use]
    pub fn find(&self, url: &Url) -> Option<&dyn SourceResolver> {
        self.resolvers
            .iter()
            .find(|r| r.matches(url))
            .map(|r| &**r)
    }
}

/// Builds the registry of known hosts in priority order.
#[must_use]
pub fn build_default_registry() -> ResolverRegistry {
    let mut registry = ResolverRegistry::new();
    registry.register(Box::new(BroadcastResolver::new()));
    registry.register(Box::new(ChannelResolver::new()));
    registry
}

/// The fully resolved source: a media playlist ready for downloading.
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    /// URL of the media playlist.
    pub playlist_url: String,
    /// The parsed media playlist.
    pub playlist: Playlist,
    /// True when the source is a still-running broadcast.
    pub livestream: bool,
}

/// Extracts the target of a meta-refresh tag, resolved against `base`.
fn meta_refresh_target(html: &str, base: &Url) -> Option<String> {
    let capture = META_REFRESH_RE.captures(html)?;
    let raw = capture.get(1)?.as_str();
    match base.join(raw) {
        Ok(joined) => Some(joined.to_string()),
        Err(_) => {
            warn!(target = raw, "unparseable meta-refresh target");
            None
        }
    }
}

/// Runs the full resolution pipeline.
///
/// `livestream_hint` marks the session live even when no host resolver says
/// so (the user can assert it for plain playlist URLs).
///
/// # Errors
///
/// Returns [`ResolveError`] when the source cannot be reduced to a media
/// playlist; [`ResolveError::Cancelled`] when the user backs out of variant
/// selection.
#[instrument(skip_all, fields(url = %start_url))]
pub async fn resolve_source(
    start_url: &str,
    registry: &ResolverRegistry,
    client: &HttpClient,
    headers: &BTreeMap<String, String>,
    cookies: &mut BTreeMap<String, String>,
    ui: &dyn Ui,
    livestream_hint: bool,
) -> Result<ResolvedSource, ResolveError> {
    let mut current = start_url.to_string();
    let mut livestream = livestream_hint;
    let mut response = client.get_text(&current, headers, cookies).await?;

    // One meta-refresh hop at most.
    if response.is_html() {
        let base =
            Url::parse(&response.final_url).map_err(|_| ResolveError::invalid_url(&response.final_url))?;
        if let Some(target) = meta_refresh_target(&response.body, &base) {
            debug!(target = %target, "following meta refresh");
            current = target;
            response = client.get_text(&current, headers, cookies).await?;
        }
    }

    // Known hosts get their token exchange.
    let landed =
        Url::parse(&response.final_url).map_err(|_| ResolveError::invalid_url(&response.final_url))?;
    if let Some(resolver) = registry.find(&landed) {
        info!(resolver = resolver.name(), "running host token exchange");
        let resolution = resolver.resolve(&landed, client, headers, cookies).await?;
        livestream = livestream || resolution.livestream;
        current = resolution.playlist_url;
        response = client.get_text(&current, headers, cookies).await?;
    }

    if response.is_html() {
        return Err(ResolveError::NotAPlaylist {
            url: response.final_url,
        });
    }

    let base =
        Url::parse(&response.final_url).map_err(|_| ResolveError::invalid_url(&response.final_url))?;
    let mut resolved = playlist::parse(&response.body, &base)?;

    if resolved.is_master() {
        let chosen = select_variant(&resolved, ui)?;
        debug!(variant = %chosen, "selected variant");
        let variant_response = client.get_text(&chosen, headers, cookies).await?;
        let variant_base = Url::parse(&variant_response.final_url)
            .map_err(|_| ResolveError::invalid_url(&variant_response.final_url))?;
        resolved = playlist::parse(&variant_response.body, &variant_base)?;
        current = chosen;
    }

    info!(segments = resolved.segments.len(), livestream, "source resolved");
    Ok(ResolvedSource {
        playlist_url: current,
        playlist: resolved,
        livestream,
    })
}

/// Picks a variant URL from a master playlist.
///
/// Variants are sorted by resolution ascending; a lone variant is selected
/// automatically, otherwise the UI chooses with the highest resolution as
/// the default.
fn select_variant(master: &Playlist, ui: &dyn Ui) -> Result<String, ResolveError> {
    let mut variants: Vec<_> = master
        .segments
        .iter()
        .filter(|s| s.meta.is_variant)
        .collect();
    variants.sort_by_key(|s| s.variant_sort_key());

    if let [only] = variants.as_slice() {
        return Ok(only.url.clone());
    }

    let labels: Vec<String> = variants.iter().map(|s| s.variant_label()).collect();
    let default = labels.len().saturating_sub(1);
    let choice = ui
        .choose("Select stream quality:", &labels, default)
        .ok_or(ResolveError::Cancelled)?;
    variants
        .get(choice)
        .map(|s| s.url.clone())
        .ok_or(ResolveError::Cancelled)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::playlist::Segment;
    use crate::ui::SilentUi;

    fn base() -> Url {
        Url::parse("https://example.com/page").unwrap()
    }

    #[test]
    fn test_meta_refresh_extraction() {
        let html = r#"<html><head>
            <meta http-equiv="refresh" content="0; url=https://example.com/stream.m3u8">
        </head></html>"#;
        assert_eq!(
            meta_refresh_target(html, &base()).as_deref(),
            Some("https://example.com/stream.m3u8")
        );
    }

    #[test]
    fn test_meta_refresh_relative_target_joined_against_base() {
        let html = r#"<meta http-equiv=refresh content="5; url=/moved.m3u8">"#;
        assert_eq!(
            meta_refresh_target(html, &base()).as_deref(),
            Some("https://example.com/moved.m3u8")
        );
    }

    #[test]
    fn test_meta_refresh_absent() {
        assert!(meta_refresh_target("<html><body>hi</body></html>", &base()).is_none());
    }

    fn variant(url: &str, index: usize, resolution: Option<(u32, u32)>) -> Segment {
        let mut segment = Segment::new(url, index);
        segment.meta.is_variant = true;
        segment.meta.resolution = resolution;
        segment
    }

    #[test]
    fn test_select_variant_single_is_automatic() {
        let master = Playlist {
            segments: vec![variant("https://example.com/only.m3u8", 0, None)],
            ..Playlist::default()
        };
        assert_eq!(
            select_variant(&master, &SilentUi).unwrap(),
            "https://example.com/only.m3u8"
        );
    }

    #[test]
    fn test_select_variant_defaults_to_highest_resolution() {
        // SilentUi takes the default choice, which must be the highest
        // resolution even when the playlist lists it first.
        let master = Playlist {
            segments: vec![
                variant("https://example.com/1080.m3u8", 0, Some((1920, 1080))),
                variant("https://example.com/480.m3u8", 1, Some((854, 480))),
                variant("https://example.com/720.m3u8", 2, Some((1280, 720))),
            ],
            ..Playlist::default()
        };
        assert_eq!(
            select_variant(&master, &SilentUi).unwrap(),
            "https://example.com/1080.m3u8"
        );
    }

    #[test]
    fn test_registry_priority_order() {
        let registry = build_default_registry();
        let url = Url::parse("https://www.pscp.tv/w/abc123").unwrap();
        assert_eq!(registry.find(&url).map(|r| r.name()), Some("broadcast"));
        let url = Url::parse("https://www.twitch.tv/videos/999").unwrap();
        assert_eq!(registry.find(&url).map(|r| r.name()), Some("channel"));
        let url = Url::parse("https://example.com/stream.m3u8").unwrap();
        assert!(registry.find(&url).is_none());
    }
}
