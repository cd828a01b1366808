//! Playlist data model and the playlist-protocol parser.
//!
//! A [`Playlist`] is an ordered list of [`Segment`]s plus playlist-level
//! tags. The same structure represents both media playlists (segments are
//! downloadable chunks) and master playlists (every segment references a
//! variant stream, marked by [`SegmentMeta::is_variant`]) - the distinction
//! is structural, not a separate type.
//!
//! Parsing is pure: [`parse`] takes the fetched text and a base URL and
//! never performs I/O.

mod error;
mod parser;

pub use error::ParseError;
pub use parser::parse;

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// Default sort resolution for variants that do not advertise one.
///
/// Chosen so that unlabeled variants compare below any real HD entry.
const DEFAULT_VARIANT_RESOLUTION: (u32, u32) = (640, 480);

/// Parsed metadata attached to a segment.
///
/// Known attribute-list attributes get typed fields; anything the parser
/// does not recognize is kept verbatim in [`extra`](Self::extra).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentMeta {
    /// Segment duration in seconds, from the duration/title tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    /// Segment title, from the duration/title tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Advertised bandwidth in bits per second (variant streams).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<u64>,

    /// Codec list split from the quoted attribute value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codecs: Option<Vec<String>>,

    /// Pixel resolution as `(width, height)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<(u32, u32)>,

    /// Closed-captions group; `None` when the playlist said literal `NONE`
    /// or did not mention captions at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_captions: Option<String>,

    /// True when this entry references another playlist (variant stream)
    /// rather than a downloadable media chunk.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_variant: bool,

    /// Unrecognized attributes, kept verbatim.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// One fetchable unit of the media timeline.
///
/// Segments are immutable once created. The `index` is a stable ordinal
/// assigned at discovery; it is never reused or reassigned, and because
/// segments are only ever appended it always equals the segment's position
/// in the playlist. It is therefore not persisted - [`Playlist::renumber`]
/// restores it after deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Absolute URL of the segment.
    pub url: String,

    /// Stable ordinal assigned at discovery.
    #[serde(skip)]
    pub index: usize,

    /// Parsed tag metadata.
    #[serde(rename = "meta", default)]
    pub meta: SegmentMeta,
}

impl Segment {
    /// Creates a segment with empty metadata.
    #[must_use]
    pub fn new(url: impl Into<String>, index: usize) -> Self {
        Self {
            url: url.into(),
            index,
            meta: SegmentMeta::default(),
        }
    }

    /// Sort key for variant selection: `(height, width)` ascending, so the
    /// highest resolution sorts last. Variants without a resolution sort as
    /// if they were 640x480.
    #[must_use]
    pub fn variant_sort_key(&self) -> (u32, u32) {
        let (width, height) = self.meta.resolution.unwrap_or(DEFAULT_VARIANT_RESOLUTION);
        (height, width)
    }

    /// Human-readable label for variant selection menus.
    ///
    /// `"WxH, codec1,codec2"` when metadata is available, otherwise the raw
    /// URL.
    #[must_use]
    pub fn variant_label(&self) -> String {
        let mut parts = Vec::new();
        if let Some((width, height)) = self.meta.resolution {
            parts.push(format!("{width}x{height}"));
        }
        if let Some(codecs) = &self.meta.codecs {
            parts.push(codecs.join(","));
        }
        if parts.is_empty() {
            self.url.clone()
        } else {
            parts.join(", ")
        }
    }
}

/// An ordered sequence of segments plus playlist-level tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    /// Playlist-level tags (e.g. target duration), values kept verbatim.
    #[serde(rename = "meta", default)]
    pub tags: BTreeMap<String, String>,

    /// Segments in playback order.
    #[serde(rename = "tracks", default)]
    pub segments: Vec<Segment>,
}

impl Playlist {
    /// Returns true when any entry references a variant stream, i.e. this is
    /// a master playlist rather than a media playlist.
    #[must_use]
    pub fn is_master(&self) -> bool {
        self.segments.iter().any(|s| s.meta.is_variant)
    }

    /// Target segment duration in seconds, when the playlist declares one.
    #[must_use]
    pub fn target_duration(&self) -> Option<f64> {
        self.tags
            .get("EXT-X-TARGETDURATION")
            .and_then(|v| v.trim().parse().ok())
    }

    /// Reassigns segment indices to their positions.
    ///
    /// Indices equal positions by construction; this restores them after
    /// deserialization, where the `index` field is skipped.
    pub fn renumber(&mut self) {
        for (index, segment) in self.segments.iter_mut().enumerate() {
            segment.index = index;
        }
    }

    /// Appends segments newly discovered by a live re-fetch.
    ///
    /// Finds the first segment of `fresh` whose URL is not already known and
    /// appends it and everything after it, assigning new sequential indices
    /// continuing from the current maximum. Returns the appended segments;
    /// an empty result means the re-fetch discovered nothing new (the
    /// broadcast may have ended).
    pub fn extend_from_refresh(&mut self, fresh: &Playlist) -> Vec<Segment> {
        let first_new = {
            let known: HashSet<&str> = self.segments.iter().map(|s| s.url.as_str()).collect();
            fresh
                .segments
                .iter()
                .position(|s| !known.contains(s.url.as_str()))
        };
        let Some(first_new) = first_new else {
            return Vec::new();
        };

        let mut appended = Vec::new();
        let mut index = self.segments.len();
        for segment in &fresh.segments[first_new..] {
            let segment = Segment {
                url: segment.url.clone(),
                index,
                meta: segment.meta.clone(),
            };
            index += 1;
            appended.push(segment.clone());
            self.segments.push(segment);
        }
        appended
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn variant(url: &str, index: usize, resolution: Option<(u32, u32)>) -> Segment {
        let mut segment = Segment::new(url, index);
        segment.meta.is_variant = true;
        segment.meta.resolution = resolution;
        segment
    }

    #[test]
    fn test_variant_sort_key_is_height_then_width() {
        let hd = variant("https://example.com/hd.m3u8", 0, Some((1920, 1080)));
        assert_eq!(hd.variant_sort_key(), (1080, 1920));
    }

    #[test]
    fn test_variant_without_resolution_sorts_below_any_real_hd() {
        let unknown = variant("https://example.com/a.m3u8", 0, None);
        let sd = variant("https://example.com/b.m3u8", 1, Some((640, 481)));
        let hd = variant("https://example.com/c.m3u8", 2, Some((1280, 720)));
        assert!(unknown.variant_sort_key() < sd.variant_sort_key());
        assert!(unknown.variant_sort_key() < hd.variant_sort_key());
    }

    #[test]
    fn test_variant_label_with_metadata() {
        let mut segment = variant("https://example.com/v.m3u8", 0, Some((1920, 1080)));
        segment.meta.codecs = Some(vec!["avc1".to_string(), "mp4a".to_string()]);
        assert_eq!(segment.variant_label(), "1920x1080, avc1,mp4a");
    }

    #[test]
    fn test_variant_label_without_metadata_is_raw_url() {
        let segment = variant("https://example.com/v.m3u8", 0, None);
        assert_eq!(segment.variant_label(), "https://example.com/v.m3u8");
    }

    #[test]
    fn test_is_master_detects_variant_reference() {
        let mut playlist = Playlist::default();
        assert!(!playlist.is_master());
        playlist.segments.push(variant("https://example.com/v.m3u8", 0, None));
        assert!(playlist.is_master());
    }

    #[test]
    fn test_extend_from_refresh_appends_unknown_suffix() {
        let mut playlist = Playlist {
            segments: vec![
                Segment::new("https://example.com/0.ts", 0),
                Segment::new("https://example.com/1.ts", 1),
            ],
            ..Playlist::default()
        };
        // Live playlists are sliding windows: the refresh drops segment 0
        // and introduces segments 2 and 3.
        let fresh = Playlist {
            segments: vec![
                Segment::new("https://example.com/1.ts", 0),
                Segment::new("https://example.com/2.ts", 1),
                Segment::new("https://example.com/3.ts", 2),
            ],
            ..Playlist::default()
        };

        let appended = playlist.extend_from_refresh(&fresh);

        assert_eq!(appended.len(), 2);
        assert_eq!(appended[0].url, "https://example.com/2.ts");
        assert_eq!(appended[0].index, 2);
        assert_eq!(appended[1].index, 3);
        assert_eq!(playlist.segments.len(), 4);
    }

    #[test]
    fn test_extend_from_refresh_with_nothing_new_returns_empty() {
        let mut playlist = Playlist {
            segments: vec![Segment::new("https://example.com/0.ts", 0)],
            ..Playlist::default()
        };
        let fresh = playlist.clone();
        assert!(playlist.extend_from_refresh(&fresh).is_empty());
        assert_eq!(playlist.segments.len(), 1);
    }

    #[test]
    fn test_renumber_restores_indices_after_deserialization() {
        let playlist = Playlist {
            segments: vec![
                Segment::new("https://example.com/0.ts", 0),
                Segment::new("https://example.com/1.ts", 1),
            ],
            ..Playlist::default()
        };
        let json = serde_json::to_string(&playlist).unwrap();
        let mut restored: Playlist = serde_json::from_str(&json).unwrap();
        restored.renumber();
        assert_eq!(restored, playlist);
    }

    #[test]
    fn test_target_duration_parses_tag() {
        let mut playlist = Playlist::default();
        playlist
            .tags
            .insert("EXT-X-TARGETDURATION".to_string(), "6".to_string());
        assert_eq!(playlist.target_duration(), Some(6.0));
    }
}
