//! Pure playlist-protocol parser.
//!
//! Turns fetched playlist text into a typed [`Playlist`]. Tag handling:
//!
//! - `#EXTINF:<duration>,<title>` carries segment metadata and is followed
//!   unconditionally by a URL line.
//! - The fixed attribute-list tags (`EXT-X-MEDIA`, `EXT-X-STREAM-INF`,
//!   `EXT-X-I-FRAME-STREAM-INF`, `EXT-X-KEY`, `EXT-X-MAP`) are parsed as
//!   comma-separated `NAME=value` pairs; `EXT-X-STREAM-INF` is followed
//!   unconditionally by a URL line that becomes a variant-reference segment.
//! - Any other tag with a value is stored in the playlist tag mapping.
//! - Input without the `#EXTM3U` marker falls back to treating every
//!   non-blank, non-comment line as a bare segment URL.

use std::collections::BTreeMap;

use url::Url;

use super::{ParseError, Playlist, Segment, SegmentMeta};

/// First-line marker of a conformant playlist.
const PLAYLIST_MARKER: &str = "#EXTM3U";

/// Duration/title tag name.
const INFO_TAG: &str = "EXTINF";

/// Variant-stream reference tag name.
const STREAM_TAG: &str = "EXT-X-STREAM-INF";

/// The fixed set of tags carrying an attribute list.
const ATTRIBUTE_TAGS: [&str; 5] = [
    "EXT-X-MEDIA",
    STREAM_TAG,
    "EXT-X-I-FRAME-STREAM-INF",
    "EXT-X-KEY",
    "EXT-X-MAP",
];

/// Parses playlist text into a [`Playlist`].
///
/// Relative segment URLs are resolved against `base_url`. Pure function;
/// performs no I/O.
///
/// # Errors
///
/// Returns [`ParseError`] on malformed attribute syntax, invalid typed
/// attribute values, or unresolvable segment URLs.
pub fn parse(text: &str, base_url: &Url) -> Result<Playlist, ParseError> {
    let mut lines = text.lines();
    let Some(first) = lines.next() else {
        return Ok(Playlist::default());
    };

    if first.trim() != PLAYLIST_MARKER {
        return parse_lenient(text, base_url);
    }

    let mut playlist = Playlist::default();
    // Metadata from a tag that must be followed by a URL line.
    let mut pending: Option<SegmentMeta> = None;

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(meta) = pending.take() {
            push_segment(&mut playlist, line, base_url, meta)?;
            continue;
        }

        if let Some(tag) = line.strip_prefix('#') {
            if !tag.starts_with("EXT") {
                continue; // plain comment
            }
            let (name, params) = match tag.split_once(':') {
                Some((name, params)) => (name.trim(), params),
                None => (tag.trim(), ""),
            };

            if name == INFO_TAG {
                pending = Some(parse_info(params)?);
            } else if ATTRIBUTE_TAGS.contains(&name) {
                let attributes = parse_attribute_list(name, params)?;
                if name == STREAM_TAG {
                    pending = Some(meta_from_attributes(name, attributes)?);
                } else {
                    // Attribute tag without a following URL: keep the raw
                    // value at playlist level.
                    playlist.tags.insert(name.to_string(), params.to_string());
                }
            } else {
                playlist.tags.insert(name.to_string(), params.to_string());
            }
        } else {
            // Bare segment URL not announced by any tag.
            push_segment(&mut playlist, line, base_url, SegmentMeta::default())?;
        }
    }

    Ok(playlist)
}

/// Lenient fallback for input lacking the playlist marker: every non-blank,
/// non-comment line is a bare segment URL.
fn parse_lenient(text: &str, base_url: &Url) -> Result<Playlist, ParseError> {
    let mut playlist = Playlist::default();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        push_segment(&mut playlist, line, base_url, SegmentMeta::default())?;
    }
    Ok(playlist)
}

/// Resolves a URL line against the base and appends a segment carrying `meta`.
fn push_segment(
    playlist: &mut Playlist,
    line: &str,
    base_url: &Url,
    meta: SegmentMeta,
) -> Result<(), ParseError> {
    let url = base_url
        .join(line)
        .map_err(|_| ParseError::segment_url(line, base_url.as_str()))?;
    let index = playlist.segments.len();
    playlist.segments.push(Segment {
        url: url.into(),
        index,
        meta,
    });
    Ok(())
}

/// Parses the `duration,title` form of the duration/title tag.
fn parse_info(params: &str) -> Result<SegmentMeta, ParseError> {
    let (duration, title) = match params.split_once(',') {
        Some((duration, title)) => (duration, Some(title)),
        None => (params, None),
    };
    let duration: f64 = duration
        .trim()
        .parse()
        .map_err(|_| ParseError::duration(INFO_TAG, duration.trim()))?;
    Ok(SegmentMeta {
        duration: Some(duration),
        title: title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
        ..SegmentMeta::default()
    })
}

/// Parses a comma-separated `NAME=value` attribute list.
///
/// Values are either double-quoted strings or bare tokens running up to the
/// next comma or whitespace.
fn parse_attribute_list(tag: &str, params: &str) -> Result<Vec<(String, String)>, ParseError> {
    let mut attributes = Vec::new();
    let mut chars = params.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c == ',' || c.is_whitespace() {
            chars.next();
            continue;
        }

        // Attribute name, up to '='.
        let mut name_end = start;
        let mut found_eq = false;
        for (i, c) in chars.by_ref() {
            if c == '=' {
                name_end = i;
                found_eq = true;
                break;
            }
        }
        if !found_eq {
            return Err(ParseError::attribute(
                tag,
                format!("expected NAME=value near {:?}", &params[start..]),
            ));
        }
        let name = params[start..name_end].trim().to_string();
        if name.is_empty() {
            return Err(ParseError::attribute(tag, "empty attribute name"));
        }

        // Attribute value: quoted or bare.
        let value = match chars.peek() {
            Some(&(quote_start, '"')) => {
                chars.next();
                let mut end = None;
                for (i, c) in chars.by_ref() {
                    if c == '"' {
                        end = Some(i);
                        break;
                    }
                }
                let Some(end) = end else {
                    return Err(ParseError::attribute(
                        tag,
                        format!("unterminated quoted value for {name}"),
                    ));
                };
                params[quote_start + 1..end].to_string()
            }
            _ => {
                let value_start = name_end + 1;
                let mut value_end = params.len();
                while let Some(&(i, c)) = chars.peek() {
                    if c == ',' || c.is_whitespace() {
                        value_end = i;
                        break;
                    }
                    chars.next();
                }
                if chars.peek().is_none() {
                    value_end = params.len();
                }
                params[value_start..value_end].to_string()
            }
        };

        attributes.push((name, value));
    }

    Ok(attributes)
}

/// Builds segment metadata from a variant-stream attribute list, applying
/// typed conversions for known attributes and keeping the rest verbatim.
fn meta_from_attributes(
    tag: &str,
    attributes: Vec<(String, String)>,
) -> Result<SegmentMeta, ParseError> {
    let mut meta = SegmentMeta {
        is_variant: true,
        ..SegmentMeta::default()
    };
    let mut extra = BTreeMap::new();

    for (name, value) in attributes {
        match name.as_str() {
            "BANDWIDTH" => {
                let bandwidth: u64 = value
                    .parse()
                    .map_err(|_| ParseError::attribute_value(tag, "BANDWIDTH", &value))?;
                meta.bandwidth = Some(bandwidth);
            }
            "CODECS" => {
                meta.codecs = Some(
                    value
                        .split(',')
                        .map(|c| c.trim().to_string())
                        .filter(|c| !c.is_empty())
                        .collect(),
                );
            }
            "RESOLUTION" => {
                meta.resolution = Some(parse_resolution(tag, &value)?);
            }
            "CLOSED-CAPTIONS" => {
                if value != "NONE" {
                    meta.closed_captions = Some(value);
                }
            }
            _ => {
                extra.insert(name, value);
            }
        }
    }

    meta.extra = extra;
    Ok(meta)
}

/// Parses a `WxH` resolution value.
fn parse_resolution(tag: &str, value: &str) -> Result<(u32, u32), ParseError> {
    let parsed = value
        .split_once(['x', 'X'])
        .and_then(|(w, h)| Some((w.parse::<u32>().ok()?, h.parse::<u32>().ok()?)));
    parsed.ok_or_else(|| ParseError::attribute_value(tag, "RESOLUTION", value))
}
