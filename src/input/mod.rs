//! Request input parsing: bare URLs and pasted `curl` command lines.
//!
//! Browser dev tools offer "copy as cURL" on network requests; accepting
//! that form lets a user hand over the playlist URL together with the
//! request headers the site expects. Conditional-request headers are
//! stripped so a cached playlist response cannot turn into a 304.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

/// Header names that would make the server answer 304 instead of a body.
const CONDITIONAL_HEADERS: [&str; 2] = ["if-none-match", "if-modified-since"];

/// Errors produced while parsing request input.
#[derive(Debug, Error)]
pub enum InputError {
    /// A `curl` flag this parser does not understand.
    #[error("cannot parse cURL command line because of unknown argument: {argument}")]
    UnknownArgument {
        /// The offending argument.
        argument: String,
    },

    /// The command line contained more than one URL.
    #[error("cannot parse cURL command line because it contains more than one URL: {first} and {second}")]
    MultipleUrls {
        /// The first URL seen.
        first: String,
        /// The second URL seen.
        second: String,
    },

    /// The command line contained no URL at all.
    #[error("cURL command line contains no URL")]
    MissingUrl,

    /// A quoted token was never closed.
    #[error("unterminated quote in cURL command line")]
    UnterminatedQuote,

    /// A `-H` flag without a following header value.
    #[error("cURL -H flag is missing its header value")]
    MissingHeaderValue,
}

/// A request target plus the headers to send with every fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInput {
    /// The playlist URL.
    pub url: String,
    /// Request headers with lower-cased names.
    pub headers: BTreeMap<String, String>,
}

/// Parses either a bare URL or a full `curl` command line.
///
/// For the `curl` form: `-H "Name: value"` headers are collected with
/// lower-cased names, `if-none-match`/`if-modified-since` are dropped,
/// `--compressed` is ignored, any other flag is an error, and exactly one
/// URL must be present.
///
/// # Errors
///
/// Returns [`InputError`] on unknown flags, zero or multiple URLs, or
/// malformed quoting.
pub fn parse_request(text: &str) -> Result<RequestInput, InputError> {
    let text = text.trim();
    if !text.starts_with("curl ") {
        return Ok(RequestInput {
            url: text.to_string(),
            headers: BTreeMap::new(),
        });
    }

    let tokens = split_shell_words(text)?;
    let mut headers = BTreeMap::new();
    let mut url: Option<String> = None;

    let mut iter = tokens.into_iter().skip(1); // skip the "curl" word
    while let Some(token) = iter.next() {
        if token == "-H" {
            let value = iter.next().ok_or(InputError::MissingHeaderValue)?;
            let (name, value) = match value.split_once(':') {
                Some((name, value)) => (name.trim().to_lowercase(), value.trim().to_string()),
                None => (value.trim().to_lowercase(), String::new()),
            };
            if CONDITIONAL_HEADERS.contains(&name.as_str()) {
                debug!(header = %name, "dropping conditional request header");
                continue;
            }
            headers.insert(name, value);
        } else if token == "--compressed" {
            // The HTTP client negotiates compression itself.
        } else if token.starts_with('-') {
            return Err(InputError::UnknownArgument { argument: token });
        } else if let Some(first) = &url {
            return Err(InputError::MultipleUrls {
                first: first.clone(),
                second: token,
            });
        } else {
            url = Some(token);
        }
    }

    let url = url.ok_or(InputError::MissingUrl)?;
    Ok(RequestInput { url, headers })
}

/// Minimal shell-style word splitting: whitespace-separated tokens with
/// single-quoted literals and double-quoted strings supporting backslash
/// escapes.
fn split_shell_words(text: &str) -> Result<Vec<String>, InputError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '\'' {
                        closed = true;
                        break;
                    }
                    current.push(c);
                }
                if !closed {
                    return Err(InputError::UnterminatedQuote);
                }
            }
            '"' => {
                in_word = true;
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => {
                            let escaped = chars.next().ok_or(InputError::UnterminatedQuote)?;
                            current.push(escaped);
                        }
                        c => current.push(c),
                    }
                }
                if !closed {
                    return Err(InputError::UnterminatedQuote);
                }
            }
            '\\' => {
                in_word = true;
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }

    Ok(words)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_url_passthrough() {
        let input = parse_request("https://example.com/playlist.m3u8").unwrap();
        assert_eq!(input.url, "https://example.com/playlist.m3u8");
        assert!(input.headers.is_empty());
    }

    #[test]
    fn test_curl_with_headers_lowercases_names() {
        let input = parse_request(
            "curl 'https://example.com/playlist.m3u8' -H 'User-Agent: test' -H 'Referer: https://example.com/'",
        )
        .unwrap();
        assert_eq!(input.url, "https://example.com/playlist.m3u8");
        assert_eq!(input.headers.get("user-agent").map(String::as_str), Some("test"));
        assert_eq!(
            input.headers.get("referer").map(String::as_str),
            Some("https://example.com/")
        );
    }

    #[test]
    fn test_curl_drops_conditional_headers() {
        let input = parse_request(
            "curl 'https://example.com/p.m3u8' -H 'If-None-Match: \"abc\"' -H 'If-Modified-Since: yesterday' -H 'Accept: */*'",
        )
        .unwrap();
        assert!(!input.headers.contains_key("if-none-match"));
        assert!(!input.headers.contains_key("if-modified-since"));
        assert!(input.headers.contains_key("accept"));
    }

    #[test]
    fn test_curl_ignores_compressed_flag() {
        let input = parse_request("curl --compressed 'https://example.com/p.m3u8'").unwrap();
        assert_eq!(input.url, "https://example.com/p.m3u8");
    }

    #[test]
    fn test_curl_unknown_flag_is_error() {
        let error = parse_request("curl -X POST 'https://example.com/p.m3u8'").unwrap_err();
        assert!(matches!(error, InputError::UnknownArgument { .. }), "{error}");
    }

    #[test]
    fn test_curl_multiple_urls_is_error() {
        let error =
            parse_request("curl 'https://example.com/a' 'https://example.com/b'").unwrap_err();
        assert!(matches!(error, InputError::MultipleUrls { .. }), "{error}");
    }

    #[test]
    fn test_curl_missing_url_is_error() {
        let error = parse_request("curl -H 'Accept: */*'").unwrap_err();
        assert!(matches!(error, InputError::MissingUrl), "{error}");
    }

    #[test]
    fn test_curl_unterminated_quote_is_error() {
        let error = parse_request("curl 'https://example.com/a").unwrap_err();
        assert!(matches!(error, InputError::UnterminatedQuote), "{error}");
    }

    #[test]
    fn test_double_quoted_escapes() {
        let input =
            parse_request("curl \"https://example.com/p.m3u8\" -H \"X-Token: a\\\"b\"").unwrap();
        assert_eq!(input.headers.get("x-token").map(String::as_str), Some("a\"b"));
    }
}
