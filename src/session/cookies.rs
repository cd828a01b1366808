//! Cookie accumulation that survives the checkpoint round trip.
//!
//! A plain name -> value map instead of a cookie jar: the jar cannot be
//! iterated for persistence, and the streaming hosts involved only hand out
//! short-lived session tokens where domain/path scoping does not matter.

use std::collections::BTreeMap;

use reqwest::Response;
use reqwest::header::SET_COOKIE;
use tracing::debug;

/// Captures `Set-Cookie` headers from a response into the cookie map.
///
/// Only the leading `name=value` pair is kept; attributes (path, expiry,
/// flags) are dropped.
pub fn capture_cookies(cookies: &mut BTreeMap<String, String>, response: &Response) {
    for value in response.headers().get_all(SET_COOKIE) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        let pair = value.split(';').next().unwrap_or(value);
        if let Some((name, value)) = pair.split_once('=') {
            let name = name.trim();
            if !name.is_empty() {
                debug!(cookie = %name, "captured cookie");
                cookies.insert(name.to_string(), value.trim().to_string());
            }
        }
    }
}

/// Renders the cookie map as a `Cookie` header value, or `None` when empty.
#[must_use]
pub fn cookie_header(cookies: &BTreeMap<String, String>) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; "),
    )
}
