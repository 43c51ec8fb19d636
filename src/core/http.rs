//! HTTP client utilities.
//!
//! Shared reqwest client construction and Kiwify URL resolution.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::{Client, ClientBuilder};

use crate::error::{HubError, Result};

/// Default timeout for HTTP requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default remote API base.
pub const DEFAULT_BASE_URL: &str = "https://public-api.kiwify.com";

/// Version segment inserted when neither the base nor the path carries one.
pub const DEFAULT_API_VERSION: &str = "v1";

/// Maximum number of response body characters kept in errors and logs.
pub const MAX_BODY_EXCERPT_CHARS: usize = 512;

static TRAILING_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(v\d+)$").unwrap());
static LEADING_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/(v\d+)(/|$)").unwrap());

/// Build a configured HTTP client.
///
/// # Errors
///
/// Returns error if client construction fails.
pub fn build_client(timeout: Duration) -> Result<Client> {
    ClientBuilder::new()
        .timeout(timeout)
        .user_agent(format!("sigmahub/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| HubError::Network(e.to_string()))
}

/// Normalize a configured base URL: trim whitespace and trailing slashes,
/// fall back to [`DEFAULT_BASE_URL`] when empty.
#[must_use]
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        DEFAULT_BASE_URL.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Resolve a resource path against the base URL.
///
/// A base ending in `/vN` is used as is, and a path repeating the same
/// version is de-duplicated. Otherwise `/v1` is inserted unless the path
/// already names a version.
#[must_use]
pub fn resolve_api_url(base: &str, path: &str) -> String {
    let base = normalize_base_url(base);
    let path = format!("/{}", path.trim().trim_start_matches('/'));

    if let Some(caps) = TRAILING_VERSION.captures(&base) {
        let version = &caps[1];
        if let Some(path_caps) = LEADING_VERSION.captures(&path) {
            if &path_caps[1] == version {
                let rest = &path[1 + version.len()..];
                return format!("{base}{rest}");
            }
        }
        return format!("{base}{path}");
    }

    if LEADING_VERSION.is_match(&path) {
        format!("{base}{path}")
    } else {
        format!("{base}/{DEFAULT_API_VERSION}{path}")
    }
}

/// Token endpoints: the root `<base>/oauth/token` and the versioned fallback.
///
/// The fallback is `None` when both resolve to the same URL.
#[must_use]
pub fn resolve_token_urls(base: &str) -> (String, Option<String>) {
    let base = normalize_base_url(base);
    let root_base = TRAILING_VERSION.replace(&base, "");
    let root = format!("{root_base}/oauth/token");
    let versioned = resolve_api_url(&base, "/oauth/token");
    if versioned == root {
        (root, None)
    } else {
        (root, Some(versioned))
    }
}

/// Truncate a response body for errors and logs.
#[must_use]
pub fn body_excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_BODY_EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let mut excerpt: String = trimmed.chars().take(MAX_BODY_EXCERPT_CHARS).collect();
    excerpt.push_str("...");
    excerpt
}

/// Classify a reqwest transport error.
#[must_use]
pub fn transport_error(err: &reqwest::Error, timeout: Duration) -> HubError {
    if err.is_timeout() {
        HubError::Timeout(timeout.as_secs())
    } else {
        HubError::Network(err.to_string())
    }
}

/// Parse a `Retry-After` header given in seconds.
#[must_use]
pub fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
