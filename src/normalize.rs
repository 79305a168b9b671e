// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! URL normalization and deduplication keys.
//!
//! Two submissions are the same story when their normalized URLs match:
//!
//! ```
//! use newsflow::normalize::{normalize_url, url_hash};
//!
//! let a = normalize_url("HTTPS://WWW.Example.com/a/b/").unwrap();
//! let b = normalize_url("https://example.com/a/b").unwrap();
//! assert_eq!(a, "https://example.com/a/b");
//! assert_eq!(url_hash(&a), url_hash(&b));
//! ```
//!
//! Hashes are unsalted SHA-256 hex digests. They are deduplication keys,
//! not a security control.

use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

/// Used when a URL host has no usable first label.
pub const UNKNOWN_MEDIA_SOURCE: &str = "unknown";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum UrlError {
    #[error("Invalid URL '{url}': {reason}")]
    Parse { url: String, reason: String },
    #[error("Unsupported URL scheme '{0}'")]
    Scheme(String),
    #[error("URL has no host: {0}")]
    NoHost(String),
}

/// Normalize a URL to `scheme://host[:port]/path`.
///
/// Scheme and host are lowercased (the `url` crate does this on parse),
/// a leading `www.` is stripped, one trailing `/` is trimmed, and query and
/// fragment are dropped. Path case is preserved.
pub fn normalize_url(raw: &str) -> Result<String, UrlError> {
    let raw = raw.trim();
    let parsed = Url::parse(raw).map_err(|e| UrlError::Parse {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    let scheme = parsed.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(UrlError::Scheme(scheme.to_string()));
    }

    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| UrlError::NoHost(raw.to_string()))?
        .to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    let mut normalized = format!("{}://{}", scheme, host);
    if let Some(port) = parsed.port() {
        normalized.push(':');
        normalized.push_str(&port.to_string());
    }
    normalized.push_str(parsed.path());

    if normalized.ends_with('/') {
        normalized.pop();
    }
    Ok(normalized)
}

/// Media source name: first DNS label of the host, `www.` stripped.
///
/// `https://www.latercera.com/x` → `latercera`.
pub fn media_source_name(normalized_url: &str) -> String {
    Url::parse(normalized_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .and_then(|host| {
            let host = host.strip_prefix("www.").unwrap_or(&host);
            host.split('.')
                .next()
                .filter(|label| !label.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| UNKNOWN_MEDIA_SOURCE.to_string())
}

/// Hex SHA-256 of the input.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Deduplication key of a normalized URL.
pub fn url_hash(normalized_url: &str) -> String {
    sha256_hex(normalized_url)
}

/// Digest of title followed directly by body.
pub fn content_hash(title: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_equivalence() {
        let a = normalize_url("HTTPS://WWW.Example.com/a/b/").unwrap();
        let b = normalize_url("https://example.com/a/b").unwrap();
        assert_eq!(a, b);
        assert_eq!(url_hash(&a), url_hash(&b));
    }

    #[test]
    fn test_story_url() {
        assert_eq!(
            normalize_url("https://Example.com/story/").unwrap(),
            "https://example.com/story"
        );
    }

    #[test]
    fn test_root_path_is_trimmed() {
        assert_eq!(normalize_url("https://www.example.com/").unwrap(), "https://example.com");
        assert_eq!(normalize_url("https://example.com").unwrap(), "https://example.com");
    }

    #[test]
    fn test_query_and_fragment_dropped() {
        assert_eq!(
            normalize_url("https://example.com/a?utm_source=x#top").unwrap(),
            "https://example.com/a"
        );
    }

    #[test]
    fn test_path_case_preserved() {
        assert_eq!(normalize_url("https://example.com/Noticias/A").unwrap(), "https://example.com/Noticias/A");
    }

    #[test]
    fn test_explicit_port_kept() {
        assert_eq!(normalize_url("http://example.com:8080/a").unwrap(), "http://example.com:8080/a");
        // Default ports are elided by the parser
        assert_eq!(normalize_url("https://example.com:443/a").unwrap(), "https://example.com/a");
    }

    #[test]
    fn test_invalid_urls() {
        assert!(matches!(normalize_url("not a url"), Err(UrlError::Parse { .. })));
        assert!(matches!(normalize_url("ftp://example.com/a"), Err(UrlError::Scheme(_))));
        assert!(matches!(normalize_url("mailto:someone@example.com"), Err(UrlError::Scheme(_))));
        assert!(normalize_url("").is_err());
    }

    #[test]
    fn test_media_source_name() {
        assert_eq!(media_source_name("https://latercera.com/x"), "latercera");
        assert_eq!(media_source_name("https://www.BioBioChile.cl/x"), "biobiochile");
        assert_eq!(media_source_name("https://news.example.com"), "news");
        assert_eq!(media_source_name("garbage"), UNKNOWN_MEDIA_SOURCE);
    }

    #[test]
    fn test_hashes_are_stable() {
        // sha256("abc")
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(content_hash("ab", "c"), sha256_hex("abc"));
        assert_eq!(url_hash("https://example.com/story").len(), 64);
    }
}
