//! Naming rules for the output tree
//!
//! Every artifact path is relative to the output store root:
//!
//! ```text
//! <site>/pages/<key>/page.json
//! <site>/pages/<key>/elements.json
//! <site>/pages/<key>/api_calls.json
//! <site>/pages/<key>/interactions.json
//! <site>/screenshots/<parent>_<key>.png
//! <site>/analytics.json
//! <site>/summary.md
//! ```
//!
//! A page key is the slug of the normalized URL, cut to [`MAX_SLUG_LEN`],
//! followed by a short SHA-256 digest of that normalized URL. URLs that slug
//! alike still get their own directory, and keys stay well under the
//! 255-byte file name limit.

use sha2::{Digest, Sha256};
use std::path::PathBuf;
use url::Url;

use crate::crawler::frontier::normalize_url;
use crate::crawler::task::CrawlMode;

/// Site identifier used for URLs that cannot be parsed
pub const UNKNOWN_SITE: &str = "unknown_site";

/// Longest readable prefix kept in a page key
pub const MAX_SLUG_LEN: usize = 100;

/// Digest bytes appended to a page key (hex-encoded, so twice as many chars)
const DIGEST_BYTES: usize = 6;

/// Lower-case the URL and replace every non-alphanumeric character with `_`
pub fn url_slug(url: &str) -> String {
    url.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Unique, bounded file name component for a page
pub fn page_key(url: &str) -> String {
    let normalized = normalize_url(url);
    let mut slug = url_slug(&normalized);
    // the slug is ASCII, so any byte index is a char boundary
    slug.truncate(MAX_SLUG_LEN);

    let digest = Sha256::digest(normalized.as_bytes());
    format!("{}_{}", slug, hex::encode(&digest[..DIGEST_BYTES]))
}

/// Derive the site identifier a URL is aggregated under
///
/// Flat mode keys by host (`example_com`); recursive mode adds the first
/// path segment so sections of a large site get their own accumulator
/// (`example_com__docs`).
pub fn site_key(url: &str, mode: CrawlMode) -> String {
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(_) => return UNKNOWN_SITE.to_string(),
    };

    let host = match parsed.host_str() {
        Some(host) => host.to_lowercase().replace('.', "_"),
        None => return UNKNOWN_SITE.to_string(),
    };

    match mode {
        CrawlMode::Flat => host,
        CrawlMode::Recursive => {
            let section = parsed
                .path_segments()
                .and_then(|mut segments| segments.next())
                .filter(|segment| !segment.is_empty())
                .map(url_slug);

            match section {
                Some(section) => format!("{}__{}", host, section),
                None => host,
            }
        }
    }
}

/// Directory holding the captures of one page
pub fn page_dir(site: &str, url: &str) -> PathBuf {
    PathBuf::from(site).join("pages").join(page_key(url))
}

/// Screenshot path, prefixed with the parent's page key like `<parent>_<key>.png`
pub fn screenshot_path(site: &str, parent_path: &str, url: &str) -> PathBuf {
    PathBuf::from(site)
        .join("screenshots")
        .join(format!("{}_{}.png", parent_path, page_key(url)))
}
