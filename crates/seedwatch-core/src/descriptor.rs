//! Content-hash extraction from transfer descriptors
//!
//! Feed items and manual adds refer to transfers by link. Magnet links carry
//! the info-hash in their `xt=urn:btih:` parameter; tracker and indexer URLs
//! usually embed the 40-char hex hash somewhere in the path or query.

use data_encoding::{BASE32, HEXLOWER};
use seedwatch_types::normalize_hash;
use url::Url;

const BTIH_PREFIX: &str = "urn:btih:";

/// Parsed magnet URI fields the core cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetLink {
    /// Lowercase 40-char hex info-hash; base32 values are converted
    pub hash: String,
    /// Display name (`dn`), if present
    pub name: Option<String>,
}

/// Parse a magnet URI; returns `None` for anything without a valid btih
pub fn parse_magnet(uri: &str) -> Option<MagnetLink> {
    let url = Url::parse(uri.trim()).ok()?;
    if url.scheme() != "magnet" {
        return None;
    }

    let mut hash = None;
    let mut name = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "xt" if hash.is_none() => {
                let lower = value.to_ascii_lowercase();
                if let Some(candidate) = lower.strip_prefix(BTIH_PREFIX) {
                    hash = btih_to_hex(candidate);
                }
            }
            "dn" if name.is_none() && !value.is_empty() => name = Some(value.into_owned()),
            _ => {}
        }
    }

    Some(MagnetLink { hash: hash?, name })
}

/// Extract the content hash a link refers to, if it can be determined
pub fn content_hash_from_link(link: &str) -> Option<String> {
    if link.trim_start().to_ascii_lowercase().starts_with("magnet:") {
        return parse_magnet(link).map(|m| m.hash);
    }
    first_hex_hash(link)
}

/// 40 hex chars (SHA-1) as given, or 32 base32 chars decoded to hex
fn btih_to_hex(candidate: &str) -> Option<String> {
    match candidate.len() {
        40 if candidate.chars().all(|c| c.is_ascii_hexdigit()) => Some(normalize_hash(candidate)),
        32 => BASE32
            .decode(candidate.to_ascii_uppercase().as_bytes())
            .ok()
            .map(|bytes| HEXLOWER.encode(&bytes)),
        _ => None,
    }
}

/// First run of exactly 40 hex digits not embedded in a longer hex run
fn first_hex_hash(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut start = None;
    for i in 0..=bytes.len() {
        let is_hex = i < bytes.len() && bytes[i].is_ascii_hexdigit();
        match (is_hex, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                if i - s == 40 {
                    return Some(normalize_hash(&text[s..i]));
                }
                start = None;
            }
            _ => {}
        }
    }
    None
}
