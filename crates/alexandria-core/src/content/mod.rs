//! Content Utilities
//!
//! Stable IDs, content hashing, token estimation and the small text helpers
//! shared by the normalizer, curators and stores.

use chrono::Utc;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Events whose estimated token count exceeds this are offloaded to a blob.
pub const INLINE_TOKEN_LIMIT: i64 = 1000;

/// Memory content is truncated to this many characters on create/update.
pub const MEMORY_CONTENT_LIMIT: usize = 500;

/// Length of the normalized prefix used as a dedup/merge key.
pub const NORMALIZED_PREFIX_LEN: usize = 100;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).expect("base36 digits are ascii")
}

/// Generate a monotonic-ish opaque ID: `base36(unix_millis) + '_' + 6 random
/// base36 chars`. Equality is byte identity; the timestamp prefix keeps IDs
/// roughly sortable by creation time.
pub fn new_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| BASE36[rng.gen_range(0..36)] as char)
        .collect();
    format!("{}_{}", to_base36(millis), suffix)
}

/// First 16 hex chars of SHA-256 over the content. Hash equality is taken as
/// content equality for dedup purposes.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// First 12 hex chars of SHA-256, used for project directory suffixes.
pub fn short_hash12(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..12].to_string()
}

/// Token estimate: ceil(bytes / 4).
pub fn estimate_tokens(content: &str) -> i64 {
    ((content.len() + 3) / 4) as i64
}

/// Lowercased, whitespace-collapsed prefix of the content, capped at
/// [`NORMALIZED_PREFIX_LEN`] chars. Used as the candidate dedup key and the
/// similarity gate for evidence merges.
pub fn normalized_prefix(content: &str) -> String {
    let collapsed = content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed.chars().take(NORMALIZED_PREFIX_LEN).collect()
}

/// Alphanumeric tokens of length >= 3, lowercased.
pub fn alnum_tokens(content: &str) -> HashSet<String> {
    content
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Jaccard similarity over [`alnum_tokens`] of the two contents.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let ta = alnum_tokens(a);
    let tb = alnum_tokens(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let inter = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    inter / union
}

/// Truncate to a char boundary without splitting a code point.
pub fn truncate_chars(content: &str, max_chars: usize) -> String {
    content.chars().take(max_chars).collect()
}

/// Split an identifier into lowercase words: `parseJsonBody` and
/// `parse_json_body` both yield `["parse", "json", "body"]`.
pub fn split_identifier_words(ident: &str) -> Vec<String> {
    let mut words = Vec::new();
    for part in ident.split(|c: char| c == '_' || c == '-' || !c.is_alphanumeric()) {
        if part.is_empty() {
            continue;
        }
        let mut current = String::new();
        let mut prev_lower = false;
        for c in part.chars() {
            if c.is_uppercase() && prev_lower && !current.is_empty() {
                words.push(current.to_lowercase());
                current = String::new();
            }
            prev_lower = c.is_lowercase() || c.is_numeric();
            current.push(c);
        }
        if !current.is_empty() {
            words.push(current.to_lowercase());
        }
    }
    words
}

// ============================================================================
// TESTS
// ============================================================================
