pub mod entry;
pub mod framework;

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

// Normalization patterns. UUIDs and IPv4 addresses must be replaced before
// digit runs, otherwise both collapse into digit placeholders first.
static UUID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b").unwrap()
});
static IPV4_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").unwrap());
static NUMBER_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());
static PUNCTUATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]").unwrap());
static WHITESPACE_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Normalize a log message into a stable template.
///
/// Lowercases the text and replaces the volatile parts (UUIDs, IPv4
/// addresses, digit runs) with placeholders so that structurally identical
/// messages map to the same template.
pub fn normalize_message(message: &str) -> String {
    let mut normalized = message.to_lowercase();

    normalized = UUID_PATTERN.replace_all(&normalized, "<uuid>").to_string();
    normalized = IPV4_PATTERN.replace_all(&normalized, "<ip>").to_string();
    normalized = NUMBER_PATTERN.replace_all(&normalized, "<num>").to_string();
    normalized = WHITESPACE_PATTERN.replace_all(&normalized, " ").to_string();

    normalized.trim().to_string()
}

/// Normalization used by the similarity metrics: the template form with
/// punctuation collapsed to whitespace, so word-level metrics see clean
/// tokens.
pub fn normalize_for_similarity(message: &str) -> String {
    let template = normalize_message(message);
    let depunctuated = PUNCTUATION_PATTERN.replace_all(&template, " ");
    WHITESPACE_PATTERN
        .replace_all(&depunctuated, " ")
        .trim()
        .to_string()
}

/// Compute the deduplication fingerprint for an entry.
///
/// SHA-256 over the normalized message joined with the exception class and
/// file path. Entries that differ only in embedded numbers, UUIDs or IP
/// addresses fingerprint identically.
pub fn fingerprint(message: &str, exception_class: Option<&str>, file_path: Option<&str>) -> String {
    let input = format!(
        "{}|{}|{}",
        normalize_message(message),
        exception_class.unwrap_or(""),
        file_path.unwrap_or("")
    );

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}
