//! Listing URL intake
//!
//! URLs come one per line, with commas also accepted as separators. Lines
//! that do not start with `http` (notes, blank lines) are ignored.

use crate::error::{Error, Result};
use std::collections::HashSet;
use std::path::Path;

/// Extract listing URLs from free text
///
/// ```
/// use anime1_dl::input::parse_url_list;
///
/// let urls = parse_url_list("https://anime1.me/1, https://anime1.me/2\n# note\n");
/// assert_eq!(urls, vec!["https://anime1.me/1", "https://anime1.me/2"]);
/// ```
pub fn parse_url_list(text: &str) -> Vec<String> {
    text.lines()
        .flat_map(|line| line.split(','))
        .map(str::trim)
        .filter(|entry| entry.starts_with("http"))
        .map(String::from)
        .collect()
}

/// Read listing URLs from a file
///
/// A missing file yields an empty list.
pub fn read_url_file(path: &Path) -> Result<Vec<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(parse_url_list(&text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(Error::fs(path, e)),
    }
}

/// Drop repeated entries, keeping the first occurrence and the original order
pub fn dedupe(inputs: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    inputs
        .into_iter()
        .filter(|url| seen.insert(url.clone()))
        .collect()
}
