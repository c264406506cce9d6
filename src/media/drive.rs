//! Google Drive share links: file id extraction and direct-download candidates.

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

const DRIVE_HOSTS: [&str; 3] = [
    "drive.google.com",
    "docs.google.com",
    "drive.usercontent.google.com",
];

/// Direct-download endpoints, tried in this order.
const CANDIDATE_TEMPLATES: [&str; 4] = [
    "https://drive.google.com/uc?export=download&id={id}",
    "https://drive.google.com/uc?export=view&id={id}",
    "https://drive.usercontent.google.com/download?id={id}&export=download&confirm=t",
    "https://lh3.googleusercontent.com/d/{id}",
];

/// Shortest token accepted by the fallback scan; real ids are ~33 characters.
const FALLBACK_MIN_ID_LEN: usize = 25;

fn id_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"/file/d/([A-Za-z0-9_-]+)",
            r"/d/([A-Za-z0-9_-]+)",
            r"[?&]id=([A-Za-z0-9_-]+)",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

pub fn is_drive_url(url: &Url) -> bool {
    url.host_str()
        .map(|h| DRIVE_HOSTS.contains(&h.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_id_token(s: &str) -> bool {
    s.len() >= FALLBACK_MIN_ID_LEN
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Ordered regex patterns first, then the longest id-shaped path segment or
/// query value.
pub fn extract_file_id(url: &Url) -> Option<String> {
    let raw = url.as_str();
    for pattern in id_patterns() {
        if let Some(id) = pattern
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .filter(|id| !id.is_empty())
        {
            return Some(id.to_string());
        }
    }

    let segments = url
        .path_segments()
        .map(|s| s.map(str::to_string).collect::<Vec<_>>())
        .unwrap_or_default();
    let values = url.query_pairs().map(|(_, v)| v.into_owned());
    segments
        .into_iter()
        .chain(values)
        .filter(|s| is_id_token(s))
        .max_by_key(|s| s.len())
}

pub fn candidate_urls(file_id: &str) -> Vec<String> {
    CANDIDATE_TEMPLATES
        .iter()
        .map(|t| t.replace("{id}", file_id))
        .collect()
}
