//! Content normalization
//!
//! Turns the raw request handed over by the interception host, plus optional
//! response metadata, into a canonical [`ContentRecord`]. Normalization never
//! fails: malformed URLs and missing content degrade to empty fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;
use url::Url;

/// Page text retained on the record
const MAX_TEXT_CHARS: usize = 1000;

/// Request as seen by the interception host
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRequest {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl RawRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: Vec::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response metadata extracted by the host from a fetched body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseMetadata {
    pub title: String,
    pub description: String,
    pub keywords: Vec<String>,
    /// Visible page text
    pub text: String,
    pub image_count: u32,
    pub link_count: u32,
    pub external_link_count: u32,
    pub has_video: bool,
    pub has_forms: bool,
    pub has_code: bool,
    pub content_length: u64,
    pub latency_ms: u64,
    pub status_code: u16,
}

/// Canonical, request-scoped view of a request and its content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub url: String,
    pub domain: String,
    pub path: String,
    /// Query parameters, first occurrence of each key wins
    pub query: BTreeMap<String, String>,
    pub title: String,
    pub description: String,
    /// Lowercased, deduplicated
    pub keywords: Vec<String>,
    pub text: String,
    pub image_count: u32,
    pub link_count: u32,
    pub external_link_count: u32,
    pub has_video: bool,
    pub has_forms: bool,
    pub has_code: bool,
    pub content_length: u64,
    pub latency_ms: u64,
    pub status_code: Option<u16>,
    /// Presence of title, description, keywords and body text, in [0, 1]
    pub quality_score: f32,
    /// False for request-only records
    pub content_available: bool,
    pub timestamp: DateTime<Utc>,
}

impl ContentRecord {
    /// Domain labels, path segments and query values as a space-separated phrase
    pub fn url_phrase(&self) -> String {
        let mut words: Vec<String> = Vec::new();

        let domain = self.domain.trim_start_matches("www.");
        words.extend(domain.split('.').filter(|l| !l.is_empty()).map(split_word));

        for segment in self.path_segments() {
            words.push(split_word(segment));
        }
        for value in self.query.values() {
            words.push(split_word(value));
        }

        words
            .into_iter()
            .filter(|w| !w.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn path_segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }

    /// Title, description, keywords and text, truncated to `max_chars`
    pub fn excerpt(&self, max_chars: usize) -> String {
        let joined = [
            self.title.as_str(),
            self.description.as_str(),
            &self.keywords.join(" "),
            self.text.as_str(),
        ]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");

        joined.chars().take(max_chars).collect()
    }

    pub fn external_link_ratio(&self) -> f32 {
        if self.link_count == 0 {
            0.0
        } else {
            (self.external_link_count as f32 / self.link_count as f32).min(1.0)
        }
    }
}

/// Replace URL punctuation with spaces and decode `+`/percent-escaped spaces
fn split_word(raw: &str) -> String {
    raw.replace("%20", " ")
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Collapse whitespace and strip control characters
pub fn clean_text(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_url(raw: &str) -> Option<Url> {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(url) if url.has_host() => Some(url),
        _ => Url::parse(&format!("http://{}", trimmed))
            .ok()
            .filter(|u| u.has_host()),
    }
}

fn quality_score(title: &str, description: &str, keywords: &[String], text: &str) -> f32 {
    let mut score = 0.0;
    if !title.is_empty() {
        score += if title.chars().count() > 10 { 0.25 } else { 0.15 };
    }
    if !description.is_empty() {
        score += if description.chars().count() > 50 { 0.25 } else { 0.15 };
    }
    if !keywords.is_empty() {
        score += 0.2;
    }
    score += 0.3 * (text.chars().count() as f32 / 500.0).min(1.0);
    f32::min(score, 1.0)
}

/// Build a [`ContentRecord`] from a request and optional response metadata
pub fn normalize(
    request: &RawRequest,
    response: Option<&ResponseMetadata>,
    now: DateTime<Utc>,
) -> ContentRecord {
    let (domain, path, query) = match parse_url(&request.url) {
        Some(url) => {
            let mut query = BTreeMap::new();
            for (k, v) in url.query_pairs() {
                query.entry(k.into_owned()).or_insert_with(|| v.into_owned());
            }
            (
                url.host_str().unwrap_or_default().to_lowercase(),
                url.path().to_string(),
                query,
            )
        }
        None => {
            warn!(url = %request.url, "Unparseable request URL, using empty URL parts");
            (String::new(), String::new(), BTreeMap::new())
        }
    };

    let mut record = ContentRecord {
        url: request.url.trim().to_string(),
        domain,
        path,
        query,
        title: String::new(),
        description: String::new(),
        keywords: Vec::new(),
        text: String::new(),
        image_count: 0,
        link_count: 0,
        external_link_count: 0,
        has_video: false,
        has_forms: false,
        has_code: false,
        content_length: 0,
        latency_ms: 0,
        status_code: None,
        quality_score: 0.0,
        content_available: false,
        timestamp: now,
    };

    if let Some(meta) = response {
        let mut keywords: Vec<String> = Vec::new();
        for k in &meta.keywords {
            let k = clean_text(k).to_lowercase();
            if !k.is_empty() && !keywords.contains(&k) {
                keywords.push(k);
            }
        }

        let title = clean_text(&meta.title);
        let description = clean_text(&meta.description);
        let text: String = clean_text(&meta.text).chars().take(MAX_TEXT_CHARS).collect();

        record.quality_score = quality_score(&title, &description, &keywords, &text);
        record.title = title;
        record.description = description;
        record.keywords = keywords;
        record.text = text;
        record.image_count = meta.image_count;
        record.link_count = meta.link_count;
        record.external_link_count = meta.external_link_count.min(meta.link_count);
        record.has_video = meta.has_video;
        record.has_forms = meta.has_forms;
        record.has_code = meta.has_code;
        record.content_length = meta.content_length;
        record.latency_ms = meta.latency_ms;
        record.status_code = (meta.status_code != 0).then_some(meta.status_code);
        record.content_available = true;
    }

    record
}
