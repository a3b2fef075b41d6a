//! Generic URL classifiers
//!
//! Structural checks on domain, path and query that hold across sites. There
//! is deliberately no per-site list here; each classifier is a named predicate
//! over the normalized record, evaluated in table order.

use crate::normalizer::ContentRecord;

/// Top-level domain category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TldCategory {
    Edu,
    Org,
    Gov,
    Other,
}

/// Domain suffix to category, longest suffixes first
const TLD_TABLE: &[(&str, TldCategory)] = &[
    (".edu", TldCategory::Edu),
    (".ac.uk", TldCategory::Edu),
    (".edu.au", TldCategory::Edu),
    (".ac.jp", TldCategory::Edu),
    (".org", TldCategory::Org),
    (".org.uk", TldCategory::Org),
    (".gov", TldCategory::Gov),
    (".gov.uk", TldCategory::Gov),
    (".mil", TldCategory::Gov),
];

impl TldCategory {
    pub fn of(domain: &str) -> Self {
        let domain = domain.trim_end_matches('.');
        TLD_TABLE
            .iter()
            .filter(|(suffix, _)| domain.ends_with(suffix))
            .max_by_key(|(suffix, _)| suffix.len())
            .map(|(_, category)| *category)
            .unwrap_or(TldCategory::Other)
    }

    /// One-hot slot order: edu, org, gov, other
    pub fn one_hot(self) -> [f32; 4] {
        let mut out = [0.0; 4];
        out[self as usize] = 1.0;
        out
    }
}

/// Named structural predicate over a URL
pub struct UrlClassifier {
    pub name: &'static str,
    pub test: fn(&ContentRecord) -> bool,
}

/// Evaluated in order; order matches the trailing dynamic URL feature slots
pub const URL_CLASSIFIERS: &[UrlClassifier] = &[
    UrlClassifier { name: "numeric_id", test: has_numeric_id },
    UrlClassifier { name: "search", test: looks_like_search },
    UrlClassifier { name: "documentation", test: looks_like_documentation },
    UrlClassifier { name: "media", test: looks_like_media },
    UrlClassifier { name: "feed", test: looks_like_feed },
    UrlClassifier { name: "article", test: looks_like_article },
    UrlClassifier { name: "profile", test: looks_like_profile },
];

const SEARCH_SEGMENTS: &[&str] = &["search", "find", "results", "query"];
const SEARCH_KEYS: &[&str] = &["q", "query", "search", "s", "k", "keywords"];
const DOC_SEGMENTS: &[&str] = &[
    "docs", "doc", "documentation", "manual", "reference", "guide", "guides", "tutorial",
    "tutorials", "learn", "api", "wiki", "howto", "course", "courses", "lesson",
];
const DOC_SUBDOMAINS: &[&str] = &["docs", "doc", "developer", "developers", "learn", "wiki", "api"];
const MEDIA_SEGMENTS: &[&str] = &[
    "watch", "video", "videos", "shorts", "reel", "reels", "clip", "clips", "stream", "live",
    "tv", "music", "gallery", "photos", "gifs",
];
const MEDIA_EXTENSIONS: &[&str] = &[".mp4", ".webm", ".m3u8", ".mov", ".gif", ".mp3"];
const FEED_SEGMENTS: &[&str] = &[
    "feed", "feeds", "home", "explore", "trending", "timeline", "popular", "hot", "for-you",
    "discover", "r",
];
const ARTICLE_SEGMENTS: &[&str] = &["article", "articles", "blog", "post", "posts", "news", "story"];
const PROFILE_SEGMENTS: &[&str] = &["user", "users", "u", "profile", "profiles", "people", "channel", "c"];

fn segments(record: &ContentRecord) -> Vec<String> {
    record.path_segments().map(|s| s.to_lowercase()).collect()
}

fn any_segment_in(record: &ContentRecord, table: &[&str]) -> bool {
    segments(record).iter().any(|s| table.contains(&s.as_str()))
}

fn has_numeric_id(record: &ContentRecord) -> bool {
    record.path_segments().any(|s| {
        let digits = s.chars().filter(|c| c.is_ascii_digit()).count();
        let all_digits = digits == s.len();
        // Pure numbers of 2+ digits, or long mixed tokens like hashes and slugs with ids
        (all_digits && s.len() >= 2)
            || (s.len() >= 8 && digits >= 3 && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
    })
}

fn looks_like_search(record: &ContentRecord) -> bool {
    any_segment_in(record, SEARCH_SEGMENTS)
        || record.query.keys().any(|k| SEARCH_KEYS.contains(&k.to_lowercase().as_str()))
}

fn looks_like_documentation(record: &ContentRecord) -> bool {
    let first_label = record.domain.split('.').next().unwrap_or_default();
    DOC_SUBDOMAINS.contains(&first_label) || any_segment_in(record, DOC_SEGMENTS)
}

fn looks_like_media(record: &ContentRecord) -> bool {
    let path = record.path.to_lowercase();
    any_segment_in(record, MEDIA_SEGMENTS) || MEDIA_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn looks_like_feed(record: &ContentRecord) -> bool {
    any_segment_in(record, FEED_SEGMENTS)
}

fn looks_like_article(record: &ContentRecord) -> bool {
    let segs = segments(record);
    let slug = segs.iter().any(|s| s.split('-').filter(|w| w.len() > 1).count() >= 3);
    let dated = segs.iter().any(|s| {
        s.len() == 4 && s.chars().all(|c| c.is_ascii_digit()) && (s.starts_with("19") || s.starts_with("20"))
    });
    slug || dated || segs.iter().any(|s| ARTICLE_SEGMENTS.contains(&s.as_str()))
}

fn looks_like_profile(record: &ContentRecord) -> bool {
    let segs = segments(record);
    segs.iter().any(|s| s.starts_with('@') && s.len() > 1)
        || segs.first().is_some_and(|s| PROFILE_SEGMENTS.contains(&s.as_str()))
}

/// The fourteen dynamic URL features in slot order
pub fn dynamic_url_features(record: &ContentRecord) -> [f32; 14] {
    let mut out = [0.0f32; 14];
    out[..4].copy_from_slice(&TldCategory::of(&record.domain).one_hot());

    out[4] = (record.path_segments().count() as f32 / 10.0).min(1.0);
    out[5] = if record.query.is_empty() { 0.0 } else { 1.0 };
    out[6] = (record.query.len() as f32 / 10.0).min(1.0);

    for (i, classifier) in URL_CLASSIFIERS.iter().enumerate() {
        out[7 + i] = if (classifier.test)(record) { 1.0 } else { 0.0 };
    }
    out
}
