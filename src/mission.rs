//! Mission text, fingerprint and keyword derivation
//!
//! A mission is immutable once built. Editing the mission produces a new
//! `Mission` with a new fingerprint, which is what partitions the decision
//! cache.

use crate::error::{AnchoriteError, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;

/// Used when no mission has been configured
pub const DEFAULT_MISSION: &str =
    "Focus on productive work and learning, avoiding social media and entertainment distractions";

/// Default heuristic similarity threshold
pub const DEFAULT_THRESHOLD: f32 = 0.4;

const MAX_KEYWORDS: usize = 20;
const MIN_TOKEN_LEN: usize = 3;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "about", "that", "this", "from", "into", "your", "their", "there",
    "then", "have", "will", "should", "would", "could", "what", "when", "where", "why", "how",
    "make", "create", "work", "task", "focus", "session", "goal", "doing", "do", "on", "to", "of",
    "in", "at", "a", "an",
];

/// Stable short identifier of a mission version
///
/// First 16 hex chars of SHA-256 over the whitespace-normalized, lowercased text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_text(text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalize_text(text).as_bytes());
        Self(short_hex(&hasher.finalize()))
    }

    /// Wrap an already computed fingerprint (e.g. read back from storage)
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 16 hex chars of a digest
pub(crate) fn short_hex(digest: &[u8]) -> String {
    digest
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// The user's current goal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    text: String,
    fingerprint: Fingerprint,
    keywords: Vec<String>,
    /// Similarity threshold used by the heuristic scorer
    pub threshold: f32,
    pub created_at: DateTime<Utc>,
    /// Planned session length, drives the session-elapsed feature
    pub session_minutes: Option<u32>,
}

impl Mission {
    pub fn new(text: impl Into<String>) -> Result<Self> {
        Self::with_threshold(text, DEFAULT_THRESHOLD)
    }

    pub fn with_threshold(text: impl Into<String>, threshold: f32) -> Result<Self> {
        let text = text.into().trim().to_string();
        if text.is_empty() {
            return Err(AnchoriteError::Validation(
                "Mission text must not be empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(AnchoriteError::Validation(format!(
                "Mission threshold must be in [0, 1], got {}",
                threshold
            )));
        }

        Ok(Self {
            fingerprint: Fingerprint::from_text(&text),
            keywords: extract_keywords(&text),
            text,
            threshold,
            created_at: Utc::now(),
            session_minutes: None,
        })
    }

    pub fn with_session_minutes(mut self, minutes: Option<u32>) -> Self {
        self.session_minutes = minutes.filter(|m| *m > 0);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Fraction of the planned session elapsed at `now`, 0 when unknown
    pub fn session_elapsed_fraction(&self, now: DateTime<Utc>) -> f32 {
        match self.session_minutes {
            Some(minutes) => {
                let elapsed = now.signed_duration_since(self.created_at).num_seconds().max(0);
                (elapsed as f32 / (minutes as f32 * 60.0)).clamp(0.0, 1.0)
            }
            None => 0.0,
        }
    }

    /// Whether any mission keyword occurs in `text`
    pub fn matches(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        let haystack = text.to_lowercase();
        self.keywords.iter().any(|k| haystack.contains(k.as_str()))
    }

    /// Import a `mission.json` file as written by the desktop setup dialog
    pub fn from_json_file(path: &Path, threshold: f32) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file: MissionFile = serde_json::from_str(&raw)?;

        let mut mission = Self::with_threshold(file.mission, threshold)?
            .with_session_minutes(file.duration_minutes);
        if let Some(created) = file.created.as_deref().and_then(parse_timestamp) {
            mission = mission.with_created_at(created);
        }
        Ok(mission)
    }
}

impl Default for Mission {
    fn default() -> Self {
        Self {
            text: DEFAULT_MISSION.to_string(),
            fingerprint: Fingerprint::from_text(DEFAULT_MISSION),
            keywords: extract_keywords(DEFAULT_MISSION),
            threshold: DEFAULT_THRESHOLD,
            created_at: Utc::now(),
            session_minutes: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MissionFile {
    mission: String,
    #[serde(default)]
    created: Option<String>,
    #[serde(default)]
    duration_minutes: Option<u32>,
}

/// RFC 3339, or a naive local ISO timestamp
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .and_then(|naive| Local.from_local_datetime(&naive).single())
        .map(|ts| ts.with_timezone(&Utc))
}

/// Lowercase word tokens of at least three chars, stop words removed
pub fn content_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| t.chars().count() >= MIN_TOKEN_LEN && !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

/// Mission keywords: filtered tokens followed by adjacent bigrams, deduplicated
/// in order and capped at twenty
pub fn extract_keywords(text: &str) -> Vec<String> {
    let base: Vec<String> = text
        .to_lowercase()
        .split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| ".,:;!?'\"()[]{}".contains(c))
                .to_string()
        })
        .filter(|t| t.chars().count() >= MIN_TOKEN_LEN && !STOP_WORDS.contains(&t.as_str()))
        .collect();

    let bigrams = base.windows(2).map(|w| format!("{} {}", w[0], w[1]));

    let mut seen = HashSet::new();
    base.iter()
        .cloned()
        .chain(bigrams)
        .filter(|k| seen.insert(k.clone()))
        .take(MAX_KEYWORDS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_fingerprint_is_stable_and_short() {
        let a = Fingerprint::from_text("Learn Python  programming");
        let b = Fingerprint::from_text("learn python programming ");
        let c = Fingerprint::from_text("Learn Rust programming");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 16);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_keywords() {
        let keywords = extract_keywords("Learn Python programming for web development.");
        assert_eq!(
            keywords,
            vec![
                "learn",
                "python",
                "programming",
                "web",
                "development",
                "learn python",
                "python programming",
                "programming web",
                "web development",
            ]
        );
    }

    #[test]
    fn test_keywords_capped() {
        let text = (0..40).map(|i| format!("word{}", i)).collect::<Vec<_>>().join(" ");
        assert_eq!(extract_keywords(&text).len(), 20);
    }

    #[test]
    fn test_empty_mission_rejected() {
        assert!(Mission::new("   ").is_err());
        assert!(Mission::with_threshold("learn", 1.5).is_err());
    }

    #[test]
    fn test_matches() {
        let mission = Mission::new("Learn Python programming").unwrap();
        assert!(mission.matches("The Python Tutorial"));
        assert!(!mission.matches("funny cat videos"));
        assert!(!mission.matches(""));
    }

    #[test]
    fn test_session_elapsed_fraction() {
        let start = Utc::now();
        let mission = Mission::new("Write the report")
            .unwrap()
            .with_created_at(start)
            .with_session_minutes(Some(60));

        let half = start + chrono::Duration::minutes(30);
        assert!((mission.session_elapsed_fraction(half) - 0.5).abs() < 1e-3);
        assert_eq!(
            mission.session_elapsed_fraction(start + chrono::Duration::hours(3)),
            1.0
        );
        assert_eq!(Mission::default().session_elapsed_fraction(half), 0.0);
    }

    #[test]
    fn test_import_mission_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"mission": "Study linear algebra", "created": "2024-03-01T10:15:30.123456", "duration_minutes": 45}}"#
        )
        .unwrap();

        let mission = Mission::from_json_file(file.path(), 0.4).unwrap();
        assert_eq!(mission.text(), "Study linear algebra");
        assert_eq!(mission.session_minutes, Some(45));
        assert_eq!(mission.created_at.date_naive().to_string().len(), 10);
    }
}
