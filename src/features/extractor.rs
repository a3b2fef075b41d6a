//! Feature extraction
//!
//! `extract` is deterministic for identical content, mission, timestamp and
//! encoder. Missing response content is a defined degraded mode: the content
//! embedding, content slots and content similarity are zero.

use super::classifiers::dynamic_url_features;
use super::{FeatureLayout, FeatureVector, SubRange};
use crate::embeddings::{cosine_similarity, SemanticEncoder};
use crate::error::Result;
use crate::mission::{content_tokens, Fingerprint, Mission};
use crate::normalizer::ContentRecord;
use chrono::{DateTime, Datelike, Local, Timelike, Utc};
use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Missions whose embeddings are kept in memory
const MISSION_CACHE_SIZE: usize = 4;

/// Builds feature vectors for one encoder and layout
pub struct FeatureExtractor {
    encoder: Arc<dyn SemanticEncoder>,
    layout: Arc<FeatureLayout>,
    excerpt_chars: usize,
    mission_embeddings: Mutex<LruCache<Fingerprint, Arc<Vec<f32>>>>,
}

impl FeatureExtractor {
    pub fn new(encoder: Arc<dyn SemanticEncoder>, excerpt_chars: usize) -> Self {
        let layout = Arc::new(FeatureLayout::new(encoder.name(), encoder.dimensions()));
        let capacity = NonZeroUsize::new(MISSION_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            encoder,
            layout,
            excerpt_chars,
            mission_embeddings: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn layout(&self) -> Arc<FeatureLayout> {
        Arc::clone(&self.layout)
    }

    /// Mission embedding, computed once per fingerprint
    pub async fn mission_embedding(&self, mission: &Mission) -> Result<Arc<Vec<f32>>> {
        let cached = self.lock_cache().get(mission.fingerprint()).cloned();
        if let Some(cached) = cached {
            return Ok(cached);
        }

        debug!(fingerprint = %mission.fingerprint(), "Encoding mission");
        let embedding = Arc::new(self.encoder.encode(mission.text()).await?);
        self.lock_cache()
            .put(mission.fingerprint().clone(), Arc::clone(&embedding));
        Ok(embedding)
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, LruCache<Fingerprint, Arc<Vec<f32>>>> {
        // A poisoned cache only holds pure function results, so keep using it
        self.mission_embeddings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Map a normalized record and mission to a feature vector
    pub async fn extract(
        &self,
        content: &ContentRecord,
        mission: &Mission,
        now: DateTime<Utc>,
    ) -> Result<FeatureVector> {
        let url_phrase = content.url_phrase();
        let excerpt = if content.content_available {
            content.excerpt(self.excerpt_chars)
        } else {
            String::new()
        };

        let mission_embedding = self.mission_embedding(mission).await?;
        let mut encoded = self
            .encoder
            .encode_batch(&[url_phrase.as_str(), excerpt.as_str()])
            .await?
            .into_iter();
        let dim = self.layout.embedding_dim();
        let url_embedding = encoded.next().unwrap_or_else(|| vec![0.0; dim]);
        let content_embedding = encoded.next().unwrap_or_else(|| vec![0.0; dim]);

        let mut vector = FeatureVector::zeros(self.layout());
        copy_into(vector.sub_mut(SubRange::UrlEmbedding), &url_embedding);
        copy_into(vector.sub_mut(SubRange::MissionEmbedding), &mission_embedding);
        copy_into(vector.sub_mut(SubRange::ContentEmbedding), &content_embedding);

        vector
            .sub_mut(SubRange::DynamicUrl)
            .copy_from_slice(&dynamic_url_features(content));
        if content.content_available {
            vector
                .sub_mut(SubRange::Content)
                .copy_from_slice(&content_features(content));
        }
        vector
            .sub_mut(SubRange::Temporal)
            .copy_from_slice(&temporal_features(mission, now));

        let content_similarity = if content.content_available {
            cosine_similarity(&mission_embedding, &content_embedding).max(0.0)
        } else {
            0.0
        };
        let alignment = [
            cosine_similarity(&mission_embedding, &url_embedding).max(0.0),
            content_similarity,
            if mission.matches(&url_phrase) || mission.matches(&excerpt) {
                1.0
            } else {
                0.0
            },
            keyword_overlap(mission, &url_phrase, &excerpt),
        ];
        vector.sub_mut(SubRange::Alignment).copy_from_slice(&alignment);

        Ok(vector)
    }
}

/// Copy an embedding into its slot; shorter input leaves trailing zeros
fn copy_into(slot: &mut [f32], embedding: &[f32]) {
    let n = slot.len().min(embedding.len());
    slot[..n].copy_from_slice(&embedding[..n]);
}

fn content_features(content: &ContentRecord) -> [f32; 10] {
    let flag = |b: bool| if b { 1.0 } else { 0.0 };
    [
        (content.image_count as f32 / 50.0).min(1.0),
        (content.link_count as f32 / 200.0).min(1.0),
        content.external_link_ratio(),
        flag(content.has_video),
        flag(content.has_forms),
        flag(content.has_code),
        content.quality_score,
        (content.content_length as f32 / 10_000.0).min(1.0),
        (content.latency_ms as f32 / 5_000.0).min(1.0),
        1.0,
    ]
}

fn temporal_features(mission: &Mission, now: DateTime<Utc>) -> [f32; 4] {
    let local = now.with_timezone(&Local);
    let hour = local.hour();
    let weekend = local.weekday().number_from_monday() >= 6;
    let work_hours = !weekend && (9..17).contains(&hour);
    // Tenths, so the vector only changes a few times per session
    let elapsed = (mission.session_elapsed_fraction(now) * 10.0).floor() / 10.0;

    [
        (hour / 3) as f32 / 7.0,
        if weekend { 1.0 } else { 0.0 },
        if work_hours { 1.0 } else { 0.0 },
        elapsed,
    ]
}

/// Jaccard overlap of single-word mission keywords and URL/content tokens
fn keyword_overlap(mission: &Mission, url_phrase: &str, excerpt: &str) -> f32 {
    let mission_words: HashSet<&str> = mission
        .keywords()
        .iter()
        .filter(|k| !k.contains(' '))
        .map(String::as_str)
        .collect();
    if mission_words.is_empty() {
        return 0.0;
    }

    let tokens: HashSet<String> = content_tokens(url_phrase)
        .into_iter()
        .chain(content_tokens(excerpt))
        .collect();
    let intersection = mission_words
        .iter()
        .filter(|w| tokens.contains(**w))
        .count();
    let union = mission_words.len() + tokens.len() - intersection;

    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEncoder;
    use crate::normalizer::{normalize, RawRequest, ResponseMetadata};
    use chrono::TimeZone;

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(Arc::new(HashingEncoder::new(64)), 300)
    }

    fn python_docs() -> ContentRecord {
        let meta = ResponseMetadata {
            title: "The Python Tutorial".to_string(),
            description: "Python is an easy to learn, powerful programming language".to_string(),
            has_code: true,
            ..Default::default()
        };
        normalize(
            &RawRequest::get("https://docs.python.org/3/tutorial/"),
            Some(&meta),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_extract_dimension_and_determinism() {
        let extractor = extractor();
        let mission = Mission::new("Learn Python programming for web development").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap();

        let a = extractor.extract(&python_docs(), &mission, now).await.unwrap();
        let b = extractor.extract(&python_docs(), &mission, now).await.unwrap();

        assert_eq!(a.values().len(), extractor.layout().dimension());
        assert_eq!(a, b);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.get("alignment.keyword_hit"), Some(1.0));
        assert_eq!(a.get("content.has_code"), Some(1.0));
        assert_eq!(a.get("url.documentation"), Some(1.0));
        assert!(a.get("alignment.keyword_overlap").unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_missing_content_is_zero_filled() {
        let extractor = extractor();
        let mission = Mission::new("Learn Python programming").unwrap();
        let record = normalize(
            &RawRequest::get("https://entertainment.example/funny-videos"),
            None,
            Utc::now(),
        );

        let vector = extractor.extract(&record, &mission, Utc::now()).await.unwrap();
        assert!(vector.sub(SubRange::ContentEmbedding).iter().all(|v| *v == 0.0));
        assert!(vector.sub(SubRange::Content).iter().all(|v| *v == 0.0));
        assert_eq!(vector.get("alignment.content_similarity"), Some(0.0));
        assert_eq!(vector.get("alignment.keyword_hit"), Some(0.0));
        assert!(vector.sub(SubRange::UrlEmbedding).iter().any(|v| *v != 0.0));
    }

    #[tokio::test]
    async fn test_mission_embedding_cached_per_fingerprint() {
        let extractor = extractor();
        let mission = Mission::new("Write a compiler").unwrap();
        let first = extractor.mission_embedding(&mission).await.unwrap();
        let second = extractor.mission_embedding(&mission).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = Mission::new("Plan a garden").unwrap();
        let third = extractor.mission_embedding(&other).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn test_temporal_slots_in_range() {
        let mission = Mission::default();
        let features = temporal_features(&mission, Utc::now());
        assert!(features.iter().all(|v| (0.0..=1.0).contains(v)));
    }
}
