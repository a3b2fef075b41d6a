//! Transparent fallback scorer
//!
//! Mission similarity is the stronger of mission/content and mission/URL
//! cosine, blended half and half with keyword evidence (a mission keyword
//! present in the URL or content). Allows when that similarity clears the
//! mission threshold. It reads the alignment slots the extractor already
//! filled, so it costs nothing beyond extraction.

use super::Scores;
use crate::features::FeatureVector;

/// Share of the similarity taken from keyword evidence
const KEYWORD_WEIGHT: f32 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HeuristicScorer;

impl HeuristicScorer {
    pub fn similarity(&self, vector: &FeatureVector) -> f32 {
        let slot = |name: &str| vector.get(name).unwrap_or(0.0).clamp(0.0, 1.0);
        let cosine = slot("alignment.url_similarity").max(slot("alignment.content_similarity"));
        let keywords = slot("alignment.keyword_hit").max(slot("alignment.keyword_overlap"));
        (1.0 - KEYWORD_WEIGHT) * cosine + KEYWORD_WEIGHT * keywords
    }

    /// `allow` is the similarity and `block` the threshold, so the larger wins
    pub fn scores(&self, vector: &FeatureVector, threshold: f32) -> Scores {
        Scores {
            allow: self.similarity(vector).clamp(0.0, 1.0),
            block: threshold.clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureLayout, SubRange};
    use crate::model::ModelState;
    use crate::types::{Action, DecisionSource};
    use std::sync::Arc;

    fn vector_with(url: f32, content: f32, keyword_hit: f32) -> FeatureVector {
        let layout = Arc::new(FeatureLayout::new("enc", 4));
        let mut vector = FeatureVector::zeros(layout);
        let alignment = vector.sub_mut(SubRange::Alignment);
        alignment[0] = url;
        alignment[1] = content;
        alignment[2] = keyword_hit;
        vector
    }

    #[test]
    fn test_threshold_decides() {
        let heuristic = HeuristicScorer;
        // Keyword present, weak cosine
        assert_eq!(heuristic.scores(&vector_with(0.2, 0.1, 1.0), 0.4).action(Action::Allow), Action::Allow);
        // No keyword, weak cosine
        assert_eq!(heuristic.scores(&vector_with(0.3, 0.4, 0.0), 0.4).action(Action::Allow), Action::Block);
        // No keyword, near-identical text
        assert_eq!(heuristic.scores(&vector_with(0.95, 0.0, 0.0), 0.4).action(Action::Allow), Action::Allow);
        assert!((heuristic.similarity(&vector_with(0.7, 0.1, 0.0)) - 0.35).abs() < 1e-6);
    }

    #[test]
    fn test_negative_slots_do_not_subtract() {
        let heuristic = HeuristicScorer;
        assert_eq!(heuristic.similarity(&vector_with(-0.5, -0.5, 0.0)), 0.0);
    }

    #[test]
    fn test_heuristic_state_reports_fallback() {
        let vector = vector_with(0.9, 0.0, 1.0);
        let state = ModelState::heuristic(vector.layout());
        let outcome = state.score(&vector, 0.4, Action::Allow).unwrap();
        assert_eq!(outcome.action, Action::Allow);
        assert_eq!(outcome.source, DecisionSource::Fallback);
        assert!(!state.is_trainable());
    }
}
