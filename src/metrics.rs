//! Decision metrics
//!
//! Lock-free counters updated on the request path and read as a serializable
//! snapshot by `stats` and by whatever monitoring wraps the engine.

use crate::types::{Action, Decision, DecisionSource};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct FilterMetrics {
    decisions: AtomicU64,
    allowed: AtomicU64,
    blocked: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    fallbacks: AtomicU64,
    timeouts: AtomicU64,
    explorations: AtomicU64,
    latency_micros: AtomicU64,
    feedback_received: AtomicU64,
    feedback_dropped: AtomicU64,
    /// Feedback on decisions exploration left alone
    feedback_scored: AtomicU64,
    /// Of which the user agreed with the decision
    feedback_correct: AtomicU64,
}

/// Point-in-time view of [`FilterMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub decisions: u64,
    pub allowed: u64,
    pub blocked: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub avg_latency_ms: f64,
    pub fallbacks: u64,
    pub timeouts: u64,
    pub explorations: u64,
    pub feedback_received: u64,
    pub feedback_dropped: u64,
    /// Share of unexplored decisions the user marked correct, if any feedback
    pub accuracy: Option<f64>,
    pub exploration_rate: f32,
    pub model_version: u64,
    pub training_step: u64,
}

impl FilterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_decision(&self, decision: &Decision, latency: Duration) {
        self.decisions.fetch_add(1, Ordering::Relaxed);
        match decision.action {
            Action::Allow => self.allowed.fetch_add(1, Ordering::Relaxed),
            Action::Block => self.blocked.fetch_add(1, Ordering::Relaxed),
        };
        match decision.source {
            DecisionSource::Cache => self.cache_hits.fetch_add(1, Ordering::Relaxed),
            DecisionSource::Model => self.cache_misses.fetch_add(1, Ordering::Relaxed),
            DecisionSource::Fallback => {
                self.cache_misses.fetch_add(1, Ordering::Relaxed);
                self.fallbacks.fetch_add(1, Ordering::Relaxed)
            }
        };
        if decision.explored {
            self.explorations.fetch_add(1, Ordering::Relaxed);
        }
        self.latency_micros
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// `agreed` is ignored for explored decisions
    pub fn record_feedback(&self, explored: bool, agreed: bool) {
        self.feedback_received.fetch_add(1, Ordering::Relaxed);
        if !explored {
            self.feedback_scored.fetch_add(1, Ordering::Relaxed);
            if agreed {
                self.feedback_correct.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_feedback_dropped(&self) {
        self.feedback_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, exploration_rate: f32, model_version: u64, training_step: u64) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let decisions = load(&self.decisions);
        let hits = load(&self.cache_hits);
        let misses = load(&self.cache_misses);
        let scored = load(&self.feedback_scored);

        MetricsSnapshot {
            decisions,
            allowed: load(&self.allowed),
            blocked: load(&self.blocked),
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_rate: ratio(hits, hits + misses),
            avg_latency_ms: ratio(load(&self.latency_micros), decisions) / 1000.0,
            fallbacks: load(&self.fallbacks),
            timeouts: load(&self.timeouts),
            explorations: load(&self.explorations),
            feedback_received: load(&self.feedback_received),
            feedback_dropped: load(&self.feedback_dropped),
            accuracy: (scored > 0).then(|| ratio(load(&self.feedback_correct), scored)),
            exploration_rate,
            model_version,
            training_step,
        }
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::Fingerprint;
    use crate::types::DecisionId;
    use chrono::Utc;

    fn decision(action: Action, source: DecisionSource, explored: bool) -> Decision {
        Decision {
            id: DecisionId::new(),
            url: "https://example.com/".to_string(),
            mission_fingerprint: Fingerprint::from_text("m"),
            feature_hash: String::new(),
            action,
            confidence: 0.5,
            allow_score: 0.75,
            block_score: 0.25,
            source,
            explored,
            model_version: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_snapshot_rates() {
        let metrics = FilterMetrics::new();
        metrics.record_decision(&decision(Action::Allow, DecisionSource::Model, false), Duration::from_millis(4));
        metrics.record_decision(&decision(Action::Allow, DecisionSource::Cache, false), Duration::from_millis(1));
        metrics.record_decision(&decision(Action::Block, DecisionSource::Fallback, true), Duration::from_millis(1));

        let snap = metrics.snapshot(0.1, 3, 2);
        assert_eq!(snap.decisions, 3);
        assert_eq!(snap.allowed, 2);
        assert_eq!(snap.blocked, 1);
        assert!((snap.cache_hit_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((snap.avg_latency_ms - 2.0).abs() < 1e-9);
        assert_eq!(snap.fallbacks, 1);
        assert_eq!(snap.explorations, 1);
        assert_eq!(snap.accuracy, None);
    }

    #[test]
    fn test_accuracy_excludes_explored_decisions() {
        let metrics = FilterMetrics::new();
        metrics.record_feedback(false, true);
        metrics.record_feedback(false, false);
        metrics.record_feedback(true, false);
        metrics.record_feedback_dropped();

        let snap = metrics.snapshot(0.0, 1, 0);
        assert_eq!(snap.feedback_received, 3);
        assert_eq!(snap.feedback_dropped, 1);
        assert_eq!(snap.accuracy, Some(0.5));
    }
}
