//! Fail-open behavior
//!
//! A slow or broken encoder must never surface as an error or a block:
//! the orchestrator returns the configured timeout action with
//! `source = fallback` and does not cache it.

mod common;

use anchorite_core::{
    Action, AnchoriteError, DecisionSource, Feedback, HashingEncoder, Result, SemanticEncoder,
};
use async_trait::async_trait;
use common::{funny_videos, open_with, python_tutorial, test_config};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Sleeps past any reasonable budget before encoding
struct SlowEncoder {
    inner: HashingEncoder,
    delay: Duration,
}

#[async_trait]
impl SemanticEncoder for SlowEncoder {
    async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        tokio::time::sleep(self.delay).await;
        self.inner.encode(text).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Always fails
struct BrokenEncoder;

#[async_trait]
impl SemanticEncoder for BrokenEncoder {
    async fn encode(&self, _text: &str) -> Result<Vec<f32>> {
        Err(AnchoriteError::Embedding("model offline".to_string()))
    }

    fn dimensions(&self) -> usize {
        32
    }

    fn name(&self) -> &str {
        "broken"
    }
}

#[tokio::test]
async fn test_timeout_fails_open() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(temp_dir.path());
    config.latency.decision_budget_ms = 20;
    let encoder = SlowEncoder {
        inner: HashingEncoder::new(32),
        delay: Duration::from_millis(500),
    };
    let orchestrator = open_with(config, Arc::new(encoder)).await;
    let (request, response) = funny_videos();

    let decision = orchestrator.decide(&request, Some(&response)).await;

    assert_eq!(decision.action, Action::Allow);
    assert_eq!(decision.source, DecisionSource::Fallback);
    assert_eq!(decision.confidence, 0.0);
    assert!(decision.feature_hash.is_empty());

    // Not cached: the next call tries the model path again
    let again = orchestrator.decide(&request, Some(&response)).await;
    assert_eq!(again.source, DecisionSource::Fallback);
    assert_ne!(again.id, decision.id);

    let stats = orchestrator.stats().await;
    assert_eq!(stats.metrics.timeouts, 2);
    assert_eq!(stats.metrics.fallbacks, 2);
    assert_eq!(stats.store.decisions, 0);
}

#[tokio::test]
async fn test_timeout_action_is_configurable() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(temp_dir.path());
    config.latency.decision_budget_ms = 10;
    config.policy.timeout_action = Action::Block;
    let encoder = SlowEncoder {
        inner: HashingEncoder::new(32),
        delay: Duration::from_millis(300),
    };
    let orchestrator = open_with(config, Arc::new(encoder)).await;
    let (request, response) = python_tutorial();

    let decision = orchestrator.decide(&request, Some(&response)).await;

    assert_eq!(decision.action, Action::Block);
    assert_eq!(decision.source, DecisionSource::Fallback);
}

#[tokio::test]
async fn test_encoder_failure_fails_open() {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = open_with(test_config(temp_dir.path()), Arc::new(BrokenEncoder)).await;
    let (request, response) = funny_videos();

    let decision = orchestrator.decide(&request, Some(&response)).await;

    assert_eq!(decision.action, Action::Allow);
    assert_eq!(decision.source, DecisionSource::Fallback);
    assert_eq!(orchestrator.stats().await.metrics.timeouts, 0);

    // Feedback on a fallback decision is recorded but has nothing to train on
    orchestrator
        .submit_feedback(decision.id, Feedback::ShouldBlock)
        .await
        .unwrap();
    assert_eq!(orchestrator.flush().await.unwrap(), 0);
    let stats = orchestrator.stats().await;
    assert_eq!(stats.metrics.feedback_received, 1);
    assert_eq!(stats.store.feedback, 1);
}
