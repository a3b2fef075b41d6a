//! Concurrent use of one orchestrator
//!
//! Tests that parallel callers see consistent state:
//! - Many `decide` calls on shared and distinct URLs while the model trains
//! - Every decision is scored by one whole published model
//! - Racing feedback on one decision is accepted exactly once

mod common;

use anchorite_core::{Action, AnchoriteError, Decision, DecisionSource, Feedback, HashingEncoder, RawRequest};
use common::{create_test_orchestrator, open_with, python_tutorial, test_config};
use std::collections::HashMap;
use std::sync::Arc;

fn clip_request(i: usize) -> RawRequest {
    RawRequest::get(format!("https://videos.example/clips/{}", i))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_decisions_during_training() {
    let (orchestrator, _temp) = create_test_orchestrator().await;
    let orchestrator = Arc::new(orchestrator);
    let start_version = orchestrator.current_model().version;

    // Feedback waiting to be trained on while decisions run
    for i in 0..3 {
        let decision = orchestrator.decide(&clip_request(1_000 + i), None).await;
        orchestrator
            .submit_feedback(decision.id, Feedback::ShouldAllow)
            .await
            .unwrap();
    }

    let mut tasks = Vec::new();
    for i in 0..48 {
        let orchestrator = Arc::clone(&orchestrator);
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                let (request, response) = python_tutorial();
                orchestrator.decide(&request, Some(&response)).await
            } else {
                orchestrator.decide(&clip_request(i), None).await
            }
        }));
    }
    let flush = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.flush().await })
    };

    let mut decisions: Vec<Decision> = Vec::new();
    for task in tasks {
        decisions.push(task.await.unwrap());
    }
    assert_eq!(flush.await.unwrap().unwrap(), 1);
    let end_version = orchestrator.current_model().version;
    assert!(end_version > start_version);

    // Same URL and same model version must mean the same scores
    let mut seen: HashMap<(String, u64), (f32, f32)> = HashMap::new();
    for decision in &decisions {
        assert!(decision.model_version >= start_version && decision.model_version <= end_version);
        assert_ne!(decision.source, DecisionSource::Fallback, "{:?}", decision);
        assert!((decision.allow_score + decision.block_score - 1.0).abs() < 1e-4);
        if decision.source == DecisionSource::Cache {
            continue;
        }
        let key = (decision.url.clone(), decision.model_version);
        let scores = (decision.allow_score, decision.block_score);
        if let Some(previous) = seen.insert(key, scores) {
            assert_eq!(previous, scores, "torn scores for {}", decision.url);
        }
    }

    let stats = orchestrator.stats().await;
    assert_eq!(stats.metrics.decisions, 51);
    assert_eq!(stats.metrics.fallbacks, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_feedback_accepted_once() {
    let (orchestrator, _temp) = create_test_orchestrator().await;
    let orchestrator = Arc::new(orchestrator);
    let (request, response) = python_tutorial();
    let id = orchestrator.decide(&request, Some(&response)).await.id;

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.submit_feedback(id, Feedback::Correct).await })
    };
    let second = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.submit_feedback(id, Feedback::Incorrect).await })
    };
    let results = [first.await.unwrap(), second.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(AnchoriteError::AlreadyFedBack(_)))));

    orchestrator.flush().await.unwrap();
    let stats = orchestrator.stats().await;
    assert_eq!(stats.metrics.feedback_received, 1);
    assert_eq!(stats.metrics.feedback_dropped, 1);
    assert_eq!(stats.store.feedback, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_feedback_on_stored_decision_accepted_once() {
    let (orchestrator, temp_dir) = create_test_orchestrator().await;
    let (request, response) = python_tutorial();
    let issued = orchestrator.decide(&request, Some(&response)).await;
    orchestrator.shutdown().await.unwrap();
    drop(orchestrator);

    // After a restart the decision is only known to the store
    let reopened = Arc::new(open_with(test_config(temp_dir.path()), Arc::new(HashingEncoder::new(128))).await);
    let hit = reopened.decide(&request, Some(&response)).await;
    assert_eq!(hit.source, DecisionSource::Cache);
    assert_eq!(hit.id, issued.id);

    let id = hit.id;
    let racers: Vec<_> = (0..4)
        .map(|_| {
            let reopened = Arc::clone(&reopened);
            tokio::spawn(async move { reopened.submit_feedback(id, Feedback::ShouldAllow).await })
        })
        .collect();
    let mut accepted = 0;
    for racer in racers {
        match racer.await.unwrap() {
            Ok(()) => accepted += 1,
            Err(e) => assert!(matches!(e, AnchoriteError::AlreadyFedBack(_)), "{}", e),
        }
    }
    assert_eq!(accepted, 1);

    reopened.flush().await.unwrap();
    assert_eq!(reopened.stats().await.store.feedback, 1);
    assert_eq!(hit.action, Action::Allow);
}
