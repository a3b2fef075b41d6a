//! Seed-list pretraining
//!
//! A labelled seed list trains the cold-start model once, is published as one
//! version, survives a restart as the snapshot, and never counts as feedback.

mod common;

use anchorite_core::learning::SeedSet;
use anchorite_core::{Action, HashingEncoder, ModelOrigin};
use common::{create_test_orchestrator, funny_videos, open_with, python_tutorial, test_config};
use std::sync::Arc;

const SEED_EXAMPLES: &str = include_str!("../assets/seed_examples.json");

#[tokio::test]
async fn test_bootstrap_publishes_one_version() {
    let (orchestrator, temp_dir) = create_test_orchestrator().await;
    let seeds = SeedSet::from_json_str(SEED_EXAMPLES).unwrap();
    let before = orchestrator.current_model();

    let step = orchestrator.bootstrap(&seeds).await.unwrap();

    let after = orchestrator.current_model();
    assert_eq!(step, 1);
    assert_eq!(after.training_step, 1);
    assert_eq!(after.version, before.version + 1);
    assert_eq!(after.feedback_seen, 0);
    assert_eq!(after.exploration_rate, before.exploration_rate);
    assert!(temp_dir.path().join("model.json").exists());

    let stats = orchestrator.stats().await;
    assert_eq!(stats.metrics.feedback_received, 0);
    assert_eq!(stats.store.feedback, 0);
}

#[tokio::test]
async fn test_bootstrapped_model_keeps_reference_scenario() {
    let (orchestrator, _temp) = create_test_orchestrator().await;
    let seeds = SeedSet::from_json_str(SEED_EXAMPLES).unwrap();
    orchestrator.bootstrap(&seeds).await.unwrap();

    let (request, response) = python_tutorial();
    let docs = orchestrator.decide(&request, Some(&response)).await;
    assert_eq!(docs.action, Action::Allow);

    let (request, response) = funny_videos();
    let videos = orchestrator.decide(&request, Some(&response)).await;
    assert_eq!(videos.action, Action::Block);
}

#[tokio::test]
async fn test_bootstrapped_snapshot_loaded_on_restart() {
    let (orchestrator, temp_dir) = create_test_orchestrator().await;
    let seeds = SeedSet::from_json_str(SEED_EXAMPLES).unwrap();
    orchestrator.bootstrap(&seeds).await.unwrap();
    let trained = orchestrator.current_model();
    orchestrator.shutdown().await.unwrap();
    drop(orchestrator);

    let reopened = open_with(test_config(temp_dir.path()), Arc::new(HashingEncoder::new(128))).await;
    let model = reopened.current_model();
    assert_eq!(model.origin, ModelOrigin::Snapshot);
    assert_eq!(model.training_step, trained.training_step);
    assert_eq!(model.version, trained.version);
}
