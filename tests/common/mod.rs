//! Common test utilities and helpers

#![allow(dead_code)]

use anchorite_core::{
    DecisionOrchestrator, FilterConfig, HashingEncoder, RawRequest, ResponseMetadata, SemanticEncoder,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const PYTHON_MISSION: &str = "Learn Python programming for web development";

/// Test configuration rooted in `dir`, with exploration disabled
pub fn test_config(dir: &Path) -> FilterConfig {
    let mut config = FilterConfig::default();
    config.storage.db_path = dir.join("anchorite.db");
    config.storage.snapshot_path = dir.join("model.json");
    config.model.initial_exploration = 0.0;
    config.model.min_exploration = 0.0;
    config.latency.decision_budget_ms = 2_000;
    config
}

pub async fn open_with(config: FilterConfig, encoder: Arc<dyn SemanticEncoder>) -> DecisionOrchestrator {
    DecisionOrchestrator::with_encoder(config, encoder)
        .await
        .expect("Failed to open orchestrator")
}

/// Orchestrator on a fresh database with the Python mission set
pub async fn create_test_orchestrator() -> (DecisionOrchestrator, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = open_with(test_config(temp_dir.path()), Arc::new(HashingEncoder::new(128))).await;
    orchestrator
        .set_mission(PYTHON_MISSION, None, None)
        .await
        .expect("Failed to set mission");
    (orchestrator, temp_dir)
}

/// Wait until the learning task has stored `expected` feedback rows
pub async fn wait_for_feedback_rows(orchestrator: &DecisionOrchestrator, expected: u64) {
    for _ in 0..200 {
        if orchestrator.stats().await.store.feedback >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("feedback rows never reached {}", expected);
}

pub fn python_tutorial() -> (RawRequest, ResponseMetadata) {
    (
        RawRequest::get("https://docs.python.org/3/tutorial/"),
        ResponseMetadata {
            title: "The Python Tutorial".to_string(),
            ..Default::default()
        },
    )
}

pub fn funny_videos() -> (RawRequest, ResponseMetadata) {
    (
        RawRequest::get("https://entertainment.example/funny-videos"),
        ResponseMetadata {
            title: "Funny videos you can't stop watching".to_string(),
            has_video: true,
            image_count: 24,
            ..Default::default()
        },
    )
}
