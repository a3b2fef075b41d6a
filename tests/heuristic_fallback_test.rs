//! Heuristic fallback on the reference scenario
//!
//! With no snapshot and no usable prior the filter scores with the
//! similarity heuristic. It must still allow the Python tutorial and block
//! the entertainment page for the Python mission.

mod common;

use anchorite_core::mission::DEFAULT_THRESHOLD;
use anchorite_core::{
    normalize, Action, DecisionSource, FeatureExtractor, HashingEncoder, Mission, ModelState, RawRequest,
    ResponseMetadata,
};
use chrono::Utc;
use common::{funny_videos, python_tutorial, PYTHON_MISSION};
use std::sync::Arc;

async fn heuristic_action(request: RawRequest, response: ResponseMetadata) -> (Action, f32) {
    let extractor = FeatureExtractor::new(Arc::new(HashingEncoder::new(128)), 300);
    let mission = Mission::new(PYTHON_MISSION).unwrap();
    let now = Utc::now();
    let record = normalize(&request, Some(&response), now);
    let features = extractor.extract(&record, &mission, now).await.unwrap();

    let state = ModelState::heuristic(&extractor.layout());
    let outcome = state.score(&features, DEFAULT_THRESHOLD, Action::Allow).unwrap();
    assert_eq!(outcome.source, DecisionSource::Fallback);
    (outcome.action, outcome.scores.allow)
}

#[tokio::test]
async fn test_heuristic_allows_python_tutorial() {
    let (request, response) = python_tutorial();
    let (action, similarity) = heuristic_action(request, response).await;
    assert_eq!(action, Action::Allow, "similarity {}", similarity);
}

#[tokio::test]
async fn test_heuristic_blocks_entertainment_video() {
    let (request, response) = funny_videos();
    let (action, similarity) = heuristic_action(request, response).await;
    assert_eq!(action, Action::Block, "similarity {}", similarity);
}

#[tokio::test]
async fn test_heuristic_ranks_aligned_page_higher() {
    let (docs_request, docs_response) = python_tutorial();
    let (videos_request, videos_response) = funny_videos();
    let (_, docs) = heuristic_action(docs_request, docs_response).await;
    let (_, videos) = heuristic_action(videos_request, videos_response).await;
    assert!(docs > videos, "docs {} videos {}", docs, videos);
}
