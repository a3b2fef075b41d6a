//! Persistent storage for decisions, feedback and the mission record
//!
//! Decisions are keyed by (url, mission fingerprint); writing a decision for
//! an existing key replaces the previous row. Feedback rows are retained
//! indefinitely and carry a copy of the feature vector so they can be replayed.

pub mod schema;
pub mod sqlite;

pub use sqlite::SqliteDecisionStore;

use crate::error::Result;
use crate::features::{FeatureLayout, FeatureVector};
use crate::mission::{Fingerprint, Mission};
use crate::types::{Decision, DecisionId, DecisionState, FeedbackRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Feature values tagged with the layout that produced them
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureBlob {
    pub layout_signature: String,
    pub values: Vec<f32>,
}

impl FeatureBlob {
    pub fn from_vector(vector: &FeatureVector) -> Self {
        Self {
            layout_signature: vector.layout().signature().to_string(),
            values: vector.values().to_vec(),
        }
    }

    /// Rebuild a vector if it was produced under `layout`
    pub fn into_vector(self, layout: &Arc<FeatureLayout>) -> Option<FeatureVector> {
        if self.layout_signature != layout.signature() {
            return None;
        }
        FeatureVector::new(Arc::clone(layout), self.values).ok()
    }
}

/// Decision row with its lifecycle state
#[derive(Debug, Clone)]
pub struct StoredDecision {
    pub decision: Decision,
    pub state: DecisionState,
    pub features: Option<FeatureBlob>,
}

/// Feedback row
#[derive(Debug, Clone)]
pub struct StoredFeedback {
    pub record: FeedbackRecord,
    pub url: String,
    pub features: Option<FeatureBlob>,
    pub consumed: bool,
}

/// Row counts for statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub decisions: u64,
    pub feedback: u64,
    pub unconsumed_feedback: u64,
}

/// Storage backend used by the cache, the orchestrator and the learning loop
#[async_trait]
pub trait DecisionStore: Send + Sync {
    /// Insert or replace the decision for its (url, fingerprint) key
    async fn put_decision(
        &self,
        decision: &Decision,
        state: DecisionState,
        features: Option<&FeatureBlob>,
    ) -> Result<()>;

    async fn get_decision(&self, url: &str, fingerprint: &Fingerprint) -> Result<Option<StoredDecision>>;

    async fn get_decision_by_id(&self, id: DecisionId) -> Result<Option<StoredDecision>>;

    /// Move a decision to `fed_back`. Fails with `AlreadyFedBack` on a second
    /// call and `DecisionNotFound` for unknown ids.
    async fn mark_fed_back(&self, id: DecisionId) -> Result<()>;

    /// Delete decisions recorded under any other mission
    async fn purge_other_missions(&self, current: &Fingerprint) -> Result<usize>;

    /// Delete decisions created before `cutoff`
    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    async fn insert_feedback(
        &self,
        record: &FeedbackRecord,
        url: &str,
        features: Option<&FeatureBlob>,
    ) -> Result<()>;

    async fn mark_feedback_consumed(&self, ids: &[Uuid]) -> Result<()>;

    /// Most recent feedback first
    async fn recent_feedback(&self, limit: usize, unconsumed_only: bool) -> Result<Vec<StoredFeedback>>;

    async fn save_mission(&self, mission: &Mission) -> Result<()>;

    async fn load_mission(&self) -> Result<Option<Mission>>;

    async fn counts(&self) -> Result<StoreCounts>;
}
