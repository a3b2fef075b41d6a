//! Scoring model
//!
//! A two-head linear softmax over the feature vector. The active
//! [`ModelState`] is immutable: the learning loop trains a private copy and
//! publishes a new `Arc<ModelState>`, so readers always see a whole snapshot.
//!
//! Load order at startup: snapshot file, bundled prior, heuristic.

pub mod heuristic;
pub mod snapshot;

pub use heuristic::HeuristicScorer;
pub use snapshot::{load_model_state, save_snapshot, ModelSnapshot};

use crate::error::{AnchoriteError, Result};
use crate::features::{FeatureLayout, FeatureVector};
use crate::types::{Action, DecisionSource};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Bundled cold-start weights
pub const PRETRAINED_PRIOR: &str = include_str!("../../assets/pretrained_prior.json");

/// Allow and block probabilities for one vector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scores {
    pub allow: f32,
    pub block: f32,
}

impl Scores {
    /// Larger score wins; equal scores go to `tie`
    pub fn action(&self, tie: Action) -> Action {
        if self.allow > self.block {
            Action::Allow
        } else if self.block > self.allow {
            Action::Block
        } else {
            tie
        }
    }

    /// Margin between the two scores, normalized to [0, 1]
    pub fn confidence(&self) -> f32 {
        let total = self.allow.abs() + self.block.abs();
        if total == 0.0 {
            0.0
        } else {
            ((self.allow - self.block).abs() / total).clamp(0.0, 1.0)
        }
    }
}

/// Linear softmax model with one weight row per action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub allow_weights: Vec<f32>,
    pub allow_bias: f32,
    pub block_weights: Vec<f32>,
    pub block_bias: f32,
}

#[derive(Debug, Deserialize)]
struct Prior {
    format_version: u32,
    allow_bias: f32,
    block_bias: f32,
    weights: HashMap<String, f32>,
}

impl LinearModel {
    pub fn zeros(dimension: usize) -> Self {
        Self {
            allow_weights: vec![0.0; dimension],
            allow_bias: 0.0,
            block_weights: vec![0.0; dimension],
            block_bias: 0.0,
        }
    }

    /// Build from a prior keyed by named slots; unknown names are an error
    pub fn from_prior(layout: &FeatureLayout, prior_json: &str) -> Result<Self> {
        let prior: Prior = serde_json::from_str(prior_json)?;
        if prior.format_version != 1 {
            return Err(AnchoriteError::Validation(format!(
                "Unsupported prior format version {}",
                prior.format_version
            )));
        }

        let mut model = Self::zeros(layout.dimension());
        model.allow_bias = prior.allow_bias;
        model.block_bias = prior.block_bias;
        for (name, weight) in prior.weights {
            let index = layout.named_index(&name).ok_or_else(|| {
                AnchoriteError::Validation(format!("Prior names unknown feature '{}'", name))
            })?;
            model.allow_weights[index] = weight;
            model.block_weights[index] = -weight;
        }
        Ok(model)
    }

    pub fn dimension(&self) -> usize {
        self.allow_weights.len()
    }

    fn logits(&self, x: &[f32]) -> (f32, f32) {
        let dot = |w: &[f32]| w.iter().zip(x).map(|(w, x)| w * x).sum::<f32>();
        (
            dot(&self.allow_weights) + self.allow_bias,
            dot(&self.block_weights) + self.block_bias,
        )
    }

    pub fn scores(&self, x: &[f32]) -> Scores {
        let (za, zb) = self.logits(x);
        let max = za.max(zb);
        let ea = (za - max).exp();
        let eb = (zb - max).exp();
        Scores {
            allow: ea / (ea + eb),
            block: eb / (ea + eb),
        }
    }

    /// One cross-entropy gradient step toward `target`
    pub fn update(&mut self, x: &[f32], target: Action, learning_rate: f32, l2_decay: f32) {
        let scores = self.scores(x);
        let (ya, yb) = match target {
            Action::Allow => (1.0, 0.0),
            Action::Block => (0.0, 1.0),
        };
        let grad_allow = scores.allow - ya;
        let grad_block = scores.block - yb;

        for (w, xi) in self.allow_weights.iter_mut().zip(x) {
            *w -= learning_rate * (grad_allow * xi + l2_decay * *w);
        }
        for (w, xi) in self.block_weights.iter_mut().zip(x) {
            *w -= learning_rate * (grad_block * xi + l2_decay * *w);
        }
        self.allow_bias -= learning_rate * grad_allow;
        self.block_bias -= learning_rate * grad_block;
    }
}

/// What the active state scores with
#[derive(Debug, Clone, PartialEq)]
pub enum Scorer {
    Linear(LinearModel),
    Heuristic(HeuristicScorer),
}

/// Where the active weights came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelOrigin {
    Snapshot,
    Prior,
    Heuristic,
}

impl std::fmt::Display for ModelOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelOrigin::Snapshot => write!(f, "snapshot"),
            ModelOrigin::Prior => write!(f, "prior"),
            ModelOrigin::Heuristic => write!(f, "heuristic"),
        }
    }
}

/// Versioned, immutable model snapshot used for inference
#[derive(Debug, Clone, PartialEq)]
pub struct ModelState {
    pub layout_signature: String,
    pub version: u64,
    pub training_step: u64,
    pub exploration_rate: f32,
    /// Feedback events applied so far, drives exploration annealing
    pub feedback_seen: u64,
    pub origin: ModelOrigin,
    pub scorer: Scorer,
}

/// Result of scoring one vector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreOutcome {
    pub scores: Scores,
    pub action: Action,
    pub confidence: f32,
    pub source: DecisionSource,
}

impl ModelState {
    pub fn linear(layout: &FeatureLayout, model: LinearModel, origin: ModelOrigin, exploration_rate: f32) -> Self {
        Self {
            layout_signature: layout.signature().to_string(),
            version: 1,
            training_step: 0,
            exploration_rate,
            feedback_seen: 0,
            origin,
            scorer: Scorer::Linear(model),
        }
    }

    /// Last-resort state: mission similarity against a threshold, never trained
    pub fn heuristic(layout: &FeatureLayout) -> Self {
        Self {
            layout_signature: layout.signature().to_string(),
            version: 0,
            training_step: 0,
            exploration_rate: 0.0,
            feedback_seen: 0,
            origin: ModelOrigin::Heuristic,
            scorer: Scorer::Heuristic(HeuristicScorer),
        }
    }

    pub fn is_trainable(&self) -> bool {
        matches!(self.scorer, Scorer::Linear(_))
    }

    /// Score a vector; fails if the vector was built with another layout
    pub fn score(&self, vector: &FeatureVector, threshold: f32, tie: Action) -> Result<ScoreOutcome> {
        if vector.layout().signature() != self.layout_signature {
            return Err(AnchoriteError::LayoutMismatch {
                expected: self.layout_signature.clone(),
                actual: vector.layout().signature().to_string(),
            });
        }

        let (scores, source) = match &self.scorer {
            Scorer::Linear(model) => {
                if model.dimension() != vector.values().len() {
                    return Err(AnchoriteError::LayoutMismatch {
                        expected: format!("{} values", model.dimension()),
                        actual: format!("{} values", vector.values().len()),
                    });
                }
                (model.scores(vector.values()), DecisionSource::Model)
            }
            Scorer::Heuristic(heuristic) => (heuristic.scores(vector, threshold), DecisionSource::Fallback),
        };

        Ok(ScoreOutcome {
            scores,
            action: scores.action(tie),
            confidence: scores.confidence(),
            source,
        })
    }
}
