//! Labelled seed lists for cold-start pretraining
//!
//! A seed file names pages a mission should allow or block. Examples are
//! extracted into feature vectors and handed to the learning loop as one
//! pretraining batch.

use crate::error::{AnchoriteError, Result};
use crate::features::{FeatureExtractor, FeatureVector};
use crate::mission::Mission;
use crate::normalizer::{normalize, RawRequest, ResponseMetadata};
use crate::types::Action;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_EPOCHS: usize = 5;

/// One labelled page
#[derive(Debug, Clone, Deserialize)]
pub struct SeedExample {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub has_video: bool,
    #[serde(default)]
    pub has_forms: bool,
    /// Overrides the file's mission for this example
    #[serde(default)]
    pub mission: Option<String>,
    pub label: Action,
}

/// Parsed seed file
#[derive(Debug, Clone, Deserialize)]
pub struct SeedSet {
    #[serde(default)]
    pub mission: Option<String>,
    #[serde(default)]
    pub epochs: Option<usize>,
    pub examples: Vec<SeedExample>,
}

impl SeedSet {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let set: SeedSet = serde_json::from_str(raw)?;
        if set.examples.is_empty() {
            return Err(AnchoriteError::Validation("Seed list has no examples".to_string()));
        }
        if set.epochs == Some(0) {
            return Err(AnchoriteError::Validation("Seed epochs must be at least 1".to_string()));
        }
        Ok(set)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    pub fn epochs(&self) -> usize {
        self.epochs.unwrap_or(DEFAULT_EPOCHS)
    }

    /// Extract every example; `fallback` is used when neither the example nor
    /// the file names a mission
    pub async fn extract(
        &self,
        extractor: &FeatureExtractor,
        fallback: &Arc<Mission>,
    ) -> Result<Vec<(FeatureVector, Action)>> {
        let now = Utc::now();
        let mut missions: HashMap<String, Arc<Mission>> = HashMap::new();
        let mut samples = Vec::with_capacity(self.examples.len());

        for example in &self.examples {
            let mission = match example.mission.as_ref().or(self.mission.as_ref()) {
                Some(text) => match missions.get(text) {
                    Some(mission) => Arc::clone(mission),
                    None => {
                        let mission = Arc::new(Mission::with_threshold(text.as_str(), fallback.threshold)?);
                        missions.insert(text.clone(), Arc::clone(&mission));
                        mission
                    }
                },
                None => Arc::clone(fallback),
            };

            let response = ResponseMetadata {
                title: example.title.clone(),
                description: example.description.clone(),
                keywords: example.keywords.clone(),
                has_video: example.has_video,
                has_forms: example.has_forms,
                ..Default::default()
            };
            let record = normalize(&RawRequest::get(example.url.as_str()), Some(&response), now);
            let features = extractor.extract(&record, &mission, now).await?;
            samples.push((features, example.label));
        }

        debug!(
            examples = samples.len(),
            missions = missions.len(),
            "Seed examples extracted"
        );
        Ok(samples)
    }
}
