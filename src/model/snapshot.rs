//! Model snapshot persistence
//!
//! Snapshots are JSON, written to a temporary file and renamed into place so a
//! crash mid-save leaves the previous snapshot intact.

use super::{LinearModel, ModelOrigin, ModelState, Scorer, PRETRAINED_PRIOR};
use crate::error::{AnchoriteError, Result};
use crate::features::FeatureLayout;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

const SNAPSHOT_FORMAT: u32 = 1;

/// On-disk form of a trainable model state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub format_version: u32,
    pub layout_signature: String,
    pub version: u64,
    pub training_step: u64,
    pub exploration_rate: f32,
    pub feedback_seen: u64,
    pub model: LinearModel,
    pub saved_at: DateTime<Utc>,
}

impl ModelSnapshot {
    pub fn from_state(state: &ModelState) -> Option<Self> {
        match &state.scorer {
            Scorer::Linear(model) => Some(Self {
                format_version: SNAPSHOT_FORMAT,
                layout_signature: state.layout_signature.clone(),
                version: state.version,
                training_step: state.training_step,
                exploration_rate: state.exploration_rate,
                feedback_seen: state.feedback_seen,
                model: model.clone(),
                saved_at: Utc::now(),
            }),
            Scorer::Heuristic(_) => None,
        }
    }

    fn into_state(self, layout: &FeatureLayout) -> Result<ModelState> {
        if self.format_version != SNAPSHOT_FORMAT {
            return Err(AnchoriteError::Validation(format!(
                "Unsupported snapshot format version {}",
                self.format_version
            )));
        }
        if self.layout_signature != layout.signature() || self.model.dimension() != layout.dimension() {
            return Err(AnchoriteError::LayoutMismatch {
                expected: layout.signature().to_string(),
                actual: self.layout_signature,
            });
        }
        if self.model.block_weights.len() != self.model.allow_weights.len() {
            return Err(AnchoriteError::Validation(
                "Snapshot weight rows have different lengths".to_string(),
            ));
        }

        Ok(ModelState {
            layout_signature: self.layout_signature,
            version: self.version,
            training_step: self.training_step,
            exploration_rate: self.exploration_rate.clamp(0.0, 1.0),
            feedback_seen: self.feedback_seen,
            origin: ModelOrigin::Snapshot,
            scorer: Scorer::Linear(self.model),
        })
    }
}

/// Load the active model: snapshot file, then `prior_json`, then heuristic
///
/// Never fails; every rejected source is logged.
pub async fn load_model_state(
    path: &Path,
    layout: &FeatureLayout,
    prior_json: Option<&str>,
    initial_exploration: f32,
) -> ModelState {
    match read_snapshot(path).await {
        Ok(Some(snapshot)) => match snapshot.into_state(layout) {
            Ok(state) => {
                info!(
                    version = state.version,
                    training_step = state.training_step,
                    "Loaded model snapshot from {}",
                    path.display()
                );
                return state;
            }
            Err(e) => warn!("Ignoring model snapshot {}: {}", path.display(), e),
        },
        Ok(None) => info!("No model snapshot at {}, using bundled prior", path.display()),
        Err(e) => warn!("Unreadable model snapshot {}: {}", path.display(), e),
    }

    match LinearModel::from_prior(layout, prior_json.unwrap_or(PRETRAINED_PRIOR)) {
        Ok(model) => ModelState::linear(layout, model, ModelOrigin::Prior, initial_exploration),
        Err(e) => {
            warn!("Bundled prior unusable ({}), falling back to heuristic scoring", e);
            ModelState::heuristic(layout)
        }
    }
}

async fn read_snapshot(path: &Path) -> Result<Option<ModelSnapshot>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Persist a trainable state atomically; heuristic states are not saved
pub async fn save_snapshot(path: &Path, state: &ModelState) -> Result<bool> {
    let Some(snapshot) = ModelSnapshot::from_state(state) else {
        return Ok(false);
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec(&snapshot)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout() -> FeatureLayout {
        FeatureLayout::new("enc", 8)
    }

    #[tokio::test]
    async fn test_missing_snapshot_uses_prior() {
        let dir = TempDir::new().unwrap();
        let state = load_model_state(&dir.path().join("model.json"), &layout(), None, 0.1).await;
        assert_eq!(state.origin, ModelOrigin::Prior);
        assert_eq!(state.exploration_rate, 0.1);
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("model.json");
        let layout = layout();

        let mut state = load_model_state(&path, &layout, None, 0.1).await;
        state.version = 7;
        state.training_step = 3;
        assert!(save_snapshot(&path, &state).await.unwrap());

        let reloaded = load_model_state(&path, &layout, None, 0.1).await;
        assert_eq!(reloaded.origin, ModelOrigin::Snapshot);
        assert_eq!(reloaded.version, 7);
        assert_eq!(reloaded.training_step, 3);
        assert_eq!(reloaded.scorer, state.scorer);
        assert!(!dir.path().join("nested").join("model.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_or_mismatched_snapshot_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");

        tokio::fs::write(&path, b"{not json").await.unwrap();
        let state = load_model_state(&path, &layout(), None, 0.1).await;
        assert_eq!(state.origin, ModelOrigin::Prior);

        let wide = FeatureLayout::new("enc", 16);
        let wide_state = load_model_state(&dir.path().join("other.json"), &wide, None, 0.1).await;
        save_snapshot(&path, &wide_state).await.unwrap();
        let state = load_model_state(&path, &layout(), None, 0.1).await;
        assert_eq!(state.origin, ModelOrigin::Prior);
        assert_eq!(state.layout_signature, layout().signature());
    }

    #[tokio::test]
    async fn test_broken_prior_falls_back_to_heuristic() {
        let dir = TempDir::new().unwrap();
        let state = load_model_state(&dir.path().join("model.json"), &layout(), Some("{}"), 0.1).await;
        assert_eq!(state.origin, ModelOrigin::Heuristic);

        assert!(!save_snapshot(&dir.path().join("model.json"), &state).await.unwrap());
    }
}
