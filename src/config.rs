//! Filter configuration
//!
//! Layered loading: built-in defaults, then an optional TOML file, then
//! `ANCHORITE_` environment variables with `__` separating nested keys,
//! e.g. `ANCHORITE_CACHE__TTL_SECS=600`.

use crate::error::{AnchoriteError, Result};
use crate::types::Action;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Top-level configuration for the filtering engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub storage: StorageConfig,
    pub encoder: EncoderConfig,
    pub cache: CacheConfig,
    pub model: ModelConfig,
    pub learning: LearningConfig,
    pub latency: LatencyConfig,
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding decisions, feedback and the mission record
    pub db_path: PathBuf,
    pub pool_size: usize,
    /// Versioned model weights snapshot
    pub snapshot_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = default_data_dir();
        Self {
            db_path: base.join("anchorite.db"),
            pool_size: 4,
            snapshot_path: base.join("model_snapshot.json"),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("anchorite"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Which semantic encoder to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderBackend {
    /// Feature-hashing encoder, no model download
    Hashing,
    /// fastembed ONNX model (requires the `local-embeddings` feature)
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub backend: EncoderBackend,
    /// Output dimension of the hashing encoder; the local backend reports its own
    pub dimensions: usize,
    /// fastembed model name for the local backend
    pub model_name: String,
    /// Characters of page text fed to the content embedding
    pub excerpt_chars: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            backend: EncoderBackend::Hashing,
            dimensions: 128,
            model_name: "nomic-embed-text-v1.5".to_string(),
            excerpt_chars: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    /// Entries kept in the in-memory front of the cache
    pub capacity: usize,
    /// Delete old-mission rows on mission change instead of ignoring them
    pub purge_on_mission_change: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            capacity: 1024,
            purge_on_mission_change: false,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub learning_rate: f32,
    pub l2_decay: f32,
    pub initial_exploration: f32,
    pub min_exploration: f32,
    /// Multiplicative decay of the exploration rate per feedback event
    pub exploration_decay: f32,
    /// Heuristic allow threshold on mission similarity
    pub heuristic_threshold: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            l2_decay: 1e-4,
            initial_exploration: 0.1,
            min_exploration: 0.01,
            exploration_decay: 0.995,
            heuristic_threshold: 0.4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub buffer_capacity: usize,
    pub batch_size: usize,
    /// Run an update after this many feedback events
    pub update_every: usize,
    /// Also run an update on this wall-clock interval if anything is pending
    pub update_interval_secs: u64,
    /// Bounded queue between feedback submission and the learning task
    pub queue_capacity: usize,
    /// Stored feedback records reloaded into the buffer at startup
    pub warm_start_records: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 10_000,
            batch_size: 32,
            update_every: 4,
            update_interval_secs: 60,
            queue_capacity: 256,
            warm_start_records: 1_000,
        }
    }
}

impl LearningConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyConfig {
    /// Budget for feature extraction plus scoring on a cache miss
    pub decision_budget_ms: u64,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            decision_budget_ms: 50,
        }
    }
}

impl LatencyConfig {
    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.decision_budget_ms)
    }
}

/// Failure and tie policies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Action when both scores are equal
    pub tie_action: Action,
    /// Action when the decision budget is exceeded or the path fails
    pub timeout_action: Action,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            tie_action: Action::Allow,
            timeout_action: Action::Allow,
        }
    }
}

impl FilterConfig {
    /// Load defaults, an optional TOML file and `ANCHORITE_` env overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults_json = serde_json::to_string(&FilterConfig::default())?;
        let mut builder =
            Config::builder().add_source(File::from_str(&defaults_json, FileFormat::Json));

        if let Some(path) = path {
            if !path.exists() {
                return Err(AnchoriteError::Validation(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            debug!("Loading config file {}", path.display());
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("ANCHORITE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: FilterConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: FilterConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| AnchoriteError::Other(format!("Failed to render config: {}", e)))
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: String) -> Result<()> {
            Err(AnchoriteError::Validation(msg))
        }
        fn unit(name: &str, value: f32) -> Result<()> {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{} must be in [0, 1], got {}", name, value));
            }
            Ok(())
        }

        if self.storage.pool_size == 0 {
            return invalid("storage.pool_size must be at least 1".to_string());
        }
        if self.encoder.dimensions == 0 {
            return invalid("encoder.dimensions must be at least 1".to_string());
        }
        if self.encoder.excerpt_chars == 0 {
            return invalid("encoder.excerpt_chars must be at least 1".to_string());
        }
        if self.cache.capacity == 0 {
            return invalid("cache.capacity must be at least 1".to_string());
        }

        unit("model.initial_exploration", self.model.initial_exploration)?;
        unit("model.min_exploration", self.model.min_exploration)?;
        unit("model.exploration_decay", self.model.exploration_decay)?;
        unit("model.heuristic_threshold", self.model.heuristic_threshold)?;
        if self.model.min_exploration > self.model.initial_exploration {
            return invalid(
                "model.min_exploration must not exceed model.initial_exploration".to_string(),
            );
        }
        if !(self.model.learning_rate > 0.0 && self.model.learning_rate <= 1.0) {
            return invalid(format!(
                "model.learning_rate must be in (0, 1], got {}",
                self.model.learning_rate
            ));
        }
        if self.model.l2_decay < 0.0 {
            return invalid("model.l2_decay must not be negative".to_string());
        }

        if self.learning.buffer_capacity == 0
            || self.learning.batch_size == 0
            || self.learning.update_every == 0
            || self.learning.queue_capacity == 0
        {
            return invalid("learning capacities and batch sizes must be at least 1".to_string());
        }
        if self.learning.update_interval_secs == 0 {
            return invalid("learning.update_interval_secs must be at least 1".to_string());
        }

        if self.latency.decision_budget_ms == 0 {
            return invalid("latency.decision_budget_ms must be at least 1".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = FilterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.ttl(), Duration::from_secs(300));
        assert_eq!(config.latency.budget(), Duration::from_millis(50));
        assert_eq!(config.policy.tie_action, Action::Allow);
        assert_eq!(config.policy.timeout_action, Action::Allow);
    }

    #[test]
    fn test_from_toml_partial() {
        let toml_str = r#"
            [cache]
            ttl_secs = 60

            [policy]
            timeout_action = "block"
        "#;

        let config = FilterConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.capacity, 1024);
        assert_eq!(config.policy.timeout_action, Action::Block);
        assert_eq!(config.policy.tie_action, Action::Allow);
    }

    #[test]
    fn test_validation_rejects_bad_probability() {
        let mut config = FilterConfig::default();
        config.model.initial_exploration = 1.5;
        assert!(config.validate().is_err());

        let mut config = FilterConfig::default();
        config.latency.decision_budget_ms = 0;
        assert!(config.validate().is_err());

        let mut config = FilterConfig::default();
        config.model.min_exploration = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip_and_file_layer() {
        let mut config = FilterConfig::default();
        config.encoder.dimensions = 64;
        let rendered = config.to_toml().unwrap();

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("anchorite.toml");
        std::fs::write(&path, rendered).unwrap();

        let loaded = FilterConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.encoder.dimensions, 64);
    }

    #[test]
    fn test_missing_file_is_error() {
        let missing = Path::new("/nonexistent/anchorite.toml");
        assert!(FilterConfig::load(Some(missing)).is_err());
    }
}
