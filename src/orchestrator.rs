//! Decision orchestrator
//!
//! The single entry point used by the interception host. `decide` never fails:
//! cache hits are returned directly, misses are extracted and scored under the
//! latency budget, and anything that goes wrong on that path degrades to the
//! configured fail-open action. Feedback claims its decision and is handed to
//! the learning loop, which stores and trains on it off the caller's path.
//!
//! The active mission and model are explicit, atomically swapped values
//! (`watch` channels holding `Arc`s). Each `decide` call reads both once at the
//! start and works against that pair even if either is replaced mid-flight.

use crate::cache::DecisionCache;
use crate::config::FilterConfig;
use crate::embeddings::{build_encoder, SemanticEncoder};
use crate::error::{AnchoriteError, Result};
use crate::features::{FeatureExtractor, FeatureVector};
use crate::learning::{FeedbackJob, LearningHandle, LearningLoop, SeedSet};
use crate::metrics::{FilterMetrics, MetricsSnapshot};
use crate::mission::{Fingerprint, Mission, DEFAULT_MISSION};
use crate::model::{load_model_state, HeuristicScorer, ModelOrigin, ModelState, ScoreOutcome};
use crate::normalizer::{normalize, ContentRecord, RawRequest, ResponseMetadata};
use crate::storage::{DecisionStore, SqliteDecisionStore, StoreCounts};
use crate::types::{Decision, DecisionId, DecisionSource, DecisionState, Feedback, FeedbackRecord};
use chrono::{DateTime, Utc};
use lru::LruCache;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Issued decisions kept in memory for feedback lookup
const RECENT_DECISIONS: usize = 4096;

/// Issued decision remembered for feedback
#[derive(Debug, Clone)]
struct RecentDecision {
    decision: Decision,
    features: Option<FeatureVector>,
    fed_back: bool,
}

/// Everything `stats` reports
#[derive(Debug, Clone, Serialize)]
pub struct FilterStats {
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
    pub store: StoreCounts,
    pub mission: String,
    pub mission_fingerprint: Fingerprint,
    pub model_origin: ModelOrigin,
}

pub struct DecisionOrchestrator {
    config: FilterConfig,
    extractor: FeatureExtractor,
    cache: DecisionCache,
    store: Arc<dyn DecisionStore>,
    model: watch::Receiver<Arc<ModelState>>,
    mission: watch::Sender<Arc<Mission>>,
    metrics: FilterMetrics,
    learning: LearningHandle,
    recent: Mutex<LruCache<DecisionId, RecentDecision>>,
}

impl DecisionOrchestrator {
    /// Open with the encoder and SQLite store named in `config`
    pub async fn open(config: FilterConfig) -> Result<Self> {
        config.validate()?;
        let encoder = build_encoder(&config.encoder).await?;
        Self::with_encoder(config, encoder).await
    }

    /// Open with a caller-supplied encoder
    pub async fn with_encoder(config: FilterConfig, encoder: Arc<dyn SemanticEncoder>) -> Result<Self> {
        let store: Arc<dyn DecisionStore> = Arc::new(
            SqliteDecisionStore::open(&config.storage.db_path, config.storage.pool_size).await?,
        );
        Self::with_parts(config, encoder, store).await
    }

    pub async fn with_parts(
        config: FilterConfig,
        encoder: Arc<dyn SemanticEncoder>,
        store: Arc<dyn DecisionStore>,
    ) -> Result<Self> {
        let extractor = FeatureExtractor::new(encoder, config.encoder.excerpt_chars);
        let layout = extractor.layout();

        let state = load_model_state(
            &config.storage.snapshot_path,
            &layout,
            None,
            config.model.initial_exploration,
        )
        .await;
        info!(
            origin = %state.origin,
            version = state.version,
            layout = layout.signature(),
            "Model ready"
        );
        let (publisher, model) = watch::channel(Arc::new(state));

        let mission = match store.load_mission().await {
            Ok(Some(mission)) => mission,
            Ok(None) => Mission::with_threshold(DEFAULT_MISSION, config.model.heuristic_threshold)?,
            Err(e) => {
                warn!("Failed to load mission record, using default mission: {}", e);
                Mission::with_threshold(DEFAULT_MISSION, config.model.heuristic_threshold)?
            }
        };
        info!(fingerprint = %mission.fingerprint(), "Active mission: {}", mission.text());
        let (mission, _) = watch::channel(Arc::new(mission));

        let mut trainer = LearningLoop::new(
            publisher,
            Arc::clone(&store),
            layout,
            config.learning.clone(),
            config.model.clone(),
            config.storage.snapshot_path.clone(),
        );
        if let Err(e) = trainer.warm_start().await {
            warn!("Replay warm start failed: {}", e);
        }
        let learning = trainer.spawn();

        let cache = DecisionCache::new(Arc::clone(&store), config.cache.capacity, config.cache.ttl());
        let capacity = NonZeroUsize::new(RECENT_DECISIONS).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            config,
            extractor,
            cache,
            store,
            model,
            mission,
            metrics: FilterMetrics::new(),
            learning,
            recent: Mutex::new(LruCache::new(capacity)),
        })
    }

    fn recent(&self) -> std::sync::MutexGuard<'_, LruCache<DecisionId, RecentDecision>> {
        self.recent.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn current_mission(&self) -> Arc<Mission> {
        self.mission.borrow().clone()
    }

    pub fn current_model(&self) -> Arc<ModelState> {
        self.model.borrow().clone()
    }

    /// Allow or block one request against the current mission
    pub async fn decide(&self, request: &RawRequest, response: Option<&ResponseMetadata>) -> Decision {
        self.decide_with_mission(request, response).await.0
    }

    /// `decide`, also returning the mission the decision was made against
    pub async fn decide_with_mission(
        &self,
        request: &RawRequest,
        response: Option<&ResponseMetadata>,
    ) -> (Decision, Arc<Mission>) {
        let started = Instant::now();
        let now = Utc::now();
        let mission = self.current_mission();
        let model = self.current_model();
        let content = normalize(request, response, now);

        if let Some(hit) = self.cache.get(&content.url, mission.fingerprint(), now).await {
            let decision = hit.from_cache();
            debug!(
                url = %decision.url,
                action = %decision.action,
                source = %decision.source,
                "Decision served from cache"
            );
            self.metrics.record_decision(&decision, started.elapsed());
            return (decision, mission);
        }

        let budget = self.config.latency.budget();
        let scored = tokio::time::timeout(budget, self.score(&content, &mission, &model, now)).await;

        let decision = match scored {
            Ok(Ok((features, outcome))) => {
                let decision = self.assemble(&content, &mission, &model, &features, outcome, now);
                self.cache.put(&decision, Some(&features)).await;
                self.remember(&decision, Some(features));
                decision
            }
            Ok(Err(e)) => {
                warn!(url = %content.url, "Decision path failed, failing open: {}", e);
                let decision = self.fallback(&content, &mission, &model, now);
                self.remember(&decision, None);
                decision
            }
            Err(_) => {
                self.metrics.record_timeout();
                warn!(
                    url = %content.url,
                    budget_ms = budget.as_millis() as u64,
                    "Decision budget exceeded, failing open"
                );
                let decision = self.fallback(&content, &mission, &model, now);
                self.remember(&decision, None);
                decision
            }
        };

        self.metrics.record_decision(&decision, started.elapsed());
        (decision, mission)
    }

    /// Extract and score; a layout mismatch drops to the heuristic on the same vector
    async fn score(
        &self,
        content: &ContentRecord,
        mission: &Mission,
        model: &ModelState,
        now: DateTime<Utc>,
    ) -> Result<(FeatureVector, ScoreOutcome)> {
        let features = self.extractor.extract(content, mission, now).await?;
        let tie = self.config.policy.tie_action;

        let outcome = match model.score(&features, mission.threshold, tie) {
            Ok(outcome) => outcome,
            Err(e @ AnchoriteError::LayoutMismatch { .. }) => {
                warn!("Model cannot score this vector, using heuristic: {}", e);
                let scores = HeuristicScorer.scores(&features, mission.threshold);
                ScoreOutcome {
                    scores,
                    action: scores.action(tie),
                    confidence: scores.confidence(),
                    source: DecisionSource::Fallback,
                }
            }
            Err(e) => return Err(e),
        };
        Ok((features, outcome))
    }

    fn assemble(
        &self,
        content: &ContentRecord,
        mission: &Mission,
        model: &ModelState,
        features: &FeatureVector,
        outcome: ScoreOutcome,
        now: DateTime<Utc>,
    ) -> Decision {
        let mut action = outcome.action;
        let mut explored = false;
        if outcome.source == DecisionSource::Model && model.exploration_rate > 0.0 {
            let mut rng = exploration_rng(&content.url, mission.fingerprint(), model);
            if rng.gen::<f32>() < model.exploration_rate {
                action = action.opposite();
                explored = true;
            }
        }

        let decision = Decision {
            id: DecisionId::new(),
            url: content.url.clone(),
            mission_fingerprint: mission.fingerprint().clone(),
            feature_hash: features.hash(),
            action,
            confidence: outcome.confidence,
            allow_score: outcome.scores.allow,
            block_score: outcome.scores.block,
            source: outcome.source,
            explored,
            model_version: model.version,
            created_at: now,
        };

        if explored {
            info!(
                url = %decision.url,
                action = %decision.action,
                preferred = %outcome.action,
                explored = true,
                "Exploration flipped the decision"
            );
        } else if decision.source == DecisionSource::Fallback {
            warn!(
                url = %decision.url,
                action = %decision.action,
                confidence = decision.confidence,
                "Heuristic decision"
            );
        } else {
            debug!(
                url = %decision.url,
                action = %decision.action,
                confidence = decision.confidence,
                source = %decision.source,
                "Model decision"
            );
        }
        decision
    }

    fn fallback(&self, content: &ContentRecord, mission: &Mission, model: &ModelState, now: DateTime<Utc>) -> Decision {
        Decision {
            id: DecisionId::new(),
            url: content.url.clone(),
            mission_fingerprint: mission.fingerprint().clone(),
            feature_hash: String::new(),
            action: self.config.policy.timeout_action,
            confidence: 0.0,
            allow_score: 0.5,
            block_score: 0.5,
            source: DecisionSource::Fallback,
            explored: false,
            model_version: model.version,
            created_at: now,
        }
    }

    fn remember(&self, decision: &Decision, features: Option<FeatureVector>) {
        self.recent().put(
            decision.id,
            RecentDecision {
                decision: decision.clone(),
                features,
                fed_back: false,
            },
        );
    }

    /// Record feedback on an issued decision and queue it for learning
    ///
    /// Returns once the decision is claimed; storing the row and training
    /// happen on the learning task. Unknown decisions fail with
    /// `DecisionNotFound`; repeated feedback fails with `AlreadyFedBack`.
    /// Neither is fatal to the caller.
    pub async fn submit_feedback(&self, id: DecisionId, feedback: Feedback) -> Result<()> {
        let claimed = match self.claim_recent(id) {
            Some(claimed) => claimed,
            None => self.claim_stored(id).await,
        };
        let (decision, features) = match claimed {
            Ok(claimed) => claimed,
            Err(e) => {
                self.metrics.record_feedback_dropped();
                return Err(e);
            }
        };
        self.cache.invalidate(&decision);

        let record = FeedbackRecord::new(&decision, feedback, Utc::now());
        let agreed = record.target_action == decision.action;
        self.metrics.record_feedback(decision.explored, agreed);
        info!(
            decision_id = %id,
            url = %decision.url,
            feedback = feedback.as_str(),
            target = %record.target_action,
            reward = record.reward,
            explored = decision.explored,
            "Feedback received"
        );
        if features.is_none() {
            debug!(decision_id = %id, "No feature vector for decision, feedback kept for audit only");
        }

        let queued = self.learning.submit(FeedbackJob {
            record,
            url: decision.url,
            features,
        });
        if !queued {
            self.metrics.record_feedback_dropped();
        }
        Ok(())
    }

    /// Mark a remembered decision fed back; `None` if it is not in memory
    fn claim_recent(&self, id: DecisionId) -> Option<Result<(Decision, Option<FeatureVector>)>> {
        let mut recent = self.recent();
        let entry = recent.get_mut(&id)?;
        if entry.fed_back {
            return Some(Err(AnchoriteError::AlreadyFedBack(id.to_string())));
        }
        entry.fed_back = true;
        Some(Ok((entry.decision.clone(), entry.features.clone())))
    }

    /// Look the decision up in the store, then claim it in memory
    async fn claim_stored(&self, id: DecisionId) -> Result<(Decision, Option<FeatureVector>)> {
        let stored = match self.store.get_decision_by_id(id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                warn!(decision_id = %id, "Feedback for unknown decision dropped");
                return Err(AnchoriteError::DecisionNotFound(id.to_string()));
            }
            Err(e) => {
                warn!(decision_id = %id, "Feedback lookup failed: {}", e);
                return Err(e);
            }
        };
        if stored.state == DecisionState::FedBack {
            return Err(AnchoriteError::AlreadyFedBack(id.to_string()));
        }
        let features = stored
            .features
            .and_then(|blob| blob.into_vector(&self.extractor.layout()));

        // A concurrent call may have claimed it while the lookup ran
        let mut recent = self.recent();
        if recent.peek(&id).is_some_and(|r| r.fed_back) {
            return Err(AnchoriteError::AlreadyFedBack(id.to_string()));
        }
        recent.put(
            id,
            RecentDecision {
                decision: stored.decision.clone(),
                features: features.clone(),
                fed_back: true,
            },
        );
        Ok((stored.decision, features))
    }

    /// Replace the mission; old cache entries become misses immediately
    pub async fn set_mission(
        &self,
        text: &str,
        threshold: Option<f32>,
        session_minutes: Option<u32>,
    ) -> Result<Arc<Mission>> {
        let threshold = threshold.unwrap_or_else(|| self.current_mission().threshold);
        let mission = Mission::with_threshold(text, threshold)?.with_session_minutes(session_minutes);
        self.install_mission(mission).await
    }

    /// Import a `mission.json` file
    pub async fn import_mission(&self, path: &Path) -> Result<Arc<Mission>> {
        let mission = Mission::from_json_file(path, self.current_mission().threshold)?;
        self.install_mission(mission).await
    }

    async fn install_mission(&self, mission: Mission) -> Result<Arc<Mission>> {
        self.store.save_mission(&mission).await?;
        let mission = Arc::new(mission);
        let previous = self.mission.send_replace(Arc::clone(&mission));

        if previous.fingerprint() != mission.fingerprint() {
            info!(
                fingerprint = %mission.fingerprint(),
                previous = %previous.fingerprint(),
                "Mission changed: {}",
                mission.text()
            );
            if self.config.cache.purge_on_mission_change {
                let purged = self.cache.purge_other_missions(mission.fingerprint()).await;
                debug!(purged, "Purged decisions of previous missions");
            }
        }
        Ok(mission)
    }

    /// Delete durable cache entries past their TTL
    pub async fn purge_expired(&self) -> usize {
        self.cache.purge_expired(Utc::now()).await
    }

    pub async fn stats(&self) -> FilterStats {
        let model = self.current_model();
        let mission = self.current_mission();
        let store = match self.store.counts().await {
            Ok(counts) => counts,
            Err(e) => {
                warn!("Failed to read store counts: {}", e);
                StoreCounts::default()
            }
        };

        FilterStats {
            metrics: self
                .metrics
                .snapshot(model.exploration_rate, model.version, model.training_step),
            store,
            mission: mission.text().to_string(),
            mission_fingerprint: mission.fingerprint().clone(),
            model_origin: model.origin,
        }
    }

    /// Pretrain on a labelled seed list; returns the training step
    pub async fn bootstrap(&self, seeds: &SeedSet) -> Result<u64> {
        let samples = seeds.extract(&self.extractor, &self.current_mission()).await?;
        info!(
            examples = samples.len(),
            epochs = seeds.epochs(),
            "Pretraining on seed list"
        );
        self.learning.pretrain(samples, seeds.epochs()).await
    }

    /// Train on pending feedback now; returns the training step
    pub async fn flush(&self) -> Result<u64> {
        self.learning.flush().await
    }

    /// Train on pending feedback and stop the learning loop
    pub async fn shutdown(&self) -> Result<u64> {
        self.learning.shutdown().await
    }
}

/// Same (url, mission, model) always draws the same number
fn exploration_rng(url: &str, fingerprint: &Fingerprint, model: &ModelState) -> StdRng {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(fingerprint.as_str().as_bytes());
    hasher.update(model.version.to_le_bytes());
    hasher.update(model.training_step.to_le_bytes());
    let digest = hasher.finalize();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    StdRng::seed_from_u64(u64::from_le_bytes(seed))
}
