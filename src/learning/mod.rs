//! Online learning loop
//!
//! Runs as its own task. Feedback arrives over a bounded channel and is
//! persisted here, off the caller's path. Every `update_every` events, on an
//! interval tick, or on an explicit flush the loop trains its private copy of
//! the model on the new experiences plus a random sample of older ones, then
//! publishes the result as a fresh `Arc<ModelState>` through a watch channel.
//! Inference never waits on it.
//!
//! Commands are handled in order, so once `flush` returns every feedback
//! submitted before it is stored and trained on.

pub mod replay;
pub mod seed;

pub use replay::{Experience, ReplayBuffer};
pub use seed::{SeedExample, SeedSet};

use crate::config::{LearningConfig, ModelConfig};
use crate::error::{AnchoriteError, Result};
use crate::features::{FeatureLayout, FeatureVector};
use crate::model::{save_snapshot, LinearModel, ModelOrigin, ModelState, Scorer};
use crate::storage::{DecisionStore, FeatureBlob};
use crate::types::{Action, FeedbackRecord};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Accepted feedback waiting to be stored and learned from
#[derive(Debug, Clone)]
pub struct FeedbackJob {
    pub record: FeedbackRecord,
    pub url: String,
    /// Absent for fallback decisions; the row is then kept for audit only
    pub features: Option<FeatureVector>,
}

impl FeedbackJob {
    fn into_experience(self) -> Option<Experience> {
        let record = self.record;
        self.features.map(|features| Experience {
            feedback_id: record.id,
            features,
            decided: record.decided_action,
            target: record.target_action,
            reward: record.reward,
            explored: record.explored,
        })
    }
}

/// Messages accepted by the learning task
#[derive(Debug)]
pub enum LearningCommand {
    Feedback(FeedbackJob),
    /// Supervised passes over labelled seed vectors, reply with the training step
    Pretrain {
        samples: Vec<(FeatureVector, Action)>,
        epochs: usize,
        reply: oneshot::Sender<u64>,
    },
    /// Train on anything pending, reply with the training step
    Flush(oneshot::Sender<u64>),
    /// Flush, then stop
    Shutdown(oneshot::Sender<u64>),
}

/// Cloneable sender side plus the task handle
pub struct LearningHandle {
    tx: mpsc::Sender<LearningCommand>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LearningHandle {
    /// Enqueue without waiting. Returns false only if the loop has stopped.
    pub fn submit(&self, job: FeedbackJob) -> bool {
        match self.tx.try_send(LearningCommand::Feedback(job)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(command)) => {
                debug!("Learning queue full, deferring feedback");
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    if tx.send(command).await.is_err() {
                        warn!("Learning loop stopped before deferred feedback was queued");
                    }
                });
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Learning loop stopped, dropping feedback");
                false
            }
        }
    }

    /// Train on pending feedback now and return the resulting training step
    pub async fn flush(&self) -> Result<u64> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(LearningCommand::Flush(reply))
            .await
            .map_err(|_| AnchoriteError::Other("Learning loop is not running".to_string()))?;
        rx.await
            .map_err(|_| AnchoriteError::Other("Learning loop dropped flush request".to_string()))
    }

    /// Pretrain on labelled vectors and return the resulting training step
    pub async fn pretrain(&self, samples: Vec<(FeatureVector, Action)>, epochs: usize) -> Result<u64> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(LearningCommand::Pretrain { samples, epochs, reply })
            .await
            .map_err(|_| AnchoriteError::Other("Learning loop is not running".to_string()))?;
        rx.await
            .map_err(|_| AnchoriteError::Other("Learning loop dropped pretrain request".to_string()))
    }

    /// Flush, stop the task and wait for it
    pub async fn shutdown(&self) -> Result<u64> {
        let (reply, rx) = oneshot::channel();
        let step = match self.tx.send(LearningCommand::Shutdown(reply)).await {
            Ok(()) => rx.await.unwrap_or_default(),
            Err(_) => 0,
        };

        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Learning task ended abnormally: {}", e);
            }
        }
        Ok(step)
    }
}

/// Background trainer owning the only mutable copy of the model
pub struct LearningLoop {
    working: ModelState,
    buffer: ReplayBuffer,
    pending: Vec<Experience>,
    publisher: watch::Sender<Arc<ModelState>>,
    store: Arc<dyn DecisionStore>,
    layout: Arc<FeatureLayout>,
    learning: LearningConfig,
    model: ModelConfig,
    snapshot_path: PathBuf,
    rng: StdRng,
}

impl LearningLoop {
    pub fn new(
        publisher: watch::Sender<Arc<ModelState>>,
        store: Arc<dyn DecisionStore>,
        layout: Arc<FeatureLayout>,
        learning: LearningConfig,
        model: ModelConfig,
        snapshot_path: PathBuf,
    ) -> Self {
        let working = (**publisher.borrow()).clone();
        let rng = StdRng::seed_from_u64(working.training_step ^ 0x5eed_a11c);
        Self {
            working,
            buffer: ReplayBuffer::new(learning.buffer_capacity),
            pending: Vec::new(),
            publisher,
            store,
            layout,
            learning,
            model,
            snapshot_path,
            rng,
        }
    }

    /// Reload retained feedback into the buffer; unconsumed rows become pending
    pub async fn warm_start(&mut self) -> Result<usize> {
        let mut records = self
            .store
            .recent_feedback(self.learning.warm_start_records, false)
            .await?;
        records.reverse();

        let mut loaded = 0;
        for stored in records {
            let Some(features) = stored.features.and_then(|f| f.into_vector(&self.layout)) else {
                continue;
            };
            let experience = Experience {
                feedback_id: stored.record.id,
                features,
                decided: stored.record.decided_action,
                target: stored.record.target_action,
                reward: stored.record.reward,
                explored: stored.record.explored,
            };
            if stored.consumed {
                self.buffer.push(experience);
            } else {
                self.accept(experience);
            }
            loaded += 1;
        }

        info!(
            loaded,
            pending = self.pending.len(),
            "Replay buffer warm start complete"
        );
        Ok(loaded)
    }

    fn accept(&mut self, experience: Experience) {
        self.buffer.push(experience.clone());
        self.pending.push(experience);

        // Nothing drains pending while heuristic scoring is active. The rows
        // stay unconsumed in the store, so the oldest can be let go here.
        let capacity = self.learning.buffer_capacity.max(1);
        if !self.working.is_trainable() && self.pending.len() > capacity {
            let excess = self.pending.len() - capacity;
            self.pending.drain(..excess);
        }
    }

    /// Start the loop on the current runtime
    pub fn spawn(self) -> LearningHandle {
        let (tx, rx) = mpsc::channel(self.learning.queue_capacity.max(1));
        let task = tokio::spawn(self.run(rx));
        LearningHandle {
            tx,
            task: Mutex::new(Some(task)),
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<LearningCommand>) {
        let period = self.learning.update_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(LearningCommand::Feedback(job)) => {
                        if !self.persist(&job).await {
                            continue;
                        }
                        if let Some(experience) = job.into_experience() {
                            self.accept(experience);
                        }
                        if self.working.is_trainable() && self.pending.len() >= self.learning.update_every {
                            self.train().await;
                        }
                    }
                    Some(LearningCommand::Pretrain { samples, epochs, reply }) => {
                        self.pretrain(samples, epochs).await;
                        let _ = reply.send(self.working.training_step);
                    }
                    Some(LearningCommand::Flush(reply)) => {
                        self.train().await;
                        let _ = reply.send(self.working.training_step);
                    }
                    Some(LearningCommand::Shutdown(reply)) => {
                        self.train().await;
                        let _ = reply.send(self.working.training_step);
                        break;
                    }
                    // Handle dropped; unconsumed rows are picked up by the next warm start
                    None => break,
                },
                _ = ticker.tick() => {
                    if !self.pending.is_empty() {
                        self.train().await;
                    }
                }
            }
        }
        debug!("Learning loop stopped");
    }

    /// Store the feedback row and move its decision to `fed_back`.
    /// Returns false when the store already holds feedback for the decision.
    async fn persist(&self, job: &FeedbackJob) -> bool {
        let decision_id = job.record.decision_id;
        match self.store.mark_fed_back(decision_id).await {
            Ok(()) => {}
            Err(AnchoriteError::DecisionNotFound(_)) => {
                debug!(%decision_id, "Decision row superseded or never stored");
            }
            Err(AnchoriteError::AlreadyFedBack(_)) => {
                warn!(%decision_id, "Decision already has feedback, discarding duplicate");
                return false;
            }
            Err(e) => warn!(%decision_id, "Failed to mark decision fed back: {}", e),
        }

        let blob = job.features.as_ref().map(FeatureBlob::from_vector);
        if let Err(e) = self.store.insert_feedback(&job.record, &job.url, blob.as_ref()).await {
            warn!(%decision_id, "Failed to persist feedback: {}", e);
        }
        true
    }

    /// One update over pending experiences plus a replay sample
    pub async fn train(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let Scorer::Linear(model) = &mut self.working.scorer else {
            debug!(
                pending = self.pending.len(),
                "Heuristic scoring active, buffering feedback without training"
            );
            return;
        };

        let new = std::mem::take(&mut self.pending);
        let replay_amount = self.learning.batch_size.saturating_sub(new.len());
        let replayed = self.buffer.sample(&mut self.rng, replay_amount, new.len());

        let lr = self.model.learning_rate;
        let l2 = self.model.l2_decay;
        for experience in new.iter().chain(replayed.into_iter()) {
            if experience.features.layout().signature() != self.working.layout_signature {
                continue;
            }
            model.update(experience.features.values(), experience.target, lr, l2);
        }

        self.working.feedback_seen += new.len() as u64;
        self.working.exploration_rate = (self.working.exploration_rate
            * self.model.exploration_decay.powi(new.len() as i32))
        .max(self.model.min_exploration);
        self.working.training_step += 1;
        self.working.version += 1;

        let published = self.publish().await;
        info!(
            version = published.version,
            training_step = published.training_step,
            exploration_rate = published.exploration_rate,
            batch = new.len(),
            "Published updated model"
        );

        let ids: Vec<_> = new.iter().map(|e| e.feedback_id).collect();
        if let Err(e) = self.store.mark_feedback_consumed(&ids).await {
            warn!("Failed to mark feedback consumed: {}", e);
        }
    }

    /// Shuffled supervised passes over seed vectors; one new version at the end
    async fn pretrain(&mut self, samples: Vec<(FeatureVector, Action)>, epochs: usize) {
        let samples: Vec<_> = samples
            .into_iter()
            .filter(|(features, _)| features.layout().signature() == self.working.layout_signature)
            .collect();
        if samples.is_empty() {
            warn!("No seed vectors match the active layout, nothing to pretrain");
            return;
        }

        if !self.working.is_trainable() {
            info!("Replacing heuristic scoring with a linear model for pretraining");
            self.working.scorer = Scorer::Linear(LinearModel::zeros(self.layout.dimension()));
            self.working.origin = ModelOrigin::Prior;
            self.working.exploration_rate = self.model.initial_exploration;
        }
        let Scorer::Linear(model) = &mut self.working.scorer else {
            return;
        };

        let lr = self.model.learning_rate;
        let l2 = self.model.l2_decay;
        let mut order: Vec<usize> = (0..samples.len()).collect();
        for _ in 0..epochs {
            order.shuffle(&mut self.rng);
            for &i in &order {
                let (features, target) = &samples[i];
                model.update(features.values(), *target, lr, l2);
            }
        }
        self.working.training_step += 1;
        self.working.version += 1;

        let published = self.publish().await;
        info!(
            version = published.version,
            training_step = published.training_step,
            examples = samples.len(),
            epochs,
            "Published pretrained model"
        );
    }

    /// Make the working model the active one and save it as the snapshot
    async fn publish(&self) -> Arc<ModelState> {
        let published = Arc::new(self.working.clone());
        self.publisher.send_replace(Arc::clone(&published));
        if let Err(e) = save_snapshot(&self.snapshot_path, &published).await {
            warn!("Failed to save model snapshot: {}", e);
        }
        published
    }
}
