//! Core data types for the Anchorite filtering engine
//!
//! Decisions, actions, provenance and feedback records shared by the cache,
//! the store, the learning loop and the orchestrator.

use crate::mission::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for decisions
///
/// Wraps a UUID so decision references cannot be mixed up with feedback ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionId(pub Uuid);

impl DecisionId {
    /// Create a new random decision ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a decision ID from a string
    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for DecisionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DecisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Allow or block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Block,
}

impl Action {
    pub fn opposite(self) -> Self {
        match self {
            Action::Allow => Action::Block,
            Action::Block => Action::Allow,
        }
    }

    pub fn is_allow(self) -> bool {
        matches!(self, Action::Allow)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Allow => write!(f, "allow"),
            Action::Block => write!(f, "block"),
        }
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "allow" => Ok(Action::Allow),
            "block" => Ok(Action::Block),
            other => Err(format!("Invalid action: {}", other)),
        }
    }
}

/// Where a decision came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    /// Served from the decision cache
    Cache,
    /// Scored by the trained model
    Model,
    /// Heuristic similarity, fail-open timeout, or error recovery
    Fallback,
}

impl std::fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionSource::Cache => write!(f, "cache"),
            DecisionSource::Model => write!(f, "model"),
            DecisionSource::Fallback => write!(f, "fallback"),
        }
    }
}

impl FromStr for DecisionSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cache" => Ok(DecisionSource::Cache),
            "model" => Ok(DecisionSource::Model),
            "fallback" => Ok(DecisionSource::Fallback),
            other => Err(format!("Invalid decision source: {}", other)),
        }
    }
}

/// Lifecycle of a stored decision: `Pending -> Scored -> (Cached) -> (FedBack)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionState {
    Pending,
    Scored,
    Cached,
    FedBack,
}

impl DecisionState {
    /// Whether `next` is a legal successor. Nothing skips `Scored` and
    /// `FedBack` is terminal.
    pub fn can_transition_to(self, next: DecisionState) -> bool {
        use DecisionState::*;
        matches!(
            (self, next),
            (Pending, Scored) | (Scored, Cached) | (Scored, FedBack) | (Cached, FedBack)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DecisionState::Pending => "pending",
            DecisionState::Scored => "scored",
            DecisionState::Cached => "cached",
            DecisionState::FedBack => "fed_back",
        }
    }
}

impl FromStr for DecisionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DecisionState::Pending),
            "scored" => Ok(DecisionState::Scored),
            "cached" => Ok(DecisionState::Cached),
            "fed_back" => Ok(DecisionState::FedBack),
            other => Err(format!("Invalid decision state: {}", other)),
        }
    }
}

/// Allow/block outcome for one (url, mission) pair
///
/// Immutable once produced; a later decision for the same key supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: DecisionId,
    pub url: String,
    pub mission_fingerprint: Fingerprint,
    /// Short SHA-256 of the feature vector, empty when no vector was built
    pub feature_hash: String,
    pub action: Action,
    /// Normalized margin between the two scores, in [0, 1]
    pub confidence: f32,
    pub allow_score: f32,
    pub block_score: f32,
    pub source: DecisionSource,
    /// Set when the exploration policy overrode the model's preferred action
    pub explored: bool,
    pub model_version: u64,
    pub created_at: DateTime<Utc>,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        self.action.is_allow()
    }

    /// Same decision, re-labelled as served from the cache
    pub fn from_cache(&self) -> Self {
        Self {
            source: DecisionSource::Cache,
            ..self.clone()
        }
    }

    /// Whether the entry is older than `ttl` at `now`
    pub fn is_expired(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at) >= ttl
    }
}

/// User-supplied verdict on a previously issued decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feedback {
    /// The decision was right
    Correct,
    /// The decision was wrong
    Incorrect,
    /// The request should have been allowed
    ShouldAllow,
    /// The request should have been blocked
    ShouldBlock,
}

impl Feedback {
    /// The action the user asserts was correct for a decision that chose `decided`
    pub fn target_action(self, decided: Action) -> Action {
        match self {
            Feedback::Correct => decided,
            Feedback::Incorrect => decided.opposite(),
            Feedback::ShouldAllow => Action::Allow,
            Feedback::ShouldBlock => Action::Block,
        }
    }

    /// +1 when the user agrees with the decided action, -1 otherwise
    pub fn reward(self, decided: Action) -> f32 {
        if self.target_action(decided) == decided {
            1.0
        } else {
            -1.0
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Feedback::Correct => "correct",
            Feedback::Incorrect => "incorrect",
            Feedback::ShouldAllow => "allow",
            Feedback::ShouldBlock => "block",
        }
    }
}

impl FromStr for Feedback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "correct" | "right" => Ok(Feedback::Correct),
            "incorrect" | "wrong" => Ok(Feedback::Incorrect),
            "allow" | "should_allow" => Ok(Feedback::ShouldAllow),
            "block" | "should_block" => Ok(Feedback::ShouldBlock),
            other => Err(format!("Invalid feedback: {}", other)),
        }
    }
}

/// Feedback tied to a decision, consumed once by the learning loop and then
/// retained for audit and replay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub decision_id: DecisionId,
    pub feedback: Feedback,
    pub decided_action: Action,
    pub target_action: Action,
    pub reward: f32,
    pub explored: bool,
    pub received_at: DateTime<Utc>,
}

impl FeedbackRecord {
    pub fn new(decision: &Decision, feedback: Feedback, received_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            decision_id: decision.id,
            feedback,
            decided_action: decision.action,
            target_action: feedback.target_action(decision.action),
            reward: feedback.reward(decision.action),
            explored: decision.explored,
            received_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_target_and_reward() {
        assert_eq!(Feedback::Correct.target_action(Action::Block), Action::Block);
        assert_eq!(Feedback::Incorrect.target_action(Action::Block), Action::Allow);
        assert_eq!(Feedback::ShouldAllow.target_action(Action::Block), Action::Allow);
        assert_eq!(Feedback::ShouldBlock.target_action(Action::Block), Action::Block);

        assert_eq!(Feedback::Correct.reward(Action::Allow), 1.0);
        assert_eq!(Feedback::Incorrect.reward(Action::Allow), -1.0);
        assert_eq!(Feedback::ShouldAllow.reward(Action::Allow), 1.0);
        assert_eq!(Feedback::ShouldBlock.reward(Action::Allow), -1.0);
    }

    #[test]
    fn test_state_transitions() {
        use DecisionState::*;
        assert!(Pending.can_transition_to(Scored));
        assert!(Scored.can_transition_to(Cached));
        assert!(Cached.can_transition_to(FedBack));
        assert!(Scored.can_transition_to(FedBack));

        // No skipping Scored, FedBack is terminal
        assert!(!Pending.can_transition_to(Cached));
        assert!(!Pending.can_transition_to(FedBack));
        assert!(!FedBack.can_transition_to(FedBack));
        assert!(!FedBack.can_transition_to(Cached));
    }

    #[test]
    fn test_parse_round_trip_strings() {
        assert_eq!("ALLOW".parse::<Action>().unwrap(), Action::Allow);
        assert_eq!("wrong".parse::<Feedback>().unwrap(), Feedback::Incorrect);
        assert_eq!(
            DecisionState::FedBack.as_str().parse::<DecisionState>().unwrap(),
            DecisionState::FedBack
        );
        assert!("maybe".parse::<Action>().is_err());
    }

    #[test]
    fn test_decision_expiry() {
        let now = Utc::now();
        let decision = Decision {
            id: DecisionId::new(),
            url: "https://example.org/".to_string(),
            mission_fingerprint: Fingerprint::from_text("learn rust"),
            feature_hash: String::new(),
            action: Action::Allow,
            confidence: 0.7,
            allow_score: 0.85,
            block_score: 0.15,
            source: DecisionSource::Model,
            explored: false,
            model_version: 1,
            created_at: now - chrono::Duration::seconds(120),
        };

        assert!(!decision.is_expired(chrono::Duration::seconds(300), now));
        assert!(decision.is_expired(chrono::Duration::seconds(60), now));
        assert_eq!(decision.from_cache().source, DecisionSource::Cache);
        assert_eq!(decision.from_cache().id, decision.id);
    }
}
