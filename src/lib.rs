//! Anchorite - Mission-Aware Traffic Filtering Engine
//!
//! Decides, for every intercepted web request, whether it serves the user's
//! current mission, and learns from the user's corrections:
//! - Content normalization and rule-free URL classification
//! - Semantic feature extraction against the active mission
//! - A durable decision cache partitioned by mission fingerprint
//! - A linear allow/block model with exploration and online updates
//! - Fail-open behavior on timeouts and internal failures
//!
//! # Architecture
//!
//! The system is organized into several layers:
//! - **Types**: Decisions, actions, feedback (`types`, `mission`)
//! - **Features**: Normalizer, encoders and the feature extractor
//! - **Model**: Scoring, snapshots and the background learning loop
//! - **Storage**: SQLite decision, feedback and mission tables
//! - **Orchestrator**: The `decide` / `submit_feedback` contract and host hook
//!
//! # Example
//!
//! ```ignore
//! use anchorite_core::{DecisionOrchestrator, FilterConfig, RawRequest};
//!
//! #[tokio::main]
//! async fn main() -> anchorite_core::Result<()> {
//!     let orchestrator = DecisionOrchestrator::open(FilterConfig::load(None)?).await?;
//!     orchestrator
//!         .set_mission("Learn Python programming for web development", None, None)
//!         .await?;
//!
//!     let decision = orchestrator
//!         .decide(&RawRequest::get("https://docs.python.org/3/tutorial/"), None)
//!         .await;
//!     println!("{} ({:.2})", decision.action, decision.confidence);
//!
//!     orchestrator.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod features;
pub mod hook;
pub mod learning;
pub mod metrics;
pub mod mission;
pub mod model;
pub mod normalizer;
pub mod orchestrator;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use cache::DecisionCache;
pub use config::FilterConfig;
pub use embeddings::{HashingEncoder, SemanticEncoder};
pub use error::{AnchoriteError, Result};
pub use features::{FeatureExtractor, FeatureLayout, FeatureVector};
pub use hook::{block_page_html, FilterHook, HookVerdict};
pub use metrics::MetricsSnapshot;
pub use mission::{Fingerprint, Mission};
pub use model::{ModelOrigin, ModelState};
pub use normalizer::{normalize, ContentRecord, RawRequest, ResponseMetadata};
pub use orchestrator::{DecisionOrchestrator, FilterStats};
pub use storage::{DecisionStore, SqliteDecisionStore};
pub use types::{Action, Decision, DecisionId, DecisionSource, DecisionState, Feedback, FeedbackRecord};
