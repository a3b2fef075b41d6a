//! Semantic encoders for URL, mission and content text
//!
//! Encoders are stateless text-to-vector functions shared by all concurrent
//! decisions. The hashing encoder is always available; the fastembed encoder
//! is compiled in with the `local-embeddings` feature.

pub mod hashing;
#[cfg(feature = "local-embeddings")]
pub mod local;

pub use hashing::HashingEncoder;
#[cfg(feature = "local-embeddings")]
pub use local::LocalEncoder;

use crate::config::{EncoderBackend, EncoderConfig};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Text to fixed-dimension embedding
#[async_trait]
pub trait SemanticEncoder: Send + Sync {
    /// Encode one text. Empty text yields the zero vector.
    async fn encode(&self, text: &str) -> Result<Vec<f32>>;

    /// Encode several texts in one call
    async fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.encode(text).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize;

    /// Stable identifier, part of the feature layout signature
    fn name(&self) -> &str;
}

/// Build the encoder selected in configuration
pub async fn build_encoder(config: &EncoderConfig) -> Result<Arc<dyn SemanticEncoder>> {
    match config.backend {
        EncoderBackend::Hashing => Ok(Arc::new(HashingEncoder::new(config.dimensions))),
        #[cfg(feature = "local-embeddings")]
        EncoderBackend::Local => Ok(Arc::new(LocalEncoder::new(&config.model_name).await?)),
        #[cfg(not(feature = "local-embeddings"))]
        EncoderBackend::Local => Err(crate::error::AnchoriteError::Config(
            config::ConfigError::Message(
                "encoder.backend = \"local\" requires the local-embeddings feature".to_string(),
            ),
        )),
    }
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}
