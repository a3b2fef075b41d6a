//! Local ONNX encoder using fastembed
//!
//! Models are downloaded on first use to the fastembed cache directory.
//! Inference is synchronous, so it runs on the blocking pool.

use super::SemanticEncoder;
use crate::error::{AnchoriteError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};
use tokio::task;
use tracing::{debug, info};

/// fastembed-backed encoder
pub struct LocalEncoder {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dimensions: usize,
}

impl LocalEncoder {
    /// Load (and if needed download) the named model
    pub async fn new(model_name: &str) -> Result<Self> {
        let (embedding_model, dimensions) = Self::resolve_model(model_name)?;
        info!("Initializing local encoder: model={}", model_name);

        let mut init_options = InitOptions::default();
        init_options.model_name = embedding_model;
        init_options.show_download_progress = false;

        let model = task::spawn_blocking(move || TextEmbedding::try_new(init_options))
            .await
            .map_err(|e| AnchoriteError::Other(format!("Task join error: {}", e)))?
            .map_err(|e| AnchoriteError::Embedding(format!("Failed to load model: {}", e)))?;

        info!("Local encoder ready: {} dimensions", dimensions);

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    fn resolve_model(model_name: &str) -> Result<(EmbeddingModel, usize)> {
        match model_name {
            "nomic-embed-text-v1.5" => Ok((EmbeddingModel::NomicEmbedTextV15, 768)),
            "all-MiniLM-L6-v2" => Ok((EmbeddingModel::AllMiniLML6V2, 384)),
            "all-MiniLM-L12-v2" => Ok((EmbeddingModel::AllMiniLML12V2, 384)),
            "bge-small-en-v1.5" => Ok((EmbeddingModel::BGESmallENV15, 384)),
            "bge-base-en-v1.5" => Ok((EmbeddingModel::BGEBaseENV15, 768)),
            _ => Err(AnchoriteError::Config(config::ConfigError::Message(format!(
                "Unsupported encoder model: '{}'",
                model_name
            )))),
        }
    }

    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        debug!("Encoding batch of {} texts", texts.len());
        let model = Arc::clone(&self.model);

        let embeddings = task::spawn_blocking(move || {
            let mut model_guard = model
                .lock()
                .map_err(|e| format!("Mutex lock failed: {}", e))?;
            model_guard
                .embed(texts, None)
                .map_err(|e| format!("Embedding generation failed: {}", e))
        })
        .await
        .map_err(|e| AnchoriteError::Other(format!("Task join error: {}", e)))?
        .map_err(AnchoriteError::Embedding)?;

        for embedding in &embeddings {
            if embedding.len() != self.dimensions {
                return Err(AnchoriteError::Embedding(format!(
                    "Embedding has wrong dimensions: expected {}, got {}",
                    self.dimensions,
                    embedding.len()
                )));
            }
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl SemanticEncoder for LocalEncoder {
    async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimensions]);
        }
        self.embed_texts(vec![text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| AnchoriteError::Embedding("No embedding returned".to_string()))
    }

    async fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let non_empty: Vec<String> = texts
            .iter()
            .filter(|t| !t.trim().is_empty())
            .map(|t| t.to_string())
            .collect();
        let mut encoded = if non_empty.is_empty() {
            Vec::new()
        } else {
            self.embed_texts(non_empty).await?
        }
        .into_iter();

        Ok(texts
            .iter()
            .map(|t| {
                if t.trim().is_empty() {
                    vec![0.0; self.dimensions]
                } else {
                    encoded.next().unwrap_or_else(|| vec![0.0; self.dimensions])
                }
            })
            .collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_name_mapping() {
        assert_eq!(LocalEncoder::resolve_model("all-MiniLM-L6-v2").unwrap().1, 384);
        assert_eq!(LocalEncoder::resolve_model("nomic-embed-text-v1.5").unwrap().1, 768);
        assert!(LocalEncoder::resolve_model("invalid-model").is_err());
    }
}
