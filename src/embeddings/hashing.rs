//! Feature-hashing text encoder
//!
//! Content tokens (stop words and short tokens dropped) contribute their
//! boundary-marked character 3..=5-grams and the whole word. Each feature is
//! hashed to a bucket and a sign, so unrelated collisions cancel out instead
//! of piling up as spurious similarity. The result is L2-normalized.
//!
//! FNV-1a rather than the randomized std hasher keeps vectors identical
//! across processes, so persisted model weights stay meaningful after a restart.

use super::SemanticEncoder;
use crate::error::Result;
use crate::mission::content_tokens;
use async_trait::async_trait;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

const MIN_GRAM: usize = 3;
const MAX_GRAM: usize = 5;
const WORD_WEIGHT: f32 = 3.0;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

/// Hashing encoder with a configurable output dimension
#[derive(Debug, Clone)]
pub struct HashingEncoder {
    dimensions: usize,
    name: String,
}

impl HashingEncoder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            name: format!("hashing-v2-d{}", dimensions),
        }
    }

    /// Synchronous encoding, usable outside an async context
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];
        let mut buf = String::new();

        for word in content_tokens(text) {
            // Per word, so n-grams never straddle a word boundary
            let marked: Vec<char> = std::iter::once('<')
                .chain(word.chars())
                .chain(std::iter::once('>'))
                .collect();
            for window_size in MIN_GRAM..=MAX_GRAM {
                for window in marked.windows(window_size) {
                    buf.clear();
                    buf.extend(window);
                    self.accumulate(&mut embedding, buf.as_bytes(), 1.0);
                }
            }

            self.accumulate(&mut embedding, word.as_bytes(), WORD_WEIGHT);
        }

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for val in &mut embedding {
                *val /= magnitude;
            }
        }

        embedding
    }

    /// Add `weight` to the feature's bucket, signed by the hash's top bit
    fn accumulate(&self, embedding: &mut [f32], bytes: &[u8], weight: f32) {
        let hash = fnv1a(bytes);
        let bucket = (hash % self.dimensions as u64) as usize;
        if hash >> 63 == 0 {
            embedding[bucket] += weight;
        } else {
            embedding[bucket] -= weight;
        }
    }
}

#[async_trait]
impl SemanticEncoder for HashingEncoder {
    async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        &self.name
    }
}
