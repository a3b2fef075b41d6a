//! Feature vectors and their layout
//!
//! A vector is the concatenation of named sub-ranges:
//!
//! | sub-range           | width |
//! |---------------------|-------|
//! | url embedding       | d     |
//! | mission embedding   | d     |
//! | content embedding   | d     |
//! | dynamic url         | 14    |
//! | content             | 10    |
//! | temporal            | 4     |
//! | alignment           | 4     |
//!
//! `d` is the encoder dimension. The layout signature names the encoder and
//! every width; models refuse vectors whose signature differs from their own.

pub mod classifiers;
pub mod extractor;

pub use extractor::FeatureExtractor;

use crate::error::{AnchoriteError, Result};
use sha2::{Digest, Sha256};
use std::ops::Range;
use std::sync::Arc;

/// Dynamic URL slots, in order
pub const DYNAMIC_URL_FEATURES: [&str; 14] = [
    "tld_edu",
    "tld_org",
    "tld_gov",
    "tld_other",
    "segment_count",
    "has_query",
    "query_count",
    "numeric_id",
    "search",
    "documentation",
    "media",
    "feed",
    "article",
    "profile",
];

/// Content slots, in order
pub const CONTENT_FEATURES: [&str; 10] = [
    "image_density",
    "link_density",
    "external_ratio",
    "has_video",
    "has_forms",
    "has_code",
    "quality",
    "length",
    "latency",
    "available",
];

/// Temporal slots, in order
pub const TEMPORAL_FEATURES: [&str; 4] = ["hour_bucket", "weekend", "work_hours", "session_elapsed"];

/// Mission alignment slots, in order
pub const ALIGNMENT_FEATURES: [&str; 4] = ["url_similarity", "content_similarity", "keyword_hit", "keyword_overlap"];

/// Named sub-range of a feature vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubRange {
    UrlEmbedding,
    MissionEmbedding,
    ContentEmbedding,
    DynamicUrl,
    Content,
    Temporal,
    Alignment,
}

impl SubRange {
    pub const ALL: [SubRange; 7] = [
        SubRange::UrlEmbedding,
        SubRange::MissionEmbedding,
        SubRange::ContentEmbedding,
        SubRange::DynamicUrl,
        SubRange::Content,
        SubRange::Temporal,
        SubRange::Alignment,
    ];

    /// Prefix used for named slots, e.g. `alignment.keyword_hit`
    pub fn prefix(self) -> &'static str {
        match self {
            SubRange::UrlEmbedding => "url_embedding",
            SubRange::MissionEmbedding => "mission_embedding",
            SubRange::ContentEmbedding => "content_embedding",
            SubRange::DynamicUrl => "url",
            SubRange::Content => "content",
            SubRange::Temporal => "temporal",
            SubRange::Alignment => "alignment",
        }
    }

    fn slot_names(self) -> Option<&'static [&'static str]> {
        match self {
            SubRange::DynamicUrl => Some(&DYNAMIC_URL_FEATURES),
            SubRange::Content => Some(&CONTENT_FEATURES),
            SubRange::Temporal => Some(&TEMPORAL_FEATURES),
            SubRange::Alignment => Some(&ALIGNMENT_FEATURES),
            _ => None,
        }
    }
}

/// Dimension and sub-range boundaries of a feature vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureLayout {
    encoder: String,
    embedding_dim: usize,
    signature: String,
}

impl FeatureLayout {
    pub fn new(encoder: impl Into<String>, embedding_dim: usize) -> Self {
        let encoder = encoder.into();
        let signature = format!(
            "{}/e{}-u{}-c{}-t{}-a{}",
            encoder,
            embedding_dim,
            DYNAMIC_URL_FEATURES.len(),
            CONTENT_FEATURES.len(),
            TEMPORAL_FEATURES.len(),
            ALIGNMENT_FEATURES.len()
        );
        Self {
            encoder,
            embedding_dim,
            signature,
        }
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub fn encoder(&self) -> &str {
        &self.encoder
    }

    pub fn width(&self, sub: SubRange) -> usize {
        match sub {
            SubRange::UrlEmbedding | SubRange::MissionEmbedding | SubRange::ContentEmbedding => {
                self.embedding_dim
            }
            other => other.slot_names().map(|s| s.len()).unwrap_or(0),
        }
    }

    pub fn range(&self, sub: SubRange) -> Range<usize> {
        let mut start = 0;
        for candidate in SubRange::ALL {
            let width = self.width(candidate);
            if candidate == sub {
                return start..start + width;
            }
            start += width;
        }
        start..start
    }

    pub fn dimension(&self) -> usize {
        SubRange::ALL.iter().map(|s| self.width(*s)).sum()
    }

    /// Index of a named structural slot such as `content.has_video`
    pub fn named_index(&self, name: &str) -> Option<usize> {
        let (prefix, slot) = name.split_once('.')?;
        let sub = SubRange::ALL.into_iter().find(|s| s.prefix() == prefix)?;
        let position = sub.slot_names()?.iter().position(|s| *s == slot)?;
        Some(self.range(sub).start + position)
    }

    /// Fail unless `vector` was built with this layout
    pub fn check(&self, vector: &FeatureVector) -> Result<()> {
        if vector.layout.signature != self.signature || vector.values.len() != self.dimension() {
            return Err(AnchoriteError::LayoutMismatch {
                expected: self.signature.clone(),
                actual: vector.layout.signature.clone(),
            });
        }
        Ok(())
    }
}

/// Fixed-length numeric encoding of one request under one mission
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    layout: Arc<FeatureLayout>,
    values: Vec<f32>,
}

impl FeatureVector {
    /// Wrap raw values; fails if the length does not match the layout
    pub fn new(layout: Arc<FeatureLayout>, values: Vec<f32>) -> Result<Self> {
        if values.len() != layout.dimension() {
            return Err(AnchoriteError::LayoutMismatch {
                expected: format!("{} ({} values)", layout.signature, layout.dimension()),
                actual: format!("{} values", values.len()),
            });
        }
        Ok(Self { layout, values })
    }

    pub fn zeros(layout: Arc<FeatureLayout>) -> Self {
        let values = vec![0.0; layout.dimension()];
        Self { layout, values }
    }

    pub fn layout(&self) -> &FeatureLayout {
        &self.layout
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn sub(&self, sub: SubRange) -> &[f32] {
        &self.values[self.layout.range(sub)]
    }

    pub fn sub_mut(&mut self, sub: SubRange) -> &mut [f32] {
        let range = self.layout.range(sub);
        &mut self.values[range]
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.layout.named_index(name).map(|i| self.values[i])
    }

    /// First 16 hex chars of SHA-256 over the little-endian values
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.layout.signature.as_bytes());
        hasher.update(to_bytes(&self.values));
        crate::mission::short_hex(&hasher.finalize())
    }
}

/// f32 values as little-endian bytes
pub fn to_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Inverse of [`to_bytes`]
pub fn from_bytes(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(AnchoriteError::Database(format!(
            "Feature blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
