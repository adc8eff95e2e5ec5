//! Text embedding backends for semantic grouping.
//!
//! The grouper only sees the [`Embedder`] trait. [`HashingEmbedder`] is the
//! built-in offline backend; with the `fastembed` feature a local ONNX
//! sentence model is available as `FastEmbedder`.

use crate::error::EmbeddingError;
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Default vector size of [`HashingEmbedder`].
pub const DEFAULT_DIMENSIONS: usize = 256;

const TRIGRAM_WEIGHT: f32 = 0.5;

/// Turns descriptions into fixed-size vectors.
pub trait Embedder: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Embed a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed many texts.
    ///
    /// The outer error means the backend failed as a whole. Inner errors
    /// exclude individual inputs.
    fn embed_batch(
        &self,
        texts: &[String],
    ) -> Result<Vec<Result<Vec<f32>, EmbeddingError>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

/// Deterministic feature-hashing embedder.
///
/// Word tokens and boundary-padded character trigrams are hashed with
/// xxHash64 into signed buckets and the result is L2 normalized.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(feature.as_bytes());
        let hash = hasher.finish();

        let bucket = (hash % self.dimensions as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0; self.dimensions];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            self.add_feature(&mut vector, &token, 1.0);

            let padded: Vec<char> = format!("#{token}#").chars().collect();
            for window in padded.windows(3) {
                let trigram: String = window.iter().collect();
                self.add_feature(&mut vector, &trigram, TRIGRAM_WEIGHT);
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Err(EmbeddingError::Input(
                "text has no alphanumeric content".to_string(),
            ));
        }
        vector.iter_mut().for_each(|v| *v /= norm);
        Ok(vector)
    }
}

/// Cosine similarity of two vectors; 0 when either is all zeros or the
/// lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(feature = "fastembed")]
pub use fast::FastEmbedder;

#[cfg(feature = "fastembed")]
mod fast {
    use super::Embedder;
    use crate::error::EmbeddingError;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::Mutex;

    /// Local AllMiniLM-L6-v2 sentence embeddings via ONNX runtime.
    pub struct FastEmbedder {
        model: Mutex<TextEmbedding>,
    }

    impl FastEmbedder {
        pub fn new() -> Result<Self, EmbeddingError> {
            let model =
                TextEmbedding::try_new(InitOptions::new(EmbeddingModel::AllMiniLML6V2))
                    .map_err(|e| EmbeddingError::Backend(e.to_string()))?;
            Ok(Self {
                model: Mutex::new(model),
            })
        }
    }

    impl Embedder for FastEmbedder {
        fn name(&self) -> &str {
            "fastembed"
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let mut batch = self.embed_batch(&[text.to_string()])?;
            batch
                .pop()
                .unwrap_or_else(|| Err(EmbeddingError::Input("empty model output".to_string())))
        }

        fn embed_batch(
            &self,
            texts: &[String],
        ) -> Result<Vec<Result<Vec<f32>, EmbeddingError>>, EmbeddingError> {
            let model = self
                .model
                .lock()
                .map_err(|_| EmbeddingError::Backend("model lock poisoned".to_string()))?;
            let vectors = model
                .embed(texts.to_vec(), None)
                .map_err(|e| EmbeddingError::Backend(e.to_string()))?;
            if vectors.len() != texts.len() {
                return Err(EmbeddingError::Backend(format!(
                    "expected {} vectors, model returned {}",
                    texts.len(),
                    vectors.len()
                )));
            }
            Ok(vectors.into_iter().map(Ok).collect())
        }
    }
}
