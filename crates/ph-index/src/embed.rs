//! Embedding providers and vector math.
//!
//! The index only depends on the [`Embedder`] trait. The shipped
//! [`HashingEmbedder`] needs no model download: it hashes word tokens and
//! character trigrams into a fixed number of signed buckets, which is
//! enough for commands sharing vocabulary to land near each other.

use sha2::{Digest, Sha256};

/// Trait for embedding providers.
pub trait Embedder: Send + Sync {
    /// Model identifier stored alongside every vector.
    fn model_name(&self) -> &str;
    /// Dimensionality of produced vectors.
    fn dims(&self) -> usize;
    /// Embed a single text. Must be deterministic for a given input.
    fn embed(&self, text: &str) -> Vec<f32>;
}

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

/// Feature-hashing embedder over lowercase words and padded trigrams.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
    model: String,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        let dims = dims.max(1);
        Self {
            dims,
            model: format!("hashing-v1-{dims}"),
        }
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let h = u64::from_le_bytes(bytes);
        let sign = if h >> 63 == 1 { -1.0 } else { 1.0 };
        ((h % self.dims as u64) as usize, sign)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in tokenize(text) {
            let (i, sign) = self.bucket(&format!("w:{token}"));
            vector[i] += sign * WORD_WEIGHT;

            let padded: Vec<char> = format!("^{token}$").chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                let (i, sign) = self.bucket(&format!("t:{gram}"));
                vector[i] += sign * TRIGRAM_WEIGHT;
            }
        }
        normalize(&mut vector);
        vector
    }
}

/// Lowercase alphanumeric runs.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_is_deterministic() {
        let embedder = HashingEmbedder::default();
        assert_eq!(embedder.embed("git status"), embedder.embed("git status"));
        assert_eq!(embedder.embed("git status").len(), 384);
        assert_eq!(embedder.model_name(), "hashing-v1-384");
    }

    #[test]
    fn test_case_and_punctuation_insensitive() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("Git Status");
        let b = embedder.embed("git   status;");
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_vocabulary_scores_higher() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed("what did I commit?");
        let commit = embedder.embed("git commit -m fix");
        let listing = embedder.embed("ls -la");
        assert!(cosine_similarity(&query, &commit) > cosine_similarity(&query, &listing));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(8);
        let v = embedder.embed("  --  ");
        assert!(v.iter().all(|x| *x == 0.0));
        assert_eq!(cosine_similarity(&v, &embedder.embed("ls")), 0.0);
    }

    #[test]
    fn test_cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        let sim = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((sim + 1.0).abs() < 1e-6);
    }
}
