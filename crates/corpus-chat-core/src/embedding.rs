//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, plus pure helpers for vector storage, similarity, and width
//! reconciliation.
//!
//! Concrete providers (OpenAI, Ollama, fastembed) live in the
//! `corpus-chat` app crate.
//!
//! # Width Reconciliation
//!
//! The corpus store compares vectors of one fixed width (1536 for the
//! Supabase schema). Providers report their own native width, which may
//! differ. [`reconcile_dims`] maps a native vector onto the store width:
//!
//! | Native width `d` vs store width `w` | Result |
//! |-------------------------------------|--------|
//! | `d == w` | unchanged |
//! | `d < w`  | original values, then `w - d` trailing zeros |
//! | `d > w`  | first `w` values |

use anyhow::Result;
use async_trait::async_trait;

/// Trait for embedding providers.
///
/// Implementations turn one text into one vector of [`dims`](Self::dims)
/// components and nothing else.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the native embedding width (e.g. `1536`, `768`, `384`).
    fn dims(&self) -> usize;
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Pad with trailing zeros or truncate `vector` to exactly `width` components.
///
/// The first `min(len, width)` components are kept as-is.
pub fn reconcile_dims(mut vector: Vec<f32>, width: usize) -> Vec<f32> {
    vector.resize(width, 0.0);
    vector
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use corpus_chat_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors
/// of different lengths, and zero vectors.
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
