//! Deterministic embeddings and vector similarity helpers.
//!
//! `hash_embedding` is a test double: it derives a stable pseudo-vector from a
//! content hash so similarity search can be exercised without a real provider.
//! Production callers attach vectors obtained from an embedding backend.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Default embedding dimension, matching common provider output.
pub const DEFAULT_EMBEDDING_DIM: usize = 1536;

/// Derive a deterministic pseudo-embedding from text.
///
/// The first eight bytes of the MD5 digest seed a PRNG that fills the vector
/// with components uniform in `[-1, 1)`. Identical text always yields the
/// identical vector, which is the only property tests rely on.
pub fn hash_embedding(text: &str, dim: usize) -> Vec<f32> {
    let digest = md5::compute(text.as_bytes());
    let mut seed_bytes = [0u8; 8];
    seed_bytes.copy_from_slice(&digest.0[..8]);
    let mut rng = StdRng::seed_from_u64(u64::from_be_bytes(seed_bytes));
    (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

/// Cosine similarity between two vectors.
///
/// The longer vector is truncated to the shorter one's length. Returns `0.0`
/// when either magnitude is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }
    let a = &a[..len];
    let b = &b[..len];

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}
