use sha2::{Digest, Sha256};

/// Deterministic stand-in for a semantic embedding model. Not a production
/// vector representation — see the `VectorIndex` trait in [`crate::retrieval`]
/// for where a real ANN/embedding backend would plug in instead.
///
/// `embedding[i] = SHA-256(concat(i, ':', text))[0] / 127.5 - 1`, repeated
/// byte-by-byte across each hash until `d` values exist.
pub fn build_deterministic_embedding(text: &str, d: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(d);
    let mut i: u64 = 0;
    while out.len() < d {
        let mut hasher = Sha256::new();
        hasher.update(i.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();
        for byte in digest.iter() {
            if out.len() == d {
                break;
            }
            out.push(*byte as f32 / 127.5 - 1.0);
        }
        i += 1;
    }
    out
}

/// `dot / (||a|| * ||b||)`; `0.0` on zero norm or length mismatch.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn embedding_is_deterministic() {
        let a = build_deterministic_embedding("hello world", 64);
        let b = build_deterministic_embedding("hello world", 64);
        assert_eq!(a, b);
    }

    #[test]
    fn embedding_has_requested_length_and_range() {
        let embedding = build_deterministic_embedding("anything", 64);
        assert_eq!(embedding.len(), 64);
        assert!(embedding.iter().all(|v| (-1.0..1.0).contains(v)));
    }

    #[test]
    fn different_text_produces_different_embedding() {
        let a = build_deterministic_embedding("alpha", 64);
        let b = build_deterministic_embedding("beta", 64);
        assert_ne!(a, b);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let a = build_deterministic_embedding("same text", 64);
        let sim = cosine_similarity(&a, &a);
        assert!((sim - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_similarity_handles_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn cosine_similarity_handles_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    proptest! {
        // §8 "Embedding determinism": same (text, d) always yields the same
        // vector, of length d, with every value in [-1, 1).
        #[test]
        fn embedding_determinism_holds_for_arbitrary_input(
            text in ".{0,200}",
            d in 1usize..128,
        ) {
            let a = build_deterministic_embedding(&text, d);
            let b = build_deterministic_embedding(&text, d);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.len(), d);
            prop_assert!(a.iter().all(|v| (-1.0..1.0).contains(v)));
        }
    }
}
