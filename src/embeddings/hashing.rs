use crate::constants::FALLBACK_DIMENSION;

/// Bag-of-tokens embedding used when no model is available.
///
/// Each whitespace token is hashed with CRC32 into one of `dimension`
/// buckets; the bucket counts are scaled to unit L2 norm. CRC32 is stable
/// across processes, so vectors written at build time stay comparable with
/// query vectors computed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashEmbedder {
    dimension: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(FALLBACK_DIMENSION)
    }
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.split_whitespace() {
            let bucket = crc32fast::hash(token.as_bytes()) as usize % self.dimension;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        // Empty text: leave the zero vector as is.
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashEmbedder::default();
        let vector = embedder.embed("");
        assert_eq!(vector.len(), FALLBACK_DIMENSION);
        assert!(vector.iter().all(|v| *v == 0.0));
        assert!(embedder.embed("   \n\t").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_unit_norm_and_deterministic() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("prefer tabs over spaces");
        let b = embedder.embed("prefer tabs over spaces");
        assert_eq!(a, b);

        let norm = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_repeated_token_counts_in_one_bucket() {
        let embedder = HashEmbedder::new(16);
        let vector = embedder.embed("tabs tabs tabs");
        let non_zero: Vec<f32> = vector.iter().copied().filter(|v| *v != 0.0).collect();
        assert_eq!(non_zero.len(), 1);
        assert!((non_zero[0] - 1.0).abs() < 1e-6);
    }
}
