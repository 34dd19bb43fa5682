//! Fixed-length visual descriptors
//!
//! Descriptors are compared with cosine similarity. Their magnitude is
//! whatever the extractor produces; registration and matching both use the
//! same extractor so magnitudes stay consistent.

use serde::{Deserialize, Serialize};

/// Dense feature vector summarizing an image region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor(Vec<f32>);

impl Descriptor {
    /// Wrap a raw feature vector
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    /// Dimensionality of the vector
    pub fn dim(&self) -> usize {
        self.0.len()
    }

    /// Raw vector values
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Cosine similarity with another descriptor of the same dimensionality.
    ///
    /// Returns 0.0 when either vector has zero magnitude.
    pub fn cosine_similarity(&self, other: &Descriptor) -> f32 {
        cosine_similarity(&self.0, &other.0)
    }
}

/// Cosine similarity `dot(a, b) / (|a| * |b|)` accumulated in f64, clamped to [-1, 1]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator < 1e-12 {
        return 0.0;
    }

    (dot / denominator).clamp(-1.0, 1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_is_symmetric() {
        let pairs = [
            (vec![1.0, 2.0, 3.0], vec![-0.5, 4.0, 0.25]),
            (vec![0.3, -0.7], vec![0.9, 0.1]),
            (vec![5.0, 5.0, 0.0, 1.0], vec![0.0, 1.0, 2.0, 3.0]),
        ];

        for (a, b) in pairs {
            let a = Descriptor::new(a);
            let b = Descriptor::new(b);
            assert_eq!(a.cosine_similarity(&b), b.cosine_similarity(&a));
        }
    }

    #[test]
    fn test_self_similarity_is_one() {
        let d = Descriptor::new(vec![0.12, 3.4, -7.5, 0.0, 22.0]);
        assert!((d.cosine_similarity(&d) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_range_and_zero_vector() {
        let a = Descriptor::new(vec![1.0, 0.0]);
        let opposite = Descriptor::new(vec![-2.0, 0.0]);
        let zero = Descriptor::new(vec![0.0, 0.0]);

        assert!((a.cosine_similarity(&opposite) + 1.0).abs() < 1e-6);
        assert_eq!(a.cosine_similarity(&zero), 0.0);
    }

    #[test]
    fn test_json_persistence_preserves_values() {
        let d = Descriptor::new(vec![0.5, -0.25, 8.0]);
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, "[0.5,-0.25,8.0]");

        let restored: Descriptor = serde_json::from_str(&json).unwrap();
        for (x, y) in restored.as_slice().iter().zip(d.as_slice()) {
            assert!((x - y).abs() < 1e-6);
        }
    }
}
