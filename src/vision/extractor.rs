//! Descriptor extraction
//!
//! Runs a classification backbone with its head removed and flattens the
//! pooled features (`[1, D, 1, 1]` or `[1, D]`) into a [`Descriptor`].

use image::DynamicImage;
use std::sync::Arc;
use tracing::debug;

use super::descriptor::Descriptor;
use super::models::{LazyModel, ModelManager, ModelType};
use super::preprocess::{preprocess_for_embedding, EmbeddingPreprocess};
use crate::error::AuditError;

/// Descriptor dimensionality of the default ResNet-50 backbone
pub const DEFAULT_DESCRIPTOR_DIM: usize = 2048;

/// Feature extractor backed by an ONNX model
pub struct DescriptorExtractor {
    model: LazyModel,
    preprocess: EmbeddingPreprocess,
    descriptor_dim: usize,
}

impl DescriptorExtractor {
    /// Create an extractor; the model is loaded on first use
    pub fn new(manager: Arc<ModelManager>, descriptor_dim: usize) -> Self {
        Self {
            model: LazyModel::new(manager, ModelType::Extractor),
            preprocess: EmbeddingPreprocess::default(),
            descriptor_dim,
        }
    }

    /// Force the model load
    pub fn preload(&self) -> Result<(), AuditError> {
        self.model.get().map(|_| ())
    }

    /// Compute the descriptor of an image region
    pub fn extract(&self, region: &DynamicImage) -> Result<Descriptor, AuditError> {
        let tensor = preprocess_for_embedding(region, &self.preprocess);

        let session = self.model.get()?;
        let (shape, values) = session.lock().run(tensor)?;

        debug!("Extractor output shape {:?}", shape);
        flatten_features(values, &shape, self.descriptor_dim)
    }
}

/// Check a single-batch feature output and wrap it as a descriptor
pub fn flatten_features(values: Vec<f32>, shape: &[i64], expected_dim: usize) -> Result<Descriptor, AuditError> {
    if shape.first().is_some_and(|&batch| batch != 1) {
        return Err(AuditError::inference(format!(
            "extractor returned batch shape {:?}",
            shape
        )));
    }

    if values.len() != expected_dim {
        return Err(AuditError::inference(format!(
            "extractor produced {} values, expected {} (shape {:?})",
            values.len(),
            expected_dim,
            shape
        )));
    }

    if values.iter().any(|v| !v.is_finite()) {
        return Err(AuditError::inference("extractor produced non-finite values"));
    }

    Ok(Descriptor::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_pooled_features() {
        let values: Vec<f32> = (0..8).map(|v| v as f32).collect();

        let pooled = flatten_features(values.clone(), &[1, 8, 1, 1], 8).unwrap();
        assert_eq!(pooled.dim(), 8);
        assert_eq!(pooled.as_slice()[7], 7.0);

        let flat = flatten_features(values, &[1, 8], 8).unwrap();
        assert_eq!(flat, pooled);
    }

    #[test]
    fn test_flatten_rejects_wrong_dimension() {
        let err = flatten_features(vec![0.0; 4], &[1, 4], 8).unwrap_err();
        assert!(matches!(err, AuditError::Inference(_)));

        assert!(flatten_features(vec![0.0; 8], &[2, 4], 8).is_err());
        assert!(flatten_features(vec![f32::NAN; 2], &[1, 2], 2).is_err());
    }
}
