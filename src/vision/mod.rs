//! Vision Layer
//!
//! Region detection and descriptor extraction. The recognition pipeline only
//! sees the [`VisionBackend`] capability; [`OnnxBackend`] provides it with
//! ONNX Runtime models, tests provide fixed boxes and descriptors.

pub mod descriptor;
pub mod detection;
pub mod extractor;
pub mod models;
pub mod preprocess;

#[cfg(test)]
pub(crate) mod stub;

use anyhow::Result;
use image::DynamicImage;
use parking_lot::{const_mutex, Mutex};
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::error::AuditError;

pub use descriptor::{cosine_similarity, Descriptor};
pub use detection::{BoundingBox, DetectedRegion, RegionDetector};
pub use extractor::{DescriptorExtractor, DEFAULT_DESCRIPTOR_DIM};
pub use models::{ModelManager, ModelType, OnnxSession};

/// Detection and extraction capability used by registration and matching
pub trait VisionBackend: Send + Sync {
    /// Locate candidate object regions; an empty result is not an error
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectedRegion>, AuditError>;

    /// Compute the descriptor of an image region
    fn extract(&self, region: &DynamicImage) -> Result<Descriptor, AuditError>;
}

/// Decode raw image bytes in any supported raster format
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, AuditError> {
    if bytes.is_empty() {
        return Err(AuditError::InvalidImage("input is empty".to_string()));
    }

    image::load_from_memory(bytes).map_err(|e| AuditError::InvalidImage(e.to_string()))
}

/// Process-wide backend, created on first request
static SHARED_BACKEND: Mutex<Option<Arc<OnnxBackend>>> = const_mutex(None);

/// ONNX Runtime implementation of [`VisionBackend`]
pub struct OnnxBackend {
    detector: RegionDetector,
    extractor: DescriptorExtractor,
}

impl OnnxBackend {
    /// Create a backend from configuration; models load on first use
    pub fn new(config: &AppConfig) -> Result<Self> {
        let manager = Arc::new(ModelManager::new(&config.models)?);
        info!("Model directory: {:?}", manager.models_dir());

        Ok(Self {
            detector: RegionDetector::new(Arc::clone(&manager), config.detection.clone()),
            extractor: DescriptorExtractor::new(manager, config.models.descriptor_dim),
        })
    }

    /// Get the process-wide backend, creating it from `config` on the first call.
    ///
    /// Later calls return the same instance and ignore `config`.
    pub fn shared(config: &AppConfig) -> Result<Arc<Self>> {
        let mut shared = SHARED_BACKEND.lock();
        if let Some(backend) = shared.as_ref() {
            return Ok(Arc::clone(backend));
        }

        let backend = Arc::new(Self::new(config)?);
        *shared = Some(Arc::clone(&backend));
        Ok(backend)
    }

    /// Load both models now instead of on the first scan
    pub fn preload(&self) -> Result<(), AuditError> {
        self.detector.preload()?;
        self.extractor.preload()
    }
}

impl VisionBackend for OnnxBackend {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectedRegion>, AuditError> {
        self.detector.detect(image)
    }

    fn extract(&self, region: &DynamicImage) -> Result<Descriptor, AuditError> {
        self.extractor.extract(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    #[test]
    fn test_decode_png_bytes() {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(8, 4))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();

        let decoded = decode_image(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 4));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_image(b""), Err(AuditError::InvalidImage(_))));
        assert!(matches!(
            decode_image(b"definitely not an image"),
            Err(AuditError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_backend_models_load_lazily() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.models.models_dir = Some(temp.path().to_path_buf());

        // Construction succeeds without model files; first use reports them
        let backend = OnnxBackend::new(&config).unwrap();
        let image = DynamicImage::ImageRgb8(RgbImage::new(32, 32));

        assert!(matches!(backend.detect(&image), Err(AuditError::ModelLoad { .. })));
        assert!(matches!(backend.extract(&image), Err(AuditError::ModelLoad { .. })));
    }
}
