//! Fixed-output backend for tests

use image::DynamicImage;
use parking_lot::Mutex;
use std::collections::VecDeque;

use super::{BoundingBox, DetectedRegion, Descriptor, VisionBackend};
use crate::error::AuditError;

/// Returns the same boxes for every image and hands out queued descriptors
/// one per `extract` call
pub(crate) struct StubBackend {
    boxes: Vec<BoundingBox>,
    descriptors: Mutex<VecDeque<Descriptor>>,
    fail_detect: bool,
    extracted_sizes: Mutex<Vec<(u32, u32)>>,
}

impl StubBackend {
    pub(crate) fn new(boxes: Vec<BoundingBox>, descriptors: Vec<Descriptor>) -> Self {
        Self {
            boxes,
            descriptors: Mutex::new(descriptors.into()),
            fail_detect: false,
            extracted_sizes: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail_detect: true,
            ..Self::new(Vec::new(), Vec::new())
        }
    }

    /// Dimensions of every image passed to `extract`, in call order
    pub(crate) fn extracted_sizes(&self) -> Vec<(u32, u32)> {
        self.extracted_sizes.lock().clone()
    }
}

impl VisionBackend for StubBackend {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectedRegion>, AuditError> {
        if self.fail_detect {
            return Err(AuditError::inference("stub detector failure"));
        }

        Ok(self
            .boxes
            .iter()
            .filter_map(|b| {
                let bbox = BoundingBox::clipped(
                    [b.x1 as f32, b.y1 as f32, b.x2 as f32, b.y2 as f32],
                    image.width(),
                    image.height(),
                )?;
                Some(DetectedRegion {
                    bbox,
                    crop: image.crop_imm(bbox.x1, bbox.y1, bbox.width(), bbox.height()),
                    confidence: 0.9,
                    class_id: 0,
                })
            })
            .collect())
    }

    fn extract(&self, region: &DynamicImage) -> Result<Descriptor, AuditError> {
        self.extracted_sizes.lock().push((region.width(), region.height()));
        self.descriptors
            .lock()
            .pop_front()
            .ok_or_else(|| AuditError::inference("stub has no descriptors left"))
    }
}

/// Encode a blank RGB image as PNG bytes
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image::RgbImage::new(width, height))
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("encode test image");
    bytes
}

/// A unit descriptor at `similarity` cosine to `[1, 0]`
pub(crate) fn descriptor_at(similarity: f32) -> Descriptor {
    Descriptor::new(vec![similarity, (1.0 - similarity * similarity).max(0.0).sqrt()])
}
