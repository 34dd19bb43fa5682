//! Reference registration
//!
//! Computes the reference descriptor of a catalog entry from its reference
//! photo. The first detected region is used when the detector finds one,
//! the whole photo otherwise.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::catalog::CatalogEntry;
use crate::error::{AuditError, RegistrationFailure};
use crate::vision::{decode_image, Descriptor, VisionBackend};

/// Registers reference photos for catalog entries
pub struct Registrar {
    backend: Arc<dyn VisionBackend>,
}

impl Registrar {
    pub fn new(backend: Arc<dyn VisionBackend>) -> Self {
        Self { backend }
    }

    /// Descriptor of the product shown in a reference photo
    pub fn compute_descriptor(&self, image_bytes: &[u8]) -> Result<Descriptor, AuditError> {
        let image = decode_image(image_bytes)?;
        let regions = self.backend.detect(&image)?;

        let descriptor = match regions.first() {
            Some(region) => {
                debug!(
                    "Using region {:?} (confidence {:.2}) of {} detected",
                    region.bbox,
                    region.confidence,
                    regions.len()
                );
                self.backend.extract(&region.crop)?
            }
            None => {
                debug!("No region detected, using the whole {}x{} image", image.width(), image.height());
                self.backend.extract(&image)?
            }
        };

        Ok(descriptor)
    }

    /// Compute and store the descriptor of `entry`.
    ///
    /// Always recomputes, replacing any earlier descriptor. On failure the
    /// entry is left without a descriptor and will not be matched.
    pub fn register(&self, entry: &mut CatalogEntry, image_bytes: &[u8]) -> Result<Descriptor, RegistrationFailure> {
        let start = Instant::now();

        match self.compute_descriptor(image_bytes) {
            Ok(descriptor) => {
                info!(
                    "Registered '{}' (id {}): {}-dim descriptor in {:?}",
                    entry.name,
                    entry.id,
                    descriptor.dim(),
                    start.elapsed()
                );
                entry.descriptor = Some(descriptor.clone());
                Ok(descriptor)
            }
            Err(e) => {
                error!("Registration of '{}' (id {}) failed: {}", entry.name, entry.id, e);
                entry.descriptor = None;
                Err(RegistrationFailure {
                    product_id: entry.id,
                    source: e,
                })
            }
        }
    }
}
