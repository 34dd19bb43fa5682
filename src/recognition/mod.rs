//! Recognition Pipeline
//!
//! Reference registration, shelf matching, aggregation, stock decisions and
//! annotation, tied together by [`ShelfAuditor`].

pub mod annotate;
pub mod decision;
pub mod matcher;
pub mod registrar;

use image::{ImageFormat, RgbImage};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;
use tracing::info;

use crate::catalog::{CatalogEntry, ProductId};
use crate::config::AppConfig;
use crate::error::{AuditError, RegistrationFailure};
use crate::vision::{decode_image, Descriptor, VisionBackend};

pub use annotate::{label_text, Annotator};
pub use decision::{aggregate, decide, decide_by_name, detected_products, Decision, DetectedProduct};
pub use matcher::{best_match, MatchResult, MatchingEngine, NO_CANDIDATE_SCORE, UNKNOWN_LABEL};
pub use registrar::Registrar;

/// Result of one shelf scan
#[derive(Debug, Clone, Serialize)]
pub struct AuditOutcome {
    /// Accepted matches per product
    pub counts: BTreeMap<ProductId, usize>,
    /// Matched products with names, in first-seen order
    pub products: Vec<DetectedProduct>,
    /// One result per detected region, unknown ones included
    pub matches: Vec<MatchResult>,
    /// Shelf image with boxes and labels drawn
    #[serde(skip)]
    pub annotated: RgbImage,
}

impl AuditOutcome {
    /// Encode the annotated image as PNG
    pub fn annotated_png(&self) -> image::ImageResult<Vec<u8>> {
        let mut bytes = Vec::new();
        self.annotated.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }
}

/// Entry point for the surrounding application
pub struct ShelfAuditor {
    registrar: Registrar,
    matcher: MatchingEngine,
    annotator: Annotator,
}

impl ShelfAuditor {
    pub fn new(backend: Arc<dyn VisionBackend>, config: &AppConfig) -> Self {
        Self {
            registrar: Registrar::new(Arc::clone(&backend)),
            matcher: MatchingEngine::new(backend, config.matching.acceptance_threshold),
            annotator: Annotator::new(&config.annotation),
        }
    }

    /// Compute and store the reference descriptor of `entry`
    pub fn register(&self, entry: &mut CatalogEntry, image_bytes: &[u8]) -> Result<Descriptor, RegistrationFailure> {
        self.registrar.register(entry, image_bytes)
    }

    /// Recognize the products in a shelf photo
    pub fn scan(&self, image_bytes: &[u8], catalog: &[CatalogEntry]) -> Result<AuditOutcome, AuditError> {
        let image = decode_image(image_bytes)?;
        let matches = self.matcher.match_image(&image, catalog)?;
        let annotated = self.annotator.annotate(&image, &matches);

        let outcome = AuditOutcome {
            counts: aggregate(&matches),
            products: detected_products(&matches),
            matches,
            annotated,
        };

        info!(
            "Scan found {} regions, {} distinct products",
            outcome.matches.len(),
            outcome.counts.len()
        );
        Ok(outcome)
    }

    /// Stock decision for one product
    pub fn decide(&self, entry: &CatalogEntry) -> Decision {
        decide(entry)
    }
}
