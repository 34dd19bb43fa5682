//! Matching engine
//!
//! Detects regions in a shelf image, extracts a descriptor per region and
//! binds each region to the most similar catalog descriptor when the
//! similarity clears the acceptance threshold.

use image::DynamicImage;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogEntry, ProductId};
use crate::error::AuditError;
use crate::vision::{BoundingBox, Descriptor, VisionBackend};

/// Label shown for regions with no accepted match
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Score reported when the catalog has no descriptor to compare against
pub const NO_CANDIDATE_SCORE: f32 = -1.0;

/// Outcome for one detected region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// Region location in the shelf image
    pub bbox: BoundingBox,
    /// Best similarity found, accepted or not
    pub score: f32,
    /// Matched product, `None` when no candidate cleared the threshold
    pub product_id: Option<ProductId>,
    /// Name of the matched product
    pub product_name: Option<String>,
}

impl MatchResult {
    /// Whether the region was bound to a catalog entry
    pub fn is_match(&self) -> bool {
        self.product_id.is_some()
    }

    /// Product name, or "Unknown"
    pub fn label(&self) -> &str {
        self.product_name.as_deref().unwrap_or(UNKNOWN_LABEL)
    }
}

/// Find the catalog entry most similar to `query`.
///
/// Entries without a descriptor are skipped. On ties the entry that comes
/// first in catalog order wins. With no comparable entry the score is
/// [`NO_CANDIDATE_SCORE`].
pub fn best_match<'a>(query: &Descriptor, catalog: &'a [CatalogEntry]) -> (f32, Option<&'a CatalogEntry>) {
    let mut best_score = NO_CANDIDATE_SCORE;
    let mut best_entry = None;

    for entry in catalog {
        let Some(reference) = &entry.descriptor else {
            continue;
        };

        if reference.dim() != query.dim() {
            warn!(
                "Skipping '{}': descriptor has {} dimensions, query has {}",
                entry.name,
                reference.dim(),
                query.dim()
            );
            continue;
        }

        let score = query.cosine_similarity(reference);
        if best_entry.is_none() || score > best_score {
            best_score = score;
            best_entry = Some(entry);
        }
    }

    (best_score, best_entry)
}

/// Binds detected regions to catalog entries
pub struct MatchingEngine {
    backend: Arc<dyn VisionBackend>,
    acceptance_threshold: f32,
}

impl MatchingEngine {
    /// A region matches when its best similarity is strictly above `acceptance_threshold`
    pub fn new(backend: Arc<dyn VisionBackend>, acceptance_threshold: f32) -> Self {
        Self {
            backend,
            acceptance_threshold,
        }
    }

    /// Match every region of `image` against `catalog`, one result per region
    pub fn match_image(&self, image: &DynamicImage, catalog: &[CatalogEntry]) -> Result<Vec<MatchResult>, AuditError> {
        let start = Instant::now();

        let regions = self.backend.detect(image)?;
        let candidates = catalog.iter().filter(|e| e.is_matchable()).count();
        debug!("{} regions, {} catalog entries with descriptors", regions.len(), candidates);

        let mut results = Vec::with_capacity(regions.len());

        for region in &regions {
            let query = self.backend.extract(&region.crop)?;
            let result = self.classify(region.bbox, &query, catalog);

            debug!(
                "Region {:?}: best score {:.3}, match {}",
                region.bbox,
                result.score,
                result.label()
            );
            results.push(result);
        }

        info!(
            "Matched {} of {} regions in {:?}",
            results.iter().filter(|r| r.is_match()).count(),
            results.len(),
            start.elapsed()
        );

        Ok(results)
    }

    /// Build the result for one region from its descriptor
    pub fn classify(&self, bbox: BoundingBox, query: &Descriptor, catalog: &[CatalogEntry]) -> MatchResult {
        let (score, entry) = best_match(query, catalog);

        match entry {
            Some(entry) if score > self.acceptance_threshold => MatchResult {
                bbox,
                score,
                product_id: Some(entry.id),
                product_name: Some(entry.name.clone()),
            },
            _ => MatchResult {
                bbox,
                score,
                product_id: None,
                product_name: None,
            },
        }
    }
}
