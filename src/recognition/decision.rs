//! Per-product aggregation and stock decisions

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::matcher::MatchResult;
use crate::catalog::{find_by_name, CatalogEntry, ProductId};

/// Stock action for one product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    NoAction,
    RestockFromBackroom,
    OrderFromSupplier,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Decision::NoAction => "no action",
            Decision::RestockFromBackroom => "restock from backroom",
            Decision::OrderFromSupplier => "order from supplier",
        };
        f.write_str(text)
    }
}

/// A product seen in a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectedProduct {
    pub id: ProductId,
    pub name: String,
    pub count: usize,
}

/// Count accepted matches per product; unknown regions count for nothing
pub fn aggregate(matches: &[MatchResult]) -> BTreeMap<ProductId, usize> {
    let mut counts = BTreeMap::new();
    for id in matches.iter().filter_map(|m| m.product_id) {
        *counts.entry(id).or_insert(0) += 1;
    }
    counts
}

/// Matched products in the order they were first seen
pub fn detected_products(matches: &[MatchResult]) -> Vec<DetectedProduct> {
    let mut products: Vec<DetectedProduct> = Vec::new();

    for m in matches {
        let Some(id) = m.product_id else {
            continue;
        };

        match products.iter_mut().find(|p| p.id == id) {
            Some(product) => product.count += 1,
            None => products.push(DetectedProduct {
                id,
                name: m.label().to_string(),
                count: 1,
            }),
        }
    }

    products
}

/// Stock decision from the configured thresholds.
///
/// Only the static shelf threshold and backroom stock are consulted; the
/// on-shelf count observed by a scan does not enter the decision.
pub fn decide(entry: &CatalogEntry) -> Decision {
    if entry.shelf_threshold > 0 {
        if entry.backroom_stock > 0 {
            Decision::RestockFromBackroom
        } else {
            Decision::OrderFromSupplier
        }
    } else {
        Decision::NoAction
    }
}

/// Decide for the product with the given display name
pub fn decide_by_name(catalog: &[CatalogEntry], name: &str) -> Option<Decision> {
    find_by_name(catalog, name).map(decide)
}
