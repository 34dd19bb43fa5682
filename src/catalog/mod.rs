//! Product catalog records
//!
//! The catalog store itself lives outside the core; it hands the core a
//! snapshot of these entries and persists whatever descriptor the core
//! computes for them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::vision::Descriptor;

/// Catalog identifier of a registered product
pub type ProductId = u64;

/// A registered product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Unique identifier
    pub id: ProductId,
    /// Display name
    pub name: String,
    /// Minimum acceptable on-shelf count
    pub shelf_threshold: i32,
    /// Units available in the backroom
    pub backroom_stock: i32,
    /// Location of the reference photo
    #[serde(default)]
    pub reference_image: Option<PathBuf>,
    /// Reference descriptor, absent until registration succeeds
    #[serde(default)]
    pub descriptor: Option<Descriptor>,
}

impl CatalogEntry {
    /// Create an entry with no reference image and no descriptor
    pub fn new(id: ProductId, name: &str, shelf_threshold: i32, backroom_stock: i32) -> Self {
        Self {
            id,
            name: name.to_string(),
            shelf_threshold,
            backroom_stock,
            reference_image: None,
            descriptor: None,
        }
    }

    /// Set the reference descriptor
    pub fn with_descriptor(mut self, descriptor: Descriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    /// Whether this entry takes part in matching
    pub fn is_matchable(&self) -> bool {
        self.descriptor.is_some()
    }
}

/// Find an entry by display name (first match wins)
pub fn find_by_name<'a>(catalog: &'a [CatalogEntry], name: &str) -> Option<&'a CatalogEntry> {
    catalog.iter().find(|e| e.name == name)
}

/// Next free identifier for a new entry
pub fn next_id(catalog: &[CatalogEntry]) -> ProductId {
    catalog.iter().map(|e| e.id).max().map_or(1, |max| max + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_helpers() {
        let catalog = vec![
            CatalogEntry::new(1, "SodaCan", 5, 10),
            CatalogEntry::new(4, "Crackers", 2, 0)
                .with_descriptor(Descriptor::new(vec![1.0, 0.0])),
        ];

        assert_eq!(find_by_name(&catalog, "Crackers").map(|e| e.id), Some(4));
        assert!(find_by_name(&catalog, "Milk").is_none());
        assert_eq!(next_id(&catalog), 5);
        assert_eq!(next_id(&[]), 1);

        assert!(!catalog[0].is_matchable());
        assert!(catalog[1].is_matchable());
    }

    #[test]
    fn test_entry_json_defaults() {
        let json = r#"{"id": 3, "name": "Chips", "shelf_threshold": 4, "backroom_stock": 1}"#;
        let entry: CatalogEntry = serde_json::from_str(json).unwrap();

        assert_eq!(entry.id, 3);
        assert!(entry.reference_image.is_none());
        assert!(entry.descriptor.is_none());
    }
}
