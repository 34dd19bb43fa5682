//! Catalog file storage
//!
//! A plain JSON list of catalog entries, descriptors included. The core does
//! not depend on this format; it only backs the command-line tool.

use anyhow::{Context, Result};
use std::path::Path;

use crate::catalog::CatalogEntry;

/// Load a catalog; a missing file is an empty catalog
pub fn load_catalog(path: &Path) -> Result<Vec<CatalogEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog {:?}", path))?;
    let entries: Vec<CatalogEntry> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse catalog {:?}", path))?;
    Ok(entries)
}

/// Save a catalog, replacing the file
pub fn save_catalog(entries: &[CatalogEntry], path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(entries)?;

    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, content)
        .with_context(|| format!("Failed to write catalog {:?}", temp_path))?;
    std::fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to replace catalog {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::Descriptor;

    #[test]
    fn test_missing_catalog_is_empty() {
        let temp = tempfile::tempdir().unwrap();
        let entries = load_catalog(&temp.path().join("catalog.json")).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_save_and_load_catalog() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("catalog.json");

        let mut soda = CatalogEntry::new(1, "SodaCan", 5, 10)
            .with_descriptor(Descriptor::new(vec![0.25, -1.5, 3.0]));
        soda.reference_image = Some(temp.path().join("soda.jpg"));
        let entries = vec![soda, CatalogEntry::new(2, "Chips", 0, 3)];

        save_catalog(&entries, &path).unwrap();
        let loaded = load_catalog(&path).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].name, "SodaCan");
        assert_eq!(loaded[0].reference_image, entries[0].reference_image);
        assert_eq!(loaded[0].descriptor, entries[0].descriptor);
        assert!(loaded[1].descriptor.is_none());
    }

    #[test]
    fn test_load_catalog_invalid_json() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("catalog.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(load_catalog(&path).is_err());
    }
}
