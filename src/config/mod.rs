//! Application Configuration
//!
//! Model locations, detection and matching thresholds, and rendering
//! options, stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::vision::DEFAULT_DESCRIPTOR_DIM;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Model file settings
    pub models: ModelSettings,
    /// Detector settings
    pub detection: DetectionSettings,
    /// Matching settings
    pub matching: MatchingSettings,
    /// Annotated image settings
    pub annotation: AnnotationSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// Model file locations and session options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Directory holding the model files (defaults to `<data dir>/models`)
    pub models_dir: Option<PathBuf>,
    /// Detector model filename
    pub detector_file: String,
    /// Extractor model filename
    pub extractor_file: String,
    /// Where to fetch the detector model if it is missing
    pub detector_url: Option<String>,
    /// Where to fetch the extractor model if it is missing
    pub extractor_url: Option<String>,
    /// Expected SHA-256 of a downloaded detector model
    pub detector_sha256: Option<String>,
    /// Expected SHA-256 of a downloaded extractor model
    pub extractor_sha256: Option<String>,
    /// Extractor output dimensionality
    pub descriptor_dim: usize,
    /// Intra-op threads per ONNX session
    pub intra_threads: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            models_dir: None,
            detector_file: "yolov8n.onnx".to_string(),
            extractor_file: "resnet50_features.onnx".to_string(),
            detector_url: None,
            extractor_url: None,
            detector_sha256: None,
            extractor_sha256: None,
            descriptor_dim: DEFAULT_DESCRIPTOR_DIM,
            intra_threads: 4,
        }
    }
}

/// Region detector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Minimum class score for a candidate region (0.0 - 1.0)
    pub confidence_threshold: f32,
    /// Overlap above which same-class boxes are suppressed
    pub iou_threshold: f32,
    /// Square model input size in pixels
    pub input_size: u32,
    /// Maximum regions kept per image
    pub max_detections: usize,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            iou_threshold: 0.7,
            input_size: 640,
            max_detections: 300,
        }
    }
}

/// Matching engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingSettings {
    /// A region is accepted when its best similarity exceeds this value
    pub acceptance_threshold: f32,
    /// Upper bound on a whole scan, in seconds
    pub scan_timeout_secs: u64,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.6,
            scan_timeout_secs: 60,
        }
    }
}

/// Annotated image settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationSettings {
    /// TrueType font for labels; common system fonts are tried when unset
    pub font_path: Option<PathBuf>,
    /// Box and label color [R, G, B]
    pub color: [u8; 3],
    /// Box outline width in pixels
    pub line_width: u32,
    /// Label font size in pixels
    pub font_size: f32,
}

impl Default for AnnotationSettings {
    fn default() -> Self {
        Self {
            font_path: None,
            color: [255, 0, 0],
            line_width: 3,
            font_size: 16.0,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Load configuration from `path`, writing the defaults there first if the
/// file does not exist. An existing file that fails to parse is an error.
pub fn load_or_create_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        return load_config(path);
    }

    let config = AppConfig::default();
    save_config(&config, path).with_context(|| format!("Failed to write default config {:?}", path))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert!(config.models.models_dir.is_none());
        assert_eq!(config.models.detector_file, "yolov8n.onnx");
        assert_eq!(config.models.descriptor_dim, 2048);

        assert!((config.detection.confidence_threshold - 0.25).abs() < 1e-6);
        assert_eq!(config.detection.input_size, 640);

        assert!((config.matching.acceptance_threshold - 0.6).abs() < 1e-6);
        assert_eq!(config.matching.scan_timeout_secs, 60);

        assert_eq!(config.annotation.color, [255, 0, 0]);
        assert_eq!(config.annotation.line_width, 3);

        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = AppConfig::default();
        config.models.detector_url = Some("https://models.example/yolov8n.onnx".to_string());
        config.matching.acceptance_threshold = 0.75;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.models.detector_url, config.models.detector_url);
        assert!((parsed.matching.acceptance_threshold - 0.75).abs() < 1e-6);
        assert_eq!(parsed.detection.max_detections, config.detection.max_detections);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: AppConfig = toml::from_str("[matching]\nacceptance_threshold = 0.8\n").unwrap();

        assert!((parsed.matching.acceptance_threshold - 0.8).abs() < 1e-6);
        assert_eq!(parsed.matching.scan_timeout_secs, 60);
        assert_eq!(parsed.models.extractor_file, "resnet50_features.onnx");
    }

    #[test]
    fn test_save_and_load_config() {
        let config = AppConfig::default();
        let temp_file = NamedTempFile::new().unwrap();

        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(config.detection.input_size, loaded.detection.input_size);
        assert_eq!(config.annotation.line_width, loaded.annotation.line_width);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.toml");

        let config = load_or_create_config(&path).unwrap();

        assert!(path.exists());
        assert!((config.matching.acceptance_threshold - 0.6).abs() < 1e-6);
        assert_eq!(load_config(&path).unwrap().detection.input_size, 640);
    }

    #[test]
    fn test_load_or_create_keeps_existing_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[matching]\nacceptance_threshold = 0.8\n").unwrap();

        let config = load_or_create_config(&path).unwrap();
        assert!((config.matching.acceptance_threshold - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_load_or_create_rejects_broken_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[matching]\nacceptance_threshold = \"high\"\n").unwrap();

        assert!(load_or_create_config(&path).is_err());
        // The broken file is left for the user to fix
        assert!(std::fs::read_to_string(&path).unwrap().contains("high"));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
