//! Model management for ONNX Runtime
//!
//! Locates (and optionally downloads) the detector and extractor models and
//! loads each one at most once per process.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::config::ModelSettings;
use crate::error::AuditError;

/// Environment variable that disables model downloads
pub const OFFLINE_ENV: &str = "SHELF_AUDIT_OFFLINE";

/// The two models the recognition core runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Object localization model (YOLO-style)
    Detector,
    /// Image feature backbone producing descriptors
    Extractor,
}

impl ModelType {
    /// Short name used in logs and errors
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::Detector => "detector",
            ModelType::Extractor => "extractor",
        }
    }
}

/// Model manager for locating and downloading ONNX models
pub struct ModelManager {
    models_dir: PathBuf,
    settings: ModelSettings,
}

impl ModelManager {
    /// Create a model manager; uses the data directory unless one is configured
    pub fn new(settings: &ModelSettings) -> Result<Self> {
        let models_dir = match &settings.models_dir {
            Some(dir) => dir.clone(),
            None => crate::storage::get_data_dir()?.join("models"),
        };
        Self::with_dir(models_dir, settings)
    }

    /// Create model manager with custom directory
    pub fn with_dir(models_dir: PathBuf, settings: &ModelSettings) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", models_dir))?;

        Ok(Self {
            models_dir,
            settings: settings.clone(),
        })
    }

    /// Get the models directory path
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Intra-op thread count for new sessions
    pub fn intra_threads(&self) -> usize {
        self.settings.intra_threads
    }

    /// Get the path to a specific model file
    pub fn model_path(&self, model_type: ModelType) -> PathBuf {
        let filename = match model_type {
            ModelType::Detector => &self.settings.detector_file,
            ModelType::Extractor => &self.settings.extractor_file,
        };
        self.models_dir.join(filename)
    }

    fn download_url(&self, model_type: ModelType) -> Option<&str> {
        match model_type {
            ModelType::Detector => self.settings.detector_url.as_deref(),
            ModelType::Extractor => self.settings.extractor_url.as_deref(),
        }
    }

    fn expected_sha256(&self, model_type: ModelType) -> Option<&str> {
        match model_type {
            ModelType::Detector => self.settings.detector_sha256.as_deref(),
            ModelType::Extractor => self.settings.extractor_sha256.as_deref(),
        }
    }

    /// Check if a model file is present and non-empty
    pub fn is_model_available(&self, model_type: ModelType) -> bool {
        std::fs::metadata(self.model_path(model_type))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Download a model if not already available.
    /// Returns the path to the model file
    pub fn ensure_model(&self, model_type: ModelType) -> Result<PathBuf> {
        let path = self.model_path(model_type);

        if self.is_model_available(model_type) {
            debug!("Model {:?} available at {:?}", model_type, path);
            return Ok(path);
        }

        let Some(url) = self.download_url(model_type) else {
            anyhow::bail!(
                "{} model not found at {:?} and no download URL is configured",
                model_type.display_name(),
                path
            );
        };

        if std::env::var(OFFLINE_ENV).is_ok() {
            anyhow::bail!(
                "Offline mode: cannot download models. Please download manually from {} and place at {:?}",
                url,
                path
            );
        }

        info!("Downloading {} model from {}", model_type.display_name(), url);

        // Create a tokio runtime for async download
        let rt = Runtime::new().context("Failed to create tokio runtime")?;
        rt.block_on(self.download_file_async(url, &path, model_type))?;

        if !self.is_model_available(model_type) {
            anyhow::bail!("Download completed but model file is missing or empty");
        }

        info!("Successfully downloaded {} model", model_type.display_name());
        Ok(path)
    }

    /// Async download implementation
    async fn download_file_async(&self, url: &str, path: &Path, model_type: ModelType) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        let response = client
            .get(url)
            .send()
            .await
            .context("Failed to send download request")?;

        if !response.status().is_success() {
            anyhow::bail!("Download failed with status {}: {}", response.status(), url);
        }

        debug!("Download size: {:?} bytes", response.content_length());

        let temp_path = path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

        let mut hasher = Sha256::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Error reading download stream")?;
            file.write_all(&chunk).context("Failed to write to temp file")?;
            hasher.update(&chunk);
        }

        file.flush().context("Failed to flush temp file")?;
        drop(file);

        let hash = format!("{:x}", hasher.finalize());
        if let Some(expected) = self.expected_sha256(model_type) {
            if !hash.eq_ignore_ascii_case(expected) {
                std::fs::remove_file(&temp_path).ok();
                anyhow::bail!(
                    "Checksum mismatch for {}: expected {}, got {}",
                    model_type.display_name(),
                    expected,
                    hash
                );
            }
            info!("Checksum verified for {} model", model_type.display_name());
        }

        std::fs::rename(&temp_path, path).context("Failed to move downloaded file to final location")?;

        Ok(())
    }
}

/// ONNX Runtime session wrapper
pub struct OnnxSession {
    session: Session,
    input_names: Vec<String>,
}

impl OnnxSession {
    /// Create a new ONNX session from a model file
    pub fn new(model_path: &Path, intra_threads: usize) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads.max(1))?
            .commit_from_file(model_path)
            .context("Failed to load ONNX model")?;

        let input_names: Vec<String> = session.inputs.iter().map(|input| input.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|output| output.name.clone()).collect();

        if input_names.is_empty() || output_names.is_empty() {
            anyhow::bail!("Model {:?} declares no inputs or no outputs", model_path);
        }

        info!("Model loaded. Inputs: {:?}, Outputs: {:?}", input_names, output_names);

        Ok(Self { session, input_names })
    }

    /// Feed an NCHW tensor to the first input and return the first output as
    /// `(shape, values)`
    pub fn run(&mut self, input: Array4<f32>) -> Result<(Vec<i64>, Vec<f32>), AuditError> {
        let (n, c, h, w) = input.dim();
        let data: Vec<f32> = input.iter().copied().collect();

        let value = Tensor::from_array(([n, c, h, w], data.into_boxed_slice()))
            .map_err(AuditError::inference)?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_names[0].as_str() => value])
            .map_err(AuditError::inference)?;

        let (shape, values) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(AuditError::inference)?;

        Ok((shape.iter().copied().collect(), values.to_vec()))
    }
}

type Loader<T> = Box<dyn Fn() -> Result<T, AuditError> + Send + Sync>;

/// A model loaded on first use and shared afterwards.
///
/// The check-then-load runs under a mutex so concurrent first callers load
/// the model once. A failed load leaves the slot empty and the next call
/// retries. Inference on the shared session is serialized by its own lock.
pub struct LazyModel<T = OnnxSession> {
    name: &'static str,
    loader: Loader<T>,
    slot: Mutex<Option<Arc<Mutex<T>>>>,
}

impl LazyModel<OnnxSession> {
    /// Load `model_type` through `manager` on first use
    pub fn new(manager: Arc<ModelManager>, model_type: ModelType) -> Self {
        let name = model_type.display_name();

        Self::with_loader(name, move || {
            let path = manager
                .ensure_model(model_type)
                .map_err(|e| AuditError::model_load(name, format!("{:#}", e)))?;

            OnnxSession::new(&path, manager.intra_threads())
                .map_err(|e| AuditError::model_load(name, format!("{:#}", e)))
        })
    }
}

impl<T> LazyModel<T> {
    pub fn with_loader(name: &'static str, loader: impl Fn() -> Result<T, AuditError> + Send + Sync + 'static) -> Self {
        Self {
            name,
            loader: Box::new(loader),
            slot: Mutex::new(None),
        }
    }

    #[cfg(test)]
    fn is_loaded(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Get the model, loading it if this is the first call
    pub fn get(&self) -> Result<Arc<Mutex<T>>, AuditError> {
        let mut slot = self.slot.lock();
        if let Some(model) = slot.as_ref() {
            return Ok(Arc::clone(model));
        }

        info!("Loading {} model", self.name);
        let model = Arc::new(Mutex::new((self.loader)()?));
        *slot = Some(Arc::clone(&model));
        Ok(model)
    }
}
