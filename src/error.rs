//! Error types for the recognition core
//!
//! Configuration, storage and CLI code use `anyhow`; everything a caller of
//! the core can observe is one of the typed errors below.

use thiserror::Error;

use crate::catalog::ProductId;

/// Errors raised by detection, extraction, matching and annotation
#[derive(Debug, Error)]
pub enum AuditError {
    /// Input bytes could not be decoded as a raster image
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// Model assets are missing or could not be loaded
    #[error("failed to load {model} model: {reason}")]
    ModelLoad { model: &'static str, reason: String },

    /// The inference engine rejected the input or produced unusable output
    #[error("inference failed: {0}")]
    Inference(String),
}

impl AuditError {
    pub(crate) fn model_load(model: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::ModelLoad {
            model,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn inference(reason: impl std::fmt::Display) -> Self {
        Self::Inference(reason.to_string())
    }
}

/// Recoverable failure while computing a reference descriptor.
///
/// The catalog entry keeps its reference image with no descriptor and is
/// excluded from matching until registration succeeds.
#[derive(Debug, Error)]
#[error("registration of product {product_id} failed: {source}")]
pub struct RegistrationFailure {
    pub product_id: ProductId,
    #[source]
    pub source: AuditError,
}
