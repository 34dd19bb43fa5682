//! Shelf Audit - product recognition on shelf photos
//!
//! Detects candidate product regions in a shelf photo, matches each region
//! against registered reference descriptors and derives per-product stock
//! decisions.

pub mod catalog;
pub mod config;
pub mod error;
pub mod recognition;
pub mod storage;
pub mod vision;

pub use catalog::{CatalogEntry, ProductId};
pub use config::AppConfig;
pub use error::{AuditError, RegistrationFailure};
pub use recognition::{AuditOutcome, Decision, MatchResult, ShelfAuditor};
pub use vision::{Descriptor, OnnxBackend, VisionBackend};
