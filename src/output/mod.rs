//! Output module for final artifacts and statistics
//!
//! This module handles:
//! - Exporting the completed catalog as gzip-compressed JSON plus a version descriptor
//! - Loading and printing checkpoint statistics
//! - Emitting the "more work remains" flag for the external scheduler

mod export;
pub mod signal;
pub mod stats;

pub use export::{
    ExportSummary, Exporter, VersionDescriptor, BRANDS_FILE, MODELS_FILE, PRICES_FILE,
    VERSION_FILE, YEARS_FILE,
};
pub use signal::emit_continue_flag;
pub use stats::{load_statistics, print_statistics, HarvestStatistics};

use crate::storage::StorageError;
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;
