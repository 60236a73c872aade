//! Storage module for persisting harvest checkpoints
//!
//! This module handles all database operations for the harvester, including:
//! - SQLite database initialization and schema management
//! - The current epoch marker and epoch invalidation
//! - Brand, model, year-variant and price rows with their processing status
//! - Unit-of-work transactions so an interrupted run never leaves half a step
//! - Run tracking for the invocation history

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{CheckpointStore, StorageError, StorageResult};

use crate::state::{VehicleCategory, WorkStatus};

/// The reference table version the checkpoint rows belong to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Epoch {
    /// Opaque reference table code
    pub code: i64,
    /// Human label, e.g. "outubro/2026"
    pub label: String,
}

/// Traversal levels that carry a processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityLevel {
    Model,
    YearVariant,
}

impl EntityLevel {
    pub(crate) fn table(&self) -> &'static str {
        match self {
            Self::Model => "models",
            Self::YearVariant => "year_variants",
        }
    }
}

/// Identity of a model row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelKey {
    pub id: i64,
    pub brand_id: i64,
    pub category: VehicleCategory,
}

/// Identity of a year-variant row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearVariantKey {
    pub code: String,
    pub model_id: i64,
    pub brand_id: i64,
    pub category: VehicleCategory,
}

/// Represents a brand in the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrandRecord {
    pub id: i64,
    pub category: VehicleCategory,
    pub name: String,
    pub epoch: i64,
}

/// Represents a model in the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRecord {
    pub id: i64,
    pub brand_id: i64,
    pub category: VehicleCategory,
    pub name: String,
    pub epoch: i64,
    pub status: WorkStatus,
}

impl ModelRecord {
    pub fn key(&self) -> ModelKey {
        ModelKey {
            id: self.id,
            brand_id: self.brand_id,
            category: self.category,
        }
    }
}

/// Represents a model-year variant in the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearVariantRecord {
    pub code: String,
    pub model_id: i64,
    pub brand_id: i64,
    pub category: VehicleCategory,
    pub label: String,
    pub epoch: i64,
    /// Set once the price lookup succeeds
    pub fipe_code: Option<String>,
    /// Set once the price lookup succeeds
    pub model_year: Option<i64>,
    pub status: WorkStatus,
}

impl YearVariantRecord {
    pub fn key(&self) -> YearVariantKey {
        YearVariantKey {
            code: self.code.clone(),
            model_id: self.model_id,
            brand_id: self.brand_id,
            category: self.category,
        }
    }
}

/// Represents a resolved price in the database
///
/// Identity is `(fipe_code, model_year, category)`; the first insert wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceRecord {
    pub fipe_code: String,
    pub model_year: i64,
    pub category: VehicleCategory,
    pub brand_name: String,
    pub model_name: String,
    pub fuel: String,
    pub price: String,
    pub reference_month: String,
    pub epoch: i64,
}

/// Represents a harvest invocation
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub epoch: Option<i64>,
    pub units: u64,
    pub status: RunStatus,
}

/// Status of a harvest invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    /// Every phase finished and the export was written
    Completed,
    /// Stopped early; another invocation is needed
    Incomplete,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Incomplete => "incomplete",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "incomplete" => Some(Self::Incomplete),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
