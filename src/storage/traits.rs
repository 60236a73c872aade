//! Storage traits and error types
//!
//! This module defines the trait interface for checkpoint store backends and
//! associated error types.

use crate::state::{CatalogEntry, VehicleCategory, WorkStatus, YearEntry};
use crate::storage::{
    BrandRecord, EntityLevel, Epoch, ModelKey, ModelRecord, PriceRecord, RunRecord, RunStatus,
    YearVariantKey, YearVariantRecord,
};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Row not found: {0}")]
    NotFound(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Invalid status transition for {row}: {from} -> {to}")]
    InvalidTransition {
        row: String,
        from: WorkStatus,
        to: WorkStatus,
    },

    #[error("Corrupt value in column {column}: {value}")]
    CorruptValue { column: &'static str, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for checkpoint store implementations
///
/// Every mutating call commits before returning, so a killed process loses at
/// most the unit of work that was in flight. Inserts are idempotent on the
/// identity tuple and status only ever moves out of `Pending`.
pub trait CheckpointStore {
    // ===== Epoch =====

    /// Gets the recorded current epoch, if any
    fn current_epoch(&self) -> StorageResult<Option<Epoch>>;

    /// Wipes every entity table and records `epoch` as current, atomically
    fn replace_epoch(&mut self, epoch: &Epoch) -> StorageResult<()>;

    /// Wipes every entity table (brands, models, year variants, prices, seed markers)
    fn clear_all(&mut self) -> StorageResult<()>;

    // ===== Idempotent inserts =====

    /// Inserts a brand unless `(id, category)` exists; returns true if inserted
    fn insert_brand(
        &mut self,
        category: VehicleCategory,
        entry: &CatalogEntry,
        epoch: i64,
    ) -> StorageResult<bool>;

    /// Inserts a pending model unless its identity exists; returns true if inserted
    fn insert_model(&mut self, key: &ModelKey, name: &str, epoch: i64) -> StorageResult<bool>;

    /// Inserts a pending year variant unless its identity exists; returns true if inserted
    fn insert_year_variant(
        &mut self,
        model: &ModelKey,
        entry: &YearEntry,
        epoch: i64,
    ) -> StorageResult<bool>;

    /// Inserts a price unless `(fipe_code, model_year, category)` exists; never overwrites
    fn insert_price(&mut self, price: &PriceRecord) -> StorageResult<bool>;

    // ===== Status =====

    /// Moves a model out of `Pending`
    ///
    /// Re-applying the current status is a no-op; any other move out of a
    /// terminal status is rejected with `InvalidTransition`.
    fn set_model_status(&mut self, key: &ModelKey, status: WorkStatus) -> StorageResult<()>;

    /// Moves a year variant out of `Pending` (same rules as models)
    fn set_year_variant_status(
        &mut self,
        key: &YearVariantKey,
        status: WorkStatus,
    ) -> StorageResult<()>;

    /// Counts pending rows at a level, optionally within one category
    fn count_pending(
        &self,
        level: EntityLevel,
        category: Option<VehicleCategory>,
    ) -> StorageResult<u64>;

    /// Gets the pending model with the lowest `(category, brand_id, id)`
    ///
    /// # Arguments
    ///
    /// * `categories` - Only models in these categories are considered
    ///
    /// # Returns
    ///
    /// * `Ok(Some(ModelRecord))` - The next model whose years must be listed
    /// * `Ok(None)` - No pending model in scope (always the case for an empty slice)
    fn next_pending_model(
        &self,
        categories: &[VehicleCategory],
    ) -> StorageResult<Option<ModelRecord>>;

    /// Gets the pending year variant with the lowest `(category, brand_id, model_id, code)`,
    /// restricted to `categories` like [`CheckpointStore::next_pending_model`]
    fn next_pending_year_variant(
        &self,
        categories: &[VehicleCategory],
    ) -> StorageResult<Option<YearVariantRecord>>;

    // ===== Seeding =====

    /// Returns true once a category's brand list has been stored
    fn is_category_seeded(&self, category: VehicleCategory) -> StorageResult<bool>;

    /// Brands whose model list has not been stored yet, in key order
    fn brands_awaiting_models(&self) -> StorageResult<Vec<BrandRecord>>;

    // ===== Unit-of-work transactions =====

    /// Stores a category's brand list and marks the category seeded
    ///
    /// # Arguments
    ///
    /// * `category` - The category the listing belongs to
    /// * `brands` - The listed brands; empty records the category as seeded with nothing in it
    /// * `epoch` - Reference table code the rows belong to
    ///
    /// # Returns
    ///
    /// * `Ok(usize)` - Number of brands that were not already stored
    /// * `Err(StorageError)` - Nothing from this listing was committed
    fn record_brands(
        &mut self,
        category: VehicleCategory,
        brands: &[CatalogEntry],
        epoch: i64,
    ) -> StorageResult<usize>;

    /// Stores a brand's model list and marks the brand seeded
    ///
    /// An empty list is a valid, terminal result.
    fn record_models(
        &mut self,
        brand: &BrandRecord,
        models: &[CatalogEntry],
        epoch: i64,
    ) -> StorageResult<usize>;

    /// Stores a model's year variants and marks the model `Done`
    ///
    /// # Arguments
    ///
    /// * `model` - The model whose year list was fetched
    /// * `years` - The listed year variants, inserted as `Pending`
    /// * `epoch` - Reference table code the rows belong to
    ///
    /// # Returns
    ///
    /// * `Ok(usize)` - Number of year variants that were not already stored
    /// * `Err(StorageError)` - Nothing was committed and the model stays `Pending`
    fn complete_model(
        &mut self,
        model: &ModelKey,
        years: &[YearEntry],
        epoch: i64,
    ) -> StorageResult<usize>;

    /// Stores the resolved price and marks the year variant `Done`
    ///
    /// The price insert ignores an existing row with the same identity; the
    /// year variant gets the FIPE code and numeric year either way.
    fn resolve_year_variant(
        &mut self,
        key: &YearVariantKey,
        price: &PriceRecord,
    ) -> StorageResult<()>;

    // ===== Readers =====

    fn load_brands(&self) -> StorageResult<Vec<BrandRecord>>;

    fn load_models(&self) -> StorageResult<Vec<ModelRecord>>;

    /// Loads year variants, optionally only those in one status
    fn load_year_variants(
        &self,
        status: Option<WorkStatus>,
    ) -> StorageResult<Vec<YearVariantRecord>>;

    fn load_prices(&self) -> StorageResult<Vec<PriceRecord>>;

    /// Counts brands, optionally within one category
    fn count_brands(&self, category: Option<VehicleCategory>) -> StorageResult<u64>;

    fn count_prices(&self) -> StorageResult<u64>;

    /// Gets row counts per status at a level
    fn count_by_status(&self, level: EntityLevel) -> StorageResult<HashMap<WorkStatus, u64>>;

    // ===== Run Management =====

    /// Records the start of an invocation; returns the run ID
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Records which epoch a run worked on
    fn set_run_epoch(&mut self, run_id: i64, epoch: i64) -> StorageResult<()>;

    /// Records the end of an invocation
    fn finish_run(&mut self, run_id: i64, status: RunStatus, units: u64) -> StorageResult<()>;

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;
}
