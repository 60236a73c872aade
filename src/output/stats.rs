//! Statistics generation from the checkpoint database
//!
//! This module provides functionality for extracting and displaying
//! harvest progress from the storage layer.

use crate::state::WorkStatus;
use crate::storage::{CheckpointStore, EntityLevel, Epoch, RunRecord, StorageResult};
use std::collections::HashMap;

/// Harvest progress summary
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    /// Epoch the checkpoint rows belong to
    pub epoch: Option<Epoch>,

    /// Total number of brands
    pub brands: u64,

    /// Count of models by status
    pub models_by_status: HashMap<WorkStatus, u64>,

    /// Count of year variants by status
    pub year_variants_by_status: HashMap<WorkStatus, u64>,

    /// Number of stored prices
    pub prices: u64,

    /// Most recent invocation
    pub last_run: Option<RunRecord>,
}

impl HarvestStatistics {
    pub fn total_models(&self) -> u64 {
        self.models_by_status.values().sum()
    }

    pub fn total_year_variants(&self) -> u64 {
        self.year_variants_by_status.values().sum()
    }

    /// Rows at either level still waiting for work
    pub fn pending(&self) -> u64 {
        let pending = |counts: &HashMap<WorkStatus, u64>| {
            counts.get(&WorkStatus::Pending).copied().unwrap_or(0)
        };
        pending(&self.models_by_status) + pending(&self.year_variants_by_status)
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `store` - The checkpoint store to summarize
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Row counts per level and status, plus the latest run
/// * `Err(StorageError)` - A query failed
pub fn load_statistics<S: CheckpointStore + ?Sized>(
    store: &S,
) -> StorageResult<HarvestStatistics> {
    Ok(HarvestStatistics {
        epoch: store.current_epoch()?,
        brands: store.count_brands(None)?,
        models_by_status: store.count_by_status(EntityLevel::Model)?,
        year_variants_by_status: store.count_by_status(EntityLevel::YearVariant)?,
        prices: store.count_prices()?,
        last_run: store.get_latest_run()?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    match &stats.epoch {
        Some(epoch) => println!("Reference table: {} (code {})", epoch.label, epoch.code),
        None => println!("Reference table: not resolved yet"),
    }
    println!();

    println!("Catalog:");
    println!("  Brands: {}", stats.brands);
    println!("  Models: {}", stats.total_models());
    print_status_counts(&stats.models_by_status, stats.total_models());
    println!("  Year variants: {}", stats.total_year_variants());
    print_status_counts(&stats.year_variants_by_status, stats.total_year_variants());
    println!("  Prices: {}", stats.prices);
    println!();

    if let Some(run) = &stats.last_run {
        println!("Last run #{}:", run.id);
        println!("  Status: {}", run.status.to_db_string());
        println!("  Started: {}", run.started_at);
        if let Some(finished) = &run.finished_at {
            println!("  Finished: {}", finished);
        }
        println!("  Units of work: {}", run.units);
        println!();
    }

    if stats.pending() == 0 && stats.total_models() > 0 {
        println!("Nothing pending.");
    } else {
        println!("Pending units: {}", stats.pending());
    }
}

fn print_status_counts(counts: &HashMap<WorkStatus, u64>, total: u64) {
    for status in WorkStatus::all() {
        let count = counts.get(&status).copied().unwrap_or(0);
        if count == 0 {
            continue;
        }
        let percentage = if total > 0 {
            (count as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        println!("    {}: {} ({:.1}%)", status, count, percentage);
    }
}
