//! Harvest coordinator - the phase driver
//!
//! This module contains the main harvest loop, which walks the catalog in a
//! fixed order and checkpoints every unit of work:
//! - ResolveEpoch: invalidate the store when the reference table changes
//! - SeedBrands / SeedModels: store child listings once per scope
//! - EnumerateYears: one pending model per unit
//! - ResolvePrices: one pending year variant per unit
//! - Finalize: export only when nothing is pending
//!
//! A unit whose remote call keeps failing is closed out as terminal so that
//! it cannot block the rows after it. Several such failures in a row are
//! taken as a remote outage and end the invocation instead.

use crate::config::Config;
use crate::crawler::api::FipeApi;
use crate::crawler::budget::Budget;
use crate::crawler::fetcher::ResilientClient;
use crate::crawler::transport::{FetchError, HttpTransport, Transport};
use crate::output::{ExportSummary, Exporter};
use crate::state::{VehicleCategory, WorkStatus, YearCode};
use crate::storage::{
    CheckpointStore, EntityLevel, Epoch, ModelRecord, RunStatus, SqliteStore, YearVariantRecord,
};
use crate::Result;
use std::fmt;
use std::path::Path;

/// Exhausted units in a row after which the remote is considered down
const MAX_CONSECUTIVE_EXHAUSTED: u32 = 3;

/// Why an invocation stopped before finalizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The time or unit allowance ran out
    BudgetExhausted,
    /// The current reference table could not be fetched
    EpochUnavailable,
    /// Several units in a row kept failing past the retry ceiling
    RemoteUnavailable,
    /// Pending rows were left after every phase finished
    WorkPending,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::BudgetExhausted => "execution budget exhausted",
            Self::EpochUnavailable => "reference table unavailable",
            Self::RemoteUnavailable => "remote API unavailable",
            Self::WorkPending => "pending rows remain",
        };
        f.write_str(text)
    }
}

/// Result of one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every phase finished and the artifacts were written
    Completed { export: ExportSummary },
    /// Another invocation is needed against the same store
    MoreWorkRemains {
        reason: StopReason,
        pending_models: u64,
        pending_year_variants: u64,
    },
}

impl RunOutcome {
    /// The flag handed to the external scheduler
    pub fn more_work_remains(&self) -> bool {
        matches!(self, Self::MoreWorkRemains { .. })
    }
}

/// Control flow of one phase
enum Phase {
    Finished,
    Stopped(StopReason),
}

/// Drives the phases against a transport and a checkpoint store
pub struct Harvester<T, S> {
    api: FipeApi<T>,
    store: S,
    categories: Vec<VehicleCategory>,
    exporter: Exporter,
    config_hash: String,
    consecutive_exhausted: u32,
}

impl<T: Transport, S: CheckpointStore> Harvester<T, S> {
    /// Creates a harvester from the loaded configuration
    pub fn new(transport: T, store: S, config: &Config) -> Self {
        let client = ResilientClient::new(transport, config.pacing.clone());
        Self {
            api: FipeApi::new(client),
            store,
            categories: config.harvest.categories.clone(),
            exporter: Exporter::new(&config.output.export_dir)
                .with_categories(&config.harvest.categories),
            config_hash: String::new(),
            consecutive_exhausted: 0,
        }
    }

    /// Sets the configuration fingerprint recorded on run rows
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = hash.into();
        self
    }

    /// Runs one invocation within `budget`
    ///
    /// Returns `MoreWorkRemains` whenever the store still holds pending work;
    /// the export is written only on `Completed`. The run is recorded in the
    /// store's history with the final status and the units spent.
    pub async fn run(&mut self, budget: &mut Budget) -> Result<RunOutcome> {
        let run_id = self.store.create_run(&self.config_hash)?;
        tracing::info!("Starting harvest run {}", run_id);

        let result = self.run_phases(run_id, budget).await;

        let status = match &result {
            Ok(RunOutcome::Completed { .. }) => RunStatus::Completed,
            Ok(RunOutcome::MoreWorkRemains { .. }) => RunStatus::Incomplete,
            Err(_) => RunStatus::Failed,
        };
        if let Err(e) = self.store.finish_run(run_id, status, budget.spent()) {
            tracing::error!("Failed to record end of run {}: {}", run_id, e);
            if result.is_ok() {
                return Err(e.into());
            }
        }

        match &result {
            Ok(RunOutcome::Completed { export }) => tracing::info!(
                "Harvest complete in {:?}: {} brands, {} models, {} year variants, {} prices",
                budget.elapsed(),
                export.brands,
                export.models,
                export.year_variants,
                export.prices
            ),
            Ok(RunOutcome::MoreWorkRemains {
                reason,
                pending_models,
                pending_year_variants,
            }) => tracing::info!(
                "Stopping after {} units ({}); pending: {} models, {} year variants",
                budget.spent(),
                reason,
                pending_models,
                pending_year_variants
            ),
            Err(e) => tracing::error!("Harvest run {} failed: {}", run_id, e),
        }

        result
    }

    async fn run_phases(&mut self, run_id: i64, budget: &mut Budget) -> Result<RunOutcome> {
        if budget.exhausted() {
            return self.more_work(StopReason::BudgetExhausted);
        }

        let epoch = match self.resolve_epoch().await? {
            Some(epoch) => epoch,
            None => return self.more_work(StopReason::EpochUnavailable),
        };
        self.store.set_run_epoch(run_id, epoch.code)?;

        if let Phase::Stopped(reason) = self.seed_brands(epoch.code, budget).await? {
            return self.more_work(reason);
        }
        if let Phase::Stopped(reason) = self.seed_models(epoch.code, budget).await? {
            return self.more_work(reason);
        }
        if let Phase::Stopped(reason) = self.enumerate_years(epoch.code, budget).await? {
            return self.more_work(reason);
        }
        if let Phase::Stopped(reason) = self.resolve_prices(epoch.code, budget).await? {
            return self.more_work(reason);
        }

        self.finalize(&epoch)
    }

    /// Fetches the current epoch and wipes the store if it changed
    async fn resolve_epoch(&mut self) -> Result<Option<Epoch>> {
        let fetched = match self.api.reference_table().await {
            Ok(epoch) => epoch,
            Err(e) => {
                tracing::error!("Could not resolve the reference table: {}", e);
                return Ok(None);
            }
        };

        let stored = self.store.current_epoch()?;
        if stored.as_ref().map(|e| e.code) != Some(fetched.code) {
            match stored {
                Some(old) => tracing::info!(
                    "Reference table changed from {} ({}) to {} ({}); clearing checkpoints",
                    old.label,
                    old.code,
                    fetched.label,
                    fetched.code
                ),
                None => tracing::info!(
                    "No stored reference table; starting {} ({})",
                    fetched.label,
                    fetched.code
                ),
            }
            self.store.replace_epoch(&fetched)?;
        } else {
            tracing::info!("Resuming reference table {} ({})", fetched.label, fetched.code);
        }

        Ok(Some(fetched))
    }

    async fn seed_brands(&mut self, epoch: i64, budget: &mut Budget) -> Result<Phase> {
        for category in self.categories.clone() {
            if self.store.is_category_seeded(category)? {
                continue;
            }
            if budget.exhausted() {
                return Ok(Phase::Stopped(StopReason::BudgetExhausted));
            }

            let result = self.api.brands(epoch, category).await;
            budget.spend();
            let outage = self.track(&result);

            let brands = match result {
                Ok(brands) => brands,
                Err(e) => {
                    tracing::warn!("Brand listing for {} failed, skipping: {}", category, e);
                    Vec::new()
                }
            };
            let inserted = self.store.record_brands(category, &brands, epoch)?;
            tracing::info!(
                "Brands for {}: {} listed, {} new",
                category,
                brands.len(),
                inserted
            );

            if outage {
                return Ok(Phase::Stopped(StopReason::RemoteUnavailable));
            }
        }

        Ok(Phase::Finished)
    }

    async fn seed_models(&mut self, epoch: i64, budget: &mut Budget) -> Result<Phase> {
        let brands = self.store.brands_awaiting_models()?;

        for brand in brands {
            if !self.categories.contains(&brand.category) {
                continue;
            }
            if budget.exhausted() {
                return Ok(Phase::Stopped(StopReason::BudgetExhausted));
            }

            let result = self.api.models(epoch, brand.category, brand.id).await;
            budget.spend();
            let outage = self.track(&result);

            let models = match result {
                Ok(models) => models,
                Err(e) => {
                    tracing::warn!(
                        "Model listing for {} {} ({}) failed, skipping: {}",
                        brand.category,
                        brand.name,
                        brand.id,
                        e
                    );
                    Vec::new()
                }
            };
            let inserted = self.store.record_models(&brand, &models, epoch)?;
            tracing::info!(
                "Models for {} {} ({}): {} listed, {} new",
                brand.category,
                brand.name,
                brand.id,
                models.len(),
                inserted
            );

            if outage {
                return Ok(Phase::Stopped(StopReason::RemoteUnavailable));
            }
        }

        Ok(Phase::Finished)
    }

    async fn enumerate_years(&mut self, epoch: i64, budget: &mut Budget) -> Result<Phase> {
        while let Some(model) = self.store.next_pending_model(&self.categories)? {
            if budget.exhausted() {
                return Ok(Phase::Stopped(StopReason::BudgetExhausted));
            }

            let result = self
                .api
                .year_variants(epoch, model.category, model.brand_id, model.id)
                .await;
            budget.spend();
            let outage = self.track(&result);

            let years = match result {
                Ok(years) => years,
                Err(e) => {
                    tracing::warn!(
                        "{}: year listing failed, marking done: {}",
                        describe_model(&model),
                        e
                    );
                    Vec::new()
                }
            };

            let inserted = self.store.complete_model(&model.key(), &years, epoch)?;
            tracing::info!(
                "{}: {} year variants ({} new)",
                describe_model(&model),
                years.len(),
                inserted
            );

            if outage {
                return Ok(Phase::Stopped(StopReason::RemoteUnavailable));
            }
        }

        Ok(Phase::Finished)
    }

    async fn resolve_prices(&mut self, epoch: i64, budget: &mut Budget) -> Result<Phase> {
        while let Some(variant) = self.store.next_pending_year_variant(&self.categories)? {
            let key = variant.key();

            // Unparseable codes never reach the network
            let year: YearCode = match variant.code.parse() {
                Ok(year) => year,
                Err(e) => {
                    tracing::warn!("{}: {}", describe_year_variant(&variant), e);
                    self.store.set_year_variant_status(&key, WorkStatus::Error)?;
                    continue;
                }
            };

            if budget.exhausted() {
                return Ok(Phase::Stopped(StopReason::BudgetExhausted));
            }

            let result = self
                .api
                .price(epoch, variant.category, variant.brand_id, variant.model_id, &year)
                .await;
            budget.spend();
            let outage = self.track(&result);

            match result {
                Ok(quote) => {
                    tracing::info!(
                        "{}: {} {} = {}",
                        describe_year_variant(&variant),
                        quote.fipe_code,
                        quote.model_year,
                        quote.value
                    );
                    let record = quote.into_record(variant.category, epoch);
                    self.store.resolve_year_variant(&key, &record)?;
                }
                Err(e) => {
                    tracing::warn!(
                        "{}: price lookup failed: {}",
                        describe_year_variant(&variant),
                        e
                    );
                    self.store.set_year_variant_status(&key, WorkStatus::Error)?;
                }
            }

            if outage {
                return Ok(Phase::Stopped(StopReason::RemoteUnavailable));
            }
        }

        Ok(Phase::Finished)
    }

    /// Exports only when no row in the harvested categories is pending
    fn finalize(&mut self, epoch: &Epoch) -> Result<RunOutcome> {
        if self.pending(EntityLevel::Model)? > 0 || self.pending(EntityLevel::YearVariant)? > 0 {
            return self.more_work(StopReason::WorkPending);
        }

        let export = self.exporter.export(&self.store, epoch)?;
        tracing::info!("Exported catalog to {}", export.dir.display());
        Ok(RunOutcome::Completed { export })
    }

    /// Tracks remote failures in a row
    ///
    /// Returns true when the retry ceiling has now been hit by
    /// `MAX_CONSECUTIVE_EXHAUSTED` units in a row. Any answer from the remote,
    /// including a rejection, resets the streak.
    fn track<V>(&mut self, result: &std::result::Result<V, FetchError>) -> bool {
        match result {
            Err(e) if !e.is_permanent() => {
                self.consecutive_exhausted += 1;
                self.consecutive_exhausted >= MAX_CONSECUTIVE_EXHAUSTED
            }
            _ => {
                self.consecutive_exhausted = 0;
                false
            }
        }
    }

    fn pending(&self, level: EntityLevel) -> Result<u64> {
        let mut total = 0;
        for category in &self.categories {
            total += self.store.count_pending(level, Some(*category))?;
        }
        Ok(total)
    }

    fn more_work(&self, reason: StopReason) -> Result<RunOutcome> {
        Ok(RunOutcome::MoreWorkRemains {
            reason,
            pending_models: self.pending(EntityLevel::Model)?,
            pending_year_variants: self.pending(EntityLevel::YearVariant)?,
        })
    }
}

fn describe_model(model: &ModelRecord) -> String {
    format!(
        "Model {} ({}/{}/{})",
        model.name, model.category, model.brand_id, model.id
    )
}

fn describe_year_variant(variant: &YearVariantRecord) -> String {
    format!(
        "Year {} ({}/{}/{}/{})",
        variant.label, variant.category, variant.brand_id, variant.model_id, variant.code
    )
}

/// Runs one harvest invocation against the live API
///
/// Opens the checkpoint store named in the config, optionally clears it, and
/// drives the phases within the configured budget.
///
/// # Arguments
///
/// * `config` - Validated configuration
/// * `config_hash` - Fingerprint of the configuration file, stored on the run row
/// * `fresh` - Discard every checkpoint before starting
///
/// # Returns
///
/// * `Ok(RunOutcome::Completed)` - Nothing was pending and the catalog was exported
/// * `Ok(RunOutcome::MoreWorkRemains)` - Another invocation is needed
/// * `Err(HarvestError)` - The store, the exporter or the HTTP client failed
///
/// # Example
///
/// ```no_run
/// use fipe_harvest::config::load_config_with_hash;
/// use fipe_harvest::crawler::run_harvest;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (config, hash) = load_config_with_hash(Path::new("harvest.toml"))?;
/// let outcome = run_harvest(config, &hash, false).await?;
/// println!("continue_execution={}", outcome.more_work_remains());
/// # Ok(())
/// # }
/// ```
pub async fn run_harvest(config: Config, config_hash: &str, fresh: bool) -> Result<RunOutcome> {
    let mut store = SqliteStore::new(Path::new(&config.output.database_path))?;
    if fresh {
        tracing::info!("Clearing checkpoint store for a fresh harvest");
        store.clear_all()?;
    }

    let transport = HttpTransport::new(&config.api)?;
    let mut budget = Budget::from_config(&config.harvest);
    let mut harvester = Harvester::new(transport, store, &config).with_config_hash(config_hash);

    harvester.run(&mut budget).await
}
