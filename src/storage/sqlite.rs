//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the CheckpointStore trait.

use crate::state::{CatalogEntry, VehicleCategory, WorkStatus, YearEntry};
use crate::storage::schema::{initialize_schema, ENTITY_TABLES};
use crate::storage::traits::{CheckpointStore, StorageError, StorageResult};
use crate::storage::{
    BrandRecord, EntityLevel, Epoch, ModelKey, ModelRecord, PriceRecord, RunRecord, RunStatus,
    YearVariantKey, YearVariantRecord,
};
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;

const EPOCH_CODE_KEY: &str = "epoch_code";
const EPOCH_LABEL_KEY: &str = "epoch_label";

const MODEL_COLUMNS: &str = "id, brand_id, category, name, epoch, status";
const YEAR_VARIANT_COLUMNS: &str =
    "code, model_id, brand_id, category, label, epoch, fipe_code, model_year, status";
const RUN_COLUMNS: &str = "id, started_at, finished_at, config_hash, epoch, units, status";

/// SQLite checkpoint store
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens or creates the checkpoint database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Database file; missing parent directories are created
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - WAL-mode connection with the schema in place
    /// * `Err(StorageError)` - The file could not be created or opened
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for tests and dry runs)
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

// ===== Row mapping =====

fn conversion_error(idx: usize, ty: Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, message.into())
}

fn category_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<VehicleCategory> {
    let code: i64 = row.get(idx)?;
    VehicleCategory::from_code(code)
        .ok_or_else(|| conversion_error(idx, Type::Integer, format!("unknown category {}", code)))
}

fn status_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<WorkStatus> {
    let value: String = row.get(idx)?;
    WorkStatus::from_db_string(&value)
        .ok_or_else(|| conversion_error(idx, Type::Text, format!("unknown status {}", value)))
}

fn brand_from_row(row: &Row<'_>) -> rusqlite::Result<BrandRecord> {
    Ok(BrandRecord {
        id: row.get(0)?,
        category: category_at(row, 1)?,
        name: row.get(2)?,
        epoch: row.get(3)?,
    })
}

fn model_from_row(row: &Row<'_>) -> rusqlite::Result<ModelRecord> {
    Ok(ModelRecord {
        id: row.get(0)?,
        brand_id: row.get(1)?,
        category: category_at(row, 2)?,
        name: row.get(3)?,
        epoch: row.get(4)?,
        status: status_at(row, 5)?,
    })
}

fn year_variant_from_row(row: &Row<'_>) -> rusqlite::Result<YearVariantRecord> {
    Ok(YearVariantRecord {
        code: row.get(0)?,
        model_id: row.get(1)?,
        brand_id: row.get(2)?,
        category: category_at(row, 3)?,
        label: row.get(4)?,
        epoch: row.get(5)?,
        fipe_code: row.get(6)?,
        model_year: row.get(7)?,
        status: status_at(row, 8)?,
    })
}

fn price_from_row(row: &Row<'_>) -> rusqlite::Result<PriceRecord> {
    Ok(PriceRecord {
        fipe_code: row.get(0)?,
        model_year: row.get(1)?,
        category: category_at(row, 2)?,
        brand_name: row.get(3)?,
        model_name: row.get(4)?,
        fuel: row.get(5)?,
        price: row.get(6)?,
        reference_month: row.get(7)?,
        epoch: row.get(8)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let units: i64 = row.get(5)?;
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        epoch: row.get(4)?,
        units: units.max(0) as u64,
        status: RunStatus::from_db_string(&row.get::<_, String>(6)?).unwrap_or(RunStatus::Failed),
    })
}

// ===== Statement helpers shared by single calls and transactions =====

/// Renders category codes for an `IN (...)` clause
fn category_list(categories: &[VehicleCategory]) -> String {
    categories
        .iter()
        .map(|c| c.code().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn insert_brand_row(
    conn: &Connection,
    category: VehicleCategory,
    entry: &CatalogEntry,
    epoch: i64,
) -> StorageResult<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO brands (id, category, name, epoch) VALUES (?1, ?2, ?3, ?4)",
        params![entry.id, category.code(), entry.name, epoch],
    )?;
    Ok(inserted > 0)
}

fn insert_model_row(
    conn: &Connection,
    key: &ModelKey,
    name: &str,
    epoch: i64,
) -> StorageResult<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO models (id, brand_id, category, name, epoch, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            key.id,
            key.brand_id,
            key.category.code(),
            name,
            epoch,
            WorkStatus::Pending.to_db_string()
        ],
    )?;
    Ok(inserted > 0)
}

fn insert_year_variant_row(
    conn: &Connection,
    model: &ModelKey,
    entry: &YearEntry,
    epoch: i64,
) -> StorageResult<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO year_variants
         (code, model_id, brand_id, category, label, epoch, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.code,
            model.id,
            model.brand_id,
            model.category.code(),
            entry.label,
            epoch,
            WorkStatus::Pending.to_db_string()
        ],
    )?;
    Ok(inserted > 0)
}

fn insert_price_row(conn: &Connection, price: &PriceRecord) -> StorageResult<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO prices
         (fipe_code, model_year, category, brand_name, model_name, fuel, price,
          reference_month, epoch)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            price.fipe_code,
            price.model_year,
            price.category.code(),
            price.brand_name,
            price.model_name,
            price.fuel,
            price.price,
            price.reference_month,
            price.epoch
        ],
    )?;
    Ok(inserted > 0)
}

fn describe_model(key: &ModelKey) -> String {
    format!("model {}/{}/{}", key.category, key.brand_id, key.id)
}

fn describe_year_variant(key: &YearVariantKey) -> String {
    format!(
        "year variant {}/{}/{}/{}",
        key.category, key.brand_id, key.model_id, key.code
    )
}

/// Checks a status move; Ok(false) means the row already has that status
fn check_transition(row: String, current: &str, next: WorkStatus) -> StorageResult<bool> {
    let current = WorkStatus::from_db_string(current).ok_or_else(|| StorageError::CorruptValue {
        column: "status",
        value: current.to_string(),
    })?;

    if current == next {
        return Ok(false);
    }

    if current.can_transition_to(next) {
        Ok(true)
    } else {
        Err(StorageError::InvalidTransition {
            row,
            from: current,
            to: next,
        })
    }
}

fn transition_model(conn: &Connection, key: &ModelKey, next: WorkStatus) -> StorageResult<()> {
    let current: Option<String> = conn
        .query_row(
            "SELECT status FROM models WHERE id = ?1 AND brand_id = ?2 AND category = ?3",
            params![key.id, key.brand_id, key.category.code()],
            |row| row.get(0),
        )
        .optional()?;

    let current = current.ok_or_else(|| StorageError::NotFound(describe_model(key)))?;

    if check_transition(describe_model(key), &current, next)? {
        conn.execute(
            "UPDATE models SET status = ?1
             WHERE id = ?2 AND brand_id = ?3 AND category = ?4 AND status = ?5",
            params![
                next.to_db_string(),
                key.id,
                key.brand_id,
                key.category.code(),
                WorkStatus::Pending.to_db_string()
            ],
        )?;
    }

    Ok(())
}

fn current_year_variant_status(conn: &Connection, key: &YearVariantKey) -> StorageResult<String> {
    let current: Option<String> = conn
        .query_row(
            "SELECT status FROM year_variants
             WHERE code = ?1 AND model_id = ?2 AND brand_id = ?3 AND category = ?4",
            params![key.code, key.model_id, key.brand_id, key.category.code()],
            |row| row.get(0),
        )
        .optional()?;

    current.ok_or_else(|| StorageError::NotFound(describe_year_variant(key)))
}

fn transition_year_variant(
    conn: &Connection,
    key: &YearVariantKey,
    next: WorkStatus,
) -> StorageResult<()> {
    let current = current_year_variant_status(conn, key)?;

    if check_transition(describe_year_variant(key), &current, next)? {
        conn.execute(
            "UPDATE year_variants SET status = ?1
             WHERE code = ?2 AND model_id = ?3 AND brand_id = ?4 AND category = ?5 AND status = ?6",
            params![
                next.to_db_string(),
                key.code,
                key.model_id,
                key.brand_id,
                key.category.code(),
                WorkStatus::Pending.to_db_string()
            ],
        )?;
    }

    Ok(())
}

impl CheckpointStore for SqliteStore {
    // ===== Epoch =====

    fn current_epoch(&self) -> StorageResult<Option<Epoch>> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM control")?;
        let values = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<HashMap<_, _>, _>>()?;

        let Some(code) = values.get(EPOCH_CODE_KEY) else {
            return Ok(None);
        };

        let code = code.parse::<i64>().map_err(|_| StorageError::CorruptValue {
            column: "control.epoch_code",
            value: code.clone(),
        })?;

        Ok(Some(Epoch {
            code,
            label: values.get(EPOCH_LABEL_KEY).cloned().unwrap_or_default(),
        }))
    }

    fn replace_epoch(&mut self, epoch: &Epoch) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        for table in ENTITY_TABLES {
            tx.execute(&format!("DELETE FROM {}", table), [])?;
        }
        tx.execute(
            "INSERT OR REPLACE INTO control (key, value) VALUES (?1, ?2)",
            params![EPOCH_CODE_KEY, epoch.code.to_string()],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO control (key, value) VALUES (?1, ?2)",
            params![EPOCH_LABEL_KEY, epoch.label],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn clear_all(&mut self) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        for table in ENTITY_TABLES {
            tx.execute(&format!("DELETE FROM {}", table), [])?;
        }
        tx.commit()?;
        Ok(())
    }

    // ===== Idempotent inserts =====

    fn insert_brand(
        &mut self,
        category: VehicleCategory,
        entry: &CatalogEntry,
        epoch: i64,
    ) -> StorageResult<bool> {
        insert_brand_row(&self.conn, category, entry, epoch)
    }

    fn insert_model(&mut self, key: &ModelKey, name: &str, epoch: i64) -> StorageResult<bool> {
        insert_model_row(&self.conn, key, name, epoch)
    }

    fn insert_year_variant(
        &mut self,
        model: &ModelKey,
        entry: &YearEntry,
        epoch: i64,
    ) -> StorageResult<bool> {
        insert_year_variant_row(&self.conn, model, entry, epoch)
    }

    fn insert_price(&mut self, price: &PriceRecord) -> StorageResult<bool> {
        insert_price_row(&self.conn, price)
    }

    // ===== Status =====

    fn set_model_status(&mut self, key: &ModelKey, status: WorkStatus) -> StorageResult<()> {
        transition_model(&self.conn, key, status)
    }

    fn set_year_variant_status(
        &mut self,
        key: &YearVariantKey,
        status: WorkStatus,
    ) -> StorageResult<()> {
        transition_year_variant(&self.conn, key, status)
    }

    fn count_pending(
        &self,
        level: EntityLevel,
        category: Option<VehicleCategory>,
    ) -> StorageResult<u64> {
        let count: i64 = match category {
            Some(category) => self.conn.query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE status = ?1 AND category = ?2",
                    level.table()
                ),
                params![WorkStatus::Pending.to_db_string(), category.code()],
                |row| row.get(0),
            )?,
            None => self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE status = ?1", level.table()),
                params![WorkStatus::Pending.to_db_string()],
                |row| row.get(0),
            )?,
        };
        Ok(count as u64)
    }

    fn next_pending_model(
        &self,
        categories: &[VehicleCategory],
    ) -> StorageResult<Option<ModelRecord>> {
        if categories.is_empty() {
            return Ok(None);
        }

        let model = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM models WHERE status = ?1 AND category IN ({})
                     ORDER BY category, brand_id, id LIMIT 1",
                    MODEL_COLUMNS,
                    category_list(categories)
                ),
                params![WorkStatus::Pending.to_db_string()],
                model_from_row,
            )
            .optional()?;
        Ok(model)
    }

    fn next_pending_year_variant(
        &self,
        categories: &[VehicleCategory],
    ) -> StorageResult<Option<YearVariantRecord>> {
        if categories.is_empty() {
            return Ok(None);
        }

        let variant = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM year_variants WHERE status = ?1 AND category IN ({})
                     ORDER BY category, brand_id, model_id, code LIMIT 1",
                    YEAR_VARIANT_COLUMNS,
                    category_list(categories)
                ),
                params![WorkStatus::Pending.to_db_string()],
                year_variant_from_row,
            )
            .optional()?;
        Ok(variant)
    }

    // ===== Seeding =====

    fn is_category_seeded(&self, category: VehicleCategory) -> StorageResult<bool> {
        let seeded: Option<i64> = self
            .conn
            .query_row(
                "SELECT category FROM seeded_categories WHERE category = ?1",
                params![category.code()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(seeded.is_some())
    }

    fn brands_awaiting_models(&self) -> StorageResult<Vec<BrandRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT b.id, b.category, b.name, b.epoch FROM brands b
             LEFT JOIN seeded_brands s ON s.brand_id = b.id AND s.category = b.category
             WHERE s.brand_id IS NULL
             ORDER BY b.category, b.id",
        )?;

        let brands = stmt
            .query_map([], brand_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(brands)
    }

    // ===== Unit-of-work transactions =====

    fn record_brands(
        &mut self,
        category: VehicleCategory,
        brands: &[CatalogEntry],
        epoch: i64,
    ) -> StorageResult<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        for entry in brands {
            if insert_brand_row(&tx, category, entry, epoch)? {
                inserted += 1;
            }
        }
        tx.execute(
            "INSERT OR IGNORE INTO seeded_categories (category, epoch) VALUES (?1, ?2)",
            params![category.code(), epoch],
        )?;
        tx.commit()?;
        Ok(inserted)
    }

    fn record_models(
        &mut self,
        brand: &BrandRecord,
        models: &[CatalogEntry],
        epoch: i64,
    ) -> StorageResult<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        for entry in models {
            let key = ModelKey {
                id: entry.id,
                brand_id: brand.id,
                category: brand.category,
            };
            if insert_model_row(&tx, &key, &entry.name, epoch)? {
                inserted += 1;
            }
        }
        tx.execute(
            "INSERT OR IGNORE INTO seeded_brands (brand_id, category, epoch) VALUES (?1, ?2, ?3)",
            params![brand.id, brand.category.code(), epoch],
        )?;
        tx.commit()?;
        Ok(inserted)
    }

    fn complete_model(
        &mut self,
        model: &ModelKey,
        years: &[YearEntry],
        epoch: i64,
    ) -> StorageResult<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        for entry in years {
            if insert_year_variant_row(&tx, model, entry, epoch)? {
                inserted += 1;
            }
        }
        transition_model(&tx, model, WorkStatus::Done)?;
        tx.commit()?;
        Ok(inserted)
    }

    fn resolve_year_variant(
        &mut self,
        key: &YearVariantKey,
        price: &PriceRecord,
    ) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        let current = current_year_variant_status(&tx, key)?;
        if check_transition(describe_year_variant(key), &current, WorkStatus::Done)? {
            insert_price_row(&tx, price)?;
            tx.execute(
                "UPDATE year_variants SET fipe_code = ?1, model_year = ?2, status = ?3
                 WHERE code = ?4 AND model_id = ?5 AND brand_id = ?6 AND category = ?7",
                params![
                    price.fipe_code,
                    price.model_year,
                    WorkStatus::Done.to_db_string(),
                    key.code,
                    key.model_id,
                    key.brand_id,
                    key.category.code()
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // ===== Readers =====

    fn load_brands(&self) -> StorageResult<Vec<BrandRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, category, name, epoch FROM brands ORDER BY category, id")?;
        let brands = stmt
            .query_map([], brand_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(brands)
    }

    fn load_models(&self) -> StorageResult<Vec<ModelRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM models ORDER BY category, brand_id, id",
            MODEL_COLUMNS
        ))?;
        let models = stmt
            .query_map([], model_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(models)
    }

    fn load_year_variants(
        &self,
        status: Option<WorkStatus>,
    ) -> StorageResult<Vec<YearVariantRecord>> {
        let variants = match status {
            Some(status) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {} FROM year_variants WHERE status = ?1
                     ORDER BY category, brand_id, model_id, code",
                    YEAR_VARIANT_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![status.to_db_string()], year_variant_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {} FROM year_variants ORDER BY category, brand_id, model_id, code",
                    YEAR_VARIANT_COLUMNS
                ))?;
                let rows = stmt
                    .query_map([], year_variant_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(variants)
    }

    fn load_prices(&self) -> StorageResult<Vec<PriceRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT fipe_code, model_year, category, brand_name, model_name, fuel, price,
             reference_month, epoch
             FROM prices ORDER BY category, fipe_code, model_year",
        )?;
        let prices = stmt
            .query_map([], price_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(prices)
    }

    fn count_brands(&self, category: Option<VehicleCategory>) -> StorageResult<u64> {
        let count: i64 = match category {
            Some(category) => self.conn.query_row(
                "SELECT COUNT(*) FROM brands WHERE category = ?1",
                params![category.code()],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM brands", [], |row| row.get(0))?,
        };
        Ok(count as u64)
    }

    fn count_prices(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM prices", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_by_status(&self, level: EntityLevel) -> StorageResult<HashMap<WorkStatus, u64>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT status, COUNT(*) FROM {} GROUP BY status",
            level.table()
        ))?;

        let rows = stmt.query_map([], |row| Ok((status_at(row, 0)?, row.get::<_, i64>(1)?)))?;

        let mut summary = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            summary.insert(status, count as u64);
        }

        Ok(summary)
    }

    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn set_run_epoch(&mut self, run_id: i64, epoch: i64) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE runs SET epoch = ?1 WHERE id = ?2",
            params![epoch, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus, units: u64) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2, units = ?3 WHERE id = ?4",
            params![status.to_db_string(), now, units as i64, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                &format!("SELECT {} FROM runs ORDER BY id DESC LIMIT 1", RUN_COLUMNS),
                [],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }
}
