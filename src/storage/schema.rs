//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the checkpoint database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Key/value control data (current epoch marker)
CREATE TABLE IF NOT EXISTS control (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Track harvest invocations
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    epoch INTEGER,
    units INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS brands (
    id INTEGER NOT NULL,
    category INTEGER NOT NULL,
    name TEXT NOT NULL,
    epoch INTEGER NOT NULL,
    PRIMARY KEY (id, category)
);

CREATE TABLE IF NOT EXISTS models (
    id INTEGER NOT NULL,
    brand_id INTEGER NOT NULL,
    category INTEGER NOT NULL,
    name TEXT NOT NULL,
    epoch INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    PRIMARY KEY (id, brand_id, category)
);

CREATE INDEX IF NOT EXISTS idx_models_status ON models(status);

CREATE TABLE IF NOT EXISTS year_variants (
    code TEXT NOT NULL,
    model_id INTEGER NOT NULL,
    brand_id INTEGER NOT NULL,
    category INTEGER NOT NULL,
    label TEXT NOT NULL,
    epoch INTEGER NOT NULL,
    fipe_code TEXT,
    model_year INTEGER,
    status TEXT NOT NULL DEFAULT 'pending',
    PRIMARY KEY (code, model_id, brand_id, category)
);

CREATE INDEX IF NOT EXISTS idx_year_variants_status ON year_variants(status);

CREATE TABLE IF NOT EXISTS prices (
    fipe_code TEXT NOT NULL,
    model_year INTEGER NOT NULL,
    category INTEGER NOT NULL,
    brand_name TEXT NOT NULL,
    model_name TEXT NOT NULL,
    fuel TEXT NOT NULL,
    price TEXT NOT NULL,
    reference_month TEXT NOT NULL,
    epoch INTEGER NOT NULL,
    PRIMARY KEY (fipe_code, model_year, category)
);

-- Categories whose brand list has been stored
CREATE TABLE IF NOT EXISTS seeded_categories (
    category INTEGER PRIMARY KEY,
    epoch INTEGER NOT NULL
);

-- Brands whose model list has been stored (possibly empty)
CREATE TABLE IF NOT EXISTS seeded_brands (
    brand_id INTEGER NOT NULL,
    category INTEGER NOT NULL,
    epoch INTEGER NOT NULL,
    PRIMARY KEY (brand_id, category)
);
"#;

/// Tables wiped when the epoch changes
pub const ENTITY_TABLES: &[&str] = &[
    "prices",
    "year_variants",
    "models",
    "brands",
    "seeded_brands",
    "seeded_categories",
];

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
