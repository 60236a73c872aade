//! Final artifact export
//!
//! Runs only after the harvester has confirmed that nothing is pending. Rows
//! are renamed into the flat shapes downstream consumers read; no values are
//! computed here.

use crate::output::OutputResult;
use crate::state::{VehicleCategory, WorkStatus};
use crate::storage::{CheckpointStore, Epoch};
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const VERSION_FILE: &str = "version.json";
pub const BRANDS_FILE: &str = "fipe_marcas.json.gz";
pub const MODELS_FILE: &str = "fipe_modelos.json.gz";
pub const YEARS_FILE: &str = "fipe_anos.json.gz";
pub const PRICES_FILE: &str = "fipe_precos.json.gz";

/// Contents of `version.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDescriptor {
    /// Export month, `YYYY-MM`
    pub version: String,
    /// Reference table label the data belongs to
    pub fipe_reference: String,
    /// RFC 3339 export timestamp
    pub generated_at: String,
}

impl VersionDescriptor {
    pub fn new(epoch: &Epoch, generated_at: DateTime<Utc>) -> Self {
        Self {
            version: generated_at.format("%Y-%m").to_string(),
            fipe_reference: epoch.label.clone(),
            generated_at: generated_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
struct BrandRow<'a> {
    id: i64,
    nome: &'a str,
    tipo: i64,
}

#[derive(Serialize)]
struct ModelRow<'a> {
    id: i64,
    nome: &'a str,
    marca_id: i64,
    tipo: i64,
}

#[derive(Serialize)]
struct YearRow<'a> {
    id: &'a str,
    nome: &'a str,
    modelo_id: i64,
    marca_id: i64,
    tipo: i64,
    codigo_fipe: Option<&'a str>,
    ano: Option<i64>,
}

#[derive(Serialize)]
struct PriceRow<'a> {
    codigo_fipe: &'a str,
    marca: &'a str,
    modelo: &'a str,
    ano_modelo: i64,
    combustivel: &'a str,
    valor: &'a str,
    mes_referencia: &'a str,
    tipo: i64,
}

/// What an export wrote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub dir: PathBuf,
    pub version: VersionDescriptor,
    pub brands: usize,
    pub models: usize,
    pub year_variants: usize,
    pub prices: usize,
}

/// Writes the catalog artifacts into one directory
pub struct Exporter {
    dir: PathBuf,
    categories: Vec<VehicleCategory>,
}

impl Exporter {
    /// Creates an exporter writing every category into `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            categories: VehicleCategory::all(),
        }
    }

    /// Restricts the artifacts to rows of the given categories
    pub fn with_categories(mut self, categories: &[VehicleCategory]) -> Self {
        self.categories = categories.to_vec();
        self
    }

    fn includes(&self, category: VehicleCategory) -> bool {
        self.categories.contains(&category)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn export<S: CheckpointStore + ?Sized>(
        &self,
        store: &S,
        epoch: &Epoch,
    ) -> OutputResult<ExportSummary> {
        self.export_at(store, epoch, Utc::now())
    }

    /// Exports with an explicit timestamp
    ///
    /// # Arguments
    ///
    /// * `store` - Checkpoint store to read the harvested rows from
    /// * `epoch` - Reference table recorded in the version descriptor
    /// * `generated_at` - Timestamp written to the version descriptor
    ///
    /// # Returns
    ///
    /// * `Ok(ExportSummary)` - Row counts of every artifact written
    /// * `Err(OutputError)` - A read or write failed; completed artifacts are left in place
    pub fn export_at<S: CheckpointStore + ?Sized>(
        &self,
        store: &S,
        epoch: &Epoch,
        generated_at: DateTime<Utc>,
    ) -> OutputResult<ExportSummary> {
        fs::create_dir_all(&self.dir)?;

        let version = VersionDescriptor::new(epoch, generated_at);
        self.write_atomically(VERSION_FILE, |writer| {
            serde_json::to_writer_pretty(&mut *writer, &version)?;
            Ok(())
        })?;

        let brands: Vec<_> = store
            .load_brands()?
            .into_iter()
            .filter(|row| self.includes(row.category))
            .collect();
        let rows: Vec<_> = brands
            .iter()
            .map(|b| BrandRow {
                id: b.id,
                nome: &b.name,
                tipo: b.category.code(),
            })
            .collect();
        self.write_gzip_json(BRANDS_FILE, &rows)?;
        tracing::info!("Wrote {} brands to {}", rows.len(), BRANDS_FILE);

        let models: Vec<_> = store
            .load_models()?
            .into_iter()
            .filter(|row| self.includes(row.category))
            .collect();
        let rows: Vec<_> = models
            .iter()
            .map(|m| ModelRow {
                id: m.id,
                nome: &m.name,
                marca_id: m.brand_id,
                tipo: m.category.code(),
            })
            .collect();
        self.write_gzip_json(MODELS_FILE, &rows)?;
        tracing::info!("Wrote {} models to {}", rows.len(), MODELS_FILE);

        let years: Vec<_> = store
            .load_year_variants(Some(WorkStatus::Done))?
            .into_iter()
            .filter(|row| self.includes(row.category))
            .collect();
        let rows: Vec<_> = years
            .iter()
            .map(|y| YearRow {
                id: &y.code,
                nome: &y.label,
                modelo_id: y.model_id,
                marca_id: y.brand_id,
                tipo: y.category.code(),
                codigo_fipe: y.fipe_code.as_deref(),
                ano: y.model_year,
            })
            .collect();
        self.write_gzip_json(YEARS_FILE, &rows)?;
        tracing::info!("Wrote {} year variants to {}", rows.len(), YEARS_FILE);

        let prices: Vec<_> = store
            .load_prices()?
            .into_iter()
            .filter(|row| self.includes(row.category))
            .collect();
        let rows: Vec<_> = prices
            .iter()
            .map(|p| PriceRow {
                codigo_fipe: &p.fipe_code,
                marca: &p.brand_name,
                modelo: &p.model_name,
                ano_modelo: p.model_year,
                combustivel: &p.fuel,
                valor: &p.price,
                mes_referencia: &p.reference_month,
                tipo: p.category.code(),
            })
            .collect();
        self.write_gzip_json(PRICES_FILE, &rows)?;
        tracing::info!("Wrote {} prices to {}", rows.len(), PRICES_FILE);

        Ok(ExportSummary {
            dir: self.dir.clone(),
            version,
            brands: brands.len(),
            models: models.len(),
            year_variants: years.len(),
            prices: prices.len(),
        })
    }

    fn write_gzip_json<T: Serialize>(&self, name: &str, rows: &[T]) -> OutputResult<()> {
        self.write_atomically(name, |writer| {
            let mut encoder = GzEncoder::new(&mut *writer, Compression::default());
            serde_json::to_writer(&mut encoder, rows)?;
            encoder.finish()?;
            Ok(())
        })
    }

    /// Writes `name` through a temporary file so readers never see a partial artifact
    fn write_atomically<F>(&self, name: &str, write: F) -> OutputResult<()>
    where
        F: FnOnce(&mut BufWriter<File>) -> OutputResult<()>,
    {
        let target = self.dir.join(name);
        let partial = self.dir.join(format!("{}.partial", name));

        let mut writer = BufWriter::new(File::create(&partial)?);
        write(&mut writer)?;
        writer.flush()?;
        drop(writer);

        fs::rename(&partial, &target)?;
        Ok(())
    }
}
