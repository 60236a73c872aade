//! Typed FIPE API calls
//!
//! All knowledge of the remote field names lives here. Everything past this
//! module sees epochs, catalog entries, year entries and price quotes only.

use crate::crawler::fetcher::ResilientClient;
use crate::crawler::transport::{Endpoint, FetchError, Params, Transport};
use crate::state::{CatalogEntry, VehicleCategory, YearCode, YearEntry};
use crate::storage::{Epoch, PriceRecord};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;

/// A price lookup result, before it is tied to a category and epoch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuote {
    pub fipe_code: String,
    pub brand: String,
    pub model: String,
    pub model_year: i64,
    pub fuel: String,
    pub value: String,
    pub reference_month: String,
}

impl PriceQuote {
    pub fn into_record(self, category: VehicleCategory, epoch: i64) -> PriceRecord {
        PriceRecord {
            fipe_code: self.fipe_code,
            model_year: self.model_year,
            category,
            brand_name: self.brand,
            model_name: self.model,
            fuel: self.fuel,
            price: self.value,
            reference_month: self.reference_month,
            epoch,
        }
    }
}

// ===== Wire shapes =====

/// Ids arrive as JSON numbers or as numeric strings depending on the endpoint
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(i64),
    Text(String),
}

fn int_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match Scalar::deserialize(deserializer)? {
        Scalar::Int(value) => Ok(value),
        Scalar::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("expected a numeric id, got {:?}", text))),
    }
}

fn string_or_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Int(value) => value.to_string(),
        Scalar::Text(text) => text,
    })
}

#[derive(Deserialize)]
struct ReferenceRow {
    #[serde(rename = "Codigo", deserialize_with = "int_or_string")]
    code: i64,
    #[serde(rename = "Mes")]
    month: String,
}

#[derive(Deserialize)]
struct CatalogRow {
    #[serde(rename = "Label")]
    label: String,
    #[serde(rename = "Value", deserialize_with = "int_or_string")]
    value: i64,
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(rename = "Modelos")]
    models: Vec<CatalogRow>,
}

#[derive(Deserialize)]
struct YearRow {
    #[serde(rename = "Label")]
    label: String,
    #[serde(rename = "Value", deserialize_with = "string_or_int")]
    value: String,
}

#[derive(Deserialize)]
struct PriceRow {
    #[serde(rename = "CodigoFipe")]
    fipe_code: String,
    #[serde(rename = "Marca")]
    brand: String,
    #[serde(rename = "Modelo")]
    model: String,
    #[serde(rename = "AnoModelo", deserialize_with = "int_or_string")]
    model_year: i64,
    #[serde(rename = "Combustivel")]
    fuel: String,
    #[serde(rename = "Valor")]
    value: String,
    #[serde(rename = "MesReferencia")]
    reference_month: String,
}

fn decode<D: DeserializeOwned>(endpoint: Endpoint, value: Value) -> Result<D, FetchError> {
    serde_json::from_value(value)
        .map_err(|e| FetchError::Malformed(format!("{}: unexpected payload: {}", endpoint, e)))
}

fn catalog(rows: Vec<CatalogRow>) -> Vec<CatalogEntry> {
    rows.into_iter()
        .map(|row| CatalogEntry::new(row.value, row.label.trim()))
        .collect()
}

/// Typed access to the FIPE endpoints over a resilient client
pub struct FipeApi<T> {
    client: ResilientClient<T>,
}

impl<T: Transport> FipeApi<T> {
    pub fn new(client: ResilientClient<T>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ResilientClient<T> {
        &self.client
    }

    /// Latest reference table (the current epoch)
    pub async fn reference_table(&mut self) -> Result<Epoch, FetchError> {
        let endpoint = Endpoint::ReferenceTable;
        let value = self.client.call(endpoint, &[]).await?;
        let rows: Vec<ReferenceRow> = decode(endpoint, value)?;

        // Newest table comes first
        let latest = rows
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::Malformed(format!("{}: empty table list", endpoint)))?;

        Ok(Epoch {
            code: latest.code,
            label: latest.month.trim().to_string(),
        })
    }

    pub async fn brands(
        &mut self,
        epoch: i64,
        category: VehicleCategory,
    ) -> Result<Vec<CatalogEntry>, FetchError> {
        let endpoint = Endpoint::Brands;
        let params = base_params(epoch, category);
        let value = self.client.call(endpoint, &params).await?;
        let rows: Vec<CatalogRow> = decode(endpoint, value)?;
        Ok(catalog(rows))
    }

    pub async fn models(
        &mut self,
        epoch: i64,
        category: VehicleCategory,
        brand_id: i64,
    ) -> Result<Vec<CatalogEntry>, FetchError> {
        let endpoint = Endpoint::Models;
        let mut params = base_params(epoch, category);
        params.push(("codigoMarca", brand_id.to_string()));

        let value = self.client.call(endpoint, &params).await?;
        let list: ModelList = decode(endpoint, value)?;
        Ok(catalog(list.models))
    }

    pub async fn year_variants(
        &mut self,
        epoch: i64,
        category: VehicleCategory,
        brand_id: i64,
        model_id: i64,
    ) -> Result<Vec<YearEntry>, FetchError> {
        let endpoint = Endpoint::YearVariants;
        let mut params = base_params(epoch, category);
        params.push(("codigoMarca", brand_id.to_string()));
        params.push(("codigoModelo", model_id.to_string()));

        let value = self.client.call(endpoint, &params).await?;
        let rows: Vec<YearRow> = decode(endpoint, value)?;
        Ok(rows
            .into_iter()
            .map(|row| YearEntry::new(row.value.trim(), row.label.trim()))
            .collect())
    }

    /// Looks up the price of one year variant
    ///
    /// # Arguments
    ///
    /// * `epoch` - Reference table code
    /// * `category` - Vehicle category of the model
    /// * `brand_id` - Brand identifier
    /// * `model_id` - Model identifier
    /// * `year` - Parsed year code; its year and fuel are sent as separate fields
    ///
    /// # Returns
    ///
    /// * `Ok(PriceQuote)` - The quote with its FIPE code and reference month trimmed
    /// * `Err(FetchError)` - The call failed or the body did not carry a price
    pub async fn price(
        &mut self,
        epoch: i64,
        category: VehicleCategory,
        brand_id: i64,
        model_id: i64,
        year: &YearCode,
    ) -> Result<PriceQuote, FetchError> {
        let endpoint = Endpoint::Price;
        let mut params = base_params(epoch, category);
        params.push(("codigoMarca", brand_id.to_string()));
        params.push(("codigoModelo", model_id.to_string()));
        params.push(("anoModelo", year.year.to_string()));
        params.push(("codigoTipoCombustivel", year.fuel.to_string()));
        params.push(("tipoConsulta", "tradicional".to_string()));

        let value = self.client.call(endpoint, &params).await?;
        let row: PriceRow = decode(endpoint, value)?;

        Ok(PriceQuote {
            fipe_code: row.fipe_code.trim().to_string(),
            brand: row.brand,
            model: row.model,
            model_year: row.model_year,
            fuel: row.fuel,
            value: row.value,
            reference_month: row.reference_month.trim().to_string(),
        })
    }
}

fn base_params(epoch: i64, category: VehicleCategory) -> Params {
    vec![
        ("codigoTabelaReferencia", epoch.to_string()),
        ("codigoTipoVeiculo", category.code().to_string()),
    ]
}
