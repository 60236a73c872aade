//! Integration tests for the harvester
//!
//! These tests drive the full phase sequence against a deterministic stub
//! transport and a SQLite store on disk, and use wiremock to exercise the
//! reqwest transport binding.

use async_trait::async_trait;
use fipe_harvest::config::{ApiConfig, Config, HarvestConfig, OutputConfig, PacingConfig};
use fipe_harvest::crawler::{
    Budget, Endpoint, FetchError, FipeApi, Harvester, HttpTransport, Params, ResilientClient,
    RunOutcome, StopReason, Transport,
};
use fipe_harvest::output::{VERSION_FILE, YEARS_FILE};
use fipe_harvest::state::{VehicleCategory, WorkStatus};
use fipe_harvest::storage::{
    BrandRecord, CheckpointStore, EntityLevel, ModelRecord, PriceRecord, RunStatus, SqliteStore,
    YearVariantRecord,
};
use flate2::read::GzDecoder;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ===== Stub remote =====

/// A fixed catalog served by the stub transport
#[derive(Debug, Clone, Default)]
struct Catalog {
    epoch: i64,
    epoch_label: String,
    /// category code -> brands
    brands: BTreeMap<i64, Vec<(i64, String)>>,
    /// brand id -> models
    models: BTreeMap<i64, Vec<(i64, String)>>,
    /// model id -> year codes
    years: BTreeMap<i64, Vec<String>>,
    epoch_down: bool,
    /// category codes whose brand listing is rejected
    brands_rejected: HashSet<i64>,
    /// brand ids whose model listing is rejected
    models_rejected: HashSet<i64>,
    /// model ids whose year listing answers 503
    years_unavailable: HashSet<i64>,
    /// model ids whose price lookups are rejected
    prices_rejected: HashSet<i64>,
    /// model years whose price lookups answer 429
    throttled_years: HashSet<i64>,
}

impl Catalog {
    fn with_epoch(mut self, code: i64, label: &str) -> Self {
        self.epoch = code;
        self.epoch_label = label.to_string();
        self
    }

    fn brand(mut self, category: VehicleCategory, id: i64, name: &str) -> Self {
        self.brands
            .entry(category.code())
            .or_default()
            .push((id, name.to_string()));
        self
    }

    fn model(mut self, brand_id: i64, id: i64, name: &str, years: &[&str]) -> Self {
        self.models
            .entry(brand_id)
            .or_default()
            .push((id, name.to_string()));
        self.years
            .insert(id, years.iter().map(|y| y.to_string()).collect());
        self
    }
}

struct StubRemote {
    catalog: Mutex<Catalog>,
    calls: Mutex<Vec<(Endpoint, Params)>>,
}

#[derive(Clone)]
struct StubTransport(Arc<StubRemote>);

impl StubTransport {
    fn new(catalog: Catalog) -> Self {
        Self(Arc::new(StubRemote {
            catalog: Mutex::new(catalog),
            calls: Mutex::new(Vec::new()),
        }))
    }

    fn update(&self, change: impl FnOnce(&mut Catalog)) {
        change(&mut self.0.catalog.lock().unwrap());
    }

    fn calls_to(&self, endpoint: Endpoint) -> usize {
        self.0
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| *e == endpoint)
            .count()
    }

    fn total_calls(&self) -> usize {
        self.0.calls.lock().unwrap().len()
    }

    /// Calls to `endpoint` that carried `name=value`
    fn calls_with(&self, endpoint: Endpoint, name: &str, value: i64) -> usize {
        self.0
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, params)| *e == endpoint && param(params, name) == value)
            .count()
    }
}

fn param(params: &[(&'static str, String)], name: &str) -> i64 {
    params
        .iter()
        .find(|(key, _)| *key == name)
        .and_then(|(_, value)| value.parse().ok())
        .unwrap_or_else(|| panic!("missing parameter {}", name))
}

fn entries(rows: &[(i64, String)]) -> Value {
    Value::Array(
        rows.iter()
            .map(|(id, name)| json!({"Label": name, "Value": id.to_string()}))
            .collect(),
    )
}

#[async_trait]
impl Transport for StubTransport {
    async fn post(
        &self,
        endpoint: Endpoint,
        params: &[(&'static str, String)],
    ) -> Result<Value, FetchError> {
        self.0.calls.lock().unwrap().push((endpoint, params.to_vec()));
        let catalog = self.0.catalog.lock().unwrap();

        match endpoint {
            Endpoint::ReferenceTable => {
                if catalog.epoch_down {
                    return Err(FetchError::ServiceUnavailable("503".into()));
                }
                Ok(json!([
                    {"Codigo": catalog.epoch, "Mes": format!("{} ", catalog.epoch_label)},
                    {"Codigo": catalog.epoch - 1, "Mes": "older "}
                ]))
            }
            Endpoint::Brands => {
                let category = param(params, "codigoTipoVeiculo");
                if catalog.brands_rejected.contains(&category) {
                    return Err(FetchError::Malformed("brands".into()));
                }
                let rows = catalog.brands.get(&category).cloned().unwrap_or_default();
                Ok(entries(&rows))
            }
            Endpoint::Models => {
                let brand = param(params, "codigoMarca");
                if catalog.models_rejected.contains(&brand) {
                    return Err(FetchError::Malformed("models".into()));
                }
                let rows = catalog.models.get(&brand).cloned().unwrap_or_default();
                Ok(json!({"Anos": [], "Modelos": entries(&rows)}))
            }
            Endpoint::YearVariants => {
                let model = param(params, "codigoModelo");
                if catalog.years_unavailable.contains(&model) {
                    return Err(FetchError::ServiceUnavailable("503".into()));
                }
                let rows: Vec<Value> = catalog
                    .years
                    .get(&model)
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|code| json!({"Label": format!("{} label", code), "Value": code}))
                    .collect();
                Ok(Value::Array(rows))
            }
            Endpoint::Price => {
                let brand = param(params, "codigoMarca");
                let model = param(params, "codigoModelo");
                let year = param(params, "anoModelo");
                if catalog.throttled_years.contains(&year) {
                    return Err(FetchError::RateLimited("429".into()));
                }
                if catalog.prices_rejected.contains(&model) {
                    return Err(FetchError::Malformed("price".into()));
                }
                let fuel = param(params, "codigoTipoCombustivel");
                Ok(json!({
                    "Valor": format!("R$ {}.000,00", model),
                    "Marca": format!("Brand {}", brand),
                    "Modelo": format!("Model {}", model),
                    "AnoModelo": year,
                    "Combustivel": "Gasolina",
                    "CodigoFipe": format!("{:03}{:03}-{}", brand, model, fuel),
                    "MesReferencia": catalog.epoch_label,
                    "SiglaCombustivel": "G"
                }))
            }
        }
    }
}

// ===== Helpers =====

fn create_test_config(dir: &Path, categories: Vec<VehicleCategory>) -> Config {
    Config {
        harvest: HarvestConfig {
            max_execution_minutes: 60,
            max_units: None,
            categories,
        },
        api: ApiConfig::default(),
        pacing: PacingConfig::immediate(),
        output: OutputConfig {
            database_path: db_path(dir).display().to_string(),
            export_dir: export_dir(dir).display().to_string(),
        },
    }
}

fn db_path(dir: &Path) -> PathBuf {
    dir.join("temp_data.db")
}

fn export_dir(dir: &Path) -> PathBuf {
    dir.join("export")
}

fn open_store(dir: &Path) -> SqliteStore {
    SqliteStore::new(&db_path(dir)).expect("Failed to open store")
}

/// One invocation, as a separate process would run it
async fn invoke(
    transport: &StubTransport,
    dir: &Path,
    config: &Config,
    mut budget: Budget,
) -> RunOutcome {
    let mut harvester = Harvester::new(transport.clone(), open_store(dir), config);
    harvester.run(&mut budget).await.expect("Harvest run failed")
}

type Snapshot = (
    Vec<BrandRecord>,
    Vec<ModelRecord>,
    Vec<YearVariantRecord>,
    Vec<PriceRecord>,
);

fn snapshot(dir: &Path) -> Snapshot {
    let store = open_store(dir);
    (
        store.load_brands().unwrap(),
        store.load_models().unwrap(),
        store.load_year_variants(None).unwrap(),
        store.load_prices().unwrap(),
    )
}

fn read_gz(path: &Path) -> Value {
    serde_json::from_reader(GzDecoder::new(File::open(path).unwrap())).unwrap()
}

/// Two brands (one without models), two models, one year variant
fn small_catalog() -> Catalog {
    Catalog::default()
        .with_epoch(300, "outubro/2026")
        .brand(VehicleCategory::Cars, 2, "Audi")
        .brand(VehicleCategory::Cars, 21, "Fiat")
        .model(21, 5, "Uno", &["2014-1"])
        .model(21, 9, "Palio", &[])
}

/// Several categories, an empty brand, an unparseable code and a rejected price
fn larger_catalog() -> Catalog {
    Catalog::default()
        .with_epoch(300, "outubro/2026")
        .brand(VehicleCategory::Cars, 2, "Audi")
        .brand(VehicleCategory::Cars, 21, "Fiat")
        .brand(VehicleCategory::Motorcycles, 80, "Honda")
        .model(21, 5, "Uno", &["2014-1", "2013-1"])
        .model(21, 9, "Palio", &["abc", "32000-1"])
        .model(21, 10, "Mobi", &[])
        .model(80, 700, "CG 160", &["2020-1"])
}

// ===== Phase driver =====

#[tokio::test]
async fn test_end_to_end_single_invocation() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), vec![VehicleCategory::Cars]);
    let transport = StubTransport::new(small_catalog());

    let outcome = invoke(&transport, dir.path(), &config, Budget::unlimited()).await;

    let export = match outcome {
        RunOutcome::Completed { export } => export,
        other => panic!("expected completion, got {:?}", other),
    };
    assert_eq!(export.brands, 2);
    assert_eq!(export.models, 2);
    assert_eq!(export.year_variants, 1);
    assert_eq!(export.prices, 1);
    assert_eq!(export.version.fipe_reference, "outubro/2026");

    let (brands, models, years, prices) = snapshot(dir.path());
    assert_eq!(brands.len(), 2);
    assert_eq!(models.len(), 2);
    assert!(models.iter().all(|m| m.status == WorkStatus::Done));
    assert_eq!(years.len(), 1);
    assert_eq!(years[0].status, WorkStatus::Done);
    assert_eq!(years[0].fipe_code.as_deref(), Some("021005-1"));
    assert_eq!(years[0].model_year, Some(2014));
    assert_eq!(prices.len(), 1);
    assert_eq!(prices[0].fipe_code, "021005-1");
    assert_eq!(prices[0].reference_month, "outubro/2026");

    let store = open_store(dir.path());
    let run = store.get_latest_run().unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.epoch, Some(300));
    // brands + 2 model listings + 2 year listings + 1 price
    assert_eq!(run.units, 6);

    let exported_years = read_gz(&export_dir(dir.path()).join(YEARS_FILE));
    assert_eq!(exported_years[0]["codigo_fipe"], "021005-1");
    assert!(export_dir(dir.path()).join(VERSION_FILE).exists());
}

#[tokio::test]
async fn test_budget_interruption_converges_to_same_tables() {
    let reference_dir = TempDir::new().unwrap();
    let config = create_test_config(reference_dir.path(), VehicleCategory::all());
    let transport = StubTransport::new(larger_catalog());

    let outcome = invoke(&transport, reference_dir.path(), &config, Budget::unlimited()).await;
    assert!(!outcome.more_work_remains());
    let expected = snapshot(reference_dir.path());

    for units_per_invocation in [1, 3] {
        let dir = TempDir::new().unwrap();
        let config = create_test_config(dir.path(), VehicleCategory::all());
        let transport = StubTransport::new(larger_catalog());

        let mut invocations = 0;
        loop {
            invocations += 1;
            assert!(invocations < 100, "harvest did not converge");

            let outcome = invoke(
                &transport,
                dir.path(),
                &config,
                Budget::units(units_per_invocation),
            )
            .await;

            match outcome {
                RunOutcome::Completed { .. } => break,
                RunOutcome::MoreWorkRemains { reason, .. } => {
                    assert_eq!(reason, StopReason::BudgetExhausted);
                    assert!(
                        !export_dir(dir.path()).join(VERSION_FILE).exists(),
                        "export written while work remained"
                    );
                }
            }
        }

        assert!(invocations > 1);
        assert_eq!(snapshot(dir.path()), expected);
    }
}

#[tokio::test]
async fn test_rejected_prices_and_bad_codes_end_in_error() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), VehicleCategory::all());
    let transport = StubTransport::new(larger_catalog());
    transport.update(|c| {
        c.prices_rejected.insert(9);
    });

    let outcome = invoke(&transport, dir.path(), &config, Budget::unlimited()).await;
    assert!(!outcome.more_work_remains());

    let store = open_store(dir.path());
    let years = store.count_by_status(EntityLevel::YearVariant).unwrap();
    assert_eq!(years.get(&WorkStatus::Done), Some(&3));
    assert_eq!(years.get(&WorkStatus::Error), Some(&2));
    assert_eq!(store.count_prices().unwrap(), 3);
    assert!(store.is_category_seeded(VehicleCategory::Trucks).unwrap());

    let exported_years = read_gz(&export_dir(dir.path()).join(YEARS_FILE));
    assert_eq!(exported_years.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_malformed_year_code_never_reaches_network() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), vec![VehicleCategory::Cars]);
    let catalog = Catalog::default()
        .with_epoch(300, "outubro/2026")
        .brand(VehicleCategory::Cars, 21, "Fiat")
        .model(21, 5, "Uno", &["abc"]);
    let transport = StubTransport::new(catalog);

    let outcome = invoke(&transport, dir.path(), &config, Budget::unlimited()).await;

    assert!(!outcome.more_work_remains());
    assert_eq!(transport.calls_to(Endpoint::Price), 0);

    let (_, _, years, prices) = snapshot(dir.path());
    assert_eq!(years.len(), 1);
    assert_eq!(years[0].code, "abc");
    assert_eq!(years[0].status, WorkStatus::Error);
    assert!(years[0].fipe_code.is_none());
    assert!(prices.is_empty());
}

#[tokio::test]
async fn test_no_export_while_work_is_pending() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), vec![VehicleCategory::Cars]);
    let transport = StubTransport::new(small_catalog());

    let outcome = invoke(&transport, dir.path(), &config, Budget::units(3)).await;

    match outcome {
        RunOutcome::MoreWorkRemains {
            reason,
            pending_models,
            pending_year_variants,
        } => {
            assert_eq!(reason, StopReason::BudgetExhausted);
            assert_eq!(pending_models, 2);
            assert_eq!(pending_year_variants, 0);
        }
        other => panic!("expected more work, got {:?}", other),
    }
    assert!(!export_dir(dir.path()).exists());

    let store = open_store(dir.path());
    assert_eq!(
        store.get_latest_run().unwrap().unwrap().status,
        RunStatus::Incomplete
    );
}

#[tokio::test]
async fn test_zero_budget_makes_no_calls() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), vec![VehicleCategory::Cars]);
    let transport = StubTransport::new(small_catalog());

    let outcome = invoke(&transport, dir.path(), &config, Budget::units(0)).await;

    assert!(outcome.more_work_remains());
    assert_eq!(transport.total_calls(), 0);
}

#[tokio::test]
async fn test_same_epoch_keeps_checkpoints() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), vec![VehicleCategory::Cars]);
    let transport = StubTransport::new(small_catalog());

    invoke(&transport, dir.path(), &config, Budget::unlimited()).await;
    let before = snapshot(dir.path());
    let calls_before = transport.total_calls();

    let outcome = invoke(&transport, dir.path(), &config, Budget::unlimited()).await;

    assert!(!outcome.more_work_remains());
    assert_eq!(snapshot(dir.path()), before);
    // Only the reference table is consulted again
    assert_eq!(transport.total_calls(), calls_before + 1);
}

#[tokio::test]
async fn test_new_epoch_invalidates_checkpoints() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), vec![VehicleCategory::Cars]);
    let transport = StubTransport::new(small_catalog());

    invoke(&transport, dir.path(), &config, Budget::unlimited()).await;

    // The new reference table no longer lists Audi
    transport.update(|c| {
        c.epoch = 301;
        c.epoch_label = "novembro/2026".to_string();
        c.brands.insert(VehicleCategory::Cars.code(), vec![(21, "Fiat".to_string())]);
    });

    let outcome = invoke(&transport, dir.path(), &config, Budget::unlimited()).await;

    assert!(!outcome.more_work_remains());
    assert_eq!(
        open_store(dir.path()).current_epoch().unwrap().map(|e| e.code),
        Some(301)
    );
    let (brands, models, years, prices) = snapshot(dir.path());
    assert_eq!(brands.len(), 1);
    assert!(brands.iter().all(|b| b.epoch == 301));
    assert!(models.iter().all(|m| m.epoch == 301));
    assert!(years.iter().all(|y| y.epoch == 301));
    assert_eq!(prices.len(), 1);
    assert_eq!(prices[0].reference_month, "novembro/2026");
    // Every listing was fetched again for the new table
    assert_eq!(transport.calls_to(Endpoint::Brands), 2);
    assert_eq!(transport.calls_to(Endpoint::Price), 2);
}

#[tokio::test]
async fn test_failed_listings_do_not_block_completion() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(
        dir.path(),
        vec![VehicleCategory::Cars, VehicleCategory::Motorcycles],
    );
    let catalog = Catalog::default()
        .with_epoch(300, "outubro/2026")
        .brand(VehicleCategory::Cars, 21, "Fiat")
        .brand(VehicleCategory::Cars, 59, "VW")
        .brand(VehicleCategory::Motorcycles, 80, "Honda")
        .model(21, 5, "Uno", &["2014-1"])
        .model(59, 8, "Gol", &["2014-1"]);
    let transport = StubTransport::new(catalog);
    transport.update(|c| {
        c.brands_rejected.insert(VehicleCategory::Motorcycles.code());
        c.models_rejected.insert(59);
    });

    let outcome = invoke(&transport, dir.path(), &config, Budget::unlimited()).await;

    let export = match outcome {
        RunOutcome::Completed { export } => export,
        other => panic!("expected completion, got {:?}", other),
    };
    assert_eq!(export.brands, 2);
    assert_eq!(export.models, 1);
    assert_eq!(export.prices, 1);

    let store = open_store(dir.path());
    assert!(store
        .is_category_seeded(VehicleCategory::Motorcycles)
        .unwrap());
    assert!(store.brands_awaiting_models().unwrap().is_empty());

    // Failed listings count as listed for this reference table
    transport.update(|c| {
        c.brands_rejected.clear();
        c.models_rejected.clear();
    });
    let outcome = invoke(&transport, dir.path(), &config, Budget::unlimited()).await;

    assert!(!outcome.more_work_remains());
    assert_eq!(transport.calls_to(Endpoint::Brands), 2);
    assert_eq!(transport.calls_to(Endpoint::Models), 2);
}

#[tokio::test]
async fn test_unavailable_epoch_stops_run() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), vec![VehicleCategory::Cars]);
    let transport = StubTransport::new(small_catalog());
    transport.update(|c| c.epoch_down = true);

    let outcome = invoke(&transport, dir.path(), &config, Budget::unlimited()).await;

    assert!(matches!(
        outcome,
        RunOutcome::MoreWorkRemains {
            reason: StopReason::EpochUnavailable,
            ..
        }
    ));
    // Every attempt went to the reference table
    assert_eq!(
        transport.calls_to(Endpoint::ReferenceTable),
        transport.total_calls()
    );
    assert!(open_store(dir.path()).current_epoch().unwrap().is_none());
}

#[tokio::test]
async fn test_failing_rows_do_not_block_siblings() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), vec![VehicleCategory::Cars]);
    let catalog = Catalog::default()
        .with_epoch(300, "outubro/2026")
        .brand(VehicleCategory::Cars, 21, "Fiat")
        .model(21, 5, "Uno", &["2013-1", "2014-1"])
        .model(21, 9, "Palio", &["2015-1"]);
    let transport = StubTransport::new(catalog);
    transport.update(|c| {
        c.years_unavailable.insert(9);
        c.throttled_years.insert(2013);
    });
    let attempts = PacingConfig::default().max_attempts as usize;

    let outcome = invoke(&transport, dir.path(), &config, Budget::unlimited()).await;

    let export = match outcome {
        RunOutcome::Completed { export } => export,
        other => panic!("expected completion, got {:?}", other),
    };
    assert_eq!(export.year_variants, 1);
    assert_eq!(export.prices, 1);
    assert_eq!(transport.calls_to(Endpoint::YearVariants), 1 + attempts);
    assert_eq!(transport.calls_to(Endpoint::Price), attempts + 1);

    let (_, models, years, _) = snapshot(dir.path());
    assert!(models.iter().all(|m| m.status == WorkStatus::Done));
    let statuses: Vec<_> = years.iter().map(|y| (y.code.as_str(), y.status)).collect();
    assert_eq!(
        statuses,
        vec![("2013-1", WorkStatus::Error), ("2014-1", WorkStatus::Done)]
    );

    // Terminal rows are not retried by later invocations
    let outcome = invoke(&transport, dir.path(), &config, Budget::unlimited()).await;
    assert!(!outcome.more_work_remains());
    assert_eq!(transport.calls_to(Endpoint::Price), attempts + 1);
}

#[tokio::test]
async fn test_remote_outage_stops_after_consecutive_failures() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), vec![VehicleCategory::Cars]);
    let catalog = Catalog::default()
        .with_epoch(300, "outubro/2026")
        .brand(VehicleCategory::Cars, 21, "Fiat")
        .model(21, 5, "Uno", &["2011-1", "2012-1", "2013-1", "2014-1"]);
    let transport = StubTransport::new(catalog);
    transport.update(|c| c.throttled_years.extend([2011, 2012, 2013, 2014]));

    let outcome = invoke(&transport, dir.path(), &config, Budget::unlimited()).await;

    match outcome {
        RunOutcome::MoreWorkRemains {
            reason,
            pending_year_variants,
            ..
        } => {
            assert_eq!(reason, StopReason::RemoteUnavailable);
            assert_eq!(pending_year_variants, 1);
        }
        other => panic!("expected more work, got {:?}", other),
    }
    assert_eq!(
        transport.calls_to(Endpoint::Price),
        3 * PacingConfig::default().max_attempts as usize
    );
    assert!(!export_dir(dir.path()).exists());

    transport.update(|c| c.throttled_years.clear());
    let outcome = invoke(&transport, dir.path(), &config, Budget::unlimited()).await;

    assert!(!outcome.more_work_remains());
    let store = open_store(dir.path());
    let years = store.count_by_status(EntityLevel::YearVariant).unwrap();
    assert_eq!(years.get(&WorkStatus::Error), Some(&3));
    assert_eq!(years.get(&WorkStatus::Done), Some(&1));
}

#[tokio::test]
async fn test_narrowed_categories_leave_other_rows_alone() {
    let dir = TempDir::new().unwrap();
    let all = create_test_config(dir.path(), VehicleCategory::all());
    let transport = StubTransport::new(larger_catalog());

    // Three brand listings and three model listings
    let outcome = invoke(&transport, dir.path(), &all, Budget::units(6)).await;
    assert!(outcome.more_work_remains());
    assert_eq!(
        open_store(dir.path())
            .count_pending(EntityLevel::Model, Some(VehicleCategory::Motorcycles))
            .unwrap(),
        1
    );

    let cars = create_test_config(dir.path(), vec![VehicleCategory::Cars]);
    let outcome = invoke(&transport, dir.path(), &cars, Budget::unlimited()).await;

    let export = match outcome {
        RunOutcome::Completed { export } => export,
        other => panic!("expected completion, got {:?}", other),
    };
    assert_eq!(export.brands, 2);
    assert_eq!(export.models, 3);
    let motorcycles = VehicleCategory::Motorcycles.code();
    assert_eq!(
        transport.calls_with(Endpoint::YearVariants, "codigoTipoVeiculo", motorcycles),
        0
    );
    assert_eq!(
        transport.calls_with(Endpoint::Price, "codigoTipoVeiculo", motorcycles),
        0
    );
    assert_eq!(
        open_store(dir.path())
            .count_pending(EntityLevel::Model, Some(VehicleCategory::Motorcycles))
            .unwrap(),
        1
    );
}

// ===== HTTP transport =====

fn api_config(server: &MockServer) -> ApiConfig {
    ApiConfig {
        base_url: format!("{}/api/veiculos", server.uri()),
        timeout_secs: 5,
        ..ApiConfig::default()
    }
}

fn http_api(server: &MockServer) -> FipeApi<HttpTransport> {
    let transport = HttpTransport::new(&api_config(server)).expect("Failed to build transport");
    FipeApi::new(ResilientClient::new(transport, PacingConfig::immediate()))
}

#[tokio::test]
async fn test_http_transport_posts_form_with_site_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/veiculos/ConsultarMarcas"))
        .and(header("referer", "https://veiculos.fipe.org.br/"))
        .and(header("origin", "https://veiculos.fipe.org.br"))
        .and(body_string_contains("codigoTabelaReferencia=300"))
        .and(body_string_contains("codigoTipoVeiculo=2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"Label": "Honda", "Value": "80"},
            {"Label": "Yamaha", "Value": "101"}
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut api = http_api(&mock_server);
    let brands = api.brands(300, VehicleCategory::Motorcycles).await.unwrap();

    assert_eq!(brands.len(), 2);
    assert_eq!(brands[0].id, 80);
    assert_eq!(brands[1].name, "Yamaha");
}

#[tokio::test]
async fn test_http_transport_retries_rate_limit() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/veiculos/ConsultarTabelaDeReferencia"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/veiculos/ConsultarTabelaDeReferencia"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"Codigo": 300, "Mes": "outubro/2026 "}])),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut api = http_api(&mock_server);
    let epoch = api.reference_table().await.unwrap();

    assert_eq!(epoch.code, 300);
    assert_eq!(epoch.label, "outubro/2026");
    assert_eq!(api.client().calls(), 3);
}

#[tokio::test]
async fn test_http_transport_in_band_error_is_malformed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/veiculos/ConsultarModelos"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"codigo": "0", "erro": "Parâmetros inválidos"})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut api = http_api(&mock_server);
    let result = api.models(300, VehicleCategory::Cars, 21).await;

    assert!(matches!(result, Err(FetchError::Malformed(_))));
}

#[tokio::test]
async fn test_http_transport_client_error_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/veiculos/ConsultarAnoModelo"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut api = http_api(&mock_server);
    let result = api.year_variants(300, VehicleCategory::Cars, 21, 5).await;

    assert!(matches!(result, Err(FetchError::Other(_))));
}

#[tokio::test]
async fn test_http_transport_server_errors_exhaust() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/veiculos/ConsultarTabelaDeReferencia"))
        .respond_with(ResponseTemplate::new(503))
        .expect(5)
        .mount(&mock_server)
        .await;

    let mut api = http_api(&mock_server);
    let result = api.reference_table().await;

    assert!(matches!(
        result,
        Err(FetchError::Exhausted { attempts: 5, .. })
    ));
}
