use crate::state::VehicleCategory;
use serde::Deserialize;

/// Main configuration structure for the harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    pub output: OutputConfig,
}

/// Harvest run configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HarvestConfig {
    /// Wall-clock budget for a single invocation (minutes)
    #[serde(rename = "max-execution-minutes")]
    pub max_execution_minutes: u64,

    /// Optional cap on units of work per invocation
    #[serde(rename = "max-units", default)]
    pub max_units: Option<u64>,

    /// Vehicle categories to harvest
    #[serde(default = "VehicleCategory::all")]
    pub categories: Vec<VehicleCategory>,
}

/// Remote API connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL all endpoint names are appended to
    #[serde(rename = "base-url", default = "default_base_url")]
    pub base_url: String,

    /// User-Agent header sent with every request
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Referer/Origin the API expects from its own web front-end
    #[serde(default = "default_referer")]
    pub referer: String,

    /// Per-request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Adaptive pacing and retry configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Starting value of the adaptive inter-request delay (milliseconds)
    #[serde(rename = "initial-delay-ms")]
    pub initial_delay_ms: u64,

    /// Floor the delay decays toward on success (milliseconds)
    #[serde(rename = "min-delay-ms")]
    pub min_delay_ms: u64,

    /// Cap the delay grows toward on rate limiting (milliseconds)
    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,

    /// Multiplier applied to the delay on a rate-limit response
    #[serde(rename = "growth-factor")]
    pub growth_factor: f64,

    /// Multiplier applied to the delay on success
    #[serde(rename = "decay-factor")]
    pub decay_factor: f64,

    /// Relative jitter applied to every sleep (0.2 = ±20%)
    pub jitter: f64,

    /// Attempts per remote call before giving up
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Backoff before each retry; the last value repeats
    #[serde(rename = "backoff-schedule-ms")]
    pub backoff_schedule_ms: Vec<u64>,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite checkpoint database
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Directory the final artifacts are written to
    #[serde(rename = "export-dir")]
    pub export_dir: String,
}

fn default_base_url() -> String {
    "https://veiculos.fipe.org.br/api/veiculos".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko)".to_string()
}

fn default_referer() -> String {
    "https://veiculos.fipe.org.br/".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            referer: default_referer(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1500,
            min_delay_ms: 1500,
            max_delay_ms: 5000,
            growth_factor: 1.5,
            decay_factor: 0.9,
            jitter: 0.2,
            max_attempts: 5,
            backoff_schedule_ms: vec![2000, 4000, 8000, 12000, 20000],
        }
    }
}

impl PacingConfig {
    /// Pacing with every sleep disabled
    ///
    /// Used by tests and local runs against a stub transport.
    pub fn immediate() -> Self {
        Self {
            initial_delay_ms: 0,
            min_delay_ms: 0,
            max_delay_ms: 0,
            jitter: 0.0,
            backoff_schedule_ms: vec![0],
            ..Self::default()
        }
    }
}
