//! Crawler module for walking the FIPE catalog
//!
//! This module contains the core harvesting logic, including:
//! - The transport seam and its reqwest implementation
//! - Adaptive pacing and retry logic around each remote call
//! - Mapping of remote field names onto internal types
//! - The per-invocation budget
//! - Overall phase coordination

mod api;
mod budget;
mod coordinator;
mod fetcher;
mod pacing;
mod transport;

pub use api::{FipeApi, PriceQuote};
pub use budget::Budget;
pub use coordinator::{run_harvest, Harvester, RunOutcome, StopReason};
pub use fetcher::ResilientClient;
pub use pacing::Pacer;
pub use transport::{build_http_client, Endpoint, FetchError, HttpTransport, Params, Transport};
