//! Remote call boundary
//!
//! This module defines the single seam between the harvester and the FIPE API:
//! - The `Transport` trait performing exactly one remote call
//! - The `FetchError` taxonomy every transport must map its failures onto
//! - `HttpTransport`, the reqwest implementation used in production

use crate::config::ApiConfig;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ORIGIN, REFERER};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Form parameters of one remote call
pub type Params = Vec<(&'static str, String)>;

/// Remote API endpoints, one per traversal level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    ReferenceTable,
    Brands,
    Models,
    YearVariants,
    Price,
}

impl Endpoint {
    /// Path segment appended to the API base URL
    pub fn path(&self) -> &'static str {
        match self {
            Self::ReferenceTable => "ConsultarTabelaDeReferencia",
            Self::Brands => "ConsultarMarcas",
            Self::Models => "ConsultarModelos",
            Self::YearVariants => "ConsultarAnoModelo",
            Self::Price => "ConsultarValorComTodosParametros",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Failure of a remote call
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP 429
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// HTTP 5xx
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Connection failure, timeout or truncated body
    #[error("Transport error: {0}")]
    Transport(String),

    /// Body is not the structured payload the endpoint should return
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Any other non-success response
    #[error("Request failed: {0}")]
    Other(String),

    /// Retryable failures persisted past the attempt ceiling
    #[error("{endpoint} failed after {attempts} attempts: {last}")]
    Exhausted {
        endpoint: Endpoint,
        attempts: u32,
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Returns true for failures worth another attempt after a backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::ServiceUnavailable(_) | Self::Transport(_)
        )
    }

    /// Returns true when the remote is pushing back on request volume
    pub fn is_throttling(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::ServiceUnavailable(_))
    }

    /// Returns true when retrying the same call later cannot help
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Malformed(_) | Self::Other(_))
    }
}

/// One remote call, no retries
#[async_trait]
pub trait Transport: Send + Sync {
    /// Posts `params` to `endpoint` and returns the decoded JSON body
    async fn post(
        &self,
        endpoint: Endpoint,
        params: &[(&'static str, String)],
    ) -> Result<Value, FetchError>;
}

/// Builds an HTTP client carrying the headers the FIPE front-end sends
///
/// # Example
///
/// ```no_run
/// use fipe_harvest::config::ApiConfig;
/// use fipe_harvest::crawler::build_http_client;
///
/// let client = build_http_client(&ApiConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &ApiConfig) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
    );

    if let Ok(referer) = HeaderValue::from_str(&config.referer) {
        headers.insert(REFERER, referer);
    }

    // The API checks Origin against its own site
    let origin = Url::parse(&config.referer)
        .ok()
        .map(|url| url.origin().ascii_serialization());
    if let Some(Ok(origin)) = origin.map(|o| HeaderValue::from_str(&o)) {
        headers.insert(ORIGIN, origin);
    }

    Client::builder()
        .user_agent(config.user_agent.clone())
        .default_headers(headers)
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Production transport over reqwest
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// Creates a transport for the configured API
    ///
    /// # Arguments
    ///
    /// * `config` - Base URL, headers and timeout to use
    ///
    /// # Returns
    ///
    /// * `Ok(HttpTransport)` - Ready to post to `{base_url}/{endpoint}`
    /// * `Err(reqwest::Error)` - The HTTP client could not be built
    pub fn new(config: &ApiConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint_url(&self, endpoint: Endpoint) -> String {
        format!("{}/{}", self.base_url, endpoint.path())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(
        &self,
        endpoint: Endpoint,
        params: &[(&'static str, String)],
    ) -> Result<Value, FetchError> {
        let url = self.endpoint_url(endpoint);

        let response = self
            .client
            .post(&url)
            .form(params)
            .send()
            .await
            .map_err(|e| classify_transport_error(endpoint, e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited(format!("{} returned {}", endpoint, status)));
        }
        if status.is_server_error() {
            return Err(FetchError::ServiceUnavailable(format!(
                "{} returned {}",
                endpoint, status
            )));
        }
        if !status.is_success() {
            return Err(FetchError::Other(format!("{} returned {}", endpoint, status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_transport_error(endpoint, e))?;

        decode_body(endpoint, &body)
    }
}

fn classify_transport_error(endpoint: Endpoint, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Transport(format!("{}: request timeout", endpoint))
    } else if error.is_connect() {
        FetchError::Transport(format!("{}: connection failed", endpoint))
    } else {
        FetchError::Transport(format!("{}: {}", endpoint, error))
    }
}

/// Decodes a response body, rejecting the API's in-band error objects
pub(crate) fn decode_body(endpoint: Endpoint, body: &str) -> Result<Value, FetchError> {
    let value: Value = serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(100).collect();
        FetchError::Malformed(format!("{}: not JSON ({}): {}", endpoint, e, preview))
    })?;

    // Failures come back as 200 with {"codigo": "...", "erro": "..."}
    if let Some(message) = value.get("erro") {
        return Err(FetchError::Malformed(format!(
            "{}: remote error {}",
            endpoint, message
        )));
    }

    Ok(value)
}
