//! Resilient fetch client
//!
//! Wraps a `Transport` with pacing and retries:
//!
//! | Condition | Action |
//! |-----------|--------|
//! | Success | Return payload, decay delay |
//! | Rate limited / 5xx | Grow delay, back off, retry |
//! | Transport error | Back off, retry |
//! | Malformed / other 4xx | Fail immediately |
//! | Attempts exhausted | `FetchError::Exhausted` |

use crate::config::PacingConfig;
use crate::crawler::pacing::Pacer;
use crate::crawler::transport::{Endpoint, FetchError, Transport};
use serde_json::Value;
use tokio::time::sleep;

/// A transport plus the adaptive pacing state for one harvest
pub struct ResilientClient<T> {
    transport: T,
    pacer: Pacer,
    calls: u64,
}

impl<T: Transport> ResilientClient<T> {
    pub fn new(transport: T, pacing: PacingConfig) -> Self {
        Self {
            transport,
            pacer: Pacer::new(pacing),
            calls: 0,
        }
    }

    /// Number of remote requests sent so far, retries included
    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Performs one logical call, retrying transient failures
    ///
    /// # Arguments
    ///
    /// * `endpoint` - The API operation to call
    /// * `params` - Form fields sent with the request
    ///
    /// # Returns
    ///
    /// * `Ok(Value)` - Decoded JSON body of the first successful attempt
    /// * `Err(FetchError::Exhausted)` - Every attempt failed with a retryable error
    /// * `Err(FetchError)` - A permanent failure, returned without retrying
    pub async fn call(
        &mut self,
        endpoint: Endpoint,
        params: &[(&'static str, String)],
    ) -> Result<Value, FetchError> {
        let max_attempts = self.pacer.max_attempts().max(1);
        let mut attempt = 0;

        loop {
            sleep(self.pacer.pause()).await;
            self.calls += 1;
            attempt += 1;

            let error = match self.transport.post(endpoint, params).await {
                Ok(value) => {
                    self.pacer.on_success();
                    return Ok(value);
                }
                Err(error) if error.is_retryable() => error,
                Err(error) => {
                    tracing::debug!("{} failed permanently: {}", endpoint, error);
                    return Err(error);
                }
            };

            if error.is_throttling() {
                self.pacer.on_throttled();
            }

            if attempt >= max_attempts {
                tracing::warn!(
                    "Giving up on {} after {} attempts: {}",
                    endpoint,
                    attempt,
                    error
                );
                return Err(FetchError::Exhausted {
                    endpoint,
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let wait = self.pacer.backoff(attempt - 1);
            tracing::warn!(
                "{} (attempt {}/{}); retrying in {:.1}s, base delay now {:?}",
                error,
                attempt,
                max_attempts,
                wait.as_secs_f64(),
                self.pacer.current_delay()
            );
            sleep(wait).await;
        }
    }
}
