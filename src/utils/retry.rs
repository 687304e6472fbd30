//! Retry utilities: backoff builders and startup connection retry.
//!
//! Uses `backon` for exponential backoff with jitter.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::{error, info, warn};

use crate::bus::BusError;

/// Backoff for broker connection retries at startup.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}

/// Connect to the broker, retrying transient failures with `backoff`.
///
/// Fatal errors (bad credentials, bad configuration) are returned immediately.
pub async fn connect_with_retry<T, F, Fut>(
    service_name: &str,
    backoff: ExponentialBuilder,
    connect: F,
) -> Result<T, BusError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BusError>>,
{
    let result = connect
        .retry(backoff)
        .when(|e: &BusError| !e.is_fatal())
        .notify(|e: &BusError, delay: Duration| {
            warn!(
                service = service_name,
                error = %e,
                retry_in_ms = delay.as_millis() as u64,
                "Connection failed, retrying"
            );
        })
        .await;

    match &result {
        Ok(_) => info!(service = service_name, "Connected"),
        Err(e) => error!(service = service_name, error = %e, fatal = e.is_fatal(), "Giving up connecting"),
    }
    result
}
