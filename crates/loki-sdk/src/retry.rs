// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::SdkError;

/// Delay before retry number `attempt + 1`: `base * 2^attempt` plus up to 10%
/// jitter.
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exp_ms = base_ms.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX)) as f64;
    let jitter_ms = rand::random::<f64>() * 0.1 * exp_ms;
    Duration::from_micros(((exp_ms + jitter_ms) * 1000.0) as u64)
}

/// Runs `op` once plus up to `max_retries` more times.
///
/// Non-retryable errors (see [`SdkError::is_retryable`]) are returned straight
/// away. When retries run out the last error is returned.
pub async fn with_retry<T, F, Fut>(
    label: &str,
    max_retries: u32,
    backoff_ms: u64,
    mut op: F,
) -> Result<T, SdkError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SdkError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => {
                debug!("LOKI | {label} failed with non-retryable error: {e}");
                return Err(e);
            }
            Err(e) if attempt >= max_retries => {
                debug!(
                    "LOKI | {label} failed after {} attempts: {e}",
                    attempt + 1
                );
                return Err(e);
            }
            Err(e) => {
                let delay = backoff_delay(backoff_ms, attempt);
                debug!(
                    "LOKI | {label} attempt {} failed: {e}. Retrying in {} ms",
                    attempt + 1,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
