//! Provider call timeout
//!
//! Every provider attempt is bounded so a hung connection cannot hold a
//! request (or a half-open probe slot) indefinitely.

use std::future::Future;
use std::time::Duration;

use crate::types::ProviderError;

/// Execute a provider call with a timeout
///
/// An elapsed timeout becomes a [`ProviderError`] of class `Timeout`, which
/// is retried and counted like any other transient failure.
///
/// # Example
///
/// ```ignore
/// let response = with_timeout(
///     Duration::from_secs(120),
///     provider.complete(&request),
/// ).await?;
/// ```
pub async fn with_timeout<T, F>(timeout: Duration, future: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::timeout(timeout)),
    }
}
