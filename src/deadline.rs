//! Request-scoped deadlines for storage calls.

use crate::error::TenancyError;
use std::future::Future;
use tokio::time::Instant;

/// Run `fut` until `deadline`. On expiry the future is dropped, which aborts
/// the in-flight storage call, and `Timeout` is returned.
pub async fn run_until<T, F>(deadline: Option<Instant>, fut: F) -> Result<T, TenancyError>
where
    F: Future<Output = Result<T, TenancyError>>,
{
    match deadline {
        Some(at) => match tokio::time::timeout_at(at, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("storage call exceeded request deadline");
                Err(TenancyError::Timeout)
            }
        },
        None => fut.await,
    }
}
