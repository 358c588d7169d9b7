// src/runtime/timeout.rs
//! Race a future against a deadline

use crate::utils::errors::{Result, UplinkError};
use std::future::Future;
use std::time::Duration;

/// Run `fut` until it completes or `limit` elapses, whichever comes first.
///
/// Returns `None` on timeout; the future is dropped at that point.
pub async fn race_timeout<F: Future>(fut: F, limit: Duration) -> Option<F::Output> {
    tokio::time::timeout(limit, fut).await.ok()
}

/// Like [`race_timeout`] but folds the timeout into the error channel
pub async fn with_timeout<T, F>(fut: F, limit: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match race_timeout(fut, limit).await {
        Some(result) => result,
        None => Err(UplinkError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fast_future_wins() {
        let out = race_timeout(async { 5 }, Duration::from_secs(1)).await;
        assert_eq!(out, Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_future_times_out() {
        let out = with_timeout(
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            },
            Duration::from_millis(500),
        )
        .await;
        assert!(matches!(out, Err(UplinkError::Timeout(d)) if d == Duration::from_millis(500)));
    }
}
