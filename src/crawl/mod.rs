//! Crawl control: per-source pagination and the run orchestrator.

pub mod exists;
pub mod orchestrator;
pub mod pagination;

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::ScrapeError;

pub use exists::{ExistsChecker, StoreExistsChecker};
pub use orchestrator::{Orchestrator, RunSummary};
pub use pagination::{CrawlOutcome, PaginationController, StopReason};

/// Runs `work` unless `cancel` fires first.
pub async fn until_cancelled<T, F>(cancel: &CancellationToken, work: F) -> Result<T, ScrapeError>
where
    F: Future<Output = Result<T, ScrapeError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ScrapeError::Cancelled),
        result = work => result,
    }
}

/// Sleeps for `duration`, returning early with `Cancelled` if the run is stopped.
pub async fn pause(cancel: &CancellationToken, duration: Duration) -> Result<(), ScrapeError> {
    if cancel.is_cancelled() {
        return Err(ScrapeError::Cancelled);
    }
    if duration.is_zero() {
        return Ok(());
    }
    until_cancelled(cancel, async {
        tokio::time::sleep(duration).await;
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_token_wins_over_ready_work() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = until_cancelled(&cancel, async { Ok(1) }).await;
        assert!(matches!(result, Err(ScrapeError::Cancelled)));
    }

    #[tokio::test]
    async fn pause_wakes_on_cancel() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let result = pause(&cancel, Duration::from_secs(3600)).await;
        assert!(matches!(result, Err(ScrapeError::Cancelled)));
    }

    #[tokio::test]
    async fn zero_pause_returns_immediately() {
        assert!(pause(&CancellationToken::new(), Duration::ZERO).await.is_ok());
    }
}
