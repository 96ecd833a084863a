//! Cancellation-aware timeout supervision for suspension points.

use std::future::Future;
use std::time::Duration;

use crate::JobContext;

/// Why a supervised wait ended without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    TimedOut,
    Cancelled,
}

/// Await `fut`, giving up after `timeout` or as soon as the job is cancelled.
///
/// Cancellation wins ties with both completion and timeout, so a cancelled
/// job never makes further progress through a supervised wait.
pub async fn wait_with_timeout<F>(
    ctx: &JobContext,
    fut: F,
    timeout: Duration,
) -> Result<F::Output, WaitError>
where
    F: Future,
{
    if ctx.is_cancelled() {
        return Err(WaitError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(WaitError::Cancelled),
        value = fut => Ok(value),
        _ = tokio::time::sleep(timeout) => Err(WaitError::TimedOut),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_returns_value_before_timeout() {
        let ctx = JobContext::new();
        let got = wait_with_timeout(&ctx, async { 7 }, Duration::from_secs(2)).await;
        assert_eq!(got, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_on_pending_future() {
        let ctx = JobContext::new();
        let got = wait_with_timeout(
            &ctx,
            std::future::pending::<()>(),
            Duration::from_secs(2),
        )
        .await;
        assert_eq!(got, Err(WaitError::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_wait() {
        let ctx = JobContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });
        let got = wait_with_timeout(
            &ctx,
            std::future::pending::<()>(),
            Duration::from_secs(2),
        )
        .await;
        assert_eq!(got, Err(WaitError::Cancelled));
    }
}
