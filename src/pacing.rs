//! Delays and cancellation.
//!
//! Every wait in the pipeline (retry backoff, inter-batch spacing) goes
//! through a [`Pacer`], and every wait races the run's
//! [`CancellationToken`]. Production code uses [`TokioPacer`]; unit tests
//! swap in a pacer that only records what it was asked to wait.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, PipelineResult};

#[async_trait]
pub trait Pacer: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Real wall-clock sleeps on the tokio timer.
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Fail fast if the run has been cancelled.
pub fn ensure_live(cancel: &CancellationToken) -> PipelineResult<()> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

/// Wait `delay` through `pacer` unless `cancel` fires first.
pub async fn pause(
    pacer: &dyn Pacer,
    delay: Duration,
    cancel: &CancellationToken,
) -> PipelineResult<()> {
    ensure_live(cancel)?;
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        _ = pacer.sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingPacer;

    #[tokio::test]
    async fn test_recording_pacer_collects_delays() {
        let pacer = RecordingPacer::new();
        let cancel = CancellationToken::new();
        pause(&pacer, Duration::from_secs(2), &cancel).await.unwrap();
        pause(&pacer, Duration::ZERO, &cancel).await.unwrap();
        pause(&pacer, Duration::from_secs(3), &cancel).await.unwrap();
        assert_eq!(pacer.delays(), vec![Duration::from_secs(2), Duration::from_secs(3)]);
        assert_eq!(pacer.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let pacer = RecordingPacer::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res = pause(&pacer, Duration::from_secs(1), &cancel).await;
        assert!(matches!(res, Err(PipelineError::Cancelled)));
        assert!(pacer.delays().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_real_sleep() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let res = pause(&TokioPacer, Duration::from_secs(3600), &cancel).await;
        assert!(matches!(res, Err(PipelineError::Cancelled)));
    }
}
