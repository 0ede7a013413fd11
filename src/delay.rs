//! Sleep abstraction so every polling loop can be driven without real time passing

use async_trait::async_trait;
use std::time::Duration;

/// Source of the fixed waits between polls, retries and power transitions
#[async_trait]
pub trait Delay: Send {
    /// Suspend the calling task for `duration`
    async fn sleep(&mut self, duration: Duration);
}

/// Delay backed by the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn sleep(&mut self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
