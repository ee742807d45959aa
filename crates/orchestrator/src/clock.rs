#![forbid(unsafe_code)]

use std::time::{Duration, Instant};

/// Time source of the polling loops.
#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default)]
pub struct SystemClock;

#[async_trait::async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A clock whose sleeps only yield to the scheduler.
///
/// Lets poll loops run through their attempts without waiting.
#[derive(Debug, Default)]
pub struct ImmediateClock;

#[async_trait::async_trait]
impl Clock for ImmediateClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, _duration: Duration) {
        tokio::task::yield_now().await;
    }
}
