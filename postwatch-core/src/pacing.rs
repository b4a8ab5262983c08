use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

/// Uniform pick from an inclusive millisecond range given in either order.
pub fn jitter(range_ms: (u64, u64)) -> Duration {
    if range_ms.0 == 0 && range_ms.1 == 0 {
        return Duration::ZERO;
    }
    let lower = range_ms.0.min(range_ms.1);
    let upper = range_ms.0.max(range_ms.1);
    Duration::from_millis(rand::thread_rng().gen_range(lower..=upper))
}

/// Sleeps for a jittered delay and returns how long it waited.
pub async fn human_delay(range_ms: (u64, u64)) -> Duration {
    let delay = jitter(range_ms);
    if !delay.is_zero() {
        sleep(delay).await;
    }
    delay
}

/// Paces requests between consecutive crawls.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    range: (u64, u64),
}

impl RateLimiter {
    pub fn new(range: (u64, u64)) -> Self {
        Self { range }
    }

    pub async fn wait(&self) -> u64 {
        human_delay(self.range).await.as_millis() as u64
    }
}
