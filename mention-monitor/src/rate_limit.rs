use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const MIN_QPS: f64 = 0.1;

/// Spaces admitted requests at least `1 / qps` seconds apart.
///
/// Callers queue on the lock, so admission is first come, first served.
pub struct RateLimiter {
    min_interval: Duration,
    last_admitted: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(qps: f64) -> Self {
        Self {
            min_interval: Duration::from_secs_f64(1.0 / qps.max(MIN_QPS)),
            last_admitted: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the next request may proceed.
    pub async fn acquire(&self) {
        let mut last_admitted = self.last_admitted.lock().await;
        if let Some(last) = *last_admitted {
            let ready_at = last + self.min_interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last_admitted = Some(Instant::now());
    }
}
