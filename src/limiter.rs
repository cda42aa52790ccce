use crate::telemetry::Sample;
use std::time::Duration;
use tokio::time::Instant;

/// Throttles forwarded samples to at most one per interval. Excess samples
/// are dropped, never queued, so a fast publisher cannot build up lag.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_admitted: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_admitted: None,
        }
    }

    pub fn admit(&mut self, sample: Sample) -> Option<Sample> {
        let now = Instant::now();
        if let Some(last) = self.last_admitted {
            if now.duration_since(last) < self.min_interval {
                return None;
            }
        }
        self.last_admitted = Some(now);
        Some(sample)
    }
}
