use std::time::{Duration, Instant};

/// Counts events and reports their rate once per interval.
pub struct RateCounter {
    count: u64,
    last_time: Instant,
    interval: Duration,
}

impl RateCounter {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    pub fn starting_at(interval: Duration, now: Instant) -> Self {
        Self {
            count: 0,
            last_time: now,
            interval,
        }
    }

    /// Record `events` that happened since the last call.
    /// Returns the rate per second once the interval has passed.
    pub fn update_at(&mut self, events: u64, now: Instant) -> Option<f32> {
        self.count += events;
        let elapsed = now.saturating_duration_since(self.last_time);

        if elapsed >= self.interval {
            let rate = self.count as f32 / elapsed.as_secs_f32();
            self.count = 0;
            self.last_time = now;
            Some(rate)
        } else {
            None
        }
    }
}

impl Default for RateCounter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
