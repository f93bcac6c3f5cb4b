//! Publish-rate pacing against absolute deadlines, so a slow send does not
//! permanently shift the schedule.

use std::time::Duration;
use tokio::time::Instant;

pub struct RateController {
    interval: Duration,
    next_deadline: Instant,
}

impl RateController {
    /// Pace at `rate` messages per second. Rates at or below zero are clamped
    /// to one per second; callers should skip pacing entirely for max speed.
    pub fn new(rate: f64) -> Self {
        let rate = if rate > 0.0 { rate } else { 1.0 };
        let interval = Duration::from_secs_f64(1.0 / rate);
        Self {
            interval,
            next_deadline: Instant::now() + interval,
        }
    }

    /// Wait until the next scheduled send slot.
    pub async fn wait_for_next(&mut self) {
        tokio::time::sleep_until(self.next_deadline).await;
        self.next_deadline += self.interval;
        // If sends fell far behind, re-anchor instead of bursting to catch up.
        let now = Instant::now();
        if self.next_deadline + self.interval * 10 < now {
            self.next_deadline = now + self.interval;
        }
    }
}
