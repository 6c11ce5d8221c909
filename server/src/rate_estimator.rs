// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::time::{Duration, Instant};

// Counts events and converts the count into an events-per-second figure once
// per `interval`. The count resets at each report.
#[derive(Debug)]
pub struct RateCounter {
    interval: Duration,
    window_start: Instant,
    count: u64,
    // Most recently reported rate; 0.0 until the first interval elapses.
    rate: f64,
}

impl RateCounter {
    pub fn new(interval: Duration, now: Instant) -> Self {
        RateCounter{interval, window_start: now, count: 0, rate: 0.0}
    }

    pub fn record(&mut self) {
        self.count += 1;
    }

    // Events recorded since the last report.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    // If at least `interval` has elapsed since the window began, computes the
    // rate over the actual elapsed time, resets the count, starts a new window
    // at `now`, and returns the rate.
    pub fn poll(&mut self, now: Instant) -> Option<f64> {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.interval || elapsed.is_zero() {
            return None;
        }
        self.rate = self.count as f64 / elapsed.as_secs_f64();
        self.count = 0;
        self.window_start = now;
        Some(self.rate)
    }
}

// Formats a rate for display with one decimal place.
pub fn format_rate(rate: f64) -> String {
    format!("{:.1}", rate)
}

// mod tests.
