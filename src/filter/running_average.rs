//! Running-average RSSI filter
//!
//! Keeps every sample received within the expiration window and reports their
//! arithmetic mean.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::RssiFilter;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Sample {
    rssi: i32,
    at: DateTime<Utc>,
}

/// Time-windowed mean of recent samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningAverageFilter {
    samples: VecDeque<Sample>,
    expiration_ms: i64,
}

impl RunningAverageFilter {
    pub fn new(expiration_ms: i64) -> Self {
        Self {
            samples: VecDeque::new(),
            expiration_ms,
        }
    }

    pub fn expiration(&self) -> Duration {
        Duration::milliseconds(self.expiration_ms)
    }

    /// Drop samples that fell out of the window ending at `now`
    fn evict(&mut self, now: DateTime<Utc>) {
        let window = self.expiration();
        self.samples.retain(|s| now - s.at <= window);
    }

    fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().map(|s| f64::from(s.rssi)).sum();
        Some(sum / self.samples.len() as f64)
    }

    /// Smallest and largest sample still in the window
    pub fn bounds(&self) -> Option<(i32, i32)> {
        let min = self.samples.iter().map(|s| s.rssi).min()?;
        let max = self.samples.iter().map(|s| s.rssi).max()?;
        Some((min, max))
    }
}

impl RssiFilter for RunningAverageFilter {
    fn add_sample(&mut self, rssi: i32, at: DateTime<Utc>) -> f64 {
        self.samples.push_back(Sample { rssi, at });
        self.evict(at);
        self.mean().unwrap_or(f64::from(rssi))
    }

    fn filtered(&self) -> Option<f64> {
        self.mean()
    }

    fn sample_count(&self) -> usize {
        self.samples.len()
    }
}
