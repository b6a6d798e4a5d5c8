//! ARMA RSSI filter
//!
//! Two exponentially decaying averages: a short horizon that tracks movement
//! and a long horizon that reports the slower trend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RssiFilter;

/// Long horizon decays this many times slower than the short one
pub const LONG_HORIZON_FACTOR: f64 = 4.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmaFilter {
    speed: f64,
    short: Option<f64>,
    long: Option<f64>,
    samples: usize,
}

impl ArmaFilter {
    pub fn new(speed: f64) -> Self {
        Self {
            speed,
            short: None,
            long: None,
            samples: 0,
        }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Slow-moving average, useful for trend display
    pub fn long_average(&self) -> Option<f64> {
        self.long
    }

    fn step(avg: f64, sample: f64, speed: f64) -> f64 {
        avg * (1.0 - speed) + sample * speed
    }
}

impl RssiFilter for ArmaFilter {
    fn add_sample(&mut self, rssi: i32, _at: DateTime<Utc>) -> f64 {
        let sample = f64::from(rssi);
        self.samples += 1;
        let short = match self.short {
            None => sample,
            Some(avg) => Self::step(avg, sample, self.speed),
        };
        self.long = Some(match self.long {
            None => sample,
            Some(avg) => Self::step(avg, sample, self.speed / LONG_HORIZON_FACTOR),
        });
        self.short = Some(short);
        short
    }

    fn filtered(&self) -> Option<f64> {
        self.short
    }

    fn sample_count(&self) -> usize {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_first_sample_passes_through() {
        let mut filter = ArmaFilter::new(0.3);
        assert_eq!(filter.filtered(), None);
        assert_eq!(filter.add_sample(-70, now()), -70.0);
        assert_eq!(filter.long_average(), Some(-70.0));
    }

    #[test]
    fn test_recursive_update() {
        let mut filter = ArmaFilter::new(0.5);
        filter.add_sample(-80, now());
        let out = filter.add_sample(-60, now());
        assert!((out - -70.0).abs() < 1e-9);

        // Long horizon moves at speed / 4
        let long = filter.long_average().unwrap();
        assert!((long - (-80.0 * 0.875 + -60.0 * 0.125)).abs() < 1e-9);
    }

    #[test]
    fn test_long_horizon_lags_short() {
        let mut filter = ArmaFilter::new(0.3);
        filter.add_sample(-90, now());
        for _ in 0..5 {
            filter.add_sample(-50, now());
        }
        let short = filter.filtered().unwrap();
        let long = filter.long_average().unwrap();
        assert!(short > long);
        assert_eq!(filter.sample_count(), 6);
    }

    proptest! {
        #[test]
        fn prop_output_is_convex_step(
            speed in 0.05f64..0.95,
            samples in proptest::collection::vec(-110i32..0, 2..40)
        ) {
            let mut filter = ArmaFilter::new(speed);
            filter.add_sample(samples[0], now());
            for &rssi in &samples[1..] {
                let prev = filter.filtered().unwrap();
                let out = filter.add_sample(rssi, now());
                let x = f64::from(rssi);
                if (prev - x).abs() > f64::EPSILON {
                    prop_assert!(out > prev.min(x) && out < prev.max(x));
                } else {
                    prop_assert!((out - x).abs() < 1e-9);
                }
            }
        }
    }
}
