//! Distance estimation from smoothed RSSI
//!
//! Uses the curve-fitted path-loss model common to iBeacon-style SDKs.

use serde::{Deserialize, Serialize};

use crate::types::Proximity;

/// Distance reported when no estimate is available
pub const UNKNOWN_DISTANCE: f64 = -1.0;

/// Distance substituted for a non-finite estimate
pub const SENTINEL_DISTANCE: f64 = 999.0;

const IMMEDIATE_LIMIT_M: f64 = 1.0;
const NEAR_LIMIT_M: f64 = 3.0;

/// Coefficients of `coefficient * ratio^exponent + intercept`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanceModel {
    pub coefficient: f64,
    pub exponent: f64,
    pub intercept: f64,
}

impl Default for DistanceModel {
    fn default() -> Self {
        Self {
            coefficient: 0.42093,
            exponent: 6.9476,
            intercept: 0.54992,
        }
    }
}

impl DistanceModel {
    /// Estimated distance in meters.
    ///
    /// Never returns NaN or infinity; those collapse to [`SENTINEL_DISTANCE`].
    pub fn estimate(&self, filtered_rssi: f64, reference_power: i32) -> f64 {
        let ratio = filtered_rssi / f64::from(reference_power);
        let distance = if ratio < 1.0 {
            ratio.powi(10)
        } else {
            self.coefficient * ratio.powf(self.exponent) + self.intercept
        };
        if distance.is_finite() {
            distance
        } else {
            SENTINEL_DISTANCE
        }
    }
}

/// [`DistanceModel::estimate`] with the default coefficients
pub fn estimate(filtered_rssi: f64, reference_power: i32) -> f64 {
    DistanceModel::default().estimate(filtered_rssi, reference_power)
}

/// Coarse proximity class of a distance
pub fn classify(distance: f64) -> Proximity {
    if distance == UNKNOWN_DISTANCE {
        Proximity::Unknown
    } else if !distance.is_finite() {
        Proximity::Far
    } else if distance < IMMEDIATE_LIMIT_M {
        Proximity::Immediate
    } else if distance < NEAR_LIMIT_M {
        Proximity::Near
    } else {
        Proximity::Far
    }
}
