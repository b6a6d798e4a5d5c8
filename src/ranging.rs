//! Per-region ranging
//!
//! Every cycle, each ranged region gets one snapshot of the beacons that
//! match it, even when none do.

use tracing::info;

use crate::distance::{classify, SENTINEL_DISTANCE, UNKNOWN_DISTANCE};
use crate::events::BeaconEvent;
use crate::types::{Beacon, BeaconSnapshot, Region};

/// Snapshot of a beacon whose distance has already been estimated
pub fn snapshot(beacon: &Beacon) -> BeaconSnapshot {
    let distance = match beacon.distance {
        None => UNKNOWN_DISTANCE,
        Some(d) if d.is_finite() => d,
        Some(_) => SENTINEL_DISTANCE,
    };
    BeaconSnapshot {
        identifiers: beacon.identifiers.clone(),
        rssi: beacon.rssi,
        distance,
        proximity: classify(distance),
    }
}

/// Active ranging registrations
#[derive(Debug, Clone, Default)]
pub struct RangingSessions {
    regions: Vec<Region>,
}

impl RangingSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ranging `region`, replacing any region with the same id.
    /// Returns `true` on replacement.
    pub fn start_ranging(&mut self, region: Region) -> bool {
        let unique_id = region.unique_id.clone();
        if let Some(existing) = self.regions.iter_mut().find(|r| **r == region) {
            *existing = region;
            info!(region = %unique_id, "ranging replaced");
            true
        } else {
            self.regions.push(region);
            info!(region = %unique_id, "ranging started");
            false
        }
    }

    /// Stop ranging; unknown ids are ignored
    pub fn stop_ranging(&mut self, unique_id: &str) -> bool {
        let before = self.regions.len();
        self.regions.retain(|r| r.unique_id != unique_id);
        let removed = self.regions.len() != before;
        if removed {
            info!(region = %unique_id, "ranging stopped");
        }
        removed
    }

    pub fn ranged_regions(&self) -> Vec<Region> {
        self.regions.clone()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// One `BeaconsRanged` event per ranged region, in registration order
    pub fn range_cycle(&self, beacons: &[Beacon]) -> Vec<BeaconEvent> {
        self.regions
            .iter()
            .map(|region| BeaconEvent::BeaconsRanged {
                region: region.clone(),
                beacons: beacons
                    .iter()
                    .filter(|b| region.matches(b))
                    .map(snapshot)
                    .collect(),
            })
            .collect()
    }
}
