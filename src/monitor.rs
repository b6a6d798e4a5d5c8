//! Region monitoring state machine
//!
//! Each monitored region moves between UNKNOWN, OUTSIDE and INSIDE as scan
//! cycles report matching beacons. Once determined, a region never returns
//! to UNKNOWN for the life of its registration.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BeaconError, Result};
use crate::events::BeaconEvent;
use crate::types::{Beacon, Region, RegionState};

/// Monitoring thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Consecutive cycles without a match before a region is OUTSIDE
    pub exit_after_missed_cycles: u32,
    /// Also emit `StateDetermined` alongside enter/exit transitions
    pub notify_state_on_transition: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            exit_after_missed_cycles: 1,
            notify_state_on_transition: false,
        }
    }
}

impl MonitorSettings {
    pub fn validate(&self) -> Result<()> {
        if self.exit_after_missed_cycles == 0 {
            return Err(BeaconError::InvalidConfig(
                "exit_after_missed_cycles must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Membership {
    region: Region,
    state: RegionState,
    missed_cycles: u32,
    matched_last_cycle: bool,
}

impl Membership {
    fn new(region: Region) -> Self {
        Self {
            region,
            state: RegionState::Unknown,
            missed_cycles: 0,
            matched_last_cycle: false,
        }
    }
}

/// Membership of every monitored region
#[derive(Debug, Clone, Default)]
pub struct RegionStateTracker {
    settings: MonitorSettings,
    memberships: Vec<Membership>,
}

impl RegionStateTracker {
    pub fn new(settings: MonitorSettings) -> Self {
        Self {
            settings,
            memberships: Vec::new(),
        }
    }

    pub fn settings(&self) -> MonitorSettings {
        self.settings
    }

    pub fn set_settings(&mut self, settings: MonitorSettings) -> Result<()> {
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }

    /// Register a region. A region with the same `unique_id` is replaced
    /// and its membership starts over. Returns `true` on replacement.
    pub fn start_monitoring(&mut self, region: Region) -> bool {
        let unique_id = region.unique_id.clone();
        match self.position(&unique_id) {
            Some(idx) => {
                self.memberships[idx] = Membership::new(region);
                info!(region = %unique_id, "monitoring replaced");
                true
            }
            None => {
                self.memberships.push(Membership::new(region));
                info!(region = %unique_id, "monitoring started");
                false
            }
        }
    }

    /// Deregister a region; unknown ids are ignored
    pub fn stop_monitoring(&mut self, unique_id: &str) -> bool {
        match self.position(unique_id) {
            Some(idx) => {
                self.memberships.remove(idx);
                info!(region = %unique_id, "monitoring stopped");
                true
            }
            None => false,
        }
    }

    pub fn monitored_regions(&self) -> Vec<Region> {
        self.memberships.iter().map(|m| m.region.clone()).collect()
    }

    pub fn state_of(&self, unique_id: &str) -> Option<RegionState> {
        self.position(unique_id).map(|idx| self.memberships[idx].state)
    }

    pub fn len(&self) -> usize {
        self.memberships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memberships.is_empty()
    }

    /// Run one scan cycle over every monitored region
    pub fn evaluate_cycle(&mut self, beacons: &[Beacon]) -> Vec<BeaconEvent> {
        let settings = self.settings;
        let mut events = Vec::new();
        for membership in &mut self.memberships {
            Self::evaluate_membership(settings, membership, beacons, &mut events);
        }
        events
    }

    /// Run one scan cycle for a single region
    pub fn evaluate(&mut self, unique_id: &str, beacons: &[Beacon]) -> Vec<BeaconEvent> {
        let settings = self.settings;
        let mut events = Vec::new();
        if let Some(idx) = self.position(unique_id) {
            Self::evaluate_membership(settings, &mut self.memberships[idx], beacons, &mut events);
        }
        events
    }

    /// Report the current state of a region.
    ///
    /// A match in the most recent cycle promotes the region to INSIDE; a
    /// request never counts as a missed cycle. Unregistered ids report
    /// UNKNOWN without registering anything.
    pub fn request_state(&mut self, unique_id: &str) -> Vec<BeaconEvent> {
        let Some(idx) = self.position(unique_id) else {
            return vec![BeaconEvent::StateDetermined {
                region: Region::wildcard(unique_id),
                state: RegionState::Unknown,
            }];
        };

        let mut events = Vec::new();
        let membership = &mut self.memberships[idx];
        if membership.matched_last_cycle && membership.state != RegionState::Inside {
            membership.state = RegionState::Inside;
            events.push(BeaconEvent::RegionEntered {
                region: membership.region.clone(),
            });
        }
        events.push(BeaconEvent::StateDetermined {
            region: membership.region.clone(),
            state: membership.state,
        });
        events
    }

    fn position(&self, unique_id: &str) -> Option<usize> {
        self.memberships
            .iter()
            .position(|m| m.region.unique_id == unique_id)
    }

    fn evaluate_membership(
        settings: MonitorSettings,
        membership: &mut Membership,
        beacons: &[Beacon],
        events: &mut Vec<BeaconEvent>,
    ) {
        let matched = beacons.iter().any(|b| membership.region.matches(b));
        membership.matched_last_cycle = matched;

        if matched {
            membership.missed_cycles = 0;
            if membership.state != RegionState::Inside {
                debug!(region = %membership.region.unique_id, from = membership.state.as_str(), "region entered");
                membership.state = RegionState::Inside;
                events.push(BeaconEvent::RegionEntered {
                    region: membership.region.clone(),
                });
                if settings.notify_state_on_transition {
                    events.push(BeaconEvent::StateDetermined {
                        region: membership.region.clone(),
                        state: RegionState::Inside,
                    });
                }
            }
            return;
        }

        membership.missed_cycles = membership.missed_cycles.saturating_add(1);
        if membership.missed_cycles < settings.exit_after_missed_cycles
            || membership.state == RegionState::Outside
        {
            return;
        }

        let previous = membership.state;
        membership.state = RegionState::Outside;
        debug!(region = %membership.region.unique_id, from = previous.as_str(), "region outside");
        if previous == RegionState::Inside {
            events.push(BeaconEvent::RegionExited {
                region: membership.region.clone(),
            });
            if !settings.notify_state_on_transition {
                return;
            }
        }
        events.push(BeaconEvent::StateDetermined {
            region: membership.region.clone(),
            state: RegionState::Outside,
        });
    }
}
