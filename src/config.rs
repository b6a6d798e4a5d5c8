//! Engine configuration
//!
//! Everything a [`crate::BeaconManager`] needs at construction, loadable from
//! JSON. Missing fields take their defaults.

use serde::{Deserialize, Serialize};

use crate::distance::DistanceModel;
use crate::error::{BeaconError, Result};
use crate::filter::FilterSettings;
use crate::layout::{BeaconLayout, IBEACON_LAYOUT};
use crate::monitor::MonitorSettings;
use crate::scan::ScanPeriods;
use crate::types::EqualityPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Layout specs registered at startup, in match order
    pub layouts: Vec<String>,
    pub filter: FilterSettings,
    pub monitor: MonitorSettings,
    pub scan_periods: ScanPeriods,
    pub hardware_equality_enforced: bool,
    pub distance_model: DistanceModel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            layouts: vec![IBEACON_LAYOUT.to_string()],
            filter: FilterSettings::default(),
            monitor: MonitorSettings::default(),
            scan_periods: ScanPeriods::default(),
            hardware_equality_enforced: true,
            distance_model: DistanceModel::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn equality_policy(&self) -> EqualityPolicy {
        EqualityPolicy::from_hardware_equality_enforced(self.hardware_equality_enforced)
    }

    /// Check every section; layouts must parse
    pub fn validate(&self) -> Result<()> {
        for spec in &self.layouts {
            BeaconLayout::parse(spec)?;
        }
        self.filter.validate()?;
        self.monitor.validate()?;

        self.scan_periods.validate()?;

        let model = &self.distance_model;
        if ![model.coefficient, model.exponent, model.intercept]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(BeaconError::InvalidConfig(
                "distance model coefficients must be finite".to_string(),
            ));
        }
        Ok(())
    }
}
