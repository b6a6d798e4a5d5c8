//! RSSI smoothing
//!
//! Each beacon identity gets its own filter instance. The strategy is chosen
//! once per registry through [`FilterSettings`]; changing it discards every
//! existing filter state.

pub mod arma;
pub mod running_average;

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BeaconError, Result};
use crate::types::BeaconKey;

pub use arma::ArmaFilter;
pub use running_average::RunningAverageFilter;

/// Default running-average window (milliseconds)
pub const DEFAULT_SAMPLE_EXPIRATION_MS: i64 = 20_000;

/// Default ARMA smoothing speed
pub const DEFAULT_ARMA_SPEED: f64 = 0.3;

/// Entries idle for this many windows are evicted
const STALE_WINDOW_MULTIPLIER: i32 = 2;

/// Common behavior of the smoothing strategies
pub trait RssiFilter {
    /// Feed one sample and return the smoothed value
    fn add_sample(&mut self, rssi: i32, at: DateTime<Utc>) -> f64;

    /// Current smoothed value, `None` before the first sample
    fn filtered(&self) -> Option<f64>;

    fn sample_count(&self) -> usize;
}

/// Smoothing strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RssiFilterKind {
    #[default]
    RunningAverage,
    Arma,
}

impl RssiFilterKind {
    /// Numeric code exposed to the application layer
    pub fn code(&self) -> i32 {
        match self {
            Self::RunningAverage => 0,
            Self::Arma => 1,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(Self::RunningAverage),
            1 => Ok(Self::Arma),
            other => Err(BeaconError::InvalidConfig(format!(
                "unknown RSSI filter code {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunningAverage => "running_average",
            Self::Arma => "arma",
        }
    }
}

/// Strategy and tuning applied to every filter in a registry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub kind: RssiFilterKind,
    /// Running-average window (milliseconds)
    pub sample_expiration_ms: i64,
    /// ARMA smoothing speed in (0, 1)
    pub arma_speed: f64,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            kind: RssiFilterKind::RunningAverage,
            sample_expiration_ms: DEFAULT_SAMPLE_EXPIRATION_MS,
            arma_speed: DEFAULT_ARMA_SPEED,
        }
    }
}

impl FilterSettings {
    /// Settings for `kind` with one tuning parameter.
    ///
    /// The parameter is the window in milliseconds for the running average
    /// and the speed for ARMA. Values `<= 0` keep the defaults.
    pub fn with_tuning(kind: RssiFilterKind, tuning_param: f64) -> Result<Self> {
        let mut settings = Self {
            kind,
            ..Self::default()
        };
        if tuning_param > 0.0 {
            match kind {
                RssiFilterKind::RunningAverage => {
                    settings.sample_expiration_ms = tuning_param.round() as i64;
                }
                RssiFilterKind::Arma => settings.arma_speed = tuning_param,
            }
        }
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_expiration_ms <= 0 {
            return Err(BeaconError::InvalidConfig(format!(
                "sample expiration must be positive, got {}ms",
                self.sample_expiration_ms
            )));
        }
        if !(self.arma_speed > 0.0 && self.arma_speed < 1.0) {
            return Err(BeaconError::InvalidConfig(format!(
                "ARMA speed must be in (0, 1), got {}",
                self.arma_speed
            )));
        }
        Ok(())
    }

    pub fn sample_expiration(&self) -> Duration {
        Duration::milliseconds(self.sample_expiration_ms)
    }

    /// Idle time after which a beacon's filter state is dropped
    pub fn stale_after(&self) -> Duration {
        self.sample_expiration() * STALE_WINDOW_MULTIPLIER
    }

    fn build(&self) -> FilterState {
        match self.kind {
            RssiFilterKind::RunningAverage => {
                FilterState::RunningAverage(RunningAverageFilter::new(self.sample_expiration_ms))
            }
            RssiFilterKind::Arma => FilterState::Arma(ArmaFilter::new(self.arma_speed)),
        }
    }
}

/// Per-beacon filter, one variant per strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterState {
    RunningAverage(RunningAverageFilter),
    Arma(ArmaFilter),
}

impl RssiFilter for FilterState {
    fn add_sample(&mut self, rssi: i32, at: DateTime<Utc>) -> f64 {
        match self {
            Self::RunningAverage(f) => f.add_sample(rssi, at),
            Self::Arma(f) => f.add_sample(rssi, at),
        }
    }

    fn filtered(&self) -> Option<f64> {
        match self {
            Self::RunningAverage(f) => f.filtered(),
            Self::Arma(f) => f.filtered(),
        }
    }

    fn sample_count(&self) -> usize {
        match self {
            Self::RunningAverage(f) => f.sample_count(),
            Self::Arma(f) => f.sample_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FilterEntry {
    key: BeaconKey,
    filter: FilterState,
    last_sample_at: DateTime<Utc>,
}

/// Persisted form of a registry
#[derive(Serialize, Deserialize)]
struct FilterSnapshot {
    settings: FilterSettings,
    entries: Vec<FilterEntry>,
}

/// Filter state for every beacon identity seen recently
#[derive(Debug, Clone, Default)]
pub struct FilterRegistry {
    settings: FilterSettings,
    entries: HashMap<BeaconKey, FilterEntry>,
}

impl FilterRegistry {
    pub fn new(settings: FilterSettings) -> Self {
        Self {
            settings,
            entries: HashMap::new(),
        }
    }

    pub fn settings(&self) -> FilterSettings {
        self.settings
    }

    /// Replace the strategy; all existing state is discarded
    pub fn set_settings(&mut self, settings: FilterSettings) -> Result<()> {
        settings.validate()?;
        debug!(
            kind = settings.kind.as_str(),
            dropped = self.entries.len(),
            "RSSI filter reset"
        );
        self.settings = settings;
        self.entries.clear();
        Ok(())
    }

    /// Feed a sample for `key` and return its smoothed RSSI
    pub fn add_sample(&mut self, key: &BeaconKey, rssi: i32, at: DateTime<Utc>) -> f64 {
        let settings = self.settings;
        let entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| FilterEntry {
                key: key.clone(),
                filter: settings.build(),
                last_sample_at: at,
            });
        if at > entry.last_sample_at {
            entry.last_sample_at = at;
        }
        entry.filter.add_sample(rssi, at)
    }

    pub fn filtered(&self, key: &BeaconKey) -> Option<f64> {
        self.entries.get(key).and_then(|e| e.filter.filtered())
    }

    /// Drop identities with no sample for more than twice the window.
    /// Returns how many were removed.
    pub fn evict_stale(&mut self, now: DateTime<Utc>) -> usize {
        let stale_after = self.settings.stale_after();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now - entry.last_sample_at <= stale_after);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: FilterSnapshot = serde_json::from_str(json)?;
        snapshot.settings.validate()?;
        let entries = snapshot
            .entries
            .into_iter()
            .map(|e| (e.key.clone(), e))
            .collect();
        Ok(Self {
            settings: snapshot.settings,
            entries,
        })
    }

    /// Save to JSON
    pub fn to_json(&self) -> Result<String> {
        let mut entries: Vec<FilterEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.last_sample_at.cmp(&b.last_sample_at));
        let snapshot = FilterSnapshot {
            settings: self.settings,
            entries,
        };
        Ok(serde_json::to_string(&snapshot)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Identifier;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn key(minor: u16) -> BeaconKey {
        BeaconKey {
            identifiers: vec![Identifier::Int(1), Identifier::Int(minor)],
            hardware_address: None,
        }
    }

    #[test]
    fn test_filter_codes() {
        assert_eq!(RssiFilterKind::RunningAverage.code(), 0);
        assert_eq!(RssiFilterKind::Arma.code(), 1);
        assert_eq!(RssiFilterKind::from_code(1).unwrap(), RssiFilterKind::Arma);
        assert!(RssiFilterKind::from_code(7).is_err());
    }

    #[test]
    fn test_non_positive_tuning_keeps_defaults() {
        let ra = FilterSettings::with_tuning(RssiFilterKind::RunningAverage, 0.0).unwrap();
        assert_eq!(ra.sample_expiration_ms, DEFAULT_SAMPLE_EXPIRATION_MS);

        let arma = FilterSettings::with_tuning(RssiFilterKind::Arma, -3.0).unwrap();
        assert_eq!(arma.kind, RssiFilterKind::Arma);
        assert_eq!(arma.arma_speed, DEFAULT_ARMA_SPEED);
    }

    #[test]
    fn test_tuning_param_applies() {
        let ra = FilterSettings::with_tuning(RssiFilterKind::RunningAverage, 5000.0).unwrap();
        assert_eq!(ra.sample_expiration_ms, 5000);

        let arma = FilterSettings::with_tuning(RssiFilterKind::Arma, 0.1).unwrap();
        assert_eq!(arma.arma_speed, 0.1);
    }

    #[test]
    fn test_arma_speed_out_of_range() {
        let err = FilterSettings::with_tuning(RssiFilterKind::Arma, 1.5).unwrap_err();
        assert_eq!(err.error_code(), "ERROR_INVALID_CONFIG");
        assert!(FilterSettings::with_tuning(RssiFilterKind::Arma, 1.0).is_err());
        assert!(FilterSettings::with_tuning(RssiFilterKind::Arma, 0.99).is_ok());
    }

    #[test]
    fn test_state_is_not_shared_between_identities() {
        let mut registry = FilterRegistry::default();
        registry.add_sample(&key(1), -50, t(0));
        registry.add_sample(&key(2), -90, t(0));
        assert_eq!(registry.filtered(&key(1)), Some(-50.0));
        assert_eq!(registry.filtered(&key(2)), Some(-90.0));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_hardware_address_separates_state() {
        let mut registry = FilterRegistry::default();
        let mut a = key(1);
        a.hardware_address = Some("AA:BB:CC:DD:EE:01".to_string());
        let mut b = key(1);
        b.hardware_address = Some("AA:BB:CC:DD:EE:02".to_string());
        registry.add_sample(&a, -40, t(0));
        registry.add_sample(&b, -80, t(0));
        assert_eq!(registry.filtered(&a), Some(-40.0));
        assert_eq!(registry.filtered(&b), Some(-80.0));
    }

    #[test]
    fn test_stale_entries_evicted() {
        let mut registry = FilterRegistry::default();
        registry.add_sample(&key(1), -60, t(0));
        registry.add_sample(&key(2), -60, t(30));

        // 40s window boundary: key(1) idle 41s, key(2) idle 11s
        assert_eq!(registry.evict_stale(t(41)), 1);
        assert_eq!(registry.filtered(&key(1)), None);
        assert!(registry.filtered(&key(2)).is_some());
    }

    #[test]
    fn test_switching_strategy_resets_state() {
        let mut registry = FilterRegistry::default();
        registry.add_sample(&key(1), -60, t(0));
        let arma = FilterSettings::with_tuning(RssiFilterKind::Arma, 0.5).unwrap();
        registry.set_settings(arma).unwrap();
        assert!(registry.is_empty());

        registry.add_sample(&key(1), -80, t(1));
        let out = registry.add_sample(&key(1), -60, t(2));
        assert!((out - -70.0).abs() < 1e-9);
    }

    #[test]
    fn test_independent_registries_with_different_strategies() {
        let mut ra = FilterRegistry::default();
        let mut arma = FilterRegistry::new(
            FilterSettings::with_tuning(RssiFilterKind::Arma, 0.5).unwrap(),
        );
        for (i, rssi) in [-80, -60].into_iter().enumerate() {
            ra.add_sample(&key(1), rssi, t(i as i64));
            arma.add_sample(&key(1), rssi, t(i as i64));
        }
        assert_eq!(ra.filtered(&key(1)), Some(-70.0));
        assert_eq!(arma.filtered(&key(1)), Some(-70.0));

        ra.add_sample(&key(1), -60, t(2));
        arma.add_sample(&key(1), -60, t(2));
        assert!((ra.filtered(&key(1)).unwrap() - -66.666_666).abs() < 1e-3);
        assert_eq!(arma.filtered(&key(1)), Some(-65.0));
    }

    #[test]
    fn test_persistence_roundtrip() {
        let mut registry = FilterRegistry::new(
            FilterSettings::with_tuning(RssiFilterKind::RunningAverage, 10_000.0).unwrap(),
        );
        registry.add_sample(&key(1), -70, t(0));
        registry.add_sample(&key(1), -72, t(1));

        let json = registry.to_json().unwrap();
        let mut loaded = FilterRegistry::from_json(&json).unwrap();
        assert_eq!(loaded.settings(), registry.settings());
        assert_eq!(loaded.filtered(&key(1)), Some(-71.0));

        // Restored history keeps smoothing
        assert_eq!(loaded.add_sample(&key(1), -74, t(2)), -72.0);
    }

    #[test]
    fn test_from_json_rejects_invalid_settings() {
        let json = r#"{"settings":{"kind":"arma","sample_expiration_ms":20000,"arma_speed":0.0},"entries":[]}"#;
        assert!(FilterRegistry::from_json(json).is_err());
    }
}
