//! Boundary with the BLE scan provider
//!
//! Radio scanning, advertising and process keep-alive live outside the
//! engine. This module holds the values the engine hands across that
//! boundary and the [`ScanProvider`] trait the host implements.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BeaconError, Result};
use crate::filter::RssiFilterKind;

/// Scan cadence in milliseconds; passed through to the provider untouched
/// once validated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanPeriods {
    pub foreground_scan_ms: i64,
    pub foreground_between_scan_ms: i64,
    pub background_scan_ms: i64,
    pub background_between_scan_ms: i64,
}

impl Default for ScanPeriods {
    fn default() -> Self {
        Self {
            foreground_scan_ms: 1_100,
            foreground_between_scan_ms: 0,
            background_scan_ms: 10_000,
            background_between_scan_ms: 300_000,
        }
    }
}

impl ScanPeriods {
    /// Every period must be non-negative
    pub fn validate(&self) -> Result<()> {
        let periods = [
            ("foreground_scan_ms", self.foreground_scan_ms),
            ("foreground_between_scan_ms", self.foreground_between_scan_ms),
            ("background_scan_ms", self.background_scan_ms),
            ("background_between_scan_ms", self.background_between_scan_ms),
        ];
        match periods.iter().find(|(_, v)| *v < 0) {
            Some((name, value)) => Err(BeaconError::InvalidConfig(format!(
                "{name} must not be negative, got {value}"
            ))),
            None => Ok(()),
        }
    }
}

/// Whether the platform can advertise as a beacon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransmissionSupport {
    Supported,
    NotSupportedMinSdk,
    NotSupportedBle,
    NotSupportedCannotGetAdvertiserMultipleAdvertisements,
    NotSupportedCannotGetAdvertiser,
}

impl TransmissionSupport {
    pub const ALL: [TransmissionSupport; 5] = [
        Self::Supported,
        Self::NotSupportedMinSdk,
        Self::NotSupportedBle,
        Self::NotSupportedCannotGetAdvertiserMultipleAdvertisements,
        Self::NotSupportedCannotGetAdvertiser,
    ];

    pub fn code(&self) -> i32 {
        match self {
            Self::Supported => 0,
            Self::NotSupportedMinSdk => 1,
            Self::NotSupportedBle => 2,
            Self::NotSupportedCannotGetAdvertiserMultipleAdvertisements => 3,
            Self::NotSupportedCannotGetAdvertiser => 4,
        }
    }

    pub fn constant_name(&self) -> &'static str {
        match self {
            Self::Supported => "SUPPORTED",
            Self::NotSupportedMinSdk => "NOT_SUPPORTED_MIN_SDK",
            Self::NotSupportedBle => "NOT_SUPPORTED_BLE",
            Self::NotSupportedCannotGetAdvertiserMultipleAdvertisements => {
                "NOT_SUPPORTED_CANNOT_GET_ADVERTISER_MULTIPLE_ADVERTISEMENTS"
            }
            Self::NotSupportedCannotGetAdvertiser => "NOT_SUPPORTED_CANNOT_GET_ADVERTISER",
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Supported)
    }

    /// Turn a negative status into an `UnsupportedCapability` error
    pub fn ensure_supported(&self) -> Result<()> {
        if self.is_supported() {
            Ok(())
        } else {
            Err(BeaconError::UnsupportedCapability(
                self.constant_name().to_string(),
            ))
        }
    }
}

/// Constants exposed to the application layer
pub fn constants() -> BTreeMap<&'static str, i32> {
    let mut map: BTreeMap<&'static str, i32> = TransmissionSupport::ALL
        .iter()
        .map(|s| (s.constant_name(), s.code()))
        .collect();
    map.insert("RUNNING_AVG_RSSI_FILTER", RssiFilterKind::RunningAverage.code());
    map.insert("ARMA_RSSI_FILTER", RssiFilterKind::Arma.code());
    map
}

/// Notification settings for foreground-service scanning
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForegroundServiceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ForegroundServiceConfig {
    /// Check required fields; `channel_id` only when the host uses channels
    pub fn validate(&self, requires_channel: bool) -> Result<()> {
        fn present(value: &Option<String>) -> bool {
            value.as_deref().is_some_and(|s| !s.trim().is_empty())
        }

        if requires_channel && !present(&self.channel_id) {
            return Err(BeaconError::InvalidConfig("channelId is required".to_string()));
        }
        if self.id.is_none() {
            return Err(BeaconError::InvalidConfig("id is required".to_string()));
        }
        for (name, value) in [("icon", &self.icon), ("title", &self.title), ("text", &self.text)] {
            if !present(value) {
                return Err(BeaconError::InvalidConfig(format!("{name} is required")));
            }
        }
        Ok(())
    }
}

/// Opaque handle for an active keep-alive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForegroundServiceToken {
    pub token: Uuid,
    pub notification_id: i64,
}

impl ForegroundServiceToken {
    pub fn new(notification_id: i64) -> Self {
        Self {
            token: Uuid::new_v4(),
            notification_id,
        }
    }
}

/// Host-side scanning service
pub trait ScanProvider: Send + Sync {
    fn transmission_support(&self) -> TransmissionSupport;

    fn apply_scan_periods(&self, periods: &ScanPeriods) -> Result<()>;

    /// Keep the host process alive while scanning
    fn keep_alive(
        &self,
        token: &ForegroundServiceToken,
        config: &ForegroundServiceConfig,
    ) -> Result<()>;

    fn release_keep_alive(&self, token: &ForegroundServiceToken) -> Result<()>;

    /// Whether notifications need a channel id on this host
    fn requires_notification_channel(&self) -> bool {
        true
    }
}

/// Provider for hosts without a radio (replay, tests, FFI without a host
/// callback). Records what it is asked to do.
#[derive(Debug)]
pub struct HeadlessScanProvider {
    support: TransmissionSupport,
    periods: Mutex<Option<ScanPeriods>>,
    keep_alive: Mutex<Option<ForegroundServiceToken>>,
}

impl Default for HeadlessScanProvider {
    fn default() -> Self {
        Self::new(TransmissionSupport::NotSupportedBle)
    }
}

impl HeadlessScanProvider {
    pub fn new(support: TransmissionSupport) -> Self {
        Self {
            support,
            periods: Mutex::new(None),
            keep_alive: Mutex::new(None),
        }
    }

    pub fn applied_periods(&self) -> Option<ScanPeriods> {
        *self.periods.lock()
    }

    pub fn active_keep_alive(&self) -> Option<ForegroundServiceToken> {
        self.keep_alive.lock().clone()
    }
}

impl ScanProvider for HeadlessScanProvider {
    fn transmission_support(&self) -> TransmissionSupport {
        self.support
    }

    fn apply_scan_periods(&self, periods: &ScanPeriods) -> Result<()> {
        *self.periods.lock() = Some(*periods);
        Ok(())
    }

    fn keep_alive(
        &self,
        token: &ForegroundServiceToken,
        _config: &ForegroundServiceConfig,
    ) -> Result<()> {
        *self.keep_alive.lock() = Some(token.clone());
        Ok(())
    }

    fn release_keep_alive(&self, token: &ForegroundServiceToken) -> Result<()> {
        let mut active = self.keep_alive.lock();
        if active.as_ref() == Some(token) {
            *active = None;
        }
        Ok(())
    }

    fn requires_notification_channel(&self) -> bool {
        false
    }
}
