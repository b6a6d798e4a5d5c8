//! Beacon manager
//!
//! This module provides the public API of the engine. It owns every registry
//! and runs the per-cycle pipeline: raw frames → layouts → RSSI filters →
//! distance → monitoring and ranging → events.
//!
//! Configuration calls may arrive on a different thread than the one
//! delivering scan cycles. Each registry sits behind its own lock, and no two
//! locks are ever held at the same time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::distance::DistanceModel;
use crate::error::Result;
use crate::events::{BeaconEvent, EventSink};
use crate::filter::{FilterRegistry, FilterSettings, RssiFilterKind};
use crate::layout::{apply_layouts, LayoutRegistry};
use crate::monitor::RegionStateTracker;
use crate::ranging::RangingSessions;
use crate::scan::{
    constants, ForegroundServiceConfig, ForegroundServiceToken, HeadlessScanProvider,
    ScanPeriods, ScanProvider, TransmissionSupport,
};
use crate::types::{Beacon, BeaconKey, EqualityPolicy, RawFrame, Region};

/// Outcome of one scan cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub frames_received: usize,
    /// Frames no layout could decode
    pub frames_dropped: usize,
    /// Distinct beacons after identity de-duplication, distance filled in
    pub beacons: Vec<Beacon>,
    pub events_emitted: usize,
}

/// Region monitoring and ranging engine
pub struct BeaconManager {
    layouts: RwLock<LayoutRegistry>,
    filters: Mutex<FilterRegistry>,
    monitor: Mutex<RegionStateTracker>,
    ranging: Mutex<RangingSessions>,
    policy: RwLock<EqualityPolicy>,
    scan_periods: Mutex<ScanPeriods>,
    foreground: Mutex<Option<ForegroundServiceToken>>,
    distance_model: DistanceModel,
    provider: Arc<dyn ScanProvider>,
    sink: Arc<dyn EventSink>,
}

impl BeaconManager {
    /// Manager with the default configuration and a headless provider.
    ///
    /// Events arrive on the returned receiver, starting with
    /// `beaconServiceConnected`.
    pub fn new() -> Result<(Self, UnboundedReceiver<BeaconEvent>)> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Result<(Self, UnboundedReceiver<BeaconEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Self::with_parts(
            config,
            Arc::new(HeadlessScanProvider::default()),
            Arc::new(tx),
        )?;
        Ok((manager, rx))
    }

    /// Manager wired to a host scan provider and event sink
    pub fn with_parts(
        config: EngineConfig,
        provider: Arc<dyn ScanProvider>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;

        let mut layouts = LayoutRegistry::new();
        layouts.register_all(&config.layouts)?;
        let mut monitor = RegionStateTracker::default();
        monitor.set_settings(config.monitor)?;
        provider.apply_scan_periods(&config.scan_periods)?;

        let manager = Self {
            layouts: RwLock::new(layouts),
            filters: Mutex::new(FilterRegistry::new(config.filter)),
            monitor: Mutex::new(monitor),
            ranging: Mutex::new(RangingSessions::new()),
            policy: RwLock::new(config.equality_policy()),
            scan_periods: Mutex::new(config.scan_periods),
            foreground: Mutex::new(None),
            distance_model: config.distance_model,
            provider,
            sink,
        };
        info!(
            layouts = config.layouts.len(),
            filter = config.filter.kind.as_str(),
            "beacon engine started"
        );
        manager.sink.emit(BeaconEvent::ServiceConnected);
        Ok(manager)
    }

    // ------------------------------------------------------------------
    // Scan cycle
    // ------------------------------------------------------------------

    /// Process every frame delivered in one scan cycle.
    ///
    /// Frames that match no layout are dropped. Each beacon identity is
    /// reported once per cycle; every frame still feeds its RSSI filter.
    pub fn process_cycle(&self, frames: &[RawFrame], observed_at: DateTime<Utc>) -> CycleReport {
        let layouts = self.layouts.read().snapshot();
        let policy = *self.policy.read();

        let mut report = CycleReport {
            frames_received: frames.len(),
            ..CycleReport::default()
        };

        // Decode and collapse duplicates, keeping first-seen order
        let mut decoded: Vec<(BeaconKey, Beacon)> = Vec::new();
        let mut index: HashMap<BeaconKey, usize> = HashMap::new();
        let mut samples = Vec::with_capacity(frames.len());
        for frame in frames {
            let Some(beacon) = apply_layouts(&layouts, frame) else {
                report.frames_dropped += 1;
                continue;
            };
            let key = policy.key(&beacon);
            samples.push((key.clone(), beacon.rssi));
            match index.get(&key) {
                Some(&i) => decoded[i].1 = beacon,
                None => {
                    index.insert(key.clone(), decoded.len());
                    decoded.push((key, beacon));
                }
            }
        }

        {
            let mut filters = self.filters.lock();
            for (key, rssi) in &samples {
                filters.add_sample(key, *rssi, observed_at);
            }
            for (key, beacon) in &mut decoded {
                let filtered = filters
                    .filtered(key)
                    .unwrap_or_else(|| f64::from(beacon.rssi));
                beacon.distance = Some(self.distance_model.estimate(filtered, beacon.raw_power));
            }
            let evicted = filters.evict_stale(observed_at);
            if evicted > 0 {
                debug!(evicted, "stale filter state dropped");
            }
        }

        let beacons: Vec<Beacon> = decoded.into_iter().map(|(_, b)| b).collect();

        // Emit under the monitor lock so request_state cannot interleave
        {
            let mut monitor = self.monitor.lock();
            let mut events = monitor.evaluate_cycle(&beacons);
            events.extend(self.ranging.lock().range_cycle(&beacons));
            report.events_emitted = events.len();
            for event in events {
                self.sink.emit(event);
            }
        }

        debug!(
            frames = report.frames_received,
            dropped = report.frames_dropped,
            beacons = beacons.len(),
            events = report.events_emitted,
            "scan cycle processed"
        );
        report.beacons = beacons;
        report
    }

    // ------------------------------------------------------------------
    // Layouts
    // ------------------------------------------------------------------

    /// Register a layout; `false` if it was already registered
    pub fn add_layout(&self, spec: &str) -> Result<bool> {
        let added = self.layouts.write().register(spec)?;
        info!(layout = spec, added, "layout added");
        Ok(added)
    }

    /// Remove a layout; `false` if it was not registered
    pub fn remove_layout(&self, spec: &str) -> Result<bool> {
        let removed = self.layouts.write().unregister(spec)?;
        info!(layout = spec, removed, "layout removed");
        Ok(removed)
    }

    /// Register several layouts at once; none are added if any is malformed
    pub fn add_layouts<S: AsRef<str>>(&self, specs: &[S]) -> Result<usize> {
        let added = self.layouts.write().register_all(specs)?;
        info!(requested = specs.len(), added, "layouts added");
        Ok(added)
    }

    /// Remove several layouts at once; none are removed if any is malformed
    pub fn remove_layouts<S: AsRef<str>>(&self, specs: &[S]) -> Result<usize> {
        let removed = self.layouts.write().unregister_all(specs)?;
        info!(requested = specs.len(), removed, "layouts removed");
        Ok(removed)
    }

    pub fn layouts(&self) -> Vec<String> {
        self.layouts.read().specs()
    }

    // ------------------------------------------------------------------
    // Filtering and identity
    // ------------------------------------------------------------------

    /// Switch the RSSI filter strategy, discarding all filter state.
    ///
    /// `tuning_param <= 0` keeps the strategy's default tuning.
    pub fn set_rssi_filter(&self, kind: RssiFilterKind, tuning_param: f64) -> Result<()> {
        let settings = FilterSettings::with_tuning(kind, tuning_param)?;
        self.filters.lock().set_settings(settings)?;
        info!(
            filter = kind.as_str(),
            expiration_ms = settings.sample_expiration_ms,
            speed = settings.arma_speed,
            "RSSI filter set"
        );
        Ok(())
    }

    /// [`Self::set_rssi_filter`] with the numeric filter code used by bridges
    pub fn set_rssi_filter_code(&self, code: i32, tuning_param: f64) -> Result<()> {
        self.set_rssi_filter(RssiFilterKind::from_code(code)?, tuning_param)
    }

    pub fn rssi_filter(&self) -> FilterSettings {
        self.filters.lock().settings()
    }

    /// Choose whether beacon identity ignores the hardware address.
    ///
    /// Changing the policy changes identity keys, so filter state is reset.
    pub fn set_hardware_equality_enforced(&self, enforced: bool) {
        let policy = EqualityPolicy::from_hardware_equality_enforced(enforced);
        let changed = {
            let mut current = self.policy.write();
            let changed = *current != policy;
            *current = policy;
            changed
        };
        if changed {
            self.filters.lock().clear();
        }
        info!(enforced, changed, "hardware equality policy set");
    }

    pub fn equality_policy(&self) -> EqualityPolicy {
        *self.policy.read()
    }

    /// Filter state as JSON, for restoring after a restart
    pub fn save_filter_state(&self) -> Result<String> {
        self.filters.lock().to_json()
    }

    /// Replace filter state (and its settings) with a saved copy
    pub fn load_filter_state(&self, json: &str) -> Result<()> {
        let restored = FilterRegistry::from_json(json)?;
        let entries = restored.len();
        *self.filters.lock() = restored;
        info!(entries, "filter state restored");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Monitoring
    // ------------------------------------------------------------------

    pub fn start_monitoring(&self, region: Region) {
        self.monitor.lock().start_monitoring(region);
    }

    pub fn stop_monitoring(&self, unique_id: &str) {
        self.monitor.lock().stop_monitoring(unique_id);
    }

    /// Emit `didDetermineState` for a region right away
    pub fn request_state_for_region(&self, unique_id: &str) {
        let mut monitor = self.monitor.lock();
        for event in monitor.request_state(unique_id) {
            self.sink.emit(event);
        }
    }

    pub fn monitored_regions(&self) -> Vec<Region> {
        self.monitor.lock().monitored_regions()
    }

    // ------------------------------------------------------------------
    // Ranging
    // ------------------------------------------------------------------

    pub fn start_ranging(&self, region: Region) {
        self.ranging.lock().start_ranging(region);
    }

    pub fn stop_ranging(&self, unique_id: &str) {
        self.ranging.lock().stop_ranging(unique_id);
    }

    pub fn ranged_regions(&self) -> Vec<Region> {
        self.ranging.lock().ranged_regions()
    }

    // ------------------------------------------------------------------
    // Scan provider
    // ------------------------------------------------------------------

    pub fn set_foreground_scan_period(&self, ms: i64) -> Result<()> {
        self.update_scan_periods(|p| p.foreground_scan_ms = ms)
    }

    pub fn set_foreground_between_scan_period(&self, ms: i64) -> Result<()> {
        self.update_scan_periods(|p| p.foreground_between_scan_ms = ms)
    }

    pub fn set_background_scan_period(&self, ms: i64) -> Result<()> {
        self.update_scan_periods(|p| p.background_scan_ms = ms)
    }

    pub fn set_background_between_scan_period(&self, ms: i64) -> Result<()> {
        self.update_scan_periods(|p| p.background_between_scan_ms = ms)
    }

    pub fn scan_periods(&self) -> ScanPeriods {
        *self.scan_periods.lock()
    }

    fn update_scan_periods(&self, update: impl FnOnce(&mut ScanPeriods)) -> Result<()> {
        let periods = {
            let mut current = self.scan_periods.lock();
            let mut next = *current;
            update(&mut next);
            next.validate()?;
            *current = next;
            next
        };
        debug!(?periods, "scan periods updated");
        self.provider.apply_scan_periods(&periods)
    }

    pub fn check_transmission_supported(&self) -> TransmissionSupport {
        self.provider.transmission_support()
    }

    /// Ask the host to keep scanning alive behind a notification.
    /// Any keep-alive already active is released first.
    pub fn enable_foreground_service_scanning(
        &self,
        config: &ForegroundServiceConfig,
    ) -> Result<ForegroundServiceToken> {
        config.validate(self.provider.requires_notification_channel())?;
        let notification_id = config.id.unwrap_or_default();
        let token = ForegroundServiceToken::new(notification_id);

        let mut active = self.foreground.lock();
        if let Some(previous) = active.take() {
            if let Err(e) = self.provider.release_keep_alive(&previous) {
                warn!(error = %e, "failed to release previous keep-alive");
            }
        }
        self.provider.keep_alive(&token, config)?;
        *active = Some(token.clone());
        info!(notification_id, "foreground service scanning enabled");
        Ok(token)
    }

    /// Release the keep-alive; `false` when none was active
    pub fn disable_foreground_service_scanning(&self) -> Result<bool> {
        let Some(token) = self.foreground.lock().take() else {
            return Ok(false);
        };
        self.provider.release_keep_alive(&token)?;
        info!(notification_id = token.notification_id, "foreground service scanning disabled");
        Ok(true)
    }

    pub fn constants(&self) -> std::collections::BTreeMap<&'static str, i32> {
        constants()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLog;
    use crate::identifier::Identifier;
    use crate::layout::{ALTBEACON_LAYOUT, IBEACON_LAYOUT};
    use crate::types::{Proximity, RegionState};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    const UUID: &str = "2f234454-cf6d-4a0f-adf2-f4911ba9ffa6";

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn ibeacon_frame(major: u16, minor: u16, rssi: i32) -> RawFrame {
        let mut data = vec![0x4c, 0x00, 0x02, 0x15];
        data.extend_from_slice(Uuid::parse_str(UUID).unwrap().as_bytes());
        data.extend_from_slice(&major.to_be_bytes());
        data.extend_from_slice(&minor.to_be_bytes());
        data.push((-59i8) as u8);
        RawFrame::new(data, rssi)
    }

    fn manager_with_log(config: EngineConfig) -> (BeaconManager, Arc<EventLog>, Arc<HeadlessScanProvider>) {
        let log = Arc::new(EventLog::new());
        let provider = Arc::new(HeadlessScanProvider::new(TransmissionSupport::Supported));
        let manager = BeaconManager::with_parts(config, provider.clone(), log.clone()).unwrap();
        log.drain();
        (manager, log, provider)
    }

    fn names(events: &[BeaconEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.name()).collect()
    }

    #[test]
    fn test_service_connected_on_construction() {
        let (_manager, mut rx) = BeaconManager::new().unwrap();
        assert_eq!(rx.try_recv().unwrap(), BeaconEvent::ServiceConnected);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_default_layout_is_ibeacon() {
        let (manager, _rx) = BeaconManager::new().unwrap();
        assert_eq!(manager.layouts(), vec![IBEACON_LAYOUT.to_string()]);
    }

    #[test]
    fn test_monitoring_enter_and_exit() {
        let (manager, log, _) = manager_with_log(EngineConfig::default());
        manager.start_monitoring(Region::from_parts("lobby", Some(UUID), Some(1), None).unwrap());

        manager.process_cycle(&[ibeacon_frame(1, 7, -60)], t(0));
        assert_eq!(names(&log.drain()), vec!["regionDidEnter"]);

        manager.process_cycle(&[ibeacon_frame(1, 7, -61)], t(1));
        assert!(log.is_empty());

        manager.process_cycle(&[], t(2));
        assert_eq!(names(&log.drain()), vec!["regionDidExit"]);
    }

    #[test]
    fn test_ranging_emits_every_cycle() {
        let (manager, log, _) = manager_with_log(EngineConfig::default());
        manager.start_ranging(Region::from_parts("lobby", Some(UUID), None, None).unwrap());

        manager.process_cycle(&[ibeacon_frame(1, 7, -59)], t(0));
        let events = log.drain();
        assert_eq!(events.len(), 1);
        match &events[0] {
            BeaconEvent::BeaconsRanged { beacons, .. } => {
                assert_eq!(beacons.len(), 1);
                assert_eq!(beacons[0].identifiers[2], Identifier::Int(7));
                assert_eq!(beacons[0].proximity, Proximity::Immediate);
            }
            other => panic!("unexpected {other:?}"),
        }

        manager.process_cycle(&[], t(1));
        let events = log.drain();
        assert_eq!(events[0].payload()["beacons"], serde_json::json!([]));
    }

    #[test]
    fn test_malformed_frames_are_dropped() {
        let (manager, log, _) = manager_with_log(EngineConfig::default());
        manager.start_ranging(Region::wildcard("all"));
        let junk = RawFrame::new(vec![0xde, 0xad], -50);
        let report = manager.process_cycle(&[junk, ibeacon_frame(2, 2, -70)], t(0));
        assert_eq!(report.frames_received, 2);
        assert_eq!(report.frames_dropped, 1);
        assert_eq!(report.beacons.len(), 1);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_duplicate_frames_collapse_but_feed_filter() {
        let (manager, _log, _) = manager_with_log(EngineConfig::default());
        let report = manager.process_cycle(
            &[ibeacon_frame(1, 1, -50), ibeacon_frame(1, 1, -70), ibeacon_frame(1, 2, -60)],
            t(0),
        );
        assert_eq!(report.beacons.len(), 2);
        assert_eq!(report.beacons[0].rssi, -70);

        // Filtered RSSI -60 against reference -59 is just over one meter
        let expected = DistanceModel::default().estimate(-60.0, -59);
        assert_eq!(report.beacons[0].distance, Some(expected));
    }

    #[test]
    fn test_relaxed_equality_splits_by_address() {
        let (manager, _log, _) = manager_with_log(EngineConfig::default());
        let a = ibeacon_frame(1, 1, -60).with_address("aa:bb:cc:dd:ee:01");
        let b = ibeacon_frame(1, 1, -60).with_address("aa:bb:cc:dd:ee:02");

        assert_eq!(manager.process_cycle(&[a.clone(), b.clone()], t(0)).beacons.len(), 1);

        manager.set_hardware_equality_enforced(false);
        assert_eq!(manager.equality_policy(), EqualityPolicy::IdentifiersAndHardware);
        assert_eq!(manager.process_cycle(&[a, b], t(1)).beacons.len(), 2);
    }

    #[test]
    fn test_add_layouts_is_atomic() {
        let (manager, _log, _) = manager_with_log(EngineConfig::default());
        let err = manager
            .add_layouts(&[ALTBEACON_LAYOUT, "m:0-1=zz,i:2-3"])
            .unwrap_err();
        assert!(err.is_parse_error());
        assert_eq!(manager.layouts().len(), 1);

        assert_eq!(manager.add_layouts(&[ALTBEACON_LAYOUT, IBEACON_LAYOUT]).unwrap(), 1);
        assert_eq!(manager.remove_layouts(&[ALTBEACON_LAYOUT]).unwrap(), 1);
        assert!(!manager.remove_layout(ALTBEACON_LAYOUT).unwrap());
        assert!(manager.add_layout(ALTBEACON_LAYOUT).unwrap());
    }

    #[test]
    fn test_removing_every_layout_drops_all_frames() {
        let (manager, _log, _) = manager_with_log(EngineConfig::default());
        manager.remove_layout(IBEACON_LAYOUT).unwrap();
        let report = manager.process_cycle(&[ibeacon_frame(1, 1, -60)], t(0));
        assert_eq!(report.frames_dropped, 1);
    }

    #[test]
    fn test_set_rssi_filter() {
        let (manager, _log, _) = manager_with_log(EngineConfig::default());
        manager.set_rssi_filter_code(1, 0.0).unwrap();
        assert_eq!(manager.rssi_filter().kind, RssiFilterKind::Arma);
        assert_eq!(manager.rssi_filter().arma_speed, 0.3);

        assert!(manager.set_rssi_filter(RssiFilterKind::Arma, 2.0).is_err());
        assert_eq!(manager.rssi_filter().kind, RssiFilterKind::Arma);
        assert!(manager.set_rssi_filter_code(9, 0.0).is_err());
    }

    #[test]
    fn test_filter_state_survives_save_and_load() {
        let (manager, _log, _) = manager_with_log(EngineConfig::default());
        manager.process_cycle(&[ibeacon_frame(1, 1, -80)], t(0));
        let saved = manager.save_filter_state().unwrap();

        let (restored, _log2, _) = manager_with_log(EngineConfig::default());
        restored.load_filter_state(&saved).unwrap();
        let report = restored.process_cycle(&[ibeacon_frame(1, 1, -60)], t(1));
        let expected = DistanceModel::default().estimate(-70.0, -59);
        assert_eq!(report.beacons[0].distance, Some(expected));
    }

    #[test]
    fn test_request_state() {
        let (manager, log, _) = manager_with_log(EngineConfig::default());
        manager.start_monitoring(Region::wildcard("all"));
        manager.request_state_for_region("all");
        manager.request_state_for_region("missing");
        let states: Vec<_> = log
            .drain()
            .iter()
            .map(|e| e.payload()["state"].clone())
            .collect();
        assert_eq!(states, vec![serde_json::json!("unknown"), serde_json::json!("unknown")]);
        assert_eq!(manager.monitored_regions().len(), 1);
    }

    #[test]
    fn test_region_listings() {
        let (manager, _log, _) = manager_with_log(EngineConfig::default());
        manager.start_monitoring(Region::wildcard("a"));
        manager.start_monitoring(Region::wildcard("a"));
        manager.start_ranging(Region::wildcard("b"));
        manager.stop_monitoring("never");
        assert_eq!(manager.monitored_regions().len(), 1);
        assert_eq!(manager.ranged_regions()[0].unique_id, "b");
        manager.stop_ranging("b");
        assert!(manager.ranged_regions().is_empty());
    }

    #[test]
    fn test_scan_periods_reach_provider() {
        let (manager, _log, provider) = manager_with_log(EngineConfig::default());
        manager.set_background_scan_period(5_000).unwrap();
        manager.set_foreground_between_scan_period(250).unwrap();
        let applied = provider.applied_periods().unwrap();
        assert_eq!(applied.background_scan_ms, 5_000);
        assert_eq!(applied.foreground_between_scan_ms, 250);
        assert_eq!(manager.scan_periods(), applied);
    }

    #[test]
    fn test_negative_scan_period_rejected() {
        let (manager, _log, provider) = manager_with_log(EngineConfig::default());
        let err = manager.set_background_between_scan_period(-1).unwrap_err();
        assert_eq!(err.error_code(), "ERROR_INVALID_CONFIG");
        assert_eq!(manager.scan_periods(), ScanPeriods::default());
        assert_eq!(provider.applied_periods(), None);
    }

    #[test]
    fn test_foreground_service_lifecycle() {
        let (manager, _log, provider) = manager_with_log(EngineConfig::default());
        let bad = ForegroundServiceConfig::default();
        assert_eq!(
            manager.enable_foreground_service_scanning(&bad).unwrap_err().error_code(),
            "ERROR_INVALID_CONFIG"
        );
        assert!(!manager.disable_foreground_service_scanning().unwrap());

        let config = ForegroundServiceConfig {
            channel_id: None,
            id: Some(7),
            icon: Some("ic".to_string()),
            title: Some("Scanning".to_string()),
            text: Some("Beacons nearby".to_string()),
        };
        let token = manager.enable_foreground_service_scanning(&config).unwrap();
        assert_eq!(token.notification_id, 7);
        assert_eq!(provider.active_keep_alive(), Some(token));
        assert!(manager.disable_foreground_service_scanning().unwrap());
        assert_eq!(provider.active_keep_alive(), None);
    }

    #[test]
    fn test_transmission_and_constants() {
        let (manager, _log, _) = manager_with_log(EngineConfig::default());
        assert_eq!(manager.check_transmission_supported(), TransmissionSupport::Supported);
        assert_eq!(manager.constants()["ARMA_RSSI_FILTER"], 1);
    }

    #[test]
    fn test_config_monitor_threshold() {
        let mut config = EngineConfig::default();
        config.monitor.exit_after_missed_cycles = 2;
        let (manager, log, _) = manager_with_log(config);
        manager.start_monitoring(Region::wildcard("all"));
        manager.process_cycle(&[ibeacon_frame(1, 1, -60)], t(0));
        manager.process_cycle(&[], t(1));
        assert_eq!(names(&log.drain()), vec!["regionDidEnter"]);
        manager.process_cycle(&[], t(2));
        assert_eq!(names(&log.drain()), vec!["regionDidExit"]);
    }

    #[test]
    fn test_configuration_during_cycles() {
        let (manager, log, _) = manager_with_log(EngineConfig::default());
        manager.start_monitoring(Region::wildcard("all"));

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..200 {
                    manager.process_cycle(&[ibeacon_frame(1, (i % 5) as u16, -60)], t(i));
                }
            });
            scope.spawn(|| {
                for i in 0..200 {
                    let id = format!("region-{}", i % 10);
                    manager.start_ranging(Region::wildcard(id.clone()));
                    manager.add_layout(ALTBEACON_LAYOUT).unwrap();
                    manager.remove_layout(ALTBEACON_LAYOUT).unwrap();
                    manager.stop_ranging(&id);
                }
            });
        });

        assert_eq!(
            manager.monitored_regions().len(),
            1,
            "monitoring registrations untouched by ranging churn"
        );
        let entered = log
            .drain()
            .iter()
            .filter(|e| e.name() == "regionDidEnter")
            .count();
        assert_eq!(entered, 1);
    }

    #[test]
    fn test_state_requests_never_overtake_cycle_events() {
        let (manager, log, _) = manager_with_log(EngineConfig::default());
        manager.start_monitoring(Region::wildcard("all"));

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..300 {
                    let frames = if i % 2 == 0 { vec![ibeacon_frame(1, 1, -60)] } else { vec![] };
                    manager.process_cycle(&frames, t(i));
                }
            });
            scope.spawn(|| {
                for _ in 0..300 {
                    manager.request_state_for_region("all");
                }
            });
        });

        let mut tracked = RegionState::Unknown;
        for event in log.drain() {
            match event {
                BeaconEvent::RegionEntered { .. } => tracked = RegionState::Inside,
                BeaconEvent::RegionExited { .. } => tracked = RegionState::Outside,
                BeaconEvent::StateDetermined { state, .. } => {
                    if tracked != RegionState::Unknown {
                        assert_eq!(state, tracked);
                    }
                    tracked = state;
                }
                _ => {}
            }
        }
    }
}
