//! Beacon Engine - On-device region monitoring and ranging for BLE beacons
//!
//! The engine turns raw advertisement frames delivered by a host scan
//! provider into region events through a deterministic per-cycle pipeline:
//! layout decoding → RSSI filtering → distance estimation → region
//! monitoring and ranging → events.
//!
//! ## Modules
//!
//! - **Identity**: identifiers, regions and beacon layouts
//! - **Signal**: RSSI filters and the distance model
//! - **State**: region monitoring and ranging sessions
//! - **Bridge**: the [`BeaconManager`] API, events, the scan-provider boundary and C FFI

pub mod config;
pub mod distance;
pub mod error;
pub mod events;
pub mod filter;
pub mod identifier;
pub mod layout;
pub mod manager;
pub mod monitor;
pub mod ranging;
pub mod scan;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::EngineConfig;
pub use error::{BeaconError, Result};
pub use events::{BeaconEvent, EventSink};
pub use filter::{FilterRegistry, FilterSettings, RssiFilterKind};
pub use identifier::Identifier;
pub use layout::{BeaconLayout, LayoutRegistry};
pub use manager::{BeaconManager, CycleReport};
pub use monitor::{MonitorSettings, RegionStateTracker};
pub use ranging::RangingSessions;
pub use scan::{ScanPeriods, ScanProvider, TransmissionSupport};
pub use types::{Beacon, BeaconSnapshot, Proximity, RawFrame, Region, RegionState};

/// Engine version reported by the FFI and CLI
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for diagnostic reports
pub const PRODUCER_NAME: &str = "beacon-engine";
