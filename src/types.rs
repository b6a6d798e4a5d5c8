//! Core types for the beacon engine
//!
//! This module defines the records that flow through each stage of a scan
//! cycle: raw frames from the scan provider, parsed beacons, the regions that
//! filter them, and the snapshots handed to the application layer.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::identifier::Identifier;

/// Number of identifier slots a region can filter on
pub const REGION_ID_SLOTS: usize = 3;

/// Raw advertisement delivered by the scan provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFrame {
    /// Advertisement payload bytes the layouts are matched against
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    /// Received signal strength (dBm)
    pub rssi: i32,
    /// Hardware (MAC) address of the transmitter, when the provider reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl RawFrame {
    pub fn new(data: Vec<u8>, rssi: i32) -> Self {
        Self {
            data,
            rssi,
            address: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

/// A beacon decoded from a raw frame during a single scan cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beacon {
    /// Identifier fields in layout-declared order
    pub identifiers: Vec<Identifier>,
    /// Signal strength of the frame this beacon was decoded from (dBm)
    pub rssi: i32,
    /// Calibrated reference power at one meter (dBm)
    pub raw_power: i32,
    /// Estimated distance in meters, filled in after filtering
    pub distance: Option<f64>,
    /// Extra data fields declared by the layout
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_fields: Vec<u64>,
    /// Service UUID matched by the layout, if it declares one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_uuid: Option<Identifier>,
    /// Hardware address the frame was received from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bluetooth_address: Option<String>,
}

impl Beacon {
    /// Identifier at `index` (0-based)
    pub fn id(&self, index: usize) -> Option<&Identifier> {
        self.identifiers.get(index)
    }
}

/// How beacon identity is decided when keying filter state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EqualityPolicy {
    /// Only the identifier tuple participates
    #[default]
    IdentifiersOnly,
    /// The hardware address participates alongside the identifiers
    IdentifiersAndHardware,
}

impl EqualityPolicy {
    /// Map the bridge-level "hardware equality enforced" flag onto a policy.
    ///
    /// Enforced keeps identity on the identifier fields alone; relaxed lets
    /// the hardware address take part.
    pub fn from_hardware_equality_enforced(enforced: bool) -> Self {
        if enforced {
            Self::IdentifiersOnly
        } else {
            Self::IdentifiersAndHardware
        }
    }

    pub fn hardware_equality_enforced(&self) -> bool {
        matches!(self, Self::IdentifiersOnly)
    }

    /// Identity key of a beacon under this policy
    pub fn key(&self, beacon: &Beacon) -> BeaconKey {
        BeaconKey {
            identifiers: beacon.identifiers.clone(),
            hardware_address: match self {
                Self::IdentifiersOnly => None,
                Self::IdentifiersAndHardware => beacon
                    .bluetooth_address
                    .as_ref()
                    .map(|a| a.to_ascii_uppercase()),
            },
        }
    }

    /// Whether two beacons are the same beacon under this policy
    pub fn same_beacon(&self, a: &Beacon, b: &Beacon) -> bool {
        self.key(a) == self.key(b)
    }
}

/// Identity of a beacon across scan cycles
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BeaconKey {
    pub identifiers: Vec<Identifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_address: Option<String>,
}

/// A filter over beacon identifiers; unset slots match every beacon.
///
/// Two regions are the same registration when their `unique_id` matches,
/// regardless of the identifier filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub unique_id: String,
    pub id1: Option<Identifier>,
    pub id2: Option<Identifier>,
    pub id3: Option<Identifier>,
}

impl Region {
    pub fn new(
        unique_id: impl Into<String>,
        id1: Option<Identifier>,
        id2: Option<Identifier>,
        id3: Option<Identifier>,
    ) -> Self {
        Self {
            unique_id: unique_id.into(),
            id1,
            id2,
            id3,
        }
    }

    /// Region matching every beacon
    pub fn wildcard(unique_id: impl Into<String>) -> Self {
        Self::new(unique_id, None, None, None)
    }

    /// Build a region from bridge arguments.
    ///
    /// A missing or empty UUID and negative major/minor values are wildcards.
    pub fn from_parts(
        unique_id: &str,
        uuid: Option<&str>,
        major: Option<i32>,
        minor: Option<i32>,
    ) -> Result<Self> {
        let id1 = match uuid.map(str::trim) {
            Some(s) if !s.is_empty() => Some(Identifier::parse(s)?),
            _ => None,
        };
        let numeric = |v: Option<i32>| -> Result<Option<Identifier>> {
            match v {
                Some(n) if n >= 0 => Identifier::parse(&n.to_string()).map(Some),
                _ => Ok(None),
            }
        };
        Ok(Self::new(unique_id, id1, numeric(major)?, numeric(minor)?))
    }

    /// Identifier filters in slot order
    pub fn filters(&self) -> [Option<&Identifier>; REGION_ID_SLOTS] {
        [self.id1.as_ref(), self.id2.as_ref(), self.id3.as_ref()]
    }

    /// Wildcard-aware match of a beacon's identifier tuple
    pub fn matches(&self, beacon: &Beacon) -> bool {
        self.filters()
            .iter()
            .enumerate()
            .all(|(i, filter)| match filter {
                None => true,
                Some(expected) => beacon.id(i).is_some_and(|id| id.same_value(expected)),
            })
    }

    /// Summary shape used by region listings and event payloads
    pub fn info(&self) -> RegionInfo {
        RegionInfo {
            identifier: self.unique_id.clone(),
            uuid: self
                .id1
                .as_ref()
                .map(Identifier::to_canonical_string)
                .unwrap_or_default(),
            major: self.id2.as_ref().and_then(Identifier::to_int).unwrap_or(0),
            minor: self.id3.as_ref().and_then(Identifier::to_int).unwrap_or(0),
        }
    }
}

impl PartialEq for Region {
    fn eq(&self, other: &Self) -> bool {
        self.unique_id == other.unique_id
    }
}

impl Eq for Region {}

impl Hash for Region {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.unique_id.hash(state);
    }
}

/// Flattened region description for the application layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub identifier: String,
    pub uuid: String,
    pub major: u16,
    pub minor: u16,
}

/// Membership of a monitored region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionState {
    #[default]
    Unknown,
    Outside,
    Inside,
}

impl RegionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionState::Unknown => "unknown",
            RegionState::Outside => "outside",
            RegionState::Inside => "inside",
        }
    }
}

/// Coarse distance class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proximity {
    Unknown,
    Immediate,
    Near,
    Far,
}

impl Proximity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Proximity::Unknown => "unknown",
            Proximity::Immediate => "immediate",
            Proximity::Near => "near",
            Proximity::Far => "far",
        }
    }
}

/// One ranged beacon as reported to the application layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconSnapshot {
    pub identifiers: Vec<Identifier>,
    pub rssi: i32,
    pub distance: f64,
    pub proximity: Proximity,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim()).map_err(serde::de::Error::custom)
    }
}
