//! Events delivered to the application layer
//!
//! Monitoring and ranging produce [`BeaconEvent`] values; an [`EventSink`]
//! forwards them without ever blocking the scan cycle.

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

use crate::types::{BeaconSnapshot, Region, RegionState};

/// Everything the engine can report
#[derive(Debug, Clone, PartialEq)]
pub enum BeaconEvent {
    /// The engine is ready to accept configuration
    ServiceConnected,
    RegionEntered { region: Region },
    RegionExited { region: Region },
    StateDetermined { region: Region, state: RegionState },
    /// One per ranged region per cycle, possibly with no beacons
    BeaconsRanged {
        region: Region,
        beacons: Vec<BeaconSnapshot>,
    },
}

impl BeaconEvent {
    /// Event name as seen by the application layer
    pub fn name(&self) -> &'static str {
        match self {
            Self::ServiceConnected => "beaconServiceConnected",
            Self::RegionEntered { .. } => "regionDidEnter",
            Self::RegionExited { .. } => "regionDidExit",
            Self::StateDetermined { .. } => "didDetermineState",
            Self::BeaconsRanged { .. } => "beaconsDidRange",
        }
    }

    pub fn region(&self) -> Option<&Region> {
        match self {
            Self::ServiceConnected => None,
            Self::RegionEntered { region }
            | Self::RegionExited { region }
            | Self::StateDetermined { region, .. }
            | Self::BeaconsRanged { region, .. } => Some(region),
        }
    }

    /// Payload map for the event
    pub fn payload(&self) -> Value {
        match self {
            Self::ServiceConnected => Value::Null,
            Self::RegionEntered { region } | Self::RegionExited { region } => {
                Value::Object(region_map(region))
            }
            Self::StateDetermined { region, state } => {
                let mut map = region_map(region);
                map.insert("state".to_string(), json!(state.as_str()));
                Value::Object(map)
            }
            Self::BeaconsRanged { region, beacons } => {
                let mut map = region_map(region);
                let list: Vec<Value> = beacons.iter().map(snapshot_value).collect();
                map.insert("beacons".to_string(), Value::Array(list));
                Value::Object(map)
            }
        }
    }

    /// `{"event": name, "payload": payload}` envelope used by the FFI and CLI
    pub fn to_envelope(&self) -> Value {
        json!({
            "event": self.name(),
            "payload": self.payload(),
        })
    }
}

fn region_map(region: &Region) -> Map<String, Value> {
    let info = region.info();
    let mut map = Map::new();
    map.insert("identifier".to_string(), json!(info.identifier));
    map.insert("uuid".to_string(), json!(info.uuid));
    map.insert("major".to_string(), json!(info.major));
    map.insert("minor".to_string(), json!(info.minor));
    map
}

fn snapshot_value(snapshot: &BeaconSnapshot) -> Value {
    let mut map = Map::new();
    let ids: Vec<String> = snapshot
        .identifiers
        .iter()
        .map(|id| id.to_canonical_string())
        .collect();
    if let Some(first) = ids.first() {
        map.insert("uuid".to_string(), json!(first));
    }
    if snapshot.identifiers.len() > 2 {
        map.insert("major".to_string(), json!(snapshot.identifiers[1].to_int()));
        map.insert("minor".to_string(), json!(snapshot.identifiers[2].to_int()));
    }
    map.insert("identifiers".to_string(), json!(ids));
    map.insert("rssi".to_string(), json!(snapshot.rssi));
    map.insert("distance".to_string(), json!(snapshot.distance));
    map.insert("proximity".to_string(), json!(snapshot.proximity.as_str()));
    Value::Object(map)
}

/// Receiver side of emitted events
pub trait EventSink: Send + Sync {
    /// Deliver one event; must not block
    fn emit(&self, event: BeaconEvent);
}

impl EventSink for UnboundedSender<BeaconEvent> {
    fn emit(&self, event: BeaconEvent) {
        let name = event.name();
        if self.send(event).is_err() {
            trace!(event = name, "event receiver dropped");
        }
    }
}

/// Sink that keeps events in memory until drained
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<BeaconEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every buffered event
    pub fn drain(&self) -> Vec<BeaconEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: BeaconEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Identifier;
    use crate::types::Proximity;
    use pretty_assertions::assert_eq;

    const UUID: &str = "2f234454-cf6d-4a0f-adf2-f4911ba9ffa6";

    fn region() -> Region {
        Region::from_parts("lobby", Some(UUID), Some(1), None).unwrap()
    }

    #[test]
    fn test_event_names() {
        let r = region();
        assert_eq!(BeaconEvent::ServiceConnected.name(), "beaconServiceConnected");
        assert_eq!(
            BeaconEvent::RegionEntered { region: r.clone() }.name(),
            "regionDidEnter"
        );
        assert_eq!(
            BeaconEvent::RegionExited { region: r.clone() }.name(),
            "regionDidExit"
        );
        assert_eq!(
            BeaconEvent::StateDetermined {
                region: r.clone(),
                state: RegionState::Inside
            }
            .name(),
            "didDetermineState"
        );
        assert_eq!(
            BeaconEvent::BeaconsRanged {
                region: r,
                beacons: vec![]
            }
            .name(),
            "beaconsDidRange"
        );
    }

    #[test]
    fn test_state_payload() {
        let event = BeaconEvent::StateDetermined {
            region: region(),
            state: RegionState::Outside,
        };
        assert_eq!(
            event.payload(),
            json!({
                "identifier": "lobby",
                "uuid": UUID,
                "major": 1,
                "minor": 0,
                "state": "outside",
            })
        );
    }

    #[test]
    fn test_ranging_payload() {
        let snapshot = BeaconSnapshot {
            identifiers: vec![
                Identifier::parse(UUID).unwrap(),
                Identifier::Int(1),
                Identifier::Int(7),
            ],
            rssi: -65,
            distance: 1.25,
            proximity: Proximity::Near,
        };
        let event = BeaconEvent::BeaconsRanged {
            region: region(),
            beacons: vec![snapshot],
        };
        let payload = event.payload();
        let beacon = &payload["beacons"][0];
        assert_eq!(beacon["uuid"], json!(UUID));
        assert_eq!(beacon["major"], json!(1));
        assert_eq!(beacon["minor"], json!(7));
        assert_eq!(beacon["rssi"], json!(-65));
        assert_eq!(beacon["distance"], json!(1.25));
        assert_eq!(beacon["proximity"], json!("near"));
    }

    #[test]
    fn test_empty_ranging_payload_has_empty_list() {
        let event = BeaconEvent::BeaconsRanged {
            region: region(),
            beacons: vec![],
        };
        assert_eq!(event.payload()["beacons"], json!([]));
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        tx.emit(BeaconEvent::ServiceConnected);
    }

    #[test]
    fn test_channel_sink_delivers() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        tx.emit(BeaconEvent::ServiceConnected);
        assert_eq!(rx.try_recv().unwrap(), BeaconEvent::ServiceConnected);
    }

    #[test]
    fn test_event_log_drains() {
        let log = EventLog::new();
        log.emit(BeaconEvent::ServiceConnected);
        assert_eq!(log.len(), 1);
        assert_eq!(log.drain(), vec![BeaconEvent::ServiceConnected]);
        assert!(log.is_empty());
    }
}
