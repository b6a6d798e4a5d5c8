//! Beacon layouts
//!
//! A layout is a compact description of where the fields of one beacon format
//! live inside an advertisement frame, for example the iBeacon layout
//! `m:0-3=4c000215,i:4-19,i:20-21,i:22-23,p:24-24`.
//!
//! Terms are comma separated `<tag>:<start>-<end>` byte ranges (inclusive):
//! - `m` type matcher, followed by `=<hex>` (required, exactly one)
//! - `s` service UUID matcher, followed by `=<hex>` (optional)
//! - `i` identifier, optional `l` suffix for little-endian (at least one)
//! - `p` one-byte calibrated power, optional `:<dBm adjustment>`
//! - `d` data field up to 8 bytes, optional `l` suffix

use std::sync::Arc;

use serde::Serialize;

use crate::error::{BeaconError, Result};
use crate::identifier::Identifier;
use crate::types::{Beacon, RawFrame};

/// Apple iBeacon, registered by default
pub const IBEACON_LAYOUT: &str = "m:0-3=4c000215,i:4-19,i:20-21,i:22-23,p:24-24";

/// AltBeacon open format
pub const ALTBEACON_LAYOUT: &str = "m:2-3=beac,i:4-19,i:20-21,i:22-23,p:24-24,d:25-25";

/// Eddystone UID service data
pub const EDDYSTONE_UID_LAYOUT: &str = "s:0-1=feaa,m:2-2=00,p:3-3:-41,i:4-13,i:14-19";

/// Reference power assumed when a layout has no `p` term (dBm at one meter)
pub const DEFAULT_REFERENCE_POWER: i32 = -59;

const MAX_DATA_FIELD_BYTES: usize = 8;

/// Highest byte offset a layout may address
const MAX_LAYOUT_OFFSET: usize = 255;

/// What a layout term extracts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRole {
    Matcher,
    ServiceUuid,
    Identifier,
    Power,
    Data,
}

/// One extraction rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayoutField {
    pub role: FieldRole,
    pub start: usize,
    pub end: usize,
    pub little_endian: bool,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "opt_hex::serialize")]
    pub match_bytes: Option<Vec<u8>>,
    pub power_adjustment: i32,
}

impl LayoutField {
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    fn overlaps(&self, other: &LayoutField) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    fn slice<'a>(&self, data: &'a [u8]) -> Option<&'a [u8]> {
        data.get(self.start..=self.end)
    }

    fn matches(&self, data: &[u8]) -> bool {
        match (&self.match_bytes, self.slice(data)) {
            (Some(expected), Some(actual)) => expected.as_slice() == actual,
            _ => false,
        }
    }
}

/// A parsed, immutable beacon layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BeaconLayout {
    spec: String,
    matcher: LayoutField,
    service: Option<LayoutField>,
    identifiers: Vec<LayoutField>,
    power: Option<LayoutField>,
    data: Vec<LayoutField>,
}

impl BeaconLayout {
    /// Parse a layout spec string.
    pub fn parse(spec: &str) -> Result<Self> {
        let terms: Vec<&str> = spec
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();
        if terms.is_empty() {
            return Err(BeaconError::layout(spec, "layout is empty"));
        }

        let mut matcher = None;
        let mut service = None;
        let mut power = None;
        let mut identifiers = Vec::new();
        let mut data = Vec::new();

        for term in &terms {
            let field = parse_term(spec, term)?;
            match field.role {
                FieldRole::Matcher => {
                    if matcher.replace(field).is_some() {
                        return Err(BeaconError::layout(spec, "more than one 'm' term"));
                    }
                }
                FieldRole::ServiceUuid => {
                    if service.replace(field).is_some() {
                        return Err(BeaconError::layout(spec, "more than one 's' term"));
                    }
                }
                FieldRole::Power => {
                    if power.replace(field).is_some() {
                        return Err(BeaconError::layout(spec, "more than one 'p' term"));
                    }
                }
                FieldRole::Identifier => identifiers.push(field),
                FieldRole::Data => data.push(field),
            }
        }

        let matcher =
            matcher.ok_or_else(|| BeaconError::layout(spec, "missing 'm' matcher term"))?;
        if identifiers.is_empty() {
            return Err(BeaconError::layout(spec, "at least one 'i' term is required"));
        }

        let match_regions: Vec<&LayoutField> =
            std::iter::once(&matcher).chain(service.as_ref()).collect();
        let extracted = identifiers.iter().chain(power.iter()).chain(data.iter());
        for field in extracted {
            if let Some(region) = match_regions.iter().find(|m| m.overlaps(field)) {
                return Err(BeaconError::layout(
                    spec,
                    format!(
                        "{:?} field {}-{} overlaps match region {}-{}",
                        field.role, field.start, field.end, region.start, region.end
                    ),
                ));
            }
        }

        Ok(Self {
            spec: terms.join(","),
            matcher,
            service,
            identifiers,
            power,
            data,
        })
    }

    /// Normalized spec string this layout was parsed from
    pub fn spec(&self) -> &str {
        &self.spec
    }

    pub fn identifier_fields(&self) -> &[LayoutField] {
        &self.identifiers
    }

    /// Decode a frame, or `None` when the frame is not of this format.
    pub fn apply(&self, frame: &RawFrame) -> Option<Beacon> {
        let data = frame.data.as_slice();
        if !self.matcher.matches(data) {
            return None;
        }
        if let Some(service) = &self.service {
            if !service.matches(data) {
                return None;
            }
        }

        let identifiers = self
            .identifiers
            .iter()
            .map(|f| f.slice(data).map(|b| Identifier::from_bytes(b, f.little_endian)))
            .collect::<Option<Vec<_>>>()?;

        let raw_power = match &self.power {
            Some(p) => {
                let byte = *data.get(p.start)?;
                i32::from(byte as i8) + p.power_adjustment
            }
            None => DEFAULT_REFERENCE_POWER,
        };

        let data_fields = self
            .data
            .iter()
            .map(|f| f.slice(data).map(|b| read_unsigned(b, f.little_endian)))
            .collect::<Option<Vec<_>>>()?;

        let service_uuid = self
            .service
            .as_ref()
            .and_then(|s| s.slice(data))
            .map(|b| Identifier::from_bytes(b, false));

        Some(Beacon {
            identifiers,
            rssi: frame.rssi,
            raw_power,
            distance: None,
            data_fields,
            service_uuid,
            bluetooth_address: frame.address.clone(),
        })
    }
}

/// Ordered, de-duplicated set of active layouts
#[derive(Debug, Clone, Default)]
pub struct LayoutRegistry {
    layouts: Vec<Arc<BeaconLayout>>,
}

impl LayoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding only the iBeacon layout
    pub fn with_default_layout() -> Self {
        let mut registry = Self::new();
        if let Ok(layout) = BeaconLayout::parse(IBEACON_LAYOUT) {
            registry.insert(layout);
        }
        registry
    }

    /// Register a layout. Returns `false` when an equal layout was already present.
    pub fn register(&mut self, spec: &str) -> Result<bool> {
        let layout = BeaconLayout::parse(spec)?;
        Ok(self.insert(layout))
    }

    /// Remove a layout by value. Returns `false` when it was not registered.
    pub fn unregister(&mut self, spec: &str) -> Result<bool> {
        let layout = BeaconLayout::parse(spec)?;
        Ok(self.remove(&layout))
    }

    /// Register several layouts; nothing changes if any spec is malformed.
    pub fn register_all<S: AsRef<str>>(&mut self, specs: &[S]) -> Result<usize> {
        let parsed = specs
            .iter()
            .map(|s| BeaconLayout::parse(s.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(parsed.into_iter().filter(|l| self.insert(l.clone())).count())
    }

    /// Remove several layouts; nothing changes if any spec is malformed.
    pub fn unregister_all<S: AsRef<str>>(&mut self, specs: &[S]) -> Result<usize> {
        let parsed = specs
            .iter()
            .map(|s| BeaconLayout::parse(s.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(parsed.iter().filter(|l| self.remove(l)).count())
    }

    fn insert(&mut self, layout: BeaconLayout) -> bool {
        if self.layouts.iter().any(|l| **l == layout) {
            return false;
        }
        self.layouts.push(Arc::new(layout));
        true
    }

    fn remove(&mut self, layout: &BeaconLayout) -> bool {
        let before = self.layouts.len();
        self.layouts.retain(|l| **l != *layout);
        self.layouts.len() != before
    }

    /// Decode a frame with the first matching layout.
    pub fn apply(&self, frame: &RawFrame) -> Option<Beacon> {
        apply_layouts(&self.layouts, frame)
    }

    /// Cheap copy of the current layouts for use outside the lock
    pub fn snapshot(&self) -> Vec<Arc<BeaconLayout>> {
        self.layouts.clone()
    }

    pub fn specs(&self) -> Vec<String> {
        self.layouts.iter().map(|l| l.spec().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }
}

/// Decode a frame with the first layout in `layouts` that matches it.
pub fn apply_layouts(layouts: &[Arc<BeaconLayout>], frame: &RawFrame) -> Option<Beacon> {
    layouts.iter().find_map(|layout| layout.apply(frame))
}

fn parse_term(spec: &str, term: &str) -> Result<LayoutField> {
    let (tag, body) = term
        .split_once(':')
        .ok_or_else(|| BeaconError::layout(spec, format!("term '{term}' has no ':'")))?;
    let role = match tag.trim() {
        "m" => FieldRole::Matcher,
        "s" => FieldRole::ServiceUuid,
        "i" => FieldRole::Identifier,
        "p" => FieldRole::Power,
        "d" => FieldRole::Data,
        other => {
            return Err(BeaconError::layout(
                spec,
                format!("unknown field tag '{other}'"),
            ))
        }
    };

    let body = body.trim();
    let (start_str, rest) = body
        .split_once('-')
        .ok_or_else(|| BeaconError::layout(spec, format!("term '{term}' has no byte range")))?;
    let end_len = rest.chars().take_while(char::is_ascii_digit).count();
    let (end_str, suffix) = rest.split_at(end_len);

    let offset = |s: &str| -> Result<usize> {
        s.parse::<usize>().map_err(|_| {
            BeaconError::layout(spec, format!("non-numeric offset '{s}' in term '{term}'"))
        })
    };
    let start = offset(start_str)?;
    let end = offset(end_str)?;
    if end < start {
        return Err(BeaconError::layout(
            spec,
            format!("end offset {end} precedes start offset {start} in term '{term}'"),
        ));
    }
    if end > MAX_LAYOUT_OFFSET {
        return Err(BeaconError::layout(
            spec,
            format!("end offset {end} exceeds {MAX_LAYOUT_OFFSET} in term '{term}'"),
        ));
    }

    let mut field = LayoutField {
        role,
        start,
        end,
        little_endian: false,
        match_bytes: None,
        power_adjustment: 0,
    };

    match role {
        FieldRole::Matcher | FieldRole::ServiceUuid => {
            let hex_str = suffix.strip_prefix('=').ok_or_else(|| {
                BeaconError::layout(spec, format!("term '{term}' needs '=<hex>' match bytes"))
            })?;
            let bytes = hex::decode(hex_str)
                .map_err(|e| BeaconError::layout(spec, format!("bad match bytes: {e}")))?;
            if bytes.len() != field.len() {
                return Err(BeaconError::layout(
                    spec,
                    format!(
                        "match bytes are {} long but range {start}-{end} is {}",
                        bytes.len(),
                        field.len()
                    ),
                ));
            }
            field.match_bytes = Some(bytes);
        }
        FieldRole::Identifier | FieldRole::Data => match suffix {
            "" => {}
            "l" => field.little_endian = true,
            other => {
                return Err(BeaconError::layout(
                    spec,
                    format!("unsupported suffix '{other}' in term '{term}'"),
                ))
            }
        },
        FieldRole::Power => {
            if field.len() != 1 {
                return Err(BeaconError::layout(spec, "power field must be one byte"));
            }
            if let Some(adj) = suffix.strip_prefix(':') {
                field.power_adjustment = adj.parse().map_err(|_| {
                    BeaconError::layout(spec, format!("non-numeric power adjustment '{adj}'"))
                })?;
            } else if !suffix.is_empty() {
                return Err(BeaconError::layout(
                    spec,
                    format!("unsupported suffix '{suffix}' in term '{term}'"),
                ));
            }
        }
    }

    if role == FieldRole::Data && field.len() > MAX_DATA_FIELD_BYTES {
        return Err(BeaconError::layout(
            spec,
            format!("data field '{term}' is wider than {MAX_DATA_FIELD_BYTES} bytes"),
        ));
    }

    Ok(field)
}

fn read_unsigned(bytes: &[u8], little_endian: bool) -> u64 {
    let fold = |acc: u64, b: &u8| (acc << 8) | u64::from(*b);
    if little_endian {
        bytes.iter().rev().fold(0, fold)
    } else {
        bytes.iter().fold(0, fold)
    }
}

mod opt_hex {
    use serde::Serializer;

    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(b) => serializer.serialize_str(&hex::encode(b)),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const UUID: &str = "2f234454-cf6d-4a0f-adf2-f4911ba9ffa6";

    fn ibeacon_frame(major: u16, minor: u16, power: i8, rssi: i32) -> RawFrame {
        let mut data = vec![0x4c, 0x00, 0x02, 0x15];
        data.extend_from_slice(Identifier::parse(UUID).unwrap().to_bytes().as_slice());
        data.extend_from_slice(&major.to_be_bytes());
        data.extend_from_slice(&minor.to_be_bytes());
        data.push(power as u8);
        RawFrame::new(data, rssi)
    }

    #[test]
    fn test_parse_ibeacon_layout() {
        let layout = BeaconLayout::parse(IBEACON_LAYOUT).unwrap();
        assert_eq!(layout.identifier_fields().len(), 3);
        assert_eq!(layout.spec(), IBEACON_LAYOUT);
    }

    #[test]
    fn test_builtin_layouts_parse() {
        for spec in [IBEACON_LAYOUT, ALTBEACON_LAYOUT, EDDYSTONE_UID_LAYOUT] {
            assert!(BeaconLayout::parse(spec).is_ok(), "{spec} should parse");
        }
    }

    #[test]
    fn test_apply_ibeacon_frame() {
        let layout = BeaconLayout::parse(IBEACON_LAYOUT).unwrap();
        let beacon = layout.apply(&ibeacon_frame(1, 2, -59, -70)).unwrap();

        assert_eq!(
            beacon.identifiers,
            vec![
                Identifier::parse(UUID).unwrap(),
                Identifier::Int(1),
                Identifier::Int(2)
            ]
        );
        assert_eq!(beacon.raw_power, -59);
        assert_eq!(beacon.rssi, -70);
        assert_eq!(beacon.distance, None);
    }

    #[test]
    fn test_apply_rejects_other_formats() {
        let layout = BeaconLayout::parse(IBEACON_LAYOUT).unwrap();
        let mut frame = ibeacon_frame(1, 2, -59, -70);
        frame.data[0] = 0x00;
        assert!(layout.apply(&frame).is_none());
    }

    #[test]
    fn test_apply_short_frame_is_dropped() {
        let layout = BeaconLayout::parse(IBEACON_LAYOUT).unwrap();
        let mut frame = ibeacon_frame(1, 2, -59, -70);
        frame.data.truncate(22);
        assert!(layout.apply(&frame).is_none());
    }

    #[test]
    fn test_eddystone_power_adjustment_and_service() {
        let layout = BeaconLayout::parse(EDDYSTONE_UID_LAYOUT).unwrap();
        let mut data = vec![0xfe, 0xaa, 0x00, 0xee_u8];
        data.extend((0..16).map(|i| i as u8));
        let beacon = layout.apply(&RawFrame::new(data, -80)).unwrap();

        // 0xee is -18 dBm at zero meters, shifted by -41 to one meter
        assert_eq!(beacon.raw_power, -18 - 41);
        assert_eq!(beacon.identifiers.len(), 2);
        assert_eq!(
            beacon.identifiers[0],
            Identifier::Bytes((0..10).map(|i| i as u8).collect())
        );
        assert_eq!(beacon.service_uuid, Some(Identifier::Int(0xfeaa)));
    }

    #[test]
    fn test_little_endian_and_data_fields() {
        let layout = BeaconLayout::parse("m:0-0=aa,i:1-2l,d:3-4,d:5-6l").unwrap();
        let frame = RawFrame::new(vec![0xaa, 0x01, 0x02, 0x00, 0x10, 0x10, 0x00], -50);
        let beacon = layout.apply(&frame).unwrap();
        assert_eq!(beacon.identifiers, vec![Identifier::Int(0x0201)]);
        assert_eq!(beacon.data_fields, vec![0x10, 0x10]);
        assert_eq!(beacon.raw_power, DEFAULT_REFERENCE_POWER);
    }

    #[test]
    fn test_invalid_layouts() {
        let cases = [
            "",
            "x:0-1",
            "q:0-3=4c000215,i:4-19",
            "m:a-3=4c000215,i:4-19",
            "m:0-b=4c000215,i:4-19",
            "m:3-0=4c000215,i:4-19",
            "m:0-3,i:4-19",
            "m:0-3=4c00,i:4-19",
            "m:0-3=zz000215,i:4-19",
            "i:4-19,p:24-24",
            "m:0-3=4c000215",
            "m:0-3=4c000215,i:2-19",
            "m:0-3=4c000215,i:4-19,p:3-3",
            "m:0-3=4c000215,m:0-3=4c000215,i:4-19",
            "m:0-3=4c000215,i:4-19v",
            "m:0-3=4c000215,i:4-19,p:24-25",
            "m:0-3=4c000215,i:4-19,p:24-24:x",
            "m:0-3=4c000215,i:4-19,d:20-29",
            "m:0-3=4c000215,i4-19",
            "m:0-18446744073709551615=aa,i:1-2",
            "m:0-3=4c000215,i:4-256",
        ];
        for spec in cases {
            let err = BeaconLayout::parse(spec).unwrap_err();
            assert!(
                matches!(err, BeaconError::InvalidLayout { .. }),
                "{spec} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = LayoutRegistry::new();
        assert!(registry.register(IBEACON_LAYOUT).unwrap());
        assert!(!registry.register(IBEACON_LAYOUT).unwrap());
        // Whitespace differences normalize away
        assert!(!registry
            .register(" m:0-3=4c000215, i:4-19,i:20-21,i:22-23,p:24-24")
            .unwrap());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister() {
        let mut registry = LayoutRegistry::with_default_layout();
        assert!(!registry.unregister(ALTBEACON_LAYOUT).unwrap());
        assert!(registry.unregister(IBEACON_LAYOUT).unwrap());
        assert!(registry.is_empty());
        assert!(!registry.unregister(IBEACON_LAYOUT).unwrap());
        assert!(registry.unregister("bogus").is_err());
    }

    #[test]
    fn test_failed_register_leaves_registry_untouched() {
        let mut registry = LayoutRegistry::with_default_layout();
        assert!(registry.register("m:0-3=4c000215,i:1-19").is_err());
        assert_eq!(registry.specs(), vec![IBEACON_LAYOUT.to_string()]);

        let batch = [ALTBEACON_LAYOUT, "nonsense"];
        assert!(registry.register_all(&batch).is_err());
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.register_all(&[ALTBEACON_LAYOUT, IBEACON_LAYOUT]).unwrap(), 1);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.unregister_all(&[ALTBEACON_LAYOUT]).unwrap(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_apply_uses_first_match() {
        let mut registry = LayoutRegistry::new();
        registry.register(ALTBEACON_LAYOUT).unwrap();
        registry.register(IBEACON_LAYOUT).unwrap();
        let beacon = registry.apply(&ibeacon_frame(5, 6, -60, -65)).unwrap();
        assert_eq!(beacon.identifiers[1], Identifier::Int(5));
        assert!(registry.apply(&RawFrame::new(vec![1, 2, 3], -40)).is_none());
    }

    proptest! {
        #[test]
        fn prop_apply_extracts_declared_fields(
            ids in proptest::collection::vec(1usize..6, 1..4),
            power in any::<i8>(),
            fill in any::<u8>(),
        ) {
            // Build "m:0-1=beef,i:<..>,...,p:<n>-<n>" with consecutive identifier ranges
            let mut terms = vec!["m:0-1=beef".to_string()];
            let mut offset = 2;
            for len in &ids {
                terms.push(format!("i:{}-{}", offset, offset + len - 1));
                offset += len;
            }
            terms.push(format!("p:{offset}-{offset}"));
            let spec = terms.join(",");

            let mut data = vec![0xbe, 0xef];
            let mut expected = Vec::new();
            for (n, len) in ids.iter().enumerate() {
                let bytes: Vec<u8> = (0..*len).map(|k| fill.wrapping_add((n * 7 + k) as u8)).collect();
                expected.push(Identifier::from_bytes(&bytes, false));
                data.extend(bytes);
            }
            data.push(power as u8);

            let mut registry = LayoutRegistry::new();
            registry.register(&spec).unwrap();
            let beacon = registry.apply(&RawFrame::new(data, -60)).unwrap();
            prop_assert_eq!(beacon.identifiers, expected);
            prop_assert_eq!(beacon.raw_power, i32::from(power));
        }
    }
}
