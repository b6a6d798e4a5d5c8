//! Beacon and region identifier fields
//!
//! An identifier is either an opaque byte string (UUIDs, namespaces, instance
//! ids) or a small unsigned integer (major/minor). Values are immutable once
//! parsed and compare by exact value within the same tag; region matching
//! uses [`Identifier::same_value`], which also equates short hex and integers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{BeaconError, Result};

/// Byte length rendered in UUID form
const UUID_LEN: usize = 16;

/// Fields up to this many bytes are decoded as integers
const MAX_INT_BYTES: usize = 2;

/// A single identifier field of a beacon or region
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    /// Opaque byte sequence
    Bytes(Vec<u8>),
    /// Unsigned integer field (major, minor, ...)
    Int(u16),
}

impl Identifier {
    /// Parse an identifier from its textual form.
    ///
    /// Accepted inputs:
    /// - `0x`-prefixed hex with an even number of digits
    /// - a hyphenated UUID, or 32 bare hex digits
    /// - a decimal integer in `0..=65535`
    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim();
        if s.is_empty() {
            return Err(BeaconError::parse(input, "identifier is empty"));
        }

        if let Some(digits) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            if digits.is_empty() {
                return Err(BeaconError::parse(input, "no hex digits after 0x"));
            }
            if digits.len() % 2 != 0 {
                return Err(BeaconError::parse(input, "odd number of hex digits"));
            }
            let bytes =
                hex::decode(digits).map_err(|e| BeaconError::parse(input, e.to_string()))?;
            return Ok(Self::Bytes(bytes));
        }

        let looks_like_uuid = (s.len() == 36 && s.contains('-'))
            || (s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit()));
        if looks_like_uuid {
            let uuid = Uuid::parse_str(s).map_err(|e| BeaconError::parse(input, e.to_string()))?;
            return Ok(Self::Bytes(uuid.as_bytes().to_vec()));
        }

        if s.chars().all(|c| c.is_ascii_digit()) {
            let value: u32 = s
                .parse()
                .map_err(|_| BeaconError::parse(input, "integer out of range"))?;
            return u16::try_from(value)
                .map(Self::Int)
                .map_err(|_| BeaconError::parse(input, "integer identifiers must be 0..=65535"));
        }

        Err(BeaconError::parse(
            input,
            "expected 0x-hex, a UUID, or a decimal integer",
        ))
    }

    /// Build an identifier from a field extracted out of a raw frame.
    ///
    /// One- and two-byte fields become integers so that they compare equal to
    /// decimal region filters; longer fields stay opaque.
    pub fn from_bytes(bytes: &[u8], little_endian: bool) -> Self {
        let mut ordered = bytes.to_vec();
        if little_endian {
            ordered.reverse();
        }
        if !ordered.is_empty() && ordered.len() <= MAX_INT_BYTES {
            let value = ordered
                .iter()
                .fold(0u16, |acc, b| (acc << 8) | u16::from(*b));
            Self::Int(value)
        } else {
            Self::Bytes(ordered)
        }
    }

    /// Integer value of the identifier, if it fits in two bytes.
    pub fn to_int(&self) -> Option<u16> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Bytes(b) if !b.is_empty() && b.len() <= MAX_INT_BYTES => {
                Some(b.iter().fold(0u16, |acc, x| (acc << 8) | u16::from(*x)))
            }
            Self::Bytes(_) => None,
        }
    }

    /// Value comparison across tags: `0x0001` and `1` name the same field.
    pub fn same_value(&self, other: &Identifier) -> bool {
        match (self, other) {
            (Self::Int(_), Self::Bytes(_)) | (Self::Bytes(_), Self::Int(_)) => {
                self.to_int().is_some() && self.to_int() == other.to_int()
            }
            _ => self == other,
        }
    }

    /// Raw bytes of the identifier (integers are big-endian, two bytes).
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Bytes(b) => b.clone(),
            Self::Int(v) => v.to_be_bytes().to_vec(),
        }
    }

    /// Canonical textual form; `parse` of this string yields `self` again.
    pub fn to_canonical_string(&self) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Bytes(b) if b.len() == UUID_LEN => Uuid::from_slice(b)
                .map(|u| u.hyphenated().to_string())
                .unwrap_or_else(|_| format!("0x{}", hex::encode(b))),
            Self::Bytes(b) => format!("0x{}", hex::encode(b)),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_canonical_string())
    }
}

impl FromStr for Identifier {
    type Err = BeaconError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Identifier {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_canonical_string())
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
