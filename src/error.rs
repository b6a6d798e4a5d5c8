//! Error types for the beacon engine

use thiserror::Error;

/// Errors that can occur while configuring or driving the engine
#[derive(Debug, Error)]
pub enum BeaconError {
    #[error("Failed to parse identifier '{input}': {reason}")]
    ParseError { input: String, reason: String },

    #[error("Invalid beacon layout '{layout}': {reason}")]
    InvalidLayout { layout: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported capability: {0}")]
    UnsupportedCapability(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid hex payload: {0}")]
    HexError(#[from] hex::FromHexError),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, BeaconError>;

impl BeaconError {
    pub(crate) fn parse(input: &str, reason: impl Into<String>) -> Self {
        Self::ParseError {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn layout(layout: &str, reason: impl Into<String>) -> Self {
        Self::InvalidLayout {
            layout: layout.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for malformed identifier or layout input.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::ParseError { .. } | Self::InvalidLayout { .. } | Self::HexError(_)
        )
    }

    /// Machine-readable code handed across the bridge.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ParseError { .. } => "ERROR_PARSE",
            Self::InvalidLayout { .. } => "ERROR_INVALID_LAYOUT",
            Self::InvalidConfig(_) => "ERROR_INVALID_CONFIG",
            Self::UnsupportedCapability(_) => "ERROR_UNSUPPORTED_CAPABILITY",
            Self::JsonError(_) => "ERROR_JSON",
            Self::HexError(_) => "ERROR_HEX",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_classification() {
        assert!(BeaconError::parse("zz", "bad").is_parse_error());
        assert!(BeaconError::layout("q:0-1", "unknown tag").is_parse_error());
        assert!(!BeaconError::InvalidConfig("id is required".into()).is_parse_error());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            BeaconError::InvalidConfig("x".into()).error_code(),
            "ERROR_INVALID_CONFIG"
        );
        assert_eq!(
            BeaconError::layout("m", "x").error_code(),
            "ERROR_INVALID_LAYOUT"
        );
    }

    #[test]
    fn test_display_mentions_input() {
        let err = BeaconError::parse("0x1", "odd number of hex digits");
        let msg = err.to_string();
        assert!(msg.contains("0x1"));
        assert!(msg.contains("odd number"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BeaconError>();
    }
}
