//! Shared event types
//!
//! Defines the raw key-transition contract produced by event sources and
//! the structured diagnostic events emitted on the side channel while the
//! ledgers run.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// The kind of transition a key event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEdge {
    /// Key went down
    Down,
    /// Autorepeat while the key stays down
    Repeat,
    /// Key was released
    Up,
}

/// One observed hardware key event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyTransition {
    /// Stable key identifier, e.g. "KEY_A"
    pub key: String,
    /// Transition kind
    pub edge: KeyEdge,
    /// Event timestamp in seconds
    pub timestamp: f64,
}

impl KeyTransition {
    pub fn new(key: impl Into<String>, edge: KeyEdge, timestamp: f64) -> Self {
        Self {
            key: key.into(),
            edge,
            timestamp,
        }
    }
}

/// Current time in seconds, on the same clock evdev stamps events with
pub fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Diagnostic events broadcast by ledgers and sessions
///
/// These are observability output, not control flow: every variant is
/// non-fatal and sending to a channel with no receivers is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiagnosticEvent {
    /// An up-edge arrived for a key that was never tracked as down
    UntrackedRelease {
        /// Ledger/device name
        device: String,
        /// The released key
        key: String,
        /// Event timestamp in seconds
        timestamp: f64,
    },

    /// A device's event source stopped being readable
    DeviceFault {
        /// Session name
        device: String,
        /// Human-readable fault description
        detail: String,
    },

    /// A completed macro key was handed to the consumer
    MacroKeyReady {
        /// Session name
        device: String,
        /// Serialized macro-key token
        token: String,
    },
}

impl std::fmt::Display for DiagnosticEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiagnosticEvent::UntrackedRelease { device, key, .. } => {
                write!(f, "UNTRACKED_RELEASE {device}: {key}")
            }
            DiagnosticEvent::DeviceFault { device, detail } => {
                write!(f, "DEVICE_FAULT {device}: {detail}")
            }
            DiagnosticEvent::MacroKeyReady { device, token } => {
                write!(f, "MACRO_KEY_READY {device}: {token}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_serialization() {
        let event = DiagnosticEvent::UntrackedRelease {
            device: "numpad".to_string(),
            key: "KEY_KP5".to_string(),
            timestamp: 12.5,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("untracked_release"));
        assert!(json.contains("KEY_KP5"));
    }

    #[test]
    fn test_diagnostic_deserialization() {
        let json = r#"{"type":"macro_key_ready","device":"numpad","token":"KEY_A-KEY_B"}"#;
        let event: DiagnosticEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, DiagnosticEvent::MacroKeyReady { .. }));
    }

    #[test]
    fn test_transition_roundtrip() {
        let t = KeyTransition::new("KEY_A", KeyEdge::Down, 1.0);
        let json = serde_json::to_string(&t).unwrap();
        let back: KeyTransition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
