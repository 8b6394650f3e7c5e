//! `toybridge-types` – shared vocabulary for the signal-to-actuator bridge.
//!
//! Every other crate in the workspace speaks in these types: the signal
//! source produces [`Sample`]s, the runtime keys its state by [`ToyChannel`],
//! and the hardware layer receives [`ActuatorRequest`]s and reports failures
//! as [`BridgeError`].

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Identity of one physical actuator, as named in the channel table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToyId(String);

impl ToyId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ToyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ToyId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// One controllable dimension of an actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Vibrate,
    Rotate,
    /// Linear / air-pump axis.
    Pump,
}

impl Axis {
    /// All axes, in a stable order.
    pub const ALL: [Axis; 3] = [Axis::Vibrate, Axis::Rotate, Axis::Pump];
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Vibrate => write!(f, "vibrate"),
            Axis::Rotate => write!(f, "rotate"),
            Axis::Pump => write!(f, "pump"),
        }
    }
}

/// The pair (actuator identity, axis). Key for all per-channel state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ToyChannel {
    pub toy: ToyId,
    pub axis: Axis,
}

impl ToyChannel {
    pub fn new(toy: impl Into<ToyId>, axis: Axis) -> Self {
        Self {
            toy: toy.into(),
            axis,
        }
    }
}

impl fmt::Display for ToyChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.toy, self.axis)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Signals
// ─────────────────────────────────────────────────────────────────────────────

/// Value carried by one signal sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SignalValue {
    /// Continuous intensity, nominally in `[0, 1]`.
    Float(f32),
    /// Binary contact signal.
    Bool(bool),
}

/// One `(address, value)` update pulled from the signal source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub address: String,
    pub value: SignalValue,
}

impl Sample {
    pub fn float(address: impl Into<String>, value: f32) -> Self {
        Self {
            address: address.into(),
            value: SignalValue::Float(value),
        }
    }

    pub fn contact(address: impl Into<String>, value: bool) -> Self {
        Self {
            address: address.into(),
            value: SignalValue::Bool(value),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// A single command attempt addressed to one axis of one toy.
///
/// Constructed per dispatch attempt and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorRequest {
    pub toy: ToyId,
    pub axis: Axis,
    /// Intensity in the actuator's native integer scale.
    pub native_value: u32,
    pub timestamp: DateTime<Utc>,
}

impl ActuatorRequest {
    pub fn new(channel: &ToyChannel, native_value: u32) -> Self {
        Self {
            toy: channel.toy.clone(),
            axis: channel.axis,
            native_value,
            timestamp: Utc::now(),
        }
    }

    pub fn channel(&self) -> ToyChannel {
        ToyChannel::new(self.toy.clone(), self.axis)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Error type shared by drivers, signal sources, and the runtime.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Command rejected by {toy}: {details}")]
    Rejected { toy: ToyId, details: String },

    #[error("Toy {0} is disconnected or unknown")]
    Disconnected(ToyId),

    #[error("Actuator call timed out after {0:?}")]
    Timeout(Duration),

    #[error("No actuator endpoint serves toy {0}")]
    UnknownToy(ToyId),

    #[error("Discovery failed: {0}")]
    Discovery(String),

    #[error("Signal source error: {0}")]
    Signal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_serializes_lowercase() {
        let json = serde_json::to_string(&Axis::Pump).unwrap();
        assert_eq!(json, "\"pump\"");
        let back: Axis = serde_json::from_str("\"rotate\"").unwrap();
        assert_eq!(back, Axis::Rotate);
    }

    #[test]
    fn toy_id_is_transparent_in_json() {
        let json = serde_json::to_string(&ToyId::new("Lush")).unwrap();
        assert_eq!(json, "\"Lush\"");
    }

    #[test]
    fn toy_channel_display() {
        let ch = ToyChannel::new("Nora", Axis::Rotate);
        assert_eq!(ch.to_string(), "Nora/rotate");
    }

    #[test]
    fn request_carries_channel_identity() {
        let ch = ToyChannel::new("Max", Axis::Pump);
        let req = ActuatorRequest::new(&ch, 2);
        assert_eq!(req.channel(), ch);
        assert_eq!(req.native_value, 2);
    }

    #[test]
    fn bridge_error_display() {
        let err = BridgeError::Disconnected(ToyId::new("Edge"));
        assert!(err.to_string().contains("Edge"));
        let err = BridgeError::Timeout(Duration::from_millis(500));
        assert!(err.to_string().contains("timed out"));
    }
}
