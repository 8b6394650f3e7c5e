//! The `ActuatorDriver` capability trait.
//!
//! Drivers own their transport (local HTTP, embedded Buttplug, …), their
//! discovery, and their notion of which toys are currently reachable.  The
//! runtime only ever talks to this trait, so families can be swapped without
//! touching the bridge logic.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use toybridge_types::{ActuatorRequest, Axis, BridgeError, ToyId};

/// Actuator families the bridge knows how to build a driver for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Lovense,
    /// Devices reached through an embedded Buttplug client.
    Buttplug,
    Simulated,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Lovense => write!(f, "lovense"),
            Protocol::Buttplug => write!(f, "buttplug"),
            Protocol::Simulated => write!(f, "simulated"),
        }
    }
}

/// One actuator family's capability interface.
///
/// Each call is request/response.  Anything other than `Ok(())` is treated
/// by the bridge as a failed dispatch.
#[async_trait]
pub trait ActuatorDriver: Send + Sync {
    /// The family this driver serves.
    fn protocol(&self) -> Protocol;

    /// Scan for reachable toys and refresh the driver's identity cache.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Discovery`] or [`BridgeError::Transport`] if
    /// the scan itself could not be performed.
    async fn discover(&mut self) -> Result<Vec<ToyId>, BridgeError>;

    /// `false` if the driver currently reports `toy` as disconnected or
    /// unknown.  Must not perform I/O.
    fn is_connected(&self, toy: &ToyId) -> bool;

    async fn set_vibration(&self, toy: &ToyId, value: u32) -> Result<(), BridgeError>;

    async fn set_rotation(&self, toy: &ToyId, value: u32) -> Result<(), BridgeError>;

    /// Drive the linear / air-pump axis.
    async fn set_linear(&self, toy: &ToyId, value: u32) -> Result<(), BridgeError>;

    /// Bring every axis of `toy` to rest.
    async fn stop_all(&self, toy: &ToyId) -> Result<(), BridgeError>;

    /// Route `request` to the capability matching its axis.
    async fn send(&self, request: &ActuatorRequest) -> Result<(), BridgeError> {
        match request.axis {
            Axis::Vibrate => self.set_vibration(&request.toy, request.native_value).await,
            Axis::Rotate => self.set_rotation(&request.toy, request.native_value).await,
            Axis::Pump => self.set_linear(&request.toy, request.native_value).await,
        }
    }
}
