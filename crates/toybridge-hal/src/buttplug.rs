//! Buttplug devices through an embedded, in-process Buttplug server.
//!
//! The server owns the Bluetooth scan; the driver only sees named devices.
//! Buttplug speaks in fractions of full power, so native values are divided
//! by the axis' full-scale step count before they go out:
//!
//! | Capability | Buttplug command | Full scale |
//! |---|---|---|
//! | vibration | `ScalarCmd` (vibrate) | [`VIBRATE_FULL_SCALE`] |
//! | rotation | `RotateCmd`, clockwise | [`ROTATE_FULL_SCALE`] |
//! | linear / pump | `LinearCmd` over `move_speed` ms | [`LINEAR_FULL_SCALE`] |
//! | stop-all | `StopDeviceCmd` | – |
//!
//! The driver itself is only built with the `buttplug` feature; its BLE
//! backend needs the platform Bluetooth stack (D-Bus on Linux).

use std::time::Duration;

/// Native vibration steps that mean full power.
pub const VIBRATE_FULL_SCALE: u32 = 20;
/// Native rotation steps that mean full speed.
pub const ROTATE_FULL_SCALE: u32 = 20;
/// Native pump steps that mean a fully extended stroke.
pub const LINEAR_FULL_SCALE: u32 = 3;

/// Embedded-client tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtplugSettings {
    /// How long discovery keeps the Bluetooth scan open.
    pub scan_window: Duration,
    /// Duration of each linear stroke, in milliseconds.
    pub move_speed_ms: u32,
}

impl Default for ButtplugSettings {
    fn default() -> Self {
        Self {
            scan_window: Duration::from_secs(5),
            move_speed_ms: 500,
        }
    }
}

/// `native / full_scale`, clamped to `0.0..=1.0`.
pub fn power_fraction(native: u32, full_scale: u32) -> f64 {
    if full_scale == 0 {
        return 0.0;
    }
    (f64::from(native) / f64::from(full_scale)).clamp(0.0, 1.0)
}

#[cfg(feature = "buttplug")]
pub use embedded::ButtplugDriver;

#[cfg(feature = "buttplug")]
mod embedded {
    use std::sync::Arc;

    use ::buttplug::client::{
        ButtplugClient, ButtplugClientDevice, LinearCommand, RotateCommand, ScalarValueCommand,
    };
    use ::buttplug::core::connector::ButtplugInProcessClientConnectorBuilder;
    use ::buttplug::server::ButtplugServerBuilder;
    use ::buttplug::server::device::hardware::communication::btleplug::BtlePlugCommunicationManagerBuilder;
    use async_trait::async_trait;
    use toybridge_types::{BridgeError, ToyId};
    use tracing::{debug, info};

    use super::{
        ButtplugSettings, LINEAR_FULL_SCALE, ROTATE_FULL_SCALE, VIBRATE_FULL_SCALE, power_fraction,
    };
    use crate::driver::{ActuatorDriver, Protocol};

    const CLIENT_NAME: &str = "toybridge";

    /// Driver for devices found by an in-process Buttplug server.
    ///
    /// The client connects lazily on the first [`discover`] call, so building
    /// the driver never touches Bluetooth.
    ///
    /// [`discover`]: ActuatorDriver::discover
    pub struct ButtplugDriver {
        client: ButtplugClient,
        settings: ButtplugSettings,
        devices: Vec<Arc<ButtplugClientDevice>>,
    }

    impl ButtplugDriver {
        pub fn new(settings: ButtplugSettings) -> Self {
            Self {
                client: ButtplugClient::new(CLIENT_NAME),
                settings,
                devices: Vec::new(),
            }
        }

        pub fn settings(&self) -> ButtplugSettings {
            self.settings
        }

        async fn connect(&self) -> Result<(), BridgeError> {
            if self.client.connected() {
                return Ok(());
            }
            let mut server = ButtplugServerBuilder::default();
            server.comm_manager(BtlePlugCommunicationManagerBuilder::default());
            let server = server
                .finish()
                .map_err(|e| BridgeError::Discovery(format!("cannot start Buttplug server: {e}")))?;
            let connector = ButtplugInProcessClientConnectorBuilder::default()
                .server(server)
                .finish();
            self.client
                .connect(connector)
                .await
                .map_err(|e| BridgeError::Discovery(format!("cannot connect Buttplug client: {e}")))
        }

        fn lookup(&self, toy: &ToyId) -> Result<&Arc<ButtplugClientDevice>, BridgeError> {
            self.devices
                .iter()
                .find(|d| d.name().as_str() == toy.as_str())
                .ok_or_else(|| BridgeError::Disconnected(toy.clone()))
        }

        fn rejected(toy: &ToyId, e: impl std::fmt::Display) -> BridgeError {
            BridgeError::Rejected {
                toy: toy.clone(),
                details: e.to_string(),
            }
        }
    }

    #[async_trait]
    impl ActuatorDriver for ButtplugDriver {
        fn protocol(&self) -> Protocol {
            Protocol::Buttplug
        }

        async fn discover(&mut self) -> Result<Vec<ToyId>, BridgeError> {
            self.connect().await?;
            self.client
                .start_scanning()
                .await
                .map_err(|e| BridgeError::Discovery(format!("cannot start scanning: {e}")))?;
            tokio::time::sleep(self.settings.scan_window).await;
            self.client
                .stop_scanning()
                .await
                .map_err(|e| BridgeError::Discovery(format!("cannot stop scanning: {e}")))?;

            self.devices = self.client.devices();
            for device in &self.devices {
                info!(toy = %device.name(), "buttplug device found");
            }
            Ok(self.devices.iter().map(|d| ToyId::new(d.name().clone())).collect())
        }

        fn is_connected(&self, toy: &ToyId) -> bool {
            self.lookup(toy).is_ok_and(|d| d.connected())
        }

        async fn set_vibration(&self, toy: &ToyId, value: u32) -> Result<(), BridgeError> {
            let speed = power_fraction(value, VIBRATE_FULL_SCALE);
            self.lookup(toy)?
                .vibrate(&ScalarValueCommand::ScalarValue(speed))
                .await
                .map_err(|e| Self::rejected(toy, e))
        }

        async fn set_rotation(&self, toy: &ToyId, value: u32) -> Result<(), BridgeError> {
            let speed = power_fraction(value, ROTATE_FULL_SCALE);
            self.lookup(toy)?
                .rotate(&RotateCommand::Rotate(speed, true))
                .await
                .map_err(|e| Self::rejected(toy, e))
        }

        async fn set_linear(&self, toy: &ToyId, value: u32) -> Result<(), BridgeError> {
            let position = power_fraction(value, LINEAR_FULL_SCALE);
            self.lookup(toy)?
                .linear(&LinearCommand::Linear(self.settings.move_speed_ms, position))
                .await
                .map_err(|e| Self::rejected(toy, e))
        }

        async fn stop_all(&self, toy: &ToyId) -> Result<(), BridgeError> {
            debug!(toy = %toy, "buttplug stop");
            self.lookup(toy)?
                .stop()
                .await
                .map_err(|e| Self::rejected(toy, e))
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_values_scale_to_power_fractions() {
        assert_eq!(power_fraction(0, VIBRATE_FULL_SCALE), 0.0);
        assert_eq!(power_fraction(10, VIBRATE_FULL_SCALE), 0.5);
        assert_eq!(power_fraction(20, ROTATE_FULL_SCALE), 1.0);
        assert_eq!(power_fraction(1, LINEAR_FULL_SCALE), 1.0 / 3.0);
    }

    #[test]
    fn out_of_range_values_saturate() {
        assert_eq!(power_fraction(45, VIBRATE_FULL_SCALE), 1.0);
        assert_eq!(power_fraction(7, 0), 0.0);
    }

    #[test]
    fn default_settings() {
        let settings = ButtplugSettings::default();
        assert_eq!(settings.scan_window, Duration::from_secs(5));
        assert_eq!(settings.move_speed_ms, 500);
    }
}
