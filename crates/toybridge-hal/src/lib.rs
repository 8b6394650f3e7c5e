//! `toybridge-hal` – actuator drivers.
//!
//! The bridge never talks to a toy directly.  It holds a
//! [`ActuatorDriver`][driver::ActuatorDriver] per actuator family and calls
//! one of its four capabilities (vibration, rotation, linear/pump, stop-all).
//!
//! # Modules
//!
//! - [`driver`] – the [`ActuatorDriver`][driver::ActuatorDriver] capability
//!   trait every family implements.
//! - [`lovense`] – [`LovenseConnect`][lovense::LovenseConnect]: drives toys
//!   through the Lovense Connect local HTTP control surface.
//! - [`buttplug`] – `ButtplugDriver`: devices found by an embedded Buttplug
//!   server (behind the `buttplug` feature), plus its power scaling.
//! - [`sim`] – [`SimDriver`][sim::SimDriver]: an in-process driver that
//!   records commands, for dry runs and CI without physical hardware.

pub mod buttplug;
pub mod driver;
pub mod lovense;
pub mod sim;

#[cfg(feature = "buttplug")]
pub use self::buttplug::ButtplugDriver;
pub use self::buttplug::ButtplugSettings;
pub use driver::{ActuatorDriver, Protocol};
pub use lovense::LovenseConnect;
pub use sim::{SimAction, SimCommand, SimDriver};
