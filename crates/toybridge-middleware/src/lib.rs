//! `toybridge-middleware` – where signal samples come from.
//!
//! The bridge pulls `(address, value)` samples one at a time, without
//! blocking, from a [`SignalSource`].  It does not care about the wire
//! format behind it.
//!
//! # Modules
//!
//! - [`source`] – the [`SignalSource`] trait and [`QueueSource`], an
//!   in-memory FIFO used for tests and replays.
//! - [`osc`] – [`OscReceiver`]: a non-blocking OSC-over-UDP listener that
//!   decodes avatar parameter messages.

pub mod osc;
pub mod source;

pub use osc::{OscReceiver, decode_message};
pub use source::{QueueSender, QueueSource, SignalSource};
