//! `toybridge-runtime` – the bridge core.
//!
//! Turns a stream of signal samples into a bounded, deduplicated stream of
//! actuator commands, and stops any actuator the stream forgets about.
//!
//! # Modules
//!
//! - [`mapper`] – [`SignalMapper`][mapper::SignalMapper]: resolves a sample
//!   address to one [`ToyChannel`][toybridge_types::ToyChannel] and quantizes
//!   the value into the actuator's native scale.
//! - [`channel_state`] – [`ChannelStates`][channel_state::ChannelStates]:
//!   last sent value, silence counter and active flag per channel, plus the
//!   local dedup check.
//! - [`failsafe`] – [`FailsafeTimer`][failsafe::FailsafeTimer]: silence-based
//!   auto-stop.
//! - [`command_channel`] – [`CommandChannel`][command_channel::CommandChannel]:
//!   single-flight, deduplicating, time-bounded dispatch to one endpoint.
//! - [`downsample`] – [`Downsampler`][downsample::Downsampler]: throughput
//!   control after each accepted dispatch.
//! - [`bridge_loop`] – [`BridgeLoop`][bridge_loop::BridgeLoop]: the
//!   single-threaded loop wiring all of the above to a
//!   [`SignalSource`][toybridge_middleware::SignalSource].
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console or
//!   JSON `tracing` output.
//!
//! # Concurrency
//!
//! Everything here runs on one logical thread.  `ChannelStates` is owned by
//! the loop; the command channel's state sits behind a mutex only so that the
//! in-flight flag can be cleared from a drop guard.

pub mod bridge_loop;
pub mod channel_state;
pub mod command_channel;
pub mod downsample;
pub mod failsafe;
pub mod mapper;
pub mod telemetry;

pub use bridge_loop::{BridgeLoop, BridgeSettings, BridgeStats, LoopPhase, TickReport};
pub use channel_state::{ChannelState, ChannelStates};
pub use command_channel::{
    CommandChannel, CommandChannelSettings, CommandChannelState, DispatchOutcome, SkipReason,
};
pub use downsample::Downsampler;
pub use failsafe::FailsafeTimer;
pub use mapper::{AxisScale, ChannelSpec, Mapped, Rounding, SignalMapper};
