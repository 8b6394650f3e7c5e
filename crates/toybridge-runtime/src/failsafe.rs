//! [`FailsafeTimer`] – silence-based auto-stop.
//!
//! The signal source never says "stop"; it just goes quiet.  Once per tick
//! the timer ages every channel that did not receive a sample, and any
//! channel that has been silent for `threshold` ticks while still active is
//! reset and handed back to the caller to be stopped.
//!
//! The local reset happens before the stop is dispatched and is not undone
//! if that dispatch fails: a dead actuator endpoint is not retried every
//! tick, and the next live sample re-establishes state.

use toybridge_types::ToyChannel;

use crate::channel_state::{ChannelState, ChannelStates};

#[derive(Debug, Clone, Copy)]
pub struct FailsafeTimer {
    threshold: u32,
}

impl FailsafeTimer {
    /// `threshold` is the number of silent ticks that trips the failsafe.
    /// Values below 1 are raised to 1.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Run one pass.  `observed` is the channel that received a sample this
    /// tick, if any.  Returns the channels that must now be stopped; their
    /// state has already been reset.
    pub fn tick(&self, states: &mut ChannelStates, observed: Option<&ToyChannel>) -> Vec<ToyChannel> {
        let mut tripped = Vec::new();
        for (channel, state) in states.iter_mut() {
            if observed == Some(channel) {
                continue;
            }
            state.silence_ticks = state.silence_ticks.saturating_add(1);
            if state.silence_ticks >= self.threshold && state.active {
                *state = ChannelState::default();
                tripped.push(channel.clone());
            }
        }
        tripped
    }
}
