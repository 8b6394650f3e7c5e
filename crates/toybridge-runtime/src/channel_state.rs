//! Per-channel bookkeeping and the dedup policy.
//!
//! [`ChannelStates`] is owned by the bridge loop and never shared.  It keeps,
//! for every configured [`ToyChannel`], the last value that was actually
//! dispatched, how many ticks have passed without a sample, and whether the
//! channel is currently driving its actuator.
//!
//! Invariant: `active == false` implies `last_sent_value == 0`.

use std::collections::{BTreeMap, BTreeSet};

use toybridge_types::{ToyChannel, ToyId};

/// State of one [`ToyChannel`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelState {
    /// Last quantized value successfully dispatched, in native scale.
    pub last_sent_value: u32,
    /// Consecutive ticks without a sample for this channel.
    pub silence_ticks: u32,
    /// A nonzero value has been sent and not yet stopped.
    pub active: bool,
}

/// All channel states, keyed by channel.
#[derive(Debug, Clone, Default)]
pub struct ChannelStates {
    states: BTreeMap<ToyChannel, ChannelState>,
}

impl ChannelStates {
    pub fn new(channels: impl IntoIterator<Item = ToyChannel>) -> Self {
        Self {
            states: channels
                .into_iter()
                .map(|c| (c, ChannelState::default()))
                .collect(),
        }
    }

    pub fn get(&self, channel: &ToyChannel) -> Option<&ChannelState> {
        self.states.get(channel)
    }

    /// `true` iff `proposed` differs from the last value sent on `channel`.
    pub fn admit(&self, channel: &ToyChannel, proposed: u32) -> bool {
        let last = self.states.get(channel).map_or(0, |s| s.last_sent_value);
        proposed != last
    }

    /// A sample for `channel` arrived: the source is alive.
    pub fn mark_live(&mut self, channel: &ToyChannel) {
        if let Some(state) = self.states.get_mut(channel) {
            state.silence_ticks = 0;
        }
    }

    /// Record a dispatch the endpoint accepted.
    pub fn record_sent(&mut self, channel: &ToyChannel, value: u32) {
        if let Some(state) = self.states.get_mut(channel) {
            state.last_sent_value = value;
            state.active = value != 0;
        }
    }

    /// Return `channel` to its initial state.
    pub fn reset(&mut self, channel: &ToyChannel) {
        if let Some(state) = self.states.get_mut(channel) {
            *state = ChannelState::default();
        }
    }

    /// Toys with at least one active channel.
    pub fn active_toys(&self) -> BTreeSet<ToyId> {
        self.states
            .iter()
            .filter(|(_, s)| s.active)
            .map(|(c, _)| c.toy.clone())
            .collect()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&ToyChannel, &mut ChannelState)> {
        self.states.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toybridge_types::Axis;

    fn lush() -> ToyChannel {
        ToyChannel::new("Lush", Axis::Vibrate)
    }

    #[test]
    fn fresh_channel_rejects_zero_and_admits_nonzero() {
        let states = ChannelStates::new([lush()]);
        assert!(!states.admit(&lush(), 0));
        assert!(states.admit(&lush(), 4));
    }

    #[test]
    fn repeated_value_is_not_admitted() {
        let mut states = ChannelStates::new([lush()]);
        states.record_sent(&lush(), 7);
        assert!(!states.admit(&lush(), 7));
        assert!(states.admit(&lush(), 8));
        assert!(states.admit(&lush(), 0));
    }

    #[test]
    fn record_sent_tracks_active_flag() {
        let mut states = ChannelStates::new([lush()]);
        states.record_sent(&lush(), 3);
        assert!(states.get(&lush()).unwrap().active);

        states.record_sent(&lush(), 0);
        let state = states.get(&lush()).unwrap();
        assert!(!state.active);
        assert_eq!(state.last_sent_value, 0);
    }

    #[test]
    fn mark_live_clears_silence() {
        let mut states = ChannelStates::new([lush()]);
        for (_, state) in states.iter_mut() {
            state.silence_ticks = 9;
        }
        states.mark_live(&lush());
        assert_eq!(states.get(&lush()).unwrap().silence_ticks, 0);
    }

    #[test]
    fn active_toys_lists_each_toy_once() {
        let rotate = ToyChannel::new("Lush", Axis::Rotate);
        let nora = ToyChannel::new("Nora", Axis::Rotate);
        let mut states = ChannelStates::new([lush(), rotate.clone(), nora]);
        states.record_sent(&lush(), 2);
        states.record_sent(&rotate, 2);

        let toys: Vec<_> = states.active_toys().into_iter().collect();
        assert_eq!(toys, vec![ToyId::new("Lush")]);

        states.reset(&lush());
        states.reset(&rotate);
        assert!(states.active_toys().is_empty());
    }
}
