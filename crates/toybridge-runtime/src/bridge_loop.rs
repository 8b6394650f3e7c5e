//! [`BridgeLoop`] – the single-threaded control loop.
//!
//! Each call to [`BridgeLoop::tick`]:
//!
//! 1. **Poll** – take at most one sample from the [`SignalSource`].  When
//!    nothing is waiting, sleep for the idle backoff instead.
//! 2. **Map** – resolve the sample through the [`SignalMapper`].  Unknown
//!    addresses are ignored.  A mapped sample always counts as liveness for
//!    its channel.
//! 3. **Gate** – the [`Downsampler`] and the local dedup check decide
//!    whether the value is worth sending.
//! 4. **Dispatch** – hand the request to the toy's [`CommandChannel`] and
//!    fold the outcome into [`ChannelStates`].  Only an accepted dispatch
//!    changes what the loop believes the actuator is doing.
//! 5. **Failsafe** – age every other channel and send a zero to each one
//!    that has been silent for too long while active.
//!
//! [`BridgeLoop::run`] repeats this until the stop flag is raised, then stops
//! every toy that is still active.

use std::collections::HashMap;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use toybridge_middleware::SignalSource;
use toybridge_types::{ActuatorRequest, BridgeError, ToyChannel, ToyId};
use tracing::{debug, info, warn};

use crate::channel_state::ChannelStates;
use crate::command_channel::{CommandChannel, DispatchOutcome, SkipReason};
use crate::downsample::Downsampler;
use crate::failsafe::FailsafeTimer;
use crate::mapper::{Mapped, SignalMapper};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Loop tunables, fixed for the lifetime of a [`BridgeLoop`].
#[derive(Debug, Clone, Copy)]
pub struct BridgeSettings {
    /// Sleep when the source had nothing to offer.  Zero disables it.
    pub idle_backoff: Duration,
    /// Silent ticks before an active channel is stopped.
    pub silence_threshold: u32,
    /// Mapped samples to pass over after each accepted dispatch.
    pub skip_after_dispatch: u32,
    /// Ask the command channel to drop values it already delivered.
    pub ignore_duplicates: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            idle_backoff: Duration::from_millis(10),
            silence_threshold: 30,
            skip_after_dispatch: 0,
            ignore_duplicates: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Observability
// ─────────────────────────────────────────────────────────────────────────────

/// What the loop is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopPhase {
    #[default]
    Idle,
    /// A command channel call is outstanding.
    Dispatching,
}

/// Running totals since the loop was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub samples: u64,
    pub mapped: u64,
    pub dispatched: u64,
    /// Dropped by the local dedup check.
    pub suppressed: u64,
    /// Passed over by the downsampler.
    pub downsampled: u64,
    pub skipped_duplicate: u64,
    pub skipped_pending: u64,
    pub rate_limited: u64,
    pub failed: u64,
    pub failsafe_stops: u64,
}

/// Everything that happened in one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub received: bool,
    pub mapped: Option<Mapped>,
    /// Outcome of the sample's dispatch, if one was attempted.
    pub outcome: Option<DispatchOutcome>,
    /// Channels stopped by the failsafe this tick.
    pub failsafe_stops: Vec<(ToyChannel, DispatchOutcome)>,
}

// ─────────────────────────────────────────────────────────────────────────────
// BridgeLoop
// ─────────────────────────────────────────────────────────────────────────────

pub struct BridgeLoop<S> {
    source: S,
    mapper: SignalMapper,
    states: ChannelStates,
    failsafe: FailsafeTimer,
    downsampler: Downsampler,
    endpoints: Vec<CommandChannel>,
    routes: HashMap<ToyId, usize>,
    settings: BridgeSettings,
    phase: LoopPhase,
    stats: BridgeStats,
    stop: Arc<AtomicBool>,
}

impl<S: SignalSource> BridgeLoop<S> {
    pub fn new(source: S, mapper: SignalMapper, settings: BridgeSettings) -> Self {
        let states = ChannelStates::new(mapper.channels().cloned());
        Self {
            source,
            mapper,
            states,
            failsafe: FailsafeTimer::new(settings.silence_threshold),
            downsampler: Downsampler::new(settings.skip_after_dispatch),
            endpoints: Vec::new(),
            routes: HashMap::new(),
            settings,
            phase: LoopPhase::Idle,
            stats: BridgeStats::default(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Route commands for `toys` through `channel`.  A toy added twice is
    /// served by the later endpoint.
    pub fn add_endpoint(&mut self, toys: impl IntoIterator<Item = ToyId>, channel: CommandChannel) {
        let index = self.endpoints.len();
        self.endpoints.push(channel);
        for toy in toys {
            self.routes.insert(toy, index);
        }
    }

    /// The command channel serving `toy`.
    pub fn endpoint(&self, toy: &ToyId) -> Option<&CommandChannel> {
        self.routes.get(toy).map(|&i| &self.endpoints[i])
    }

    /// Flag checked once per tick by [`BridgeLoop::run`].  Setting it to
    /// `true` ends the loop after the current tick.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    pub fn channel_state(&self) -> &ChannelStates {
        &self.states
    }

    /// Run one poll–map–dispatch–failsafe cycle.
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        let observed = match self.source.try_receive() {
            None => {
                if !self.settings.idle_backoff.is_zero() {
                    tokio::time::sleep(self.settings.idle_backoff).await;
                }
                None
            }
            Some(sample) => {
                report.received = true;
                self.stats.samples += 1;
                match self.mapper.map(&sample) {
                    Some(mapped) => {
                        self.stats.mapped += 1;
                        self.states.mark_live(&mapped.channel);
                        report.outcome = self.forward(&mapped).await;
                        let channel = mapped.channel.clone();
                        report.mapped = Some(mapped);
                        Some(channel)
                    }
                    None => None,
                }
            }
        };

        for channel in self.failsafe.tick(&mut self.states, observed.as_ref()) {
            let outcome = self.failsafe_stop(&channel).await;
            report.failsafe_stops.push((channel, outcome));
        }

        report
    }

    /// Tick until the stop flag is raised, then stop every active toy.
    pub async fn run(mut self) -> BridgeStats {
        info!(
            channels = self.mapper.channels().count(),
            endpoints = self.endpoints.len(),
            silence_threshold = self.failsafe.threshold(),
            "bridge loop started"
        );
        while !self.stop.load(Ordering::SeqCst) {
            self.tick().await;
        }
        self.shutdown().await;
        let s = self.stats;
        info!(
            samples = s.samples,
            dispatched = s.dispatched,
            failed = s.failed,
            failsafe_stops = s.failsafe_stops,
            "bridge loop stopped"
        );
        s
    }

    /// Best-effort stop-all for every toy with an active channel.  Local
    /// state is cleared whether or not the stops succeed.
    pub async fn shutdown(&mut self) {
        for toy in self.states.active_toys() {
            let Some(&index) = self.routes.get(&toy) else {
                continue;
            };
            self.phase = LoopPhase::Dispatching;
            let outcome = self.endpoints[index].stop_all(&toy).await;
            self.phase = LoopPhase::Idle;
            match outcome {
                DispatchOutcome::Accepted => info!(toy = %toy, "stopped on shutdown"),
                other => warn!(toy = %toy, outcome = ?other, "stop on shutdown did not complete"),
            }
        }
        let channels: Vec<ToyChannel> = self.mapper.channels().cloned().collect();
        for channel in &channels {
            self.states.reset(channel);
        }
    }

    async fn forward(&mut self, mapped: &Mapped) -> Option<DispatchOutcome> {
        if !self.downsampler.admit() {
            self.stats.downsampled += 1;
            return None;
        }
        if !self.states.admit(&mapped.channel, mapped.native) {
            self.stats.suppressed += 1;
            return None;
        }

        let outcome = self
            .send(&mapped.channel, mapped.native, self.settings.ignore_duplicates)
            .await;
        match &outcome {
            DispatchOutcome::Accepted => {
                self.states.record_sent(&mapped.channel, mapped.native);
                self.downsampler.dispatched();
                self.stats.dispatched += 1;
            }
            // The endpoint already holds this value.
            DispatchOutcome::Skipped(SkipReason::Duplicate) => {
                self.states.record_sent(&mapped.channel, mapped.native);
                self.stats.skipped_duplicate += 1;
            }
            DispatchOutcome::Skipped(SkipReason::Pending) => self.stats.skipped_pending += 1,
            DispatchOutcome::Skipped(SkipReason::RateLimited) => self.stats.rate_limited += 1,
            DispatchOutcome::Failed(e) => {
                self.stats.failed += 1;
                debug!(channel = %mapped.channel, value = mapped.native, error = %e, "dispatch failed");
            }
        }
        Some(outcome)
    }

    async fn failsafe_stop(&mut self, channel: &ToyChannel) -> DispatchOutcome {
        info!(channel = %channel, "failsafe: stopping silent channel");
        self.stats.failsafe_stops += 1;
        let outcome = self.send(channel, 0, false).await;
        if let DispatchOutcome::Failed(e) = &outcome {
            self.stats.failed += 1;
            warn!(channel = %channel, error = %e, "failsafe stop failed");
        }
        outcome
    }

    async fn send(&mut self, channel: &ToyChannel, value: u32, ignore_duplicates: bool) -> DispatchOutcome {
        let Some(&index) = self.routes.get(&channel.toy) else {
            return DispatchOutcome::Failed(BridgeError::UnknownToy(channel.toy.clone()));
        };
        let request = ActuatorRequest::new(channel, value);
        self.phase = LoopPhase::Dispatching;
        let outcome = self.endpoints[index].dispatch(&request, ignore_duplicates).await;
        self.phase = LoopPhase::Idle;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_channel::CommandChannelSettings;
    use crate::mapper::{AxisScale, ChannelSpec};
    use toybridge_hal::{SimAction, SimDriver};
    use toybridge_middleware::QueueSource;
    use toybridge_types::{Axis, Sample};

    const VIBE: &str = "/avatar/parameters/Vibe";

    fn mapper() -> SignalMapper {
        SignalMapper::new(vec![ChannelSpec {
            channel: ToyChannel::new("Lush", Axis::Vibrate),
            address: VIBE.into(),
            scale: AxisScale::default_for(Axis::Vibrate),
        }])
        .unwrap()
    }

    fn settings() -> BridgeSettings {
        BridgeSettings {
            idle_backoff: Duration::ZERO,
            silence_threshold: 3,
            ..BridgeSettings::default()
        }
    }

    #[tokio::test]
    async fn unrouted_toy_fails_as_unknown() {
        let source = QueueSource::from_samples([Sample::float(VIBE, 0.5)]);
        let mut bridge = BridgeLoop::new(source, mapper(), settings());

        let report = bridge.tick().await;
        assert_eq!(
            report.outcome,
            Some(DispatchOutcome::Failed(BridgeError::UnknownToy(ToyId::new("Lush"))))
        );
        assert_eq!(bridge.stats().failed, 1);
        assert!(!bridge.channel_state().get(&ToyChannel::new("Lush", Axis::Vibrate)).unwrap().active);
    }

    #[tokio::test]
    async fn unmapped_sample_is_received_but_ignored() {
        let source = QueueSource::from_samples([Sample::float("/avatar/parameters/Ears", 0.5)]);
        let mut bridge = BridgeLoop::new(source, mapper(), settings());

        let report = bridge.tick().await;
        assert!(report.received);
        assert!(report.mapped.is_none());
        assert!(report.outcome.is_none());
        assert_eq!(bridge.stats().samples, 1);
        assert_eq!(bridge.stats().mapped, 0);
    }

    #[tokio::test]
    async fn phase_returns_to_idle_after_dispatch() {
        let sim = SimDriver::new(["Lush"]);
        let source = QueueSource::from_samples([Sample::float(VIBE, 0.5)]);
        let mut bridge = BridgeLoop::new(source, mapper(), settings());
        bridge.add_endpoint(
            [ToyId::new("Lush")],
            CommandChannel::new(Box::new(sim.clone()), CommandChannelSettings::default()),
        );

        let report = bridge.tick().await;
        assert_eq!(report.outcome, Some(DispatchOutcome::Accepted));
        assert_eq!(bridge.phase(), LoopPhase::Idle);
        assert_eq!(sim.log()[0].action, SimAction::Vibrate(10));
        assert!(bridge.endpoint(&ToyId::new("Lush")).is_some());
    }

    #[tokio::test]
    async fn shutdown_clears_local_state() {
        let sim = SimDriver::new(["Lush"]);
        let source = QueueSource::from_samples([Sample::float(VIBE, 0.5)]);
        let mut bridge = BridgeLoop::new(source, mapper(), settings());
        bridge.add_endpoint(
            [ToyId::new("Lush")],
            CommandChannel::new(Box::new(sim.clone()), CommandChannelSettings::default()),
        );
        bridge.tick().await;
        assert!(!bridge.channel_state().active_toys().is_empty());

        bridge.shutdown().await;
        assert!(bridge.channel_state().active_toys().is_empty());
        assert_eq!(sim.log().last().map(|c| c.action), Some(SimAction::StopAll));
    }
}
