//! [`CommandChannel`] – single-flight, deduplicating dispatch to one
//! actuator endpoint.
//!
//! Rules, in the order they are checked:
//!
//! 1. **Single-flight** – while a call is outstanding every other dispatch
//!    returns [`SkipReason::Pending`] immediately.  A stale command is
//!    dropped rather than queued; by the time it would go out a newer value
//!    has usually replaced it.
//! 2. **Dedup** – with `ignore_duplicates`, a value equal to the last one
//!    the endpoint accepted for that channel returns
//!    [`SkipReason::Duplicate`].
//! 3. **Rate cap** – when configured, nonzero commands above the quota
//!    return [`SkipReason::RateLimited`].  Zero (stop) commands are exempt.
//! 4. **Identity** – a toy the driver reports as disconnected fails with
//!    [`BridgeError::Disconnected`] without touching the transport.
//!
//! Otherwise the driver is called under a bounded timeout.  Only an
//! accepted call updates the dedup table.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use toybridge_hal::ActuatorDriver;
use toybridge_types::{ActuatorRequest, Axis, BridgeError, ToyChannel, ToyId};
use tracing::debug;

/// Why a dispatch was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Pending,
    Duplicate,
    RateLimited,
}

/// Result of one dispatch attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Accepted,
    Skipped(SkipReason),
    Failed(BridgeError),
}

impl DispatchOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, DispatchOutcome::Accepted)
    }
}

/// Tunables for a [`CommandChannel`].
#[derive(Debug, Clone, Copy)]
pub struct CommandChannelSettings {
    /// Upper bound on a single actuator call.
    pub timeout: Duration,
    /// Optional cap on nonzero commands per second.
    pub max_commands_per_second: Option<NonZeroU32>,
}

impl Default for CommandChannelSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            max_commands_per_second: None,
        }
    }
}

/// Endpoint-wide dispatch state.  Lives as long as the endpoint connection.
#[derive(Debug, Default)]
pub struct CommandChannelState {
    pub in_flight: bool,
    /// Last value the endpoint is known to have accepted, per channel.
    pub last_accepted: HashMap<ToyChannel, u32>,
    /// Round-trip time of the most recent accepted call.  Informational.
    pub last_latency: Option<Duration>,
}

/// Clears `in_flight` however the call ends (success, failure, timeout, or
/// the future being dropped).
struct InFlight<'a> {
    state: &'a Mutex<CommandChannelState>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight = false;
    }
}

/// Dispatcher for one actuator endpoint.
pub struct CommandChannel {
    driver: Box<dyn ActuatorDriver>,
    state: Mutex<CommandChannelState>,
    timeout: Duration,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl CommandChannel {
    pub fn new(driver: Box<dyn ActuatorDriver>, settings: CommandChannelSettings) -> Self {
        Self {
            driver,
            state: Mutex::new(CommandChannelState::default()),
            timeout: settings.timeout,
            limiter: settings
                .max_commands_per_second
                .map(|n| RateLimiter::direct(Quota::per_second(n))),
        }
    }

    pub fn driver(&self) -> &dyn ActuatorDriver {
        self.driver.as_ref()
    }

    pub fn in_flight(&self) -> bool {
        self.lock().in_flight
    }

    pub fn last_accepted(&self, channel: &ToyChannel) -> Option<u32> {
        self.lock().last_accepted.get(channel).copied()
    }

    pub fn last_latency_ms(&self) -> Option<u64> {
        self.lock()
            .last_latency
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    /// Forget everything known about the endpoint, e.g. after reconnecting
    /// to a different one.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.last_accepted.clear();
        state.last_latency = None;
    }

    /// Send `request` unless a rule says to skip it.
    pub async fn dispatch(&self, request: &ActuatorRequest, ignore_duplicates: bool) -> DispatchOutcome {
        let channel = request.channel();
        let dedup = ignore_duplicates.then_some((&channel, request.native_value));
        let _flight = match self.begin(dedup, request.native_value == 0) {
            Ok(flight) => flight,
            Err(reason) => {
                debug!(channel = %channel, value = request.native_value, reason = ?reason, "dispatch skipped");
                return DispatchOutcome::Skipped(reason);
            }
        };

        if !self.driver.is_connected(&request.toy) {
            return DispatchOutcome::Failed(BridgeError::Disconnected(request.toy.clone()));
        }

        match self.timed(self.driver.send(request)).await {
            Ok(latency) => {
                let mut state = self.lock();
                state.last_accepted.insert(channel.clone(), request.native_value);
                state.last_latency = Some(latency);
                debug!(
                    channel = %channel,
                    value = request.native_value,
                    latency_ms = latency.as_millis() as u64,
                    "dispatch accepted"
                );
                DispatchOutcome::Accepted
            }
            Err(e) => DispatchOutcome::Failed(e),
        }
    }

    /// Stop every axis of `toy`.  Never deduplicated or rate limited, but
    /// still single-flight.
    pub async fn stop_all(&self, toy: &ToyId) -> DispatchOutcome {
        let _flight = match self.begin(None, true) {
            Ok(flight) => flight,
            Err(reason) => return DispatchOutcome::Skipped(reason),
        };

        if !self.driver.is_connected(toy) {
            return DispatchOutcome::Failed(BridgeError::Disconnected(toy.clone()));
        }

        match self.timed(self.driver.stop_all(toy)).await {
            Ok(latency) => {
                let mut state = self.lock();
                for axis in Axis::ALL {
                    state.last_accepted.insert(ToyChannel::new(toy.clone(), axis), 0);
                }
                state.last_latency = Some(latency);
                DispatchOutcome::Accepted
            }
            Err(e) => DispatchOutcome::Failed(e),
        }
    }

    /// Apply the skip rules and, if none fires, mark the endpoint busy.
    fn begin(&self, dedup: Option<(&ToyChannel, u32)>, is_stop: bool) -> Result<InFlight<'_>, SkipReason> {
        let mut state = self.lock();
        if state.in_flight {
            return Err(SkipReason::Pending);
        }
        if let Some((channel, value)) = dedup {
            if state.last_accepted.get(channel) == Some(&value) {
                return Err(SkipReason::Duplicate);
            }
        }
        if let Some(limiter) = self.limiter.as_ref().filter(|_| !is_stop) {
            if limiter.check().is_err() {
                return Err(SkipReason::RateLimited);
            }
        }
        state.in_flight = true;
        Ok(InFlight { state: &self.state })
    }

    async fn timed<F>(&self, call: F) -> Result<Duration, BridgeError>
    where
        F: Future<Output = Result<(), BridgeError>>,
    {
        let started = Instant::now();
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(())) => Ok(started.elapsed()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BridgeError::Timeout(self.timeout)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CommandChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
