//! In-process simulated driver for dry runs and CI without physical toys.
//!
//! [`SimDriver`] records every command it receives and can be told to fail,
//! to report a toy as disconnected, or to take a while to answer.  Clones
//! share the same state, so a test can keep one handle and hand another to
//! the bridge.
//!
//! # Example
//!
//! ```rust
//! use toybridge_hal::{ActuatorDriver, SimAction, SimDriver};
//! use toybridge_types::ToyId;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let driver = SimDriver::new(["Lush"]);
//! driver.set_vibration(&ToyId::new("Lush"), 10).await.unwrap();
//! assert_eq!(driver.log()[0].action, SimAction::Vibrate(10));
//! # });
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use toybridge_types::{BridgeError, ToyId};
use tracing::debug;

use crate::driver::{ActuatorDriver, Protocol};

/// What the simulated toy was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimAction {
    Vibrate(u32),
    Rotate(u32),
    Linear(u32),
    StopAll,
}

/// One recorded command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimCommand {
    pub toy: ToyId,
    pub action: SimAction,
}

#[derive(Default)]
struct SimState {
    toys: Vec<ToyId>,
    disconnected: HashSet<ToyId>,
    log: Vec<SimCommand>,
    fail_next: usize,
    latency: Duration,
    active_calls: usize,
    max_concurrent_calls: usize,
}

/// A driver whose toys always exist and whose commands land in a log.
#[derive(Clone, Default)]
pub struct SimDriver {
    state: Arc<Mutex<SimState>>,
}

impl SimDriver {
    /// Create a driver that reports `toys` on discovery.
    pub fn new<I, T>(toys: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ToyId>,
    {
        let driver = Self::default();
        driver.lock().toys = toys.into_iter().map(Into::into).collect();
        driver
    }

    /// Delay every command by `latency` before answering.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = latency;
        self
    }

    /// Make the next `n` commands fail with a transport error.  Failed
    /// commands are not recorded.
    pub fn fail_next(&self, n: usize) {
        self.lock().fail_next = n;
    }

    /// Report `toy` as disconnected until [`SimDriver::reconnect`] is called.
    pub fn disconnect(&self, toy: impl Into<ToyId>) {
        self.lock().disconnected.insert(toy.into());
    }

    pub fn reconnect(&self, toy: impl Into<ToyId>) {
        self.lock().disconnected.remove(&toy.into());
    }

    /// Snapshot of every successful command, in arrival order.
    pub fn log(&self) -> Vec<SimCommand> {
        self.lock().log.clone()
    }

    /// Highest number of commands that were ever in progress at once.
    pub fn max_concurrent_calls(&self) -> usize {
        self.lock().max_concurrent_calls
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn record(&self, toy: &ToyId, action: SimAction) -> Result<(), BridgeError> {
        let latency = {
            let mut state = self.lock();
            state.active_calls += 1;
            state.max_concurrent_calls = state.max_concurrent_calls.max(state.active_calls);
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        state.active_calls -= 1;
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(BridgeError::Transport(format!(
                "simulated failure for {toy}"
            )));
        }
        debug!(toy = %toy, action = ?action, "sim command");
        state.log.push(SimCommand {
            toy: toy.clone(),
            action,
        });
        Ok(())
    }
}

#[async_trait]
impl ActuatorDriver for SimDriver {
    fn protocol(&self) -> Protocol {
        Protocol::Simulated
    }

    async fn discover(&mut self) -> Result<Vec<ToyId>, BridgeError> {
        let state = self.lock();
        Ok(state
            .toys
            .iter()
            .filter(|t| !state.disconnected.contains(*t))
            .cloned()
            .collect())
    }

    fn is_connected(&self, toy: &ToyId) -> bool {
        let state = self.lock();
        state.toys.contains(toy) && !state.disconnected.contains(toy)
    }

    async fn set_vibration(&self, toy: &ToyId, value: u32) -> Result<(), BridgeError> {
        self.record(toy, SimAction::Vibrate(value)).await
    }

    async fn set_rotation(&self, toy: &ToyId, value: u32) -> Result<(), BridgeError> {
        self.record(toy, SimAction::Rotate(value)).await
    }

    async fn set_linear(&self, toy: &ToyId, value: u32) -> Result<(), BridgeError> {
        self.record(toy, SimAction::Linear(value)).await
    }

    async fn stop_all(&self, toy: &ToyId) -> Result<(), BridgeError> {
        self.record(toy, SimAction::StopAll).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_commands_in_order() {
        let driver = SimDriver::new(["Lush"]);
        let toy = ToyId::new("Lush");
        driver.set_vibration(&toy, 5).await.unwrap();
        driver.stop_all(&toy).await.unwrap();

        let log = driver.log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].action, SimAction::Vibrate(5));
        assert_eq!(log[1].action, SimAction::StopAll);
    }

    #[tokio::test]
    async fn injected_failures_are_not_recorded() {
        let driver = SimDriver::new(["Lush"]);
        let toy = ToyId::new("Lush");
        driver.fail_next(1);
        assert!(driver.set_rotation(&toy, 3).await.is_err());
        assert!(driver.set_rotation(&toy, 3).await.is_ok());
        assert_eq!(driver.log().len(), 1);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let driver = SimDriver::new(["Max"]);
        let handle = driver.clone();
        driver.set_linear(&ToyId::new("Max"), 2).await.unwrap();
        assert_eq!(handle.log()[0].action, SimAction::Linear(2));
    }

    #[tokio::test]
    async fn disconnected_toys_are_hidden_from_discovery() {
        let mut driver = SimDriver::new(["Lush", "Edge"]);
        driver.disconnect("Edge");
        assert!(!driver.is_connected(&ToyId::new("Edge")));
        assert_eq!(driver.discover().await.unwrap(), vec![ToyId::new("Lush")]);

        driver.reconnect("Edge");
        assert!(driver.is_connected(&ToyId::new("Edge")));
    }

    #[test]
    fn unknown_toy_is_not_connected() {
        let driver = SimDriver::new(["Lush"]);
        assert!(!driver.is_connected(&ToyId::new("Ghost")));
    }
}
