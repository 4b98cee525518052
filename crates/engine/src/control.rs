//! Global engine switches: the pause gate and the network flags.

use crate::cancel::CancellationToken;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Upper bound on one wait at the pause gate before the interruption
/// token is checked again.
const GATE_RECHECK: Duration = Duration::from_millis(50);

/// Pause gate plus network flags, owned by the engine.
///
/// Tasks call [`wait_if_paused`](Self::wait_if_paused) once, before doing
/// any work. Resuming releases every waiting task at once.
#[derive(Default)]
pub struct EngineControl {
    paused: Mutex<bool>,
    resumed: Condvar,
    network_denied: AtomicBool,
    slow_network: AtomicBool,
}

impl EngineControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        *self.paused.lock() = true;
        log::debug!("engine paused");
    }

    pub fn resume(&self) {
        *self.paused.lock() = false;
        self.resumed.notify_all();
        log::debug!("engine resumed");
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock()
    }

    /// Block while paused.
    ///
    /// Returns `false` if `token` was cancelled before the gate opened.
    pub fn wait_if_paused(&self, token: &CancellationToken) -> bool {
        let mut paused = self.paused.lock();
        while *paused {
            if token.is_cancelled() {
                return false;
            }
            self.resumed.wait_for(&mut paused, GATE_RECHECK);
        }
        !token.is_cancelled()
    }

    /// Wake every task at the gate so it can observe its token.
    pub fn interrupt(&self) {
        self.resumed.notify_all();
    }

    pub fn deny_network(&self, denied: bool) {
        self.network_denied.store(denied, Ordering::Release);
    }

    pub fn is_network_denied(&self) -> bool {
        self.network_denied.load(Ordering::Acquire)
    }

    pub fn set_slow_network(&self, slow: bool) {
        self.slow_network.store(slow, Ordering::Release);
    }

    pub fn is_slow_network(&self) -> bool {
        self.slow_network.load(Ordering::Acquire)
    }
}
