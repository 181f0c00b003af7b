//! Door actuator scheduling.
//!
//! One mutex guards the actuator transport and the timer arming
//! state; open requests, timer-fired closes, and explicit closes all
//! pass through it, so two writers can never interleave commands and
//! the fired-vs-cancelled decision is a single atomic step.

use janus_hw::{Actuator, DoorCommand};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Cancellable deferred-close capability.
///
/// Production uses [`TokioScheduler`]; tests drive callbacks by hand
/// through a manual implementation, which stands in for a virtual
/// clock.
pub trait CloseScheduler: Send + Sync {
    fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>);
}

/// Scheduler backed by `tokio::time::sleep` on the daemon runtime.
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

impl TokioScheduler {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }
}

impl CloseScheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) {
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            // The callback takes the door lock and writes to the
            // serial port; keep that off the async workers.
            tokio::task::spawn_blocking(callback);
        });
    }
}

struct DoorState {
    actuator: Box<dyn Actuator>,
    /// Bumped on every arm and disarm. A timer callback carrying a
    /// stale epoch was cancelled and must not send anything.
    epoch: u64,
    armed: bool,
}

/// Owns the actuator transport and the single auto-close timer.
///
/// State machine: `Closed → (open ok) → OpenArmed → (fire | close_now)
/// → Closed`; a second open while armed resets the deadline. An open
/// failure causes no transition.
#[derive(Clone)]
pub struct DoorController {
    state: Arc<Mutex<DoorState>>,
    scheduler: Arc<dyn CloseScheduler>,
    auto_close_delay: Duration,
}

impl DoorController {
    pub fn new(
        actuator: Box<dyn Actuator>,
        scheduler: Arc<dyn CloseScheduler>,
        auto_close_delay: Duration,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(DoorState {
                actuator,
                epoch: 0,
                armed: false,
            })),
            scheduler,
            auto_close_delay,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DoorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send the open command and (re-)arm the auto-close timer.
    ///
    /// Returns false when the transport stays unavailable after one
    /// reconnect attempt; the caller degrades and keeps running.
    pub fn request_open(&self) -> bool {
        let epoch = {
            let mut state = self.lock();
            if !send_with_retry(state.actuator.as_mut(), DoorCommand::Open) {
                tracing::warn!("door open command failed");
                return false;
            }
            // Arming bumps the epoch, which cancels any timer still
            // pending from a previous open: reset, not additive.
            state.epoch += 1;
            state.armed = true;
            state.epoch
        };

        tracing::info!(delay_secs = self.auto_close_delay.as_secs(), "door opened, auto-close armed");
        let controller = self.clone();
        self.scheduler.schedule(
            self.auto_close_delay,
            Box::new(move || controller.auto_close_fire(epoch)),
        );
        true
    }

    /// Timer deadline elapsed. No-op when the arming epoch is stale
    /// or the door was already closed; the check and the close happen
    /// under one lock acquisition.
    fn auto_close_fire(&self, epoch: u64) {
        let mut state = self.lock();
        if !state.armed || state.epoch != epoch {
            tracing::debug!(epoch, "auto-close timer already cancelled");
            return;
        }
        state.armed = false;
        if send_with_retry(state.actuator.as_mut(), DoorCommand::Close) {
            tracing::info!("door auto-closed");
        } else {
            tracing::warn!("auto-close command failed");
        }
    }

    /// Cancel any pending timer, then close. Best-effort: a transport
    /// failure is logged, never raised.
    pub fn close_now(&self) -> bool {
        let mut state = self.lock();
        // Disarm before sending so a concurrently-firing timer sees a
        // stale epoch and cannot emit a second close.
        state.armed = false;
        state.epoch += 1;
        if send_with_retry(state.actuator.as_mut(), DoorCommand::Close) {
            tracing::info!("door closed");
            true
        } else {
            tracing::warn!("door close command failed");
            false
        }
    }

    #[cfg(test)]
    pub fn is_armed(&self) -> bool {
        self.lock().armed
    }
}

/// One send, one reconnect-and-resend on failure.
fn send_with_retry(actuator: &mut dyn Actuator, command: DoorCommand) -> bool {
    if actuator.send(command).is_ok() {
        return true;
    }
    tracing::warn!(?command, "actuator write failed, reconnecting");
    match actuator.reconnect() {
        Ok(()) => match actuator.send(command) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(?command, error = %err, "actuator write failed after reconnect");
                false
            }
        },
        Err(err) => {
            tracing::error!(error = %err, "actuator reconnect failed");
            false
        }
    }
}
