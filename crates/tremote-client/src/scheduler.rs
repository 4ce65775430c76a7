//! Single repeating refresh timer.
//!
//! At most one timer is armed at a time. A timer fires once and disarms
//! itself; the refresh it triggers calls [`RefreshScheduler::schedule_next`]
//! again when it completes, so timers never stack.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::listeners::lock;

struct ArmedTimer {
    epoch: u64,
    interval_secs: i64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct TimerState {
    next_epoch: u64,
    armed: Option<ArmedTimer>,
}

pub struct RefreshScheduler {
    state: Arc<Mutex<TimerState>>,
    runtime: Handle,
}

impl RefreshScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self {
            state: Arc::new(Mutex::new(TimerState::default())),
            runtime,
        }
    }

    /// Arm the timer for `interval_secs`, calling `on_fire` when it elapses.
    ///
    /// Leaves an armed timer with the same interval alone. Any other armed
    /// timer is replaced. An interval `<= 0` disables refreshing. Returns
    /// whether a new timer was armed.
    pub fn schedule_next<F>(&self, interval_secs: i64, on_fire: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = lock(&self.state);

        if let Some(armed) = &state.armed {
            if armed.interval_secs == interval_secs {
                return false;
            }
        }
        if let Some(previous) = state.armed.take() {
            previous.task.abort();
        }
        if interval_secs <= 0 {
            debug!(interval_secs, "refresh timer disabled");
            return false;
        }

        state.next_epoch += 1;
        let epoch = state.next_epoch;
        let timers = self.state.clone();
        let delay = Duration::from_secs(interval_secs as u64);

        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut state = lock(&timers);
                // Replaced or cancelled while we slept.
                if state.armed.as_ref().map(|a| a.epoch) != Some(epoch) {
                    return;
                }
                state.armed = None;
            }
            on_fire();
        });

        debug!(interval_secs, "refresh timer armed");
        state.armed = Some(ArmedTimer {
            epoch,
            interval_secs,
            task,
        });
        true
    }

    pub fn cancel(&self) {
        if let Some(armed) = lock(&self.state).armed.take() {
            armed.task.abort();
            debug!("refresh timer cancelled");
        }
    }

    pub fn is_armed(&self) -> bool {
        lock(&self.state).armed.is_some()
    }

    pub fn armed_interval(&self) -> Option<i64> {
        lock(&self.state).armed.as_ref().map(|a| a.interval_secs)
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
