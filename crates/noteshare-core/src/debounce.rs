//! Single-slot debounce primitive.
//!
//! `Debouncer::schedule` displaces whatever was scheduled before it, so a
//! burst of calls results in exactly one execution carrying the most recent
//! payload once the quiet period elapses. Used for both the save debounce in
//! the edit pipeline and the broadcast debounce in the connection manager.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

/// Default quiet period for note edits.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Default)]
struct Slot {
    /// Bumped on every schedule/cancel; a timer only fires if it still
    /// holds the current generation.
    generation: u64,
    /// Timer task that has not fired yet
    timer: Option<JoinHandle<()>>,
}

/// Delays an action until `delay` has passed without another `schedule`.
///
/// Must be used from within a Tokio runtime. Once a timer fires its action
/// runs to completion: later calls to `schedule` or `cancel` only affect
/// timers that are still waiting.
pub struct Debouncer {
    delay: Duration,
    slot: Arc<Mutex<Slot>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arm the timer with `action`, discarding any action that has not fired yet.
    pub fn schedule<F>(&self, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.lock();
        if let Some(timer) = slot.timer.take() {
            timer.abort();
            trace!("Debounce re-armed, previous action discarded");
        }
        slot.generation = slot.generation.wrapping_add(1);

        let generation = slot.generation;
        let shared = Arc::clone(&self.slot);
        let delay = self.delay;
        slot.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slot = shared.lock().unwrap_or_else(|e| e.into_inner());
                if slot.generation != generation {
                    return;
                }
                slot.timer = None;
            }
            action.await;
        }));
    }

    /// Drop the pending action, if any. Returns `true` if one was pending.
    ///
    /// Safe to call any number of times.
    pub fn cancel(&self) -> bool {
        let mut slot = self.lock();
        slot.generation = slot.generation.wrapping_add(1);
        match slot.timer.take() {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        }
    }

    /// Whether an action is armed and has not fired yet.
    pub fn is_pending(&self) -> bool {
        self.lock().timer.is_some()
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
