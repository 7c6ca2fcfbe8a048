//! Interval-driven fetch-and-deliver primitive.
//!
//! A `ProgressPoller` calls a status fetch function on a fixed period and hands
//! each result to a subscriber. Fetches never overlap: one spawned task runs
//! them sequentially, and a busy flag shared by every run of the same poller
//! skips ticks while an older fetch is still pending (possible after a quick
//! `stop()` + `start()`).
//!
//! Each run owns a generation number. `stop()` advances the generation while
//! holding the delivery lock, so once it returns no result from the stopped run
//! can reach the subscriber. The subscriber itself may end polling by returning
//! [`PollControl::Stop`]; it must not call back into the poller.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Subscriber verdict after each delivered result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollControl {
    Continue,
    Stop,
}

#[derive(Debug, Default)]
struct Gate {
    generation: u64,
    running: bool,
}

#[derive(Debug, Default)]
struct PollerShared {
    gate: Mutex<Gate>,
    busy: AtomicBool,
    fetches_issued: AtomicU64,
    results_delivered: AtomicU64,
}

impl PollerShared {
    fn gate(&self) -> std::sync::MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        let gate = self.gate();
        gate.running && gate.generation == generation
    }
}

/// Cloning yields another handle to the same poller
#[derive(Debug, Clone)]
pub struct ProgressPoller {
    name: String,
    shared: Arc<PollerShared>,
}

impl ProgressPoller {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(PollerShared::default()),
        }
    }

    /// Begins polling. Returns `false` without doing anything if already
    /// running. Must be called from within a tokio runtime.
    pub fn start<T, F, Fut, S>(&self, fetch: F, period: Duration, subscriber: S) -> bool
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
        S: Fn(T) -> PollControl + Send + Sync + 'static,
    {
        let generation = {
            let mut gate = self.shared.gate();
            if gate.running {
                debug!(poller = %self.name, "Poller already running");
                return false;
            }
            gate.generation += 1;
            gate.running = true;
            gate.generation
        };

        debug!(
            poller = %self.name,
            generation,
            period_ms = period.as_millis() as u64,
            "Poller started"
        );

        let shared = Arc::clone(&self.shared);
        let name = self.name.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if !shared.is_current(generation) {
                    break;
                }
                if shared.busy.swap(true, Ordering::SeqCst) {
                    debug!(poller = %name, "Previous fetch still pending, skipping tick");
                    continue;
                }

                shared.fetches_issued.fetch_add(1, Ordering::SeqCst);
                let result = fetch().await;
                shared.busy.store(false, Ordering::SeqCst);

                let mut gate = shared.gate();
                if !(gate.running && gate.generation == generation) {
                    debug!(poller = %name, generation, "Dropping result that resolved after stop");
                    break;
                }
                shared.results_delivered.fetch_add(1, Ordering::SeqCst);
                if subscriber(result) == PollControl::Stop {
                    gate.running = false;
                    gate.generation += 1;
                    debug!(poller = %name, generation, "Poller stopped by subscriber");
                    break;
                }
            }
        });

        true
    }

    /// Halts polling. A fetch already in flight completes but its result is
    /// discarded.
    pub fn stop(&self) {
        let mut gate = self.shared.gate();
        if gate.running {
            gate.running = false;
            gate.generation += 1;
            debug!(poller = %self.name, "Poller stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.gate().running
    }

    /// True while a fetch is awaiting its result
    pub fn is_fetching(&self) -> bool {
        self.shared.busy.load(Ordering::SeqCst)
    }

    pub fn fetches_issued(&self) -> u64 {
        self.shared.fetches_issued.load(Ordering::SeqCst)
    }

    pub fn results_delivered(&self) -> u64 {
        self.shared.results_delivered.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
