//! Periodic timers (tickers) and their Idle/Armed state machine.
//!
//! A [`Watcher`] is a cloneable control handle over the shared ticker core;
//! the loop keeps its own strong reference to the core through the timer
//! registry for as long as the ticker is armed, so a tick never races the
//! external handle being dropped. All state transitions execute on the loop
//! thread: `start`/`stop` invoked elsewhere forward through the same
//! submit-and-wait path as `call_get`, which also guarantees that once
//! `stop()` returns no further tick is delivered.

use crate::event_loop::Inner;
use crate::task::Message;
use crate::timer::{TimerHeap, TimerKind};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Configuration accepted by [`EventLoop::call_every_with`].
///
/// [`EventLoop::call_every_with`]: crate::EventLoop::call_every_with
#[derive(Debug, Clone, Copy)]
pub struct TickerConfig {
    /// Arm the watcher immediately on creation.
    pub start: bool,

    /// Schedule the next tick `interval` after the callback returns instead
    /// of `interval` after the previous tick fired. Trades cadence for
    /// freedom from reentry: a callback slower than the interval delays the
    /// next tick rather than queueing it.
    pub wait: bool,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            start: true,
            wait: false,
        }
    }
}

struct TickerState {
    armed: bool,
    /// Bumped on every transition; timer entries armed under an older
    /// generation are discarded when they surface.
    generation: u64,
    /// Taken out for the duration of a tick so the callback may start or
    /// stop its own watcher without deadlocking.
    callback: Option<Box<dyn FnMut() + Send>>,
}

/// Shared core of a periodic timer, kept alive by external [`Watcher`]
/// handles and, while armed, by the loop's timer registry.
pub(crate) struct Ticker {
    interval: Duration,
    wait: bool,
    /// Mirrors `state.armed` for lock-free reads.
    running: AtomicBool,
    state: Mutex<TickerState>,
    event_loop: Weak<Inner>,
}

impl Ticker {
    fn start(this: &Arc<Self>) -> bool {
        let Some(inner) = this.event_loop.upgrade() else {
            return false;
        };
        if inner.in_event_loop() {
            return Self::start_local(this, &inner);
        }
        let ticker = Arc::clone(this);
        inner
            .call_get(move || match ticker.event_loop.upgrade() {
                Some(inner) => Self::start_local(&ticker, &inner),
                None => false,
            })
            .unwrap_or(false)
    }

    fn stop(this: &Arc<Self>) -> bool {
        match this.event_loop.upgrade() {
            Some(inner) if !inner.in_event_loop() => {
                let ticker = Arc::clone(this);
                inner
                    .call_get(move || ticker.stop_local())
                    // The loop stopped accepting work; ticks can no longer be
                    // delivered, so the local transition is already final.
                    .unwrap_or_else(|| this.stop_local())
            }
            _ => this.stop_local(),
        }
    }

    fn start_local(this: &Arc<Self>, inner: &Inner) -> bool {
        let generation = {
            let mut state = this.state.lock();
            if state.armed {
                return false;
            }
            state.armed = true;
            state.generation = state.generation.wrapping_add(1);
            this.running.store(true, Ordering::Release);
            state.generation
        };

        let arm = Message::Arm {
            ticker: Arc::clone(this),
            generation,
            deadline: Instant::now() + this.interval,
        };
        if inner.reactor.submit(arm).is_err() {
            // Shutdown raced the arm; roll the transition back.
            let mut state = this.state.lock();
            if state.generation == generation {
                state.armed = false;
                this.running.store(false, Ordering::Release);
            }
            return false;
        }
        true
    }

    fn stop_local(&self) -> bool {
        let mut state = self.state.lock();
        if !state.armed {
            return false;
        }
        state.armed = false;
        state.generation = state.generation.wrapping_add(1);
        self.running.store(false, Ordering::Release);
        true
    }

    /// Whether a tick armed under `generation` is still current.
    pub(crate) fn accepts(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.armed && state.generation == generation
    }

    /// Deliver one tick on the loop thread.
    ///
    /// In fixed-cadence mode the next entry is installed before the callback
    /// runs, anchored to the previous deadline; in wait mode it is installed
    /// afterwards, anchored to now. Returns `Some(panicked)` when the
    /// callback ran, `None` when the tick was stale.
    pub(crate) fn fire(
        this: &Arc<Self>,
        generation: u64,
        deadline: Instant,
        timers: &mut TimerHeap,
    ) -> Option<bool> {
        let mut callback = {
            let mut state = this.state.lock();
            if !state.armed || state.generation != generation {
                return None;
            }
            let callback = state.callback.take()?;
            if !this.wait {
                let next = TimerKind::Tick {
                    ticker: Arc::clone(this),
                    generation,
                };
                timers.push(deadline + this.interval, next);
            }
            callback
        };

        let panicked = panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err();
        if panicked {
            log::error!("periodic callback panicked; watcher stays armed");
        }

        let mut state = this.state.lock();
        let rearm = this.wait && state.armed && state.generation == generation;
        state.callback = Some(callback);
        if rearm {
            let next = TimerKind::Tick {
                ticker: Arc::clone(this),
                generation,
            };
            timers.push(Instant::now() + this.interval, next);
        }
        Some(panicked)
    }

    /// Teardown path: force Armed -> Idle without going through `stop`.
    pub(crate) fn disarm(&self) {
        self.stop_local();
    }
}

/// Control handle for a periodic timer created by
/// [`EventLoop::call_every`](crate::EventLoop::call_every).
///
/// Handles are cheap to clone and share the same underlying ticker.
#[derive(Clone)]
pub struct Watcher {
    ticker: Arc<Ticker>,
}

impl Watcher {
    pub(crate) fn new(
        interval: Duration,
        wait: bool,
        callback: Box<dyn FnMut() + Send>,
        event_loop: Weak<Inner>,
    ) -> Self {
        Self {
            ticker: Arc::new(Ticker {
                interval,
                wait,
                running: AtomicBool::new(false),
                state: Mutex::new(TickerState {
                    armed: false,
                    generation: 0,
                    callback: Some(callback),
                }),
                event_loop,
            }),
        }
    }

    /// Whether the watcher is armed and a tick may still be delivered.
    pub fn is_running(&self) -> bool {
        self.ticker.running.load(Ordering::Acquire)
    }

    /// Arm the watcher. Returns whether the state changed: `false` when it
    /// was already armed, or when the owning loop is gone or shutting down.
    pub fn start(&self) -> bool {
        Ticker::start(&self.ticker)
    }

    /// Disarm the watcher. Returns whether the state changed. After this
    /// returns, no further tick will be delivered.
    pub fn stop(&self) -> bool {
        Ticker::stop(&self.ticker)
    }
}
