//! The event loop facade, its dedicated thread, and the dispatcher.
//!
//! One loop owns exactly one worker thread. Every user callback (queued
//! task, one-shot timer, periodic tick, loop-affine destructor) executes on
//! that thread, one at a time, to completion. Cross-thread submission goes
//! through the reactor queue; the dispatcher alternates between firing due
//! timers, snapshot-draining the queue, and parking until the next deadline
//! or wakeup.

use crate::error::Error;
use crate::reactor::Reactor;
use crate::shared::Shared;
use crate::task::{run_contained, Message, Task};
use crate::timer::{TimerHeap, TimerKind};
use crate::watcher::{Ticker, TickerConfig, Watcher};
use crossbeam::channel;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

// ============================================================================
// Shared loop state
// ============================================================================

/// State shared between the facade, its handles, and the loop thread.
pub(crate) struct Inner {
    pub(crate) reactor: Reactor,
    thread_id: OnceLock<ThreadId>,
    tasks_run: AtomicU64,
    timers_fired: AtomicU64,
    ticks_fired: AtomicU64,
    callbacks_panicked: AtomicU64,
}

impl Inner {
    fn new() -> Self {
        Self {
            reactor: Reactor::new(),
            thread_id: OnceLock::new(),
            tasks_run: AtomicU64::new(0),
            timers_fired: AtomicU64::new(0),
            ticks_fired: AtomicU64::new(0),
            callbacks_panicked: AtomicU64::new(0),
        }
    }

    pub(crate) fn in_event_loop(&self) -> bool {
        self.thread_id
            .get()
            .is_some_and(|&id| id == thread::current().id())
    }

    /// Submit-and-wait: run `f` on the loop thread and hand its result back.
    ///
    /// Inline when already on the loop thread. Returns `None` when the loop
    /// no longer accepts work; re-raises the callback's panic in the caller.
    pub(crate) fn call_get<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.in_event_loop() {
            return Some(f());
        }

        let (result_tx, result_rx) = channel::bounded(1);
        let wrapper: Task = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(f));
            let _ = result_tx.send(result);
        });
        if self.reactor.submit(Message::Run(wrapper)).is_err() {
            return None;
        }
        match result_rx.recv() {
            Ok(Ok(value)) => Some(value),
            Ok(Err(payload)) => panic::resume_unwind(payload),
            // The loop exited without running the wrapper. Tasks queued
            // before close are drained, so this is out-of-contract use.
            Err(_) => None,
        }
    }

    fn count_task(&self, panicked: bool) {
        self.tasks_run.fetch_add(1, Ordering::Relaxed);
        if panicked {
            self.callbacks_panicked.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Counters accumulated over the life of a loop, snapshot via
/// [`EventLoop::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Queued tasks executed (including `call_get` wrappers and rerouted
    /// destructors).
    pub tasks_run: u64,
    /// One-shot timers fired.
    pub timers_fired: u64,
    /// Periodic ticks delivered.
    pub ticks_fired: u64,
    /// User callbacks that panicked and were contained.
    pub callbacks_panicked: u64,
}

// ============================================================================
// Dispatcher (loop thread)
// ============================================================================

fn dispatch(inner: &Arc<Inner>) {
    let mut timers = TimerHeap::new();

    loop {
        let (batch, closed) = inner.reactor.drain();
        for message in batch {
            match message {
                Message::Run(task) => {
                    let panicked = run_contained(task);
                    inner.count_task(panicked);
                }
                // Timers armed while the loop is going down are dropped.
                Message::Timer { deadline, task } if !closed => {
                    timers.push(deadline, TimerKind::Once(task));
                }
                Message::Timer { .. } => {}
                Message::Arm {
                    ticker,
                    generation,
                    deadline,
                } => {
                    if closed {
                        ticker.disarm();
                    } else if ticker.accepts(generation) {
                        timers.push(
                            deadline,
                            TimerKind::Tick {
                                ticker,
                                generation,
                            },
                        );
                    }
                }
            }
        }
        if closed {
            break;
        }

        // `now` is snapshotted once: an overdue ticker re-arming in the past
        // catches up against the snapshot and cannot starve the queue.
        let now = Instant::now();
        while let Some(entry) = timers.pop_due(now) {
            match entry.kind {
                TimerKind::Once(task) => {
                    inner.timers_fired.fetch_add(1, Ordering::Relaxed);
                    if run_contained(task) {
                        inner.callbacks_panicked.fetch_add(1, Ordering::Relaxed);
                    }
                }
                TimerKind::Tick {
                    ticker,
                    generation,
                } => {
                    if let Some(panicked) =
                        Ticker::fire(&ticker, generation, entry.deadline, &mut timers)
                    {
                        inner.ticks_fired.fetch_add(1, Ordering::Relaxed);
                        if panicked {
                            inner.callbacks_panicked.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }
        }

        inner.reactor.park(timers.next_deadline());
    }

    // Teardown: armed watchers stop, pending one-shots are dropped unfired.
    for entry in timers.take_entries() {
        if let TimerKind::Tick { ticker, .. } = entry.kind {
            ticker.disarm();
        }
    }
}

// ============================================================================
// Handles
// ============================================================================

/// A cloneable, thread-safe handle to an event loop.
///
/// Handles expose the full submission API and stay valid after the owning
/// [`EventLoop`] is dropped; submissions to a terminated loop are dropped
/// with a log record.
#[derive(Clone)]
pub struct LoopHandle {
    inner: Arc<Inner>,
}

impl LoopHandle {
    /// The reactor backend, for diagnostics.
    pub fn reactor(&self) -> &Reactor {
        &self.inner.reactor
    }

    /// Whether the calling thread is the loop thread.
    pub fn in_event_loop(&self) -> bool {
        self.inner.in_event_loop()
    }

    /// Run `f` on the loop thread: inline and synchronously when the caller
    /// is already there, otherwise enqueued (and possibly still pending when
    /// this returns).
    pub fn call<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.in_event_loop() {
            f();
        } else {
            self.call_soon(f);
        }
    }

    /// Run `f` on the loop thread and return its result, blocking the caller
    /// until it completes. Inline when already on the loop thread. A panic in
    /// `f` is re-raised in the caller.
    ///
    /// # Panics
    ///
    /// Panics if the loop has been terminated: running on the loop thread
    /// and producing a value is no longer satisfiable.
    pub fn call_get<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.inner
            .call_get(f)
            .unwrap_or_else(|| panic!("call_get on a terminated event loop"))
    }

    /// Enqueue `f` unconditionally, even from the loop thread itself. Tasks
    /// drain in strict submission order across all producers.
    pub fn call_soon<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.inner.reactor.submit(Message::Run(Box::new(f))).is_err() {
            log::debug!("call_soon after event loop shutdown; task dropped");
        }
    }

    /// Run `f` once, `delay` from now, on the loop thread. A zero delay still
    /// defers through the timer path; the task is never inlined. Dropped
    /// (with a log record) if the loop is being destroyed.
    pub fn call_later<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let message = Message::Timer {
            deadline: Instant::now() + delay,
            task: Box::new(f),
        };
        if self.inner.reactor.submit(message).is_err() {
            log::debug!("call_later after event loop shutdown; timer dropped");
        }
    }

    /// Create a watcher firing `f` every `interval`, armed immediately and
    /// rescheduling at fixed cadence (`TickerConfig::default()`).
    pub fn call_every<F>(&self, interval: Duration, f: F) -> Watcher
    where
        F: FnMut() + Send + 'static,
    {
        self.call_every_with(interval, TickerConfig::default(), f)
    }

    /// Create a watcher firing `f` every `interval` with explicit start/wait
    /// configuration.
    pub fn call_every_with<F>(&self, interval: Duration, config: TickerConfig, f: F) -> Watcher
    where
        F: FnMut() + Send + 'static,
    {
        let watcher = Watcher::new(
            interval,
            config.wait,
            Box::new(f),
            Arc::downgrade(&self.inner),
        );
        if config.start {
            let _ = watcher.start();
        }
        watcher
    }

    /// Wrap `value` in a shared handle whose drop runs on the loop thread.
    pub fn make_shared<T>(&self, value: T) -> Shared<T>
    where
        T: Send + 'static,
    {
        Shared::new(&self.inner, value, None)
    }

    /// Wrap `value` with a custom destruction action that runs on the loop
    /// thread once the last handle is released.
    pub fn shared_with<T, D>(&self, value: T, dispose: D) -> Shared<T>
    where
        T: Send + 'static,
        D: FnOnce(T) + Send + 'static,
    {
        Shared::new(&self.inner, value, Some(Box::new(dispose)))
    }

    /// Snapshot the loop's lifetime counters.
    pub fn stats(&self) -> LoopStats {
        LoopStats {
            tasks_run: self.inner.tasks_run.load(Ordering::Relaxed),
            timers_fired: self.inner.timers_fired.load(Ordering::Relaxed),
            ticks_fired: self.inner.ticks_fired.load(Ordering::Relaxed),
            callbacks_panicked: self.inner.callbacks_panicked.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Facade
// ============================================================================

/// A single-threaded cooperative event loop.
///
/// Construction spawns the dedicated loop thread; dropping the value signals
/// termination, drains tasks that were already queued, disarms all timers
/// and watchers, and joins the thread.
pub struct EventLoop {
    handle: LoopHandle,
    thread: Option<JoinHandle<()>>,
}

impl EventLoop {
    /// Spawn the loop thread and wait until it has recorded its identity and
    /// entered dispatch, so `in_event_loop` is immediately meaningful.
    pub fn new() -> Result<Self, Error> {
        let inner = Arc::new(Inner::new());
        let (ready_tx, ready_rx) = channel::bounded(1);

        let thread_inner = Arc::clone(&inner);
        let thread = thread::Builder::new()
            .name("spindle-loop".to_string())
            .spawn(move || {
                let _ = thread_inner.thread_id.set(thread::current().id());
                let _ = ready_tx.send(());
                dispatch(&thread_inner);
            })
            .map_err(Error::BackendInit)?;

        if ready_rx.recv().is_err() {
            let _ = thread.join();
            return Err(Error::BackendInit(std::io::Error::other(
                "loop thread exited before entering dispatch",
            )));
        }

        Ok(Self {
            handle: LoopHandle { inner },
            thread: Some(thread),
        })
    }

    /// A cloneable handle usable from any thread, including loop callbacks.
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// The reactor backend, for diagnostics.
    pub fn reactor(&self) -> &Reactor {
        self.handle.reactor()
    }

    /// Whether the calling thread is the loop thread.
    pub fn in_event_loop(&self) -> bool {
        self.handle.in_event_loop()
    }

    /// See [`LoopHandle::call`].
    pub fn call<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.call(f)
    }

    /// See [`LoopHandle::call_get`].
    pub fn call_get<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.handle.call_get(f)
    }

    /// See [`LoopHandle::call_soon`].
    pub fn call_soon<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.call_soon(f)
    }

    /// See [`LoopHandle::call_later`].
    pub fn call_later<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.call_later(delay, f)
    }

    /// See [`LoopHandle::call_every`].
    pub fn call_every<F>(&self, interval: Duration, f: F) -> Watcher
    where
        F: FnMut() + Send + 'static,
    {
        self.handle.call_every(interval, f)
    }

    /// See [`LoopHandle::call_every_with`].
    pub fn call_every_with<F>(&self, interval: Duration, config: TickerConfig, f: F) -> Watcher
    where
        F: FnMut() + Send + 'static,
    {
        self.handle.call_every_with(interval, config, f)
    }

    /// See [`LoopHandle::make_shared`].
    pub fn make_shared<T>(&self, value: T) -> Shared<T>
    where
        T: Send + 'static,
    {
        self.handle.make_shared(value)
    }

    /// See [`LoopHandle::shared_with`].
    pub fn shared_with<T, D>(&self, value: T, dispose: D) -> Shared<T>
    where
        T: Send + 'static,
        D: FnOnce(T) + Send + 'static,
    {
        self.handle.shared_with(value, dispose)
    }

    /// See [`LoopHandle::stats`].
    pub fn stats(&self) -> LoopStats {
        self.handle.stats()
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.handle.inner.reactor.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
