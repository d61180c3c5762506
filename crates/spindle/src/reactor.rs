//! Reactor backend: the cross-thread submission queue and the park/wake
//! primitive the loop thread sleeps on.
//!
//! Producers append control messages under a mutex and notify a condvar when
//! the queue transitions from empty to non-empty, so an idle loop receives
//! exactly one wakeup per burst. The loop thread snapshots the whole queue in
//! one drain and executes the batch with the lock released; messages arriving
//! during a drain land in the emptied queue and are serviced next cycle,
//! preserving FIFO across cycles.

use crate::task::Message;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Instant;

struct ReactorState {
    queue: VecDeque<Message>,
    closed: bool,
}

/// The event base the loop multiplexes on.
///
/// Owned by the loop for its whole lifetime; producers only touch it through
/// [`submit`](Reactor::submit) and the wakeup it implies.
pub struct Reactor {
    state: Mutex<ReactorState>,
    ready: Condvar,
}

impl Reactor {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ReactorState {
                queue: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Backend identifier, for diagnostics only.
    pub fn method(&self) -> &'static str {
        "condvar"
    }

    /// Append a message to the queue, waking the loop if it was idle.
    ///
    /// Returns the message back once the reactor has been closed; the caller
    /// decides whether dropping it deserves a log record.
    pub(crate) fn submit(&self, message: Message) -> Result<(), Message> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(message);
        }
        let was_empty = state.queue.is_empty();
        state.queue.push_back(message);
        if was_empty {
            self.ready.notify_one();
        }
        Ok(())
    }

    /// Snapshot and empty the queue, reporting the closed flag observed under
    /// the same lock. Called only by the loop thread.
    pub(crate) fn drain(&self) -> (VecDeque<Message>, bool) {
        let mut state = self.state.lock();
        (std::mem::take(&mut state.queue), state.closed)
    }

    /// Block the loop thread until a submission arrives, the deadline passes,
    /// or the reactor is closed.
    ///
    /// The queue and the closed flag are re-checked under the lock, so a
    /// submission or close racing with the park cannot lose its wakeup.
    pub(crate) fn park(&self, deadline: Option<Instant>) {
        let mut state = self.state.lock();
        if !state.queue.is_empty() || state.closed {
            return;
        }
        match deadline {
            Some(deadline) => {
                let _ = self.ready.wait_until(&mut state, deadline);
            }
            None => self.ready.wait(&mut state),
        }
    }

    /// Mark the reactor closed and wake the loop so it can run its final
    /// drain. Messages already queued stay queued.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.ready.notify_one();
    }
}
