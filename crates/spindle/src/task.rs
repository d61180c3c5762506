//! Deferred work units and the control protocol drained by the loop thread.

use crate::watcher::Ticker;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// An owned, nullary unit of work. Invoked exactly once, on the loop thread.
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

/// Control messages submitted to the reactor queue.
///
/// Everything that mutates loop-thread-owned state (the timer registry, armed
/// tickers) travels through this protocol so the dispatcher is the only writer.
pub(crate) enum Message {
    /// Run a task during the next drain cycle.
    Run(Task),

    /// Install a one-shot timer. The deadline is fixed at submission time.
    Timer { deadline: Instant, task: Task },

    /// Install a periodic tick for a watcher, unless `generation` has been
    /// invalidated by a stop in the meantime.
    Arm {
        ticker: Arc<Ticker>,
        generation: u64,
        deadline: Instant,
    },
}

/// Invoke a task with panic containment.
///
/// A panicking task is logged and swallowed; draining continues with the next
/// task. Returns whether the task panicked.
pub(crate) fn run_contained(task: Task) -> bool {
    let panicked = panic::catch_unwind(AssertUnwindSafe(task)).is_err();
    if panicked {
        log::error!("task panicked on the event loop; continuing");
    }
    panicked
}
