//! Single-threaded cooperative event loop core.
//!
//! One [`EventLoop`] owns one dedicated worker thread and multiplexes three
//! kinds of work onto it:
//!
//! - **Immediate tasks** posted from arbitrary threads ([`EventLoop::call`],
//!   [`EventLoop::call_get`], [`EventLoop::call_soon`]), drained in strict
//!   submission order
//! - **One-shot timers** ([`EventLoop::call_later`])
//! - **Repeating tickers** ([`EventLoop::call_every`]) with an optional
//!   reentry-free wait mode
//!
//! plus [`Shared`], a reference-counted handle whose destructor is guaranteed
//! to run on the loop thread.
//!
//! User callbacks run to completion, one at a time. Panics are contained at
//! the dispatcher boundary, logged, and swallowed; the exception is
//! [`EventLoop::call_get`], which re-raises the callback's panic in the
//! caller.
//!
//! # Example
//!
//! ```
//! use spindle::EventLoop;
//!
//! let ev = EventLoop::new().unwrap();
//! assert!(!ev.in_event_loop());
//!
//! let answer = ev.call_get(|| 6 * 7);
//! assert_eq!(answer, 42);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod error;
mod event_loop;
mod reactor;
mod shared;
mod task;
mod timer;
mod watcher;

pub use error::Error;
pub use event_loop::{EventLoop, LoopHandle, LoopStats};
pub use reactor::Reactor;
pub use shared::Shared;
pub use watcher::{TickerConfig, Watcher};
