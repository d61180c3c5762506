//! Loop-affine shared ownership: reference-counted values whose destruction
//! is guaranteed to run on the loop thread.
//!
//! Reference counting is standard `Arc`; the custom part is the last-drop
//! path, which runs the destruction action inline when the releasing thread
//! is the loop thread and otherwise posts it as a task. The back-reference to
//! the loop is weak, so the loop -> task -> value -> loop cycle cannot form.

use crate::event_loop::Inner;
use crate::task::{run_contained, Message, Task};
use parking_lot::Mutex;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::sync::{Arc, Weak};

struct SharedBox<T: Send + 'static> {
    value: ManuallyDrop<T>,
    /// User-supplied destruction action; `None` means plain drop.
    dispose: Mutex<Option<Box<dyn FnOnce(T) + Send>>>,
    event_loop: Weak<Inner>,
}

/// A cheaply cloneable handle to a value whose destruction runs on the loop
/// thread, created by [`EventLoop::make_shared`] or
/// [`EventLoop::shared_with`].
///
/// The destruction action runs exactly once, after the last handle is
/// released. If the loop has already terminated, destruction falls back to
/// the releasing thread and an error is logged.
///
/// [`EventLoop::make_shared`]: crate::EventLoop::make_shared
/// [`EventLoop::shared_with`]: crate::EventLoop::shared_with
pub struct Shared<T: Send + 'static> {
    boxed: Arc<SharedBox<T>>,
}

impl<T: Send + 'static> Shared<T> {
    pub(crate) fn new(
        inner: &Arc<Inner>,
        value: T,
        dispose: Option<Box<dyn FnOnce(T) + Send>>,
    ) -> Self {
        Self {
            boxed: Arc::new(SharedBox {
                value: ManuallyDrop::new(value),
                dispose: Mutex::new(dispose),
                event_loop: Arc::downgrade(inner),
            }),
        }
    }
}

impl<T: Send + 'static> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            boxed: Arc::clone(&self.boxed),
        }
    }
}

impl<T: Send + 'static> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.boxed.value
    }
}

impl<T: Send + 'static> AsRef<T> for Shared<T> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T: Send + 'static> Drop for SharedBox<T> {
    fn drop(&mut self) {
        // Safety: the value is taken exactly once, here, and never touched
        // again; `ManuallyDrop` suppresses the normal field drop.
        let value = unsafe { ManuallyDrop::take(&mut self.value) };
        let destroy: Task = match self.dispose.get_mut().take() {
            Some(dispose) => Box::new(move || dispose(value)),
            None => Box::new(move || drop(value)),
        };

        let Some(inner) = self.event_loop.upgrade() else {
            log::error!("event loop gone; running loop-affine destructor on the releasing thread");
            run_contained(destroy);
            return;
        };
        if inner.in_event_loop() {
            run_contained(destroy);
            return;
        }
        match inner.reactor.submit(Message::Run(destroy)) {
            Ok(()) => {}
            Err(Message::Run(destroy)) => {
                log::error!(
                    "event loop shutting down; running loop-affine destructor on the releasing thread"
                );
                run_contained(destroy);
            }
            Err(_) => unreachable!("submitted a Run message"),
        }
    }
}
