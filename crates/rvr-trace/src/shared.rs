//! Cross-thread inspection of a live tracer.
//!
//! The engine keeps the single writer, a `SharedTracer`, while another thread
//! holds a `SharedHandle` for administrative reads. Every event takes the lock,
//! so the handle always observes whole events; a snapshot copies under the lock
//! and is read after it is released.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backends::RingBufferTracer;
use crate::error::Result;
use crate::event::Event;
use crate::policy::Backpressure;
use crate::tracer::Tracer;

pub struct SharedTracer<T: Tracer> {
    inner: Arc<Mutex<T>>,
}

/// Read side of a [`SharedTracer`].
pub struct SharedHandle<T: Tracer> {
    inner: Arc<Mutex<T>>,
}

impl<T: Tracer> Clone for SharedHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Tracer> SharedTracer<T> {
    /// Wrap `tracer`, returning the writer side and a handle for inspection.
    pub fn new(tracer: T) -> (Self, SharedHandle<T>) {
        let inner = Arc::new(Mutex::new(tracer));
        let handle = SharedHandle {
            inner: Arc::clone(&inner),
        };
        (Self { inner }, handle)
    }
}

impl<T: Tracer> SharedHandle<T> {
    /// Run `f` with the tracer locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut *self.inner.lock())
    }

    /// Recover the tracer once the writer side is gone.
    ///
    /// # Errors
    ///
    /// Gives the handle back while a `SharedTracer` or other handle still exists.
    pub fn try_unwrap(self) -> std::result::Result<T, Self> {
        Arc::try_unwrap(self.inner)
            .map(Mutex::into_inner)
            .map_err(|inner| Self { inner })
    }
}

impl<P: Backpressure> SharedHandle<RingBufferTracer<P>> {
    /// Copy the current ring window, oldest first.
    pub fn snapshot(&self) -> Vec<Event> {
        self.inner.lock().snapshot()
    }

    /// Remove the current ring window, oldest first.
    pub fn drain(&self) -> Vec<Event> {
        self.inner.lock().drain()
    }
}

impl<T: Tracer> Tracer for SharedTracer<T> {
    fn init(&mut self) -> Result<()> {
        self.inner.lock().init()
    }

    fn fini(&mut self) -> Result<()> {
        self.inner.lock().fini()
    }

    /// Per-kind calls are replayed under the lock so overrides in `T` apply.
    #[inline]
    fn trace_event(&mut self, event: Event) {
        event.replay(&mut *self.inner.lock());
    }
}
