//! Ring-buffer tracer.
//!
//! Keeps the most recent `capacity` events for post-mortem inspection
//! ("last 4096 events before the trap"). Storage is allocated once in `init`
//! and never grows; when full, the backpressure policy decides whether the
//! oldest event is overwritten (default) or the new one is dropped. Neither
//! path blocks or errors.
//!
//! The buffer has a single writer. `snapshot` and `drain` are administrative
//! and must only run while the engine is not issuing events.

use tracing::debug;

use crate::error::{Result, TraceError};
use crate::event::Event;
use crate::metrics;
use crate::policy::{Admission, Backpressure, DropOldest};
use crate::tracer::Tracer;

/// Default window size.
pub const DEFAULT_RING_CAPACITY: usize = 4096;

type Consumer = Box<dyn FnMut(Event) + Send>;

/// Fixed-capacity circular event buffer.
pub struct RingBufferTracer<P: Backpressure = DropOldest> {
    slots: Vec<Event>,
    capacity: usize,
    /// Index of the oldest event once `slots` is full.
    head: usize,
    /// Events accepted since init or the last `clear`, including evicted ones.
    seen: u64,
    dropped: u64,
    policy: P,
    consumer: Option<Consumer>,
}

impl RingBufferTracer {
    /// Create a ring buffer with the default eviction policy.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCapacity` for a zero capacity.
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_policy(capacity, DropOldest)
    }
}

impl<P: Backpressure> RingBufferTracer<P> {
    /// Create a ring buffer with an explicit backpressure policy.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCapacity` for a zero capacity.
    pub fn with_policy(capacity: usize, policy: P) -> Result<Self> {
        if capacity == 0 {
            return Err(TraceError::InvalidCapacity(capacity));
        }
        Ok(Self {
            slots: Vec::new(),
            capacity,
            head: 0,
            seen: 0,
            dropped: 0,
            policy,
            consumer: None,
        })
    }

    /// Hand the buffered window to `consumer`, oldest first, on `fini`.
    ///
    /// Without a consumer the events stay in the buffer after `fini` for the
    /// owner to `drain`.
    #[must_use]
    pub fn with_consumer(mut self, consumer: impl FnMut(Event) + Send + 'static) -> Self {
        self.consumer = Some(Box::new(consumer));
        self
    }

    /// Maximum number of events held.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of events currently held.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Events accepted since init or the last `clear`, including evicted ones.
    pub const fn recorded(&self) -> u64 {
        self.seen
    }

    /// Events lost to overflow.
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Get event at index (0 = oldest).
    pub fn get(&self, index: usize) -> Option<&Event> {
        if index >= self.slots.len() {
            return None;
        }
        self.slots.get((self.head + index) % self.slots.len())
    }

    /// Iterate over held events, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Event> + '_ {
        let (newer, older) = self.slots.split_at(self.head);
        older.iter().chain(newer)
    }

    /// Copy the window out, oldest first, leaving the buffer untouched.
    pub fn snapshot(&self) -> Vec<Event> {
        let (newer, older) = self.slots.split_at(self.head);
        let mut out = Vec::with_capacity(self.slots.len());
        out.extend_from_slice(older);
        out.extend_from_slice(newer);
        out
    }

    /// Remove and return the window, oldest first.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut out = std::mem::take(&mut self.slots);
        out.rotate_left(self.head);
        self.head = 0;
        // Keep the allocation for further recording.
        if let Err(e) = self.slots.try_reserve_exact(self.capacity) {
            debug!(error = %e, "ring buffer not re-reserved, growing on demand");
        }
        out
    }

    /// Discard held events and reset the session counters.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.head = 0;
        self.seen = 0;
        self.dropped = 0;
    }

    #[inline]
    fn push(&mut self, event: Event) {
        self.seen += 1;
        if self.slots.len() < self.capacity {
            self.slots.push(event);
            return;
        }
        self.overflow(event);
    }

    #[cold]
    fn overflow(&mut self, event: Event) {
        if self.dropped == 0 {
            debug!(capacity = self.capacity, "trace ring buffer wrapped");
        }
        self.dropped += 1;
        match self.policy.on_full() {
            Admission::EvictOldest => {
                self.slots[self.head] = event;
                self.head = (self.head + 1) % self.capacity;
            }
            Admission::RejectNewest => {}
        }
    }
}

impl<P: Backpressure> Tracer for RingBufferTracer<P> {
    fn init(&mut self) -> Result<()> {
        self.slots.try_reserve_exact(self.capacity)?;
        debug!(capacity = self.capacity, "ring buffer tracer initialized");
        Ok(())
    }

    fn fini(&mut self) -> Result<()> {
        metrics::record_session("ring", self.seen, self.dropped);
        metrics::record_ring_occupancy(self.slots.len());
        if let Some(mut consumer) = self.consumer.take() {
            for event in self.drain() {
                consumer(event);
            }
        }
        Ok(())
    }

    #[inline]
    fn trace_event(&mut self, event: Event) {
        self.push(event);
    }
}
