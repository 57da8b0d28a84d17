//! Backpressure policies for bounded backends.
//!
//! A recording backend hits two decision points: its storage is full, or its
//! sink failed. Neither may stall or abort the engine, so the backend asks an
//! injected policy what to give up. The ring buffer consults `on_full`; the
//! binary log consults `on_sink_error`.

use std::io;

/// Outcome when bounded storage is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Overwrite the oldest stored event with the new one.
    EvictOldest,
    /// Keep what is stored and drop the new event.
    RejectNewest,
}

/// Outcome when a sink write fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkAction {
    /// Stop writing; every later event is dropped.
    Degrade,
    /// Drop the pending batch but keep writing later ones.
    DiscardBatch,
}

/// Injectable backpressure strategy.
pub trait Backpressure: Send {
    /// Called for each event that arrives while storage is full.
    fn on_full(&mut self) -> Admission;

    /// Called when a batch write fails before any of its bytes landed.
    ///
    /// A write that fails part way leaves a torn record in the sink; the
    /// backend degrades without asking.
    fn on_sink_error(&mut self, _error: &io::Error) -> SinkAction {
        SinkAction::Degrade
    }
}

/// Keep the newest events. Default for the ring buffer and binary log.
#[derive(Clone, Copy, Debug, Default)]
pub struct DropOldest;

impl Backpressure for DropOldest {
    #[inline]
    fn on_full(&mut self) -> Admission {
        Admission::EvictOldest
    }
}

/// Keep the first events that fit.
#[derive(Clone, Copy, Debug, Default)]
pub struct DropNewest;

impl Backpressure for DropNewest {
    #[inline]
    fn on_full(&mut self) -> Admission {
        Admission::RejectNewest
    }
}

/// Tolerate transient sink failures: discard the failed batch instead of
/// degrading, up to `max_failures` times. Only failures that wrote nothing
/// are retried.
#[derive(Clone, Copy, Debug)]
pub struct RetryBatches {
    /// Discarded batches tolerated before degrading.
    pub max_failures: u32,
    failures: u32,
}

impl RetryBatches {
    /// Policy that discards up to `max_failures` batches.
    pub const fn new(max_failures: u32) -> Self {
        Self {
            max_failures,
            failures: 0,
        }
    }
}

impl Backpressure for RetryBatches {
    #[inline]
    fn on_full(&mut self) -> Admission {
        Admission::EvictOldest
    }

    fn on_sink_error(&mut self, _error: &io::Error) -> SinkAction {
        self.failures += 1;
        if self.failures > self.max_failures {
            SinkAction::Degrade
        } else {
            SinkAction::DiscardBatch
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policies() {
        let err = io::Error::other("disk full");
        assert_eq!(DropOldest.on_full(), Admission::EvictOldest);
        assert_eq!(DropOldest.on_sink_error(&err), SinkAction::Degrade);
        assert_eq!(DropNewest.on_full(), Admission::RejectNewest);
        assert_eq!(DropNewest.on_sink_error(&err), SinkAction::Degrade);
    }

    #[test]
    fn test_retry_batches_gives_up() {
        let err = io::Error::other("flaky");
        let mut policy = RetryBatches::new(2);
        assert_eq!(policy.on_sink_error(&err), SinkAction::DiscardBatch);
        assert_eq!(policy.on_sink_error(&err), SinkAction::DiscardBatch);
        assert_eq!(policy.on_sink_error(&err), SinkAction::Degrade);
    }
}
