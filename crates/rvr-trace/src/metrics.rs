//! Out-of-band trace counters using metrics-rs.
//!
//! Backends report what they recorded and what they had to give up when a
//! session finishes. Nothing here runs on the event path.

use metrics::{Unit, counter, describe_counter, describe_gauge, gauge};

// ============================================================================
// Metric descriptions
// ============================================================================

/// Initialize metric descriptions.
///
/// Call this once at startup to register metric descriptions.
pub fn init() {
    describe_counter!(
        "rvr_trace_events_total",
        Unit::Count,
        "Trace events accepted by a backend"
    );
    describe_counter!(
        "rvr_trace_events_dropped_total",
        Unit::Count,
        "Trace events dropped by backpressure or sink failure"
    );
    describe_counter!(
        "rvr_trace_events_filtered_total",
        Unit::Count,
        "Trace events absorbed by a filter"
    );
    describe_counter!(
        "rvr_trace_bytes_written_total",
        Unit::Bytes,
        "Bytes written to a trace sink"
    );
    describe_counter!(
        "rvr_trace_sink_errors_total",
        Unit::Count,
        "Trace sink write failures"
    );
    describe_gauge!(
        "rvr_trace_ring_occupancy",
        Unit::Count,
        "Events held by a ring buffer at finish"
    );
}

// ============================================================================
// Metric recording functions
// ============================================================================

/// Record event totals for one finished session.
pub fn record_session(backend: &'static str, events: u64, dropped: u64) {
    let labels = [("backend", backend)];
    counter!("rvr_trace_events_total", &labels).increment(events);
    if dropped > 0 {
        counter!("rvr_trace_events_dropped_total", &labels).increment(dropped);
    }
}

pub fn record_ring_occupancy(len: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rvr_trace_ring_occupancy").set(len as f64);
}

pub fn record_filtered(absorbed: u64) {
    counter!("rvr_trace_events_filtered_total").increment(absorbed);
}

pub fn record_sink(bytes: u64, errors: u64) {
    counter!("rvr_trace_bytes_written_total").increment(bytes);
    if errors > 0 {
        counter!("rvr_trace_sink_errors_total").increment(errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        init();
        init();
        record_session("ring", 10, 2);
        record_session("stats", 0, 0);
        record_ring_occupancy(4096);
        record_filtered(7);
        record_sink(1024, 1);
    }
}
