//! Tracer backends.
//!
//! - `NoopTracer`: every hook is empty; the default when tracing is off
//! - `RingBufferTracer`: last N events before a fault
//! - `BinaryLogTracer`: fixed-width record stream to a file or writer
//! - `FilterTracer`: forwards a subset of event kinds to another tracer
//! - `StatsTracer`: aggregate counters, no per-event storage
//! - `SpikeTracer`: Spike `--log-commits` text for differential testing
//! - `DiffTracer`, `BufferedDiffTracer`: per-instruction effects for lockstep comparison
//! - `PreflightTracer`: pc and data streams for replay

mod binlog;
mod diff;
mod filter;
mod none;
mod preflight;
mod ring;
mod spike;
mod stats;

pub use binlog::{BinaryLogTracer, CompressedFile, DEFAULT_FLUSH_THRESHOLD, LogSink};
pub use diff::{BufferedDiffTracer, DiffEntry, DiffTracer, MemEffect};
pub use filter::FilterTracer;
pub use none::NoopTracer;
pub use preflight::{DEFAULT_DATA_BYTES, DEFAULT_PC_ENTRIES, DataCursor, PreflightTracer};
pub use ring::{DEFAULT_RING_CAPACITY, RingBufferTracer};
pub use spike::{SpikeTracer, TRACE_FILE_ENV};
pub use stats::{BranchSite, StatsTracer};
