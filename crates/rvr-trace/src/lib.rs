//! Instruction-level execution tracing for RISC-V interpreters.
//!
//! The engine reports architectural events (instruction boundaries, opcodes,
//! register and memory traffic, branch outcomes, CSR accesses) through the
//! [`Tracer`] trait. Backends decide what happens to them:
//!
//! - [`NoopTracer`]: nothing; the default when tracing is off
//! - [`RingBufferTracer`]: keeps the last N events
//! - [`BinaryLogTracer`]: streams fixed-width records, decoded by [`TraceReader`]
//! - [`FilterTracer`]: forwards a [`KindSet`] of kinds to another tracer
//! - [`StatsTracer`], [`SpikeTracer`]: aggregate counters and Spike commit logs
//! - [`DiffTracer`], [`BufferedDiffTracer`]: per-instruction effects for lockstep diffing
//! - [`PreflightTracer`]: split pc and data streams for replay
//!
//! # Example
//!
//! ```ignore
//! use rvr_trace::{RingBufferTracer, TraceSession, OpClass, Tracer};
//!
//! let mut session = TraceSession::start(RingBufferTracer::new(4096)?)?;
//! session.trace_pc(0x8000_0000, OpClass::LOAD);
//! session.trace_mem_read_word(0x8000_0000, OpClass::LOAD, 0x1000, 42);
//! let mut ring = session.finish()?;
//! let last_events = ring.drain();
//! ```
//!
//! Engines take the tracer as a type parameter (`Engine<T: Tracer>`), so calls
//! resolve statically and `NoopTracer` compiles away. [`TracerConfig`] builds an
//! [`AnyTracer`] when the backend is picked from a string or `RVR_TRACE*`
//! environment variables instead.

pub mod backends;
pub mod codec;
pub mod config;
mod error;
mod event;
pub mod ffi;
pub mod metrics;
mod policy;
mod session;
mod shared;
mod tracer;

#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixtures;

pub use backends::{
    BinaryLogTracer, BranchSite, BufferedDiffTracer, DataCursor, DiffEntry, DiffTracer,
    FilterTracer, LogSink, MemEffect, NoopTracer, PreflightTracer, RingBufferTracer, SpikeTracer,
    StatsTracer,
};
pub use codec::{TraceReader, decode_all, encode_all};
pub use config::{AnyTracer, TracerConfig, TracerKind};
pub use error::{DecodeError, Result, TraceError};
pub use event::{Event, EventKind, KindSet, MemAccess, MemWidth, OpClass};
pub use policy::{Admission, Backpressure, DropNewest, DropOldest, RetryBatches, SinkAction};
pub use session::TraceSession;
pub use shared::{SharedHandle, SharedTracer};
pub use tracer::{Tracer, replay_all};
