//! Preflight recorder.
//!
//! Splits a run into two flat streams for replay and proof generation: the
//! pc of every fetched instruction, and the data the instructions consumed or
//! produced, in the order the engine reported it.
//!
//! Data stream layout, little-endian, no tags:
//! - register read/write, CSR read/write: value (8 bytes)
//! - memory read/write: address (8 bytes), then the value in access-width bytes
//!
//! Blocks, opcodes and branch outcomes follow from the pc stream and are not
//! stored. A replayer re-executing the pc stream pulls the values back in the
//! same order with a [`DataCursor`].
//!
//! Both streams are bounded. A stream with a hole cannot be replayed, so the
//! first event that does not fit stops recording; it and every later event
//! are counted as dropped.

use std::time::Instant;

use tracing::{debug, warn};

use crate::error::Result;
use crate::event::{Event, MemWidth};
use crate::metrics;
use crate::tracer::Tracer;

/// Default pc stream capacity in entries.
pub const DEFAULT_PC_ENTRIES: usize = 1 << 24;
/// Default data stream capacity in bytes.
pub const DEFAULT_DATA_BYTES: usize = 1 << 20;

/// Split-stream execution recorder.
pub struct PreflightTracer {
    pcs: Vec<u64>,
    data: Vec<u8>,
    pc_capacity: usize,
    data_capacity: usize,
    recorded: u64,
    dropped: u64,
    stopped: bool,
    started: Option<Instant>,
}

impl PreflightTracer {
    /// Recorder with the default stream capacities.
    pub const fn new() -> Self {
        Self::with_capacity(DEFAULT_PC_ENTRIES, DEFAULT_DATA_BYTES)
    }

    /// Recorder holding at most `pc_entries` pcs and `data_bytes` of data.
    pub const fn with_capacity(pc_entries: usize, data_bytes: usize) -> Self {
        Self {
            pcs: Vec::new(),
            data: Vec::new(),
            pc_capacity: pc_entries,
            data_capacity: data_bytes,
            recorded: 0,
            dropped: 0,
            stopped: false,
            started: None,
        }
    }

    /// Fetched pcs, in order.
    pub fn pcs(&self) -> &[u64] {
        &self.pcs
    }

    /// Raw data stream.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Reader over the data stream.
    pub fn cursor(&self) -> DataCursor<'_> {
        DataCursor::new(&self.data)
    }

    /// Whether a full stream stopped recording.
    pub const fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Events lost after recording stopped.
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Take both streams as `(pcs, data)`.
    pub fn into_parts(self) -> (Vec<u64>, Vec<u8>) {
        (self.pcs, self.data)
    }

    fn push_data(&mut self, head: &[u8], tail: &[u8]) {
        if self.data.len() + head.len() + tail.len() > self.data_capacity {
            self.stop();
            return;
        }
        self.data.extend_from_slice(head);
        self.data.extend_from_slice(tail);
        self.recorded += 1;
    }

    #[cold]
    fn stop(&mut self) {
        warn!(
            pcs = self.pcs.len(),
            data_bytes = self.data.len(),
            "preflight buffers full, recording stopped"
        );
        self.stopped = true;
        self.dropped += 1;
    }

    fn total_bytes(&self) -> usize {
        self.pcs.len() * size_of::<u64>() + self.data.len()
    }
}

impl Default for PreflightTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracer for PreflightTracer {
    fn init(&mut self) -> Result<()> {
        self.pcs.try_reserve_exact(self.pc_capacity)?;
        self.data.try_reserve_exact(self.data_capacity)?;
        self.started = Some(Instant::now());
        Ok(())
    }

    fn fini(&mut self) -> Result<()> {
        let total = self.total_bytes();
        #[allow(clippy::cast_precision_loss)]
        let throughput = self
            .started
            .take()
            .map(|start| start.elapsed().as_secs_f64())
            .filter(|secs| *secs > 0.0)
            .map_or(0.0, |secs| total as f64 / secs);
        debug!(
            pcs = self.pcs.len(),
            data_bytes = self.data.len(),
            total_bytes = total,
            bytes_per_sec = throughput,
            stopped = self.stopped,
            "preflight trace finished"
        );
        metrics::record_session("preflight", self.recorded, self.dropped);
        metrics::record_sink(total as u64, 0);
        Ok(())
    }

    #[inline]
    fn trace_event(&mut self, event: Event) {
        if self.stopped {
            self.dropped += 1;
            return;
        }
        match event {
            Event::InstructionFetch { pc, .. } => {
                if self.pcs.len() == self.pc_capacity {
                    self.stop();
                    return;
                }
                self.pcs.push(pc);
                self.recorded += 1;
            }
            Event::RegisterRead { value, .. }
            | Event::RegisterWrite { value, .. }
            | Event::CsrRead { value, .. }
            | Event::CsrWrite { value, .. } => self.push_data(&value.to_le_bytes(), &[]),
            Event::MemoryRead { addr, access, .. } | Event::MemoryWrite { addr, access, .. } => {
                let value = access.value().to_le_bytes();
                self.push_data(&addr.to_le_bytes(), &value[..access.width().bytes()]);
            }
            Event::BlockEnter { .. }
            | Event::OpcodeDecoded { .. }
            | Event::BranchTaken { .. }
            | Event::BranchNotTaken { .. } => {}
        }
    }
}

/// Sequential reader over a preflight data stream.
///
/// The stream carries no tags: the caller knows from the instruction being
/// replayed what comes next.
#[derive(Clone, Debug)]
pub struct DataCursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> DataCursor<'a> {
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Next register or CSR value.
    pub fn next_value(&mut self) -> Option<u64> {
        self.read_le(size_of::<u64>())
    }

    /// Next memory access as `(addr, value)`.
    pub fn next_mem(&mut self, width: MemWidth) -> Option<(u64, u64)> {
        if self.remaining() < size_of::<u64>() + width.bytes() {
            return None;
        }
        let addr = self.read_le(size_of::<u64>())?;
        let value = self.read_le(width.bytes())?;
        Some((addr, value))
    }

    /// Bytes not yet consumed.
    pub const fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub const fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn read_le(&mut self, len: usize) -> Option<u64> {
        let bytes = self.data.get(self.offset..self.offset + len)?;
        let mut buf = [0u8; 8];
        buf[..len].copy_from_slice(bytes);
        self.offset += len;
        Some(u64::from_le_bytes(buf))
    }
}
