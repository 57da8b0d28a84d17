//! Per-instruction effect capture for differential testing.
//!
//! `DiffTracer` holds the effects of the most recent instruction only: its
//! pc and opcode, the register it wrote and the memory it touched. A lockstep
//! harness steps the engine and a reference model one instruction at a time
//! and compares the two after each step. State is reset by the next fetch.
//!
//! `BufferedDiffTracer` keeps the last N finished entries instead, for
//! comparing a whole window after the run.

use tracing::debug;

use crate::error::{Result, TraceError};
use crate::event::{Event, MemAccess, MemWidth};
use crate::metrics;
use crate::policy::{Admission, Backpressure, DropOldest};
use crate::tracer::Tracer;

/// Memory access made by one instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemEffect {
    pub addr: u64,
    pub access: MemAccess,
    /// Store (`true`) or load (`false`).
    pub is_write: bool,
}

/// Architectural effects of one instruction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiffEntry {
    pub pc: u64,
    /// Raw instruction bits, 0 until the opcode is decoded.
    pub opcode: u32,
    /// Destination register and value. Writes to x0 are not captured.
    pub rd: Option<(u8, u64)>,
    /// Last memory access of the instruction.
    pub mem: Option<MemEffect>,
}

impl DiffEntry {
    pub const fn new(pc: u64) -> Self {
        Self {
            pc,
            opcode: 0,
            rd: None,
            mem: None,
        }
    }

    /// Get the destination register if one was written (None for x0 or no write).
    pub const fn get_rd(&self) -> Option<u8> {
        match self.rd {
            Some((reg, _)) => Some(reg),
            None => None,
        }
    }

    /// Get the value written to rd if applicable.
    pub const fn get_rd_value(&self) -> Option<u64> {
        match self.rd {
            Some((_, value)) => Some(value),
            None => None,
        }
    }

    /// Check if memory was accessed.
    pub const fn has_mem_access(&self) -> bool {
        self.mem.is_some()
    }

    /// Get memory access info as `(addr, value, width, is_write)`.
    pub const fn get_mem_access(&self) -> Option<(u64, u64, MemWidth, bool)> {
        match self.mem {
            Some(m) => Some((m.addr, m.access.value(), m.access.width(), m.is_write)),
            None => None,
        }
    }
}

/// Fold `event` into `current`. Returns the finished entry when `event`
/// starts a new instruction.
fn capture(current: &mut Option<DiffEntry>, event: Event) -> Option<DiffEntry> {
    let (addr, access, is_write) = match event {
        Event::InstructionFetch { pc, .. } => return current.replace(DiffEntry::new(pc)),
        Event::OpcodeDecoded { opcode, .. } => {
            if let Some(entry) = current.as_mut() {
                entry.opcode = opcode;
            }
            return None;
        }
        Event::RegisterWrite { reg, value, .. } if reg != 0 => {
            if let Some(entry) = current.as_mut() {
                entry.rd = Some((reg, value));
            }
            return None;
        }
        Event::MemoryRead { addr, access, .. } => (addr, access, false),
        Event::MemoryWrite { addr, access, .. } => (addr, access, true),
        _ => return None,
    };
    if let Some(entry) = current.as_mut() {
        entry.mem = Some(MemEffect {
            addr,
            access,
            is_write,
        });
    }
    None
}

/// Effects of the last instruction only.
#[derive(Clone, Debug, Default)]
pub struct DiffTracer {
    current: Option<DiffEntry>,
    instructions: u64,
}

impl DiffTracer {
    pub const fn new() -> Self {
        Self {
            current: None,
            instructions: 0,
        }
    }

    /// Forget the captured instruction.
    pub const fn reset(&mut self) {
        self.current = None;
    }

    /// Check if the tracer captured valid instruction state.
    pub const fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    /// The instruction captured since the last fetch.
    pub const fn entry(&self) -> Option<&DiffEntry> {
        self.current.as_ref()
    }

    /// Instructions fetched since `init`.
    pub const fn instructions(&self) -> u64 {
        self.instructions
    }

    pub fn get_rd(&self) -> Option<u8> {
        self.current.as_ref().and_then(DiffEntry::get_rd)
    }

    pub fn get_rd_value(&self) -> Option<u64> {
        self.current.as_ref().and_then(DiffEntry::get_rd_value)
    }

    pub fn has_mem_access(&self) -> bool {
        self.current.as_ref().is_some_and(DiffEntry::has_mem_access)
    }

    pub fn get_mem_access(&self) -> Option<(u64, u64, MemWidth, bool)> {
        self.current.as_ref().and_then(DiffEntry::get_mem_access)
    }
}

impl Tracer for DiffTracer {
    fn init(&mut self) -> Result<()> {
        self.current = None;
        self.instructions = 0;
        Ok(())
    }

    #[inline]
    fn trace_event(&mut self, event: Event) {
        if matches!(event, Event::InstructionFetch { .. }) {
            self.instructions += 1;
        }
        capture(&mut self.current, event);
    }
}

/// Ring of the last `capacity` instruction entries.
pub struct BufferedDiffTracer<P: Backpressure = DropOldest> {
    entries: Vec<DiffEntry>,
    capacity: usize,
    /// Index of the oldest entry once `entries` is full.
    head: usize,
    current: Option<DiffEntry>,
    committed: u64,
    dropped: u64,
    policy: P,
}

impl BufferedDiffTracer {
    /// Create a buffer that overwrites its oldest entry when full.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCapacity` for a zero capacity.
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_policy(capacity, DropOldest)
    }
}

impl<P: Backpressure> BufferedDiffTracer<P> {
    /// Create a buffer with an explicit backpressure policy.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCapacity` for a zero capacity.
    pub fn with_policy(capacity: usize, policy: P) -> Result<Self> {
        if capacity == 0 {
            return Err(TraceError::InvalidCapacity(capacity));
        }
        Ok(Self {
            entries: Vec::new(),
            capacity,
            head: 0,
            current: None,
            committed: 0,
            dropped: 0,
            policy,
        })
    }

    /// Maximum number of entries held.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries captured.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries dropped due to overflow.
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Check if any entries were dropped due to overflow.
    pub const fn has_overflow(&self) -> bool {
        self.dropped > 0
    }

    /// Get entry at index (0 = oldest entry).
    pub fn get(&self, index: usize) -> Option<&DiffEntry> {
        if index >= self.entries.len() {
            return None;
        }
        self.entries.get((self.head + index) % self.entries.len())
    }

    /// Iterate over all captured entries in order (oldest first).
    pub fn iter(&self) -> impl Iterator<Item = &DiffEntry> + '_ {
        let (newer, older) = self.entries.split_at(self.head);
        older.iter().chain(newer)
    }

    /// Reset the tracer state (keeps buffer allocation).
    pub fn reset(&mut self) {
        self.entries.clear();
        self.head = 0;
        self.current = None;
        self.committed = 0;
        self.dropped = 0;
    }

    fn commit(&mut self, entry: DiffEntry) {
        self.committed += 1;
        if self.entries.len() < self.capacity {
            self.entries.push(entry);
            return;
        }
        self.dropped += 1;
        match self.policy.on_full() {
            Admission::EvictOldest => {
                self.entries[self.head] = entry;
                self.head = (self.head + 1) % self.capacity;
            }
            Admission::RejectNewest => {}
        }
    }
}

impl<P: Backpressure> Tracer for BufferedDiffTracer<P> {
    fn init(&mut self) -> Result<()> {
        self.entries.try_reserve_exact(self.capacity)?;
        debug!(capacity = self.capacity, "buffered diff tracer initialized");
        Ok(())
    }

    fn fini(&mut self) -> Result<()> {
        if let Some(last) = self.current.take() {
            self.commit(last);
        }
        metrics::record_session("diff", self.committed, self.dropped);
        debug!(
            entries = self.entries.len(),
            dropped = self.dropped,
            "buffered diff tracer finished"
        );
        Ok(())
    }

    #[inline]
    fn trace_event(&mut self, event: Event) {
        if let Some(done) = capture(&mut self.current, event) {
            self.commit(done);
        }
    }
}
