//! Binary trace record format.
//!
//! A log is a stream header followed by records, with no framing between
//! them. All multi-byte fields are little-endian and nothing is padded.
//!
//! ```text
//! header:  "RVTR" | version: u16 | reserved: u16            (8 bytes)
//! record:  tag: u8 | pc: u64 | payload
//!
//! tag   kind                  payload                          size
//! 0x01  BlockEnter            -                                9
//! 0x02  InstructionFetch      op: u16                          11
//! 0x03  OpcodeDecoded         op: u16, opcode: u32             15
//! 0x04  RegisterRead          op: u16, reg: u8, value: u64     20
//! 0x05  RegisterWrite         op: u16, reg: u8, value: u64     20
//! 0x10+w MemRead (w=0..3)     op: u16, addr: u64, value: 2^w   20/21/23/27
//! 0x18+w MemWrite (w=0..3)    op: u16, addr: u64, value: 2^w   20/21/23/27
//! 0x20  BranchTaken           op: u16, target: u64             19
//! 0x21  BranchNotTaken        op: u16, target: u64             19
//! 0x30  CsrRead               op: u16, csr: u16, value: u64    21
//! 0x31  CsrWrite              op: u16, csr: u16, value: u64    21
//! ```
//!
//! The header is written together with the first record, so a run that
//! produced no events leaves an empty log. Decoders accept an empty input as
//! an empty trace.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crate::error::{DecodeError, Result, TraceError};
use crate::event::{Event, EventKind, MemAccess, MemWidth, OpClass};

pub const MAGIC: [u8; 4] = *b"RVTR";
pub const VERSION: u16 = 1;
pub const HEADER_LEN: usize = 8;

/// Largest record size (doubleword memory access).
pub const MAX_RECORD_LEN: usize = 27;

/// Stream header bytes.
pub fn header() -> [u8; HEADER_LEN] {
    let mut out = [0u8; HEADER_LEN];
    out[..4].copy_from_slice(&MAGIC);
    out[4..6].copy_from_slice(&VERSION.to_le_bytes());
    out
}

/// Encoded size of a record of the given kind, including the tag.
pub const fn record_len(kind: EventKind) -> usize {
    const PREFIX: usize = 1 + 8 + 2;
    match kind {
        EventKind::BlockEnter => 1 + 8,
        EventKind::InstructionFetch => PREFIX,
        EventKind::OpcodeDecoded => PREFIX + 4,
        EventKind::RegisterRead | EventKind::RegisterWrite => PREFIX + 1 + 8,
        EventKind::MemReadByte | EventKind::MemWriteByte => PREFIX + 8 + 1,
        EventKind::MemReadHalfword | EventKind::MemWriteHalfword => PREFIX + 8 + 2,
        EventKind::MemReadWord | EventKind::MemWriteWord => PREFIX + 8 + 4,
        EventKind::MemReadDword | EventKind::MemWriteDword => PREFIX + 8 + 8,
        EventKind::BranchTaken | EventKind::BranchNotTaken => PREFIX + 8,
        EventKind::CsrRead | EventKind::CsrWrite => PREFIX + 2 + 8,
    }
}

/// Append one record to `out`.
pub fn encode_event(out: &mut Vec<u8>, event: &Event) {
    out.push(event.kind().tag());
    out.extend_from_slice(&event.pc().to_le_bytes());
    if let Some(op) = event.op() {
        out.extend_from_slice(&op.raw().to_le_bytes());
    }
    match *event {
        Event::BlockEnter { .. } | Event::InstructionFetch { .. } => {}
        Event::OpcodeDecoded { opcode, .. } => out.extend_from_slice(&opcode.to_le_bytes()),
        Event::RegisterRead { reg, value, .. } | Event::RegisterWrite { reg, value, .. } => {
            out.push(reg);
            out.extend_from_slice(&value.to_le_bytes());
        }
        Event::MemoryRead { addr, access, .. } | Event::MemoryWrite { addr, access, .. } => {
            out.extend_from_slice(&addr.to_le_bytes());
            match access {
                MemAccess::Byte(v) => out.push(v),
                MemAccess::Halfword(v) => out.extend_from_slice(&v.to_le_bytes()),
                MemAccess::Word(v) => out.extend_from_slice(&v.to_le_bytes()),
                MemAccess::Dword(v) => out.extend_from_slice(&v.to_le_bytes()),
            }
        }
        Event::BranchTaken { target, .. } | Event::BranchNotTaken { target, .. } => {
            out.extend_from_slice(&target.to_le_bytes());
        }
        Event::CsrRead { csr, value, .. } | Event::CsrWrite { csr, value, .. } => {
            out.extend_from_slice(&csr.to_le_bytes());
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

/// Little-endian field cursor over one record body.
struct Fields<'a>(&'a [u8]);

impl Fields<'_> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let (head, rest) = self.0.split_at(N);
        self.0 = rest;
        let mut out = [0u8; N];
        out.copy_from_slice(head);
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }

    fn op(&mut self) -> OpClass {
        OpClass(self.u16())
    }

    fn access(&mut self, width: MemWidth) -> MemAccess {
        match width {
            MemWidth::Byte => MemAccess::Byte(self.u8()),
            MemWidth::Halfword => MemAccess::Halfword(self.u16()),
            MemWidth::Word => MemAccess::Word(self.u32()),
            MemWidth::Dword => MemAccess::Dword(self.u64()),
        }
    }
}

/// Decode a record body (everything after the tag). `body` must be exactly
/// `record_len(kind) - 1` bytes.
fn decode_body(kind: EventKind, body: &[u8]) -> Event {
    let mut f = Fields(body);
    let pc = f.u64();
    if kind == EventKind::BlockEnter {
        return Event::BlockEnter { pc };
    }
    let op = f.op();
    match kind {
        EventKind::BlockEnter | EventKind::InstructionFetch => Event::InstructionFetch { pc, op },
        EventKind::OpcodeDecoded => {
            let opcode = f.u32();
            Event::OpcodeDecoded { pc, op, opcode }
        }
        EventKind::RegisterRead => {
            let (reg, value) = (f.u8(), f.u64());
            Event::RegisterRead { pc, op, reg, value }
        }
        EventKind::RegisterWrite => {
            let (reg, value) = (f.u8(), f.u64());
            Event::RegisterWrite { pc, op, reg, value }
        }
        EventKind::MemReadByte
        | EventKind::MemReadHalfword
        | EventKind::MemReadWord
        | EventKind::MemReadDword => {
            let addr = f.u64();
            let access = f.access(mem_width(kind));
            Event::MemoryRead {
                pc,
                op,
                addr,
                access,
            }
        }
        EventKind::MemWriteByte
        | EventKind::MemWriteHalfword
        | EventKind::MemWriteWord
        | EventKind::MemWriteDword => {
            let addr = f.u64();
            let access = f.access(mem_width(kind));
            Event::MemoryWrite {
                pc,
                op,
                addr,
                access,
            }
        }
        EventKind::BranchTaken => {
            let target = f.u64();
            Event::BranchTaken { pc, op, target }
        }
        EventKind::BranchNotTaken => {
            let target = f.u64();
            Event::BranchNotTaken { pc, op, target }
        }
        EventKind::CsrRead => {
            let (csr, value) = (f.u16(), f.u64());
            Event::CsrRead { pc, op, csr, value }
        }
        EventKind::CsrWrite => {
            let (csr, value) = (f.u16(), f.u64());
            Event::CsrWrite { pc, op, csr, value }
        }
    }
}

/// Access width of a memory record kind; the low two tag bits.
const fn mem_width(kind: EventKind) -> MemWidth {
    match kind.tag() & 0x3 {
        0 => MemWidth::Byte,
        1 => MemWidth::Halfword,
        2 => MemWidth::Word,
        _ => MemWidth::Dword,
    }
}

/// Streaming decoder over a binary log.
///
/// Yields events in the order they were recorded. The first error ends the
/// iteration.
pub struct TraceReader<R: Read> {
    reader: R,
    offset: u64,
    header_checked: bool,
    done: bool,
}

impl<R: Read> TraceReader<R> {
    pub const fn new(reader: R) -> Self {
        Self {
            reader,
            offset: 0,
            header_checked: false,
            done: false,
        }
    }

    /// Byte offset of the next record.
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Fill `buf` completely. Returns `Ok(false)` on a clean end of stream
    /// (zero bytes available), `Truncated` on a partial fill.
    fn fill(&mut self, buf: &mut [u8]) -> std::result::Result<bool, DecodeError> {
        let mut read = 0;
        while read < buf.len() {
            match self.reader.read(&mut buf[read..]) {
                Ok(0) if read == 0 => return Ok(false),
                Ok(0) => {
                    return Err(DecodeError::Truncated {
                        offset: self.offset,
                    });
                }
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    /// Returns `Ok(false)` for an empty stream.
    fn check_header(&mut self) -> std::result::Result<bool, DecodeError> {
        let mut header = [0u8; HEADER_LEN];
        if !self.fill(&mut header)? {
            return Ok(false);
        }
        if header[..4] != MAGIC {
            return Err(DecodeError::BadMagic);
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        self.offset += HEADER_LEN as u64;
        Ok(true)
    }

    fn next_event(&mut self) -> std::result::Result<Option<Event>, DecodeError> {
        if !self.header_checked {
            self.header_checked = true;
            if !self.check_header()? {
                return Ok(None);
            }
        }

        let mut tag = [0u8; 1];
        if !self.fill(&mut tag)? {
            return Ok(None);
        }
        let kind = EventKind::from_tag(tag[0]).ok_or(DecodeError::UnknownTag {
            tag: tag[0],
            offset: self.offset,
        })?;

        let mut body = [0u8; MAX_RECORD_LEN];
        let body = &mut body[..record_len(kind) - 1];
        if !self.fill(body)? {
            return Err(DecodeError::Truncated {
                offset: self.offset,
            });
        }
        self.offset += record_len(kind) as u64;
        Ok(Some(decode_body(kind, body)))
    }
}

impl TraceReader<BufReader<File>> {
    /// Open an uncompressed log file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| TraceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl TraceReader<zstd::stream::read::Decoder<'static, BufReader<File>>> {
    /// Open a zstd-compressed log file.
    pub fn open_compressed(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| TraceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(zstd::stream::read::Decoder::new(file)?))
    }
}

impl<R: Read> Iterator for TraceReader<R> {
    type Item = std::result::Result<Event, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_event() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Decode a complete in-memory log.
pub fn decode_all(bytes: &[u8]) -> std::result::Result<Vec<Event>, DecodeError> {
    TraceReader::new(bytes).collect()
}

/// Encode a complete log, header included (empty for no events).
pub fn encode_all<'a>(events: impl IntoIterator<Item = &'a Event>) -> Vec<u8> {
    let mut out = Vec::new();
    for event in events {
        if out.is_empty() {
            out.extend_from_slice(&header());
        }
        encode_event(&mut out, event);
    }
    out
}
