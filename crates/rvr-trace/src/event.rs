//! Trace event encoding.
//!
//! Events form a closed set: every backend handles every kind, so the set is
//! an `enum` rather than something open to extension. Each event carries the
//! pc of the instruction that caused it and (except `BlockEnter`) the engine's
//! op-class tag.

use std::fmt;
use std::str::FromStr;

use crate::error::TraceError;

/// Engine-assigned instruction category.
///
/// The tracer never infers this; it is passed through exactly as the engine
/// reports it. The associated constants cover the categories the interpreter
/// uses, but any `u16` is valid.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpClass(pub u16);

impl OpClass {
    pub const ALU: Self = Self(0);
    pub const LOAD: Self = Self(1);
    pub const STORE: Self = Self(2);
    pub const BRANCH: Self = Self(3);
    pub const JUMP: Self = Self(4);
    pub const JUMP_INDIRECT: Self = Self(5);
    pub const CSR: Self = Self(6);
    pub const MUL: Self = Self(7);
    pub const DIV: Self = Self(8);
    pub const ATOMIC: Self = Self(9);
    pub const FENCE: Self = Self(10);
    pub const SYSTEM: Self = Self(11);
    pub const NOP: Self = Self(12);
    pub const OTHER: Self = Self(13);

    /// Raw tag value.
    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Name of a well-known class, if this is one.
    pub const fn name(self) -> Option<&'static str> {
        Some(match self.0 {
            0 => "alu",
            1 => "load",
            2 => "store",
            3 => "branch",
            4 => "jump",
            5 => "jump_indirect",
            6 => "csr",
            7 => "mul",
            8 => "div",
            9 => "atomic",
            10 => "fence",
            11 => "system",
            12 => "nop",
            13 => "other",
            _ => return None,
        })
    }
}

impl From<u16> for OpClass {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl fmt::Display for OpClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "op{}", self.0),
        }
    }
}

/// Memory access width.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemWidth {
    Byte,
    Halfword,
    Word,
    Dword,
}

impl MemWidth {
    /// Access size in bytes.
    pub const fn bytes(self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Halfword => 2,
            Self::Word => 4,
            Self::Dword => 8,
        }
    }
}

/// Value of a memory access, sized by the access width.
///
/// The width lives in the variant, never in the magnitude of the value: a
/// word load of `0x2A` is still a word.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemAccess {
    Byte(u8),
    Halfword(u16),
    Word(u32),
    Dword(u64),
}

impl MemAccess {
    pub const fn width(self) -> MemWidth {
        match self {
            Self::Byte(_) => MemWidth::Byte,
            Self::Halfword(_) => MemWidth::Halfword,
            Self::Word(_) => MemWidth::Word,
            Self::Dword(_) => MemWidth::Dword,
        }
    }

    /// Zero-extended value.
    pub const fn value(self) -> u64 {
        match self {
            Self::Byte(v) => v as u64,
            Self::Halfword(v) => v as u64,
            Self::Word(v) => v as u64,
            Self::Dword(v) => v,
        }
    }
}

/// Event kind tag.
///
/// The discriminant is the record tag of the binary log format, so the values
/// are part of the on-disk contract and must never be renumbered.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    BlockEnter = 0x01,
    InstructionFetch = 0x02,
    OpcodeDecoded = 0x03,
    RegisterRead = 0x04,
    RegisterWrite = 0x05,
    MemReadByte = 0x10,
    MemReadHalfword = 0x11,
    MemReadWord = 0x12,
    MemReadDword = 0x13,
    MemWriteByte = 0x18,
    MemWriteHalfword = 0x19,
    MemWriteWord = 0x1A,
    MemWriteDword = 0x1B,
    BranchTaken = 0x20,
    BranchNotTaken = 0x21,
    CsrRead = 0x30,
    CsrWrite = 0x31,
}

impl EventKind {
    /// Every kind, in tag order.
    pub const ALL: [Self; 17] = [
        Self::BlockEnter,
        Self::InstructionFetch,
        Self::OpcodeDecoded,
        Self::RegisterRead,
        Self::RegisterWrite,
        Self::MemReadByte,
        Self::MemReadHalfword,
        Self::MemReadWord,
        Self::MemReadDword,
        Self::MemWriteByte,
        Self::MemWriteHalfword,
        Self::MemWriteWord,
        Self::MemWriteDword,
        Self::BranchTaken,
        Self::BranchNotTaken,
        Self::CsrRead,
        Self::CsrWrite,
    ];

    /// Binary log record tag.
    #[inline]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Look up a kind by its record tag.
    pub const fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0x01 => Self::BlockEnter,
            0x02 => Self::InstructionFetch,
            0x03 => Self::OpcodeDecoded,
            0x04 => Self::RegisterRead,
            0x05 => Self::RegisterWrite,
            0x10 => Self::MemReadByte,
            0x11 => Self::MemReadHalfword,
            0x12 => Self::MemReadWord,
            0x13 => Self::MemReadDword,
            0x18 => Self::MemWriteByte,
            0x19 => Self::MemWriteHalfword,
            0x1A => Self::MemWriteWord,
            0x1B => Self::MemWriteDword,
            0x20 => Self::BranchTaken,
            0x21 => Self::BranchNotTaken,
            0x30 => Self::CsrRead,
            0x31 => Self::CsrWrite,
            _ => return None,
        })
    }

    /// Dense index in `0..17`, used as the `KindSet` bit position.
    pub(crate) const fn index(self) -> u32 {
        match self {
            Self::BlockEnter => 0,
            Self::InstructionFetch => 1,
            Self::OpcodeDecoded => 2,
            Self::RegisterRead => 3,
            Self::RegisterWrite => 4,
            Self::MemReadByte => 5,
            Self::MemReadHalfword => 6,
            Self::MemReadWord => 7,
            Self::MemReadDword => 8,
            Self::MemWriteByte => 9,
            Self::MemWriteHalfword => 10,
            Self::MemWriteWord => 11,
            Self::MemWriteDword => 12,
            Self::BranchTaken => 13,
            Self::BranchNotTaken => 14,
            Self::CsrRead => 15,
            Self::CsrWrite => 16,
        }
    }

    const fn mem_read(width: MemWidth) -> Self {
        match width {
            MemWidth::Byte => Self::MemReadByte,
            MemWidth::Halfword => Self::MemReadHalfword,
            MemWidth::Word => Self::MemReadWord,
            MemWidth::Dword => Self::MemReadDword,
        }
    }

    const fn mem_write(width: MemWidth) -> Self {
        match width {
            MemWidth::Byte => Self::MemWriteByte,
            MemWidth::Halfword => Self::MemWriteHalfword,
            MemWidth::Word => Self::MemWriteWord,
            MemWidth::Dword => Self::MemWriteDword,
        }
    }

    /// Name used in configuration strings.
    pub const fn name(self) -> &'static str {
        match self {
            Self::BlockEnter => "block",
            Self::InstructionFetch => "fetch",
            Self::OpcodeDecoded => "opcode",
            Self::RegisterRead => "reg_read",
            Self::RegisterWrite => "reg_write",
            Self::MemReadByte => "mem_read_byte",
            Self::MemReadHalfword => "mem_read_halfword",
            Self::MemReadWord => "mem_read_word",
            Self::MemReadDword => "mem_read_dword",
            Self::MemWriteByte => "mem_write_byte",
            Self::MemWriteHalfword => "mem_write_halfword",
            Self::MemWriteWord => "mem_write_word",
            Self::MemWriteDword => "mem_write_dword",
            Self::BranchTaken => "branch_taken",
            Self::BranchNotTaken => "branch_not_taken",
            Self::CsrRead => "csr_read",
            Self::CsrWrite => "csr_write",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One architectural occurrence reported by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    BlockEnter {
        pc: u64,
    },
    InstructionFetch {
        pc: u64,
        op: OpClass,
    },
    OpcodeDecoded {
        pc: u64,
        op: OpClass,
        opcode: u32,
    },
    RegisterRead {
        pc: u64,
        op: OpClass,
        reg: u8,
        value: u64,
    },
    RegisterWrite {
        pc: u64,
        op: OpClass,
        reg: u8,
        value: u64,
    },
    MemoryRead {
        pc: u64,
        op: OpClass,
        addr: u64,
        access: MemAccess,
    },
    MemoryWrite {
        pc: u64,
        op: OpClass,
        addr: u64,
        access: MemAccess,
    },
    BranchTaken {
        pc: u64,
        op: OpClass,
        target: u64,
    },
    BranchNotTaken {
        pc: u64,
        op: OpClass,
        target: u64,
    },
    CsrRead {
        pc: u64,
        op: OpClass,
        csr: u16,
        value: u64,
    },
    CsrWrite {
        pc: u64,
        op: OpClass,
        csr: u16,
        value: u64,
    },
}

impl Event {
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::BlockEnter { .. } => EventKind::BlockEnter,
            Self::InstructionFetch { .. } => EventKind::InstructionFetch,
            Self::OpcodeDecoded { .. } => EventKind::OpcodeDecoded,
            Self::RegisterRead { .. } => EventKind::RegisterRead,
            Self::RegisterWrite { .. } => EventKind::RegisterWrite,
            Self::MemoryRead { access, .. } => EventKind::mem_read(access.width()),
            Self::MemoryWrite { access, .. } => EventKind::mem_write(access.width()),
            Self::BranchTaken { .. } => EventKind::BranchTaken,
            Self::BranchNotTaken { .. } => EventKind::BranchNotTaken,
            Self::CsrRead { .. } => EventKind::CsrRead,
            Self::CsrWrite { .. } => EventKind::CsrWrite,
        }
    }

    /// Address of the instruction that caused this event.
    pub const fn pc(&self) -> u64 {
        match *self {
            Self::BlockEnter { pc }
            | Self::InstructionFetch { pc, .. }
            | Self::OpcodeDecoded { pc, .. }
            | Self::RegisterRead { pc, .. }
            | Self::RegisterWrite { pc, .. }
            | Self::MemoryRead { pc, .. }
            | Self::MemoryWrite { pc, .. }
            | Self::BranchTaken { pc, .. }
            | Self::BranchNotTaken { pc, .. }
            | Self::CsrRead { pc, .. }
            | Self::CsrWrite { pc, .. } => pc,
        }
    }

    /// Op-class tag, absent for block entries.
    pub const fn op(&self) -> Option<OpClass> {
        match *self {
            Self::BlockEnter { .. } => None,
            Self::InstructionFetch { op, .. }
            | Self::OpcodeDecoded { op, .. }
            | Self::RegisterRead { op, .. }
            | Self::RegisterWrite { op, .. }
            | Self::MemoryRead { op, .. }
            | Self::MemoryWrite { op, .. }
            | Self::BranchTaken { op, .. }
            | Self::BranchNotTaken { op, .. }
            | Self::CsrRead { op, .. }
            | Self::CsrWrite { op, .. } => Some(op),
        }
    }
}

/// Set of event kinds, used as a filter allow-list.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KindSet(u32);

impl KindSet {
    pub const EMPTY: Self = Self(0);
    pub const ALL: Self = Self((1 << EventKind::ALL.len()) - 1);
    pub const BRANCHES: Self = Self::EMPTY
        .with(EventKind::BranchTaken)
        .with(EventKind::BranchNotTaken);
    pub const MEM_READS: Self = Self::EMPTY
        .with(EventKind::MemReadByte)
        .with(EventKind::MemReadHalfword)
        .with(EventKind::MemReadWord)
        .with(EventKind::MemReadDword);
    pub const MEM_WRITES: Self = Self::EMPTY
        .with(EventKind::MemWriteByte)
        .with(EventKind::MemWriteHalfword)
        .with(EventKind::MemWriteWord)
        .with(EventKind::MemWriteDword);
    pub const MEMORY: Self = Self::MEM_READS.union(Self::MEM_WRITES);
    pub const REGISTERS: Self = Self::EMPTY
        .with(EventKind::RegisterRead)
        .with(EventKind::RegisterWrite);
    pub const CSRS: Self = Self::EMPTY
        .with(EventKind::CsrRead)
        .with(EventKind::CsrWrite);
    pub const INSTRUCTIONS: Self = Self::EMPTY
        .with(EventKind::BlockEnter)
        .with(EventKind::InstructionFetch)
        .with(EventKind::OpcodeDecoded);

    #[must_use]
    pub const fn with(self, kind: EventKind) -> Self {
        Self(self.0 | (1 << kind.index()))
    }

    #[must_use]
    pub const fn without(self, kind: EventKind) -> Self {
        Self(self.0 & !(1 << kind.index()))
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    pub const fn contains(self, kind: EventKind) -> bool {
        self.0 & (1 << kind.index()) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Kinds in the set, in tag order.
    pub fn iter(self) -> impl Iterator<Item = EventKind> {
        EventKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }

    fn parse_item(item: &str) -> Option<Self> {
        let group = match item {
            "all" => Self::ALL,
            "none" => Self::EMPTY,
            "branch" | "branches" => Self::BRANCHES,
            "mem" | "memory" => Self::MEMORY,
            "mem_read" => Self::MEM_READS,
            "mem_write" => Self::MEM_WRITES,
            "reg" | "regs" => Self::REGISTERS,
            "csr" | "csrs" => Self::CSRS,
            "insn" | "instructions" => Self::INSTRUCTIONS,
            _ => {
                let kind = EventKind::ALL.into_iter().find(|k| k.name() == item)?;
                Self::EMPTY.with(kind)
            }
        };
        Some(group)
    }
}

impl FromIterator<EventKind> for KindSet {
    fn from_iter<I: IntoIterator<Item = EventKind>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

impl FromStr for KindSet {
    type Err = TraceError;

    /// Parse a comma-separated list of kind names and groups,
    /// e.g. `"branch,csr_write"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .try_fold(Self::EMPTY, |set, item| {
                Self::parse_item(&item.to_ascii_lowercase())
                    .map(|group| set.union(group))
                    .ok_or_else(|| TraceError::UnknownEventKind(item.to_string()))
            })
    }
}

impl fmt::Debug for KindSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(EventKind::from_tag(0x00), None);
        assert_eq!(EventKind::from_tag(0xFF), None);
    }

    #[test]
    fn test_mem_kind_follows_width() {
        let read = Event::MemoryRead {
            pc: 0x8000,
            op: OpClass::LOAD,
            addr: 0x1000,
            access: MemAccess::Word(0x2A),
        };
        assert_eq!(read.kind(), EventKind::MemReadWord);

        let write = Event::MemoryWrite {
            pc: 0x8004,
            op: OpClass::STORE,
            addr: 0x1000,
            access: MemAccess::Byte(0xFF),
        };
        assert_eq!(write.kind(), EventKind::MemWriteByte);
        assert_eq!(write.pc(), 0x8004);
        assert_eq!(write.op(), Some(OpClass::STORE));
    }

    #[test]
    fn test_block_enter_has_no_op_class() {
        assert_eq!(Event::BlockEnter { pc: 0x100 }.op(), None);
    }

    #[test]
    fn test_mem_access_value() {
        assert_eq!(MemAccess::Halfword(0xBEEF).value(), 0xBEEF);
        assert_eq!(MemAccess::Dword(u64::MAX).width().bytes(), 8);
    }

    #[test]
    fn test_kind_set_groups() {
        assert_eq!(KindSet::ALL.len(), 17);
        assert_eq!(KindSet::MEMORY.len(), 8);
        assert!(KindSet::BRANCHES.contains(EventKind::BranchTaken));
        assert!(!KindSet::BRANCHES.contains(EventKind::InstructionFetch));
        assert!(KindSet::EMPTY.is_empty());
        assert_eq!(
            KindSet::ALL.without(EventKind::CsrRead).len(),
            KindSet::ALL.len() - 1
        );
    }

    #[test]
    fn test_kind_set_parse() {
        let set: KindSet = "branch, csr_write".parse().unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.contains(EventKind::CsrWrite));
        assert!(!set.contains(EventKind::CsrRead));

        let all: KindSet = "ALL".parse().unwrap();
        assert_eq!(all, KindSet::ALL);

        assert!(matches!(
            "branch,bogus".parse::<KindSet>(),
            Err(TraceError::UnknownEventKind(name)) if name == "bogus"
        ));
    }

    #[test]
    fn test_op_class_display() {
        assert_eq!(OpClass::LOAD.to_string(), "load");
        assert_eq!(OpClass(400).to_string(), "op400");
    }
}
