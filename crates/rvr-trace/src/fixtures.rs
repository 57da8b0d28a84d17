//! Test fixtures: a recording tracer, event generators and a tiny engine.
//!
//! Available in unit tests and, through the `test-fixtures` feature, to
//! integration tests and downstream crates.

use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::event::{Event, MemAccess, OpClass};
use crate::tracer::Tracer;

/// Keeps every event in order, and counts lifecycle calls.
#[derive(Clone, Debug, Default)]
pub struct RecordingTracer {
    pub events: Vec<Event>,
    pub inits: u32,
    pub finis: u32,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tracer for RecordingTracer {
    fn init(&mut self) -> Result<()> {
        self.inits += 1;
        Ok(())
    }

    fn fini(&mut self) -> Result<()> {
        self.finis += 1;
        Ok(())
    }

    fn trace_event(&mut self, event: Event) {
        self.events.push(event);
    }
}

/// One load: fetch, word read, register write.
pub fn load_scenario() -> Vec<Event> {
    vec![
        Event::InstructionFetch {
            pc: 0x8000,
            op: OpClass::LOAD,
        },
        Event::MemoryRead {
            pc: 0x8000,
            op: OpClass::LOAD,
            addr: 0x1000,
            access: MemAccess::Word(0x2A),
        },
        Event::RegisterWrite {
            pc: 0x8000,
            op: OpClass::LOAD,
            reg: 5,
            value: 0x2A,
        },
    ]
}

/// Five conditional branches alternating taken / not taken, each preceded by
/// its fetch and operand read.
pub fn branch_scenario() -> Vec<Event> {
    let mut events = Vec::with_capacity(15);
    for i in 0..5u64 {
        let pc = 0x2000 + i * 4;
        let target = 0x3000 + i * 0x10;
        events.push(Event::InstructionFetch {
            pc,
            op: OpClass::BRANCH,
        });
        events.push(Event::RegisterRead {
            pc,
            op: OpClass::BRANCH,
            reg: 10,
            value: i,
        });
        events.push(if i % 2 == 0 {
            Event::BranchTaken {
                pc,
                op: OpClass::BRANCH,
                target,
            }
        } else {
            Event::BranchNotTaken {
                pc,
                op: OpClass::BRANCH,
                target,
            }
        });
    }
    events
}

/// Deterministic pseudo-random generator (64-bit LCG).
#[derive(Clone, Debug)]
pub struct Lcg(u64);

impl Lcg {
    pub const fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub const fn next_u64(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.0 ^ (self.0 >> 29)
    }

    /// Uniform-ish value in `0..n`.
    pub const fn below(&mut self, n: u64) -> u64 {
        self.next_u64() % n
    }
}

/// Generate the events of `instructions` plausible instructions, each in
/// fetch, decode, operand reads, effect order. Blocks end at branches and jumps.
#[allow(clippy::cast_possible_truncation)]
pub fn generate_events(seed: u64, instructions: usize) -> Vec<Event> {
    let mut rng = Lcg::new(seed);
    let mut events = Vec::with_capacity(instructions * 5);
    let mut pc = 0x8000_0000u64;
    let mut block_start = true;

    for _ in 0..instructions {
        if block_start {
            events.push(Event::BlockEnter { pc });
            block_start = false;
        }
        let class = rng.below(6);
        let op = match class {
            0 => OpClass::LOAD,
            1 => OpClass::STORE,
            2 => OpClass::BRANCH,
            3 => OpClass::CSR,
            4 => OpClass::JUMP,
            _ => OpClass::ALU,
        };
        events.push(Event::InstructionFetch { pc, op });
        events.push(Event::OpcodeDecoded {
            pc,
            op,
            opcode: rng.next_u64() as u32,
        });
        let rs1 = (rng.below(31) + 1) as u8;
        let rd = rng.below(32) as u8;
        let value = rng.next_u64();
        let mut next = pc + 4;

        match class {
            0 | 1 => {
                events.push(Event::RegisterRead {
                    pc,
                    op,
                    reg: rs1,
                    value,
                });
                let addr = 0x1000 + rng.below(0x1000);
                let access = match rng.below(4) {
                    0 => MemAccess::Byte(value as u8),
                    1 => MemAccess::Halfword(value as u16),
                    2 => MemAccess::Word(value as u32),
                    _ => MemAccess::Dword(value),
                };
                if class == 0 {
                    events.push(Event::MemoryRead {
                        pc,
                        op,
                        addr,
                        access,
                    });
                    events.push(Event::RegisterWrite {
                        pc,
                        op,
                        reg: rd,
                        value: access.value(),
                    });
                } else {
                    events.push(Event::MemoryWrite {
                        pc,
                        op,
                        addr,
                        access,
                    });
                }
            }
            2 => {
                events.push(Event::RegisterRead {
                    pc,
                    op,
                    reg: rs1,
                    value,
                });
                let target = pc.wrapping_add(rng.below(64) * 4);
                if rng.below(2) == 0 {
                    events.push(Event::BranchTaken { pc, op, target });
                    next = target;
                } else {
                    events.push(Event::BranchNotTaken { pc, op, target });
                }
                block_start = true;
            }
            3 => {
                let csr = rng.below(0x1000) as u16;
                events.push(Event::CsrRead { pc, op, csr, value });
                events.push(Event::CsrWrite {
                    pc,
                    op,
                    csr,
                    value: value ^ 1,
                });
                events.push(Event::RegisterWrite {
                    pc,
                    op,
                    reg: rd,
                    value,
                });
            }
            4 => {
                next = 0x8000_0000 + rng.below(0x400) * 4;
                events.push(Event::RegisterWrite {
                    pc,
                    op,
                    reg: rd,
                    value: pc + 4,
                });
                block_start = true;
            }
            _ => {
                events.push(Event::RegisterRead {
                    pc,
                    op,
                    reg: rs1,
                    value,
                });
                events.push(Event::RegisterWrite {
                    pc,
                    op,
                    reg: rd,
                    value: value.wrapping_add(1),
                });
            }
        }
        pc = next;
    }
    events
}

/// Instruction set of [`MiniEngine`].
#[derive(Clone, Copy, Debug)]
pub enum Insn {
    /// `rd = rs1 + imm`
    AddI { rd: u8, rs1: u8, imm: i64 },
    /// `rd = mem32[rs1 + imm]`
    Lw { rd: u8, rs1: u8, imm: i64 },
    /// `mem32[rs1 + imm] = rs2`
    Sw { rs1: u8, rs2: u8, imm: i64 },
    /// `if rs1 != rs2 { pc += off }`
    Bne { rs1: u8, rs2: u8, off: i64 },
    /// `rd = csr; csr = rs1`
    Csrrw { rd: u8, rs1: u8, csr: u16 },
    /// Stop.
    Halt,
}

impl Insn {
    const fn op(self) -> OpClass {
        match self {
            Self::AddI { .. } => OpClass::ALU,
            Self::Lw { .. } => OpClass::LOAD,
            Self::Sw { .. } => OpClass::STORE,
            Self::Bne { .. } => OpClass::BRANCH,
            Self::Csrrw { .. } => OpClass::CSR,
            Self::Halt => OpClass::SYSTEM,
        }
    }

    /// Arbitrary but stable encoding for `trace_opcode`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    const fn encode(self) -> u32 {
        const fn fields(base: u32, rd: u8, rs1: u8, upper: u32) -> u32 {
            base | (rd as u32) << 7 | (rs1 as u32) << 15 | upper << 20
        }
        match self {
            Self::AddI { rd, rs1, imm } => fields(0x13, rd, rs1, imm as u32),
            Self::Lw { rd, rs1, imm } => fields(0x2003, rd, rs1, imm as u32),
            Self::Sw { rs1, rs2, .. } => fields(0x2023, 0, rs1, rs2 as u32),
            Self::Bne { rs1, rs2, .. } => fields(0x1063, 0, rs1, rs2 as u32),
            Self::Csrrw { rd, rs1, csr } => fields(0x1073, rd, rs1, csr as u32),
            Self::Halt => 0x0010_0073,
        }
    }
}

/// Minimal interpreter that drives a tracer the way the real engine does:
/// statically bound, one hook per architectural effect, fixed order.
pub struct MiniEngine<T: Tracer> {
    pub regs: [u64; 32],
    pub mem: FxHashMap<u64, u32>,
    pub csrs: FxHashMap<u16, u64>,
    pub pc: u64,
    tracer: T,
}

impl<T: Tracer> MiniEngine<T> {
    pub const BASE: u64 = 0x8000;

    pub fn new(tracer: T) -> Self {
        Self {
            regs: [0; 32],
            mem: FxHashMap::default(),
            csrs: FxHashMap::default(),
            pc: Self::BASE,
            tracer,
        }
    }

    pub const fn tracer(&self) -> &T {
        &self.tracer
    }

    pub const fn tracer_mut(&mut self) -> &mut T {
        &mut self.tracer
    }

    pub fn into_tracer(self) -> T {
        self.tracer
    }

    fn read_reg(&mut self, op: OpClass, reg: u8) -> u64 {
        let value = self.regs[usize::from(reg)];
        self.tracer.trace_reg_read(self.pc, op, reg, value);
        value
    }

    fn write_reg(&mut self, op: OpClass, reg: u8, value: u64) {
        if reg != 0 {
            self.regs[usize::from(reg)] = value;
        }
        self.tracer.trace_reg_write(self.pc, op, reg, value);
    }

    /// Run until `Halt`, falling off the program, or `max_steps`
    /// instructions. Returns the number of instructions retired.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    pub fn run(&mut self, program: &[Insn], max_steps: usize) -> usize {
        let mut new_block = true;
        for step in 0..max_steps {
            let index = (self.pc.wrapping_sub(Self::BASE) / 4) as usize;
            let Some(&insn) = program.get(index) else {
                return step;
            };
            let pc = self.pc;
            let op = insn.op();
            if new_block {
                self.tracer.trace_block(pc);
                new_block = false;
            }
            self.tracer.trace_pc(pc, op);
            self.tracer.trace_opcode(pc, op, insn.encode());
            let mut next = pc + 4;

            match insn {
                Insn::AddI { rd, rs1, imm } => {
                    let a = self.read_reg(op, rs1);
                    self.write_reg(op, rd, a.wrapping_add(imm as u64));
                }
                Insn::Lw { rd, rs1, imm } => {
                    let addr = self.read_reg(op, rs1).wrapping_add(imm as u64);
                    let value = self.mem.get(&addr).copied().unwrap_or(0);
                    self.tracer.trace_mem_read_word(pc, op, addr, value);
                    self.write_reg(op, rd, i64::from(value as i32) as u64);
                }
                Insn::Sw { rs1, rs2, imm } => {
                    let addr = self.read_reg(op, rs1).wrapping_add(imm as u64);
                    let value = self.read_reg(op, rs2) as u32;
                    self.mem.insert(addr, value);
                    self.tracer.trace_mem_write_word(pc, op, addr, value);
                }
                Insn::Bne { rs1, rs2, off } => {
                    let a = self.read_reg(op, rs1);
                    let b = self.read_reg(op, rs2);
                    let target = pc.wrapping_add(off as u64);
                    if a == b {
                        self.tracer.trace_branch_not_taken(pc, op, target);
                    } else {
                        self.tracer.trace_branch_taken(pc, op, target);
                        next = target;
                    }
                    new_block = true;
                }
                Insn::Csrrw { rd, rs1, csr } => {
                    let new = self.read_reg(op, rs1);
                    let old = self.csrs.get(&csr).copied().unwrap_or(0);
                    self.tracer.trace_csr_read(pc, op, csr, old);
                    self.csrs.insert(csr, new);
                    self.tracer.trace_csr_write(pc, op, csr, new);
                    self.write_reg(op, rd, old);
                }
                Insn::Halt => return step + 1,
            }
            self.pc = next;
        }
        max_steps
    }
}

/// Count down `x1` from `n`, storing each value: a small loop that exercises
/// every hook except byte/halfword/dword memory.
pub fn countdown_program(n: i64) -> Vec<Insn> {
    vec![
        Insn::AddI {
            rd: 1,
            rs1: 0,
            imm: n,
        },
        Insn::AddI {
            rd: 2,
            rs1: 0,
            imm: 0x100,
        },
        Insn::Sw {
            rs1: 2,
            rs2: 1,
            imm: 0,
        },
        Insn::Lw {
            rd: 3,
            rs1: 2,
            imm: 0,
        },
        Insn::AddI {
            rd: 1,
            rs1: 1,
            imm: -1,
        },
        Insn::Bne {
            rs1: 1,
            rs2: 0,
            off: -12,
        },
        Insn::Csrrw {
            rd: 4,
            rs1: 3,
            csr: 0x340,
        },
        Insn::Halt,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    #[test]
    fn test_generator_is_deterministic() {
        assert_eq!(generate_events(7, 200), generate_events(7, 200));
        assert_ne!(generate_events(7, 200), generate_events(8, 200));
    }

    #[test]
    fn test_generated_instructions_start_with_fetch() {
        let events = generate_events(42, 500);
        let fetches = events
            .iter()
            .filter(|e| e.kind() == EventKind::InstructionFetch)
            .count();
        assert_eq!(fetches, 500);
        for pair in events.windows(2) {
            if pair[1].kind() == EventKind::OpcodeDecoded {
                assert_eq!(pair[0].kind(), EventKind::InstructionFetch);
                assert_eq!(pair[0].pc(), pair[1].pc());
            }
        }
    }

    #[test]
    fn test_mini_engine_countdown() {
        let mut engine = MiniEngine::new(RecordingTracer::new());
        let retired = engine.run(&countdown_program(3), 100);

        // 2 setup + 3 * 4 loop body + csrrw + halt
        assert_eq!(retired, 16);
        assert_eq!(engine.regs[1], 0);
        assert_eq!(engine.regs[4], 0);
        assert_eq!(engine.csrs[&0x340], 1);

        let events = engine.into_tracer().events;
        let taken = events
            .iter()
            .filter(|e| e.kind() == EventKind::BranchTaken)
            .count();
        let not_taken = events
            .iter()
            .filter(|e| e.kind() == EventKind::BranchNotTaken)
            .count();
        assert_eq!((taken, not_taken), (2, 1));
        assert_eq!(
            events[0],
            Event::BlockEnter {
                pc: MiniEngine::<RecordingTracer>::BASE,
            }
        );
    }
}
