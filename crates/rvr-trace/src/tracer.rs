//! The tracer capability.
//!
//! `Tracer` is the only surface the execution engine depends on for
//! observability. Engines are generic over `T: Tracer`, so the active backend
//! is bound at build configuration and every call is statically resolved; with
//! `NoopTracer` the whole call sequence inlines to nothing.
//!
//! Every per-kind method has a default that packs its arguments into an
//! [`Event`] and hands it to [`Tracer::trace_event`]. Recording backends only
//! need to implement `trace_event`; backends that care about a few kinds
//! override just those methods.

use crate::error::Result;
use crate::event::{Event, MemAccess, OpClass};

/// Tracer behavior trait.
///
/// Lifecycle: `init` once, then any number of event calls, then `fini` once.
/// Event methods have no return value: a backend that cannot record an event
/// degrades according to its own policy and never reports back to the engine.
pub trait Tracer: Send {
    /// Acquire resources. Called once before the first event.
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Flush buffered events and release resources. Called once at the end
    /// of execution, including when `init` failed part way.
    fn fini(&mut self) -> Result<()> {
        Ok(())
    }

    /// Sink for every event the per-kind defaults produce.
    #[inline]
    fn trace_event(&mut self, _event: Event) {}

    /// Called at basic block entry.
    #[inline]
    fn trace_block(&mut self, pc: u64) {
        self.trace_event(Event::BlockEnter { pc });
    }

    /// Called before each instruction.
    #[inline]
    fn trace_pc(&mut self, pc: u64, op: OpClass) {
        self.trace_event(Event::InstructionFetch { pc, op });
    }

    /// Called when instruction opcode is decoded.
    #[inline]
    fn trace_opcode(&mut self, pc: u64, op: OpClass, opcode: u32) {
        self.trace_event(Event::OpcodeDecoded { pc, op, opcode });
    }

    /// Called on register read.
    #[inline]
    fn trace_reg_read(&mut self, pc: u64, op: OpClass, reg: u8, value: u64) {
        self.trace_event(Event::RegisterRead { pc, op, reg, value });
    }

    /// Called on register write.
    #[inline]
    fn trace_reg_write(&mut self, pc: u64, op: OpClass, reg: u8, value: u64) {
        self.trace_event(Event::RegisterWrite { pc, op, reg, value });
    }

    #[inline]
    fn trace_mem_read_byte(&mut self, pc: u64, op: OpClass, addr: u64, value: u8) {
        self.trace_event(Event::MemoryRead {
            pc,
            op,
            addr,
            access: MemAccess::Byte(value),
        });
    }

    #[inline]
    fn trace_mem_read_halfword(&mut self, pc: u64, op: OpClass, addr: u64, value: u16) {
        self.trace_event(Event::MemoryRead {
            pc,
            op,
            addr,
            access: MemAccess::Halfword(value),
        });
    }

    #[inline]
    fn trace_mem_read_word(&mut self, pc: u64, op: OpClass, addr: u64, value: u32) {
        self.trace_event(Event::MemoryRead {
            pc,
            op,
            addr,
            access: MemAccess::Word(value),
        });
    }

    #[inline]
    fn trace_mem_read_dword(&mut self, pc: u64, op: OpClass, addr: u64, value: u64) {
        self.trace_event(Event::MemoryRead {
            pc,
            op,
            addr,
            access: MemAccess::Dword(value),
        });
    }

    #[inline]
    fn trace_mem_write_byte(&mut self, pc: u64, op: OpClass, addr: u64, value: u8) {
        self.trace_event(Event::MemoryWrite {
            pc,
            op,
            addr,
            access: MemAccess::Byte(value),
        });
    }

    #[inline]
    fn trace_mem_write_halfword(&mut self, pc: u64, op: OpClass, addr: u64, value: u16) {
        self.trace_event(Event::MemoryWrite {
            pc,
            op,
            addr,
            access: MemAccess::Halfword(value),
        });
    }

    #[inline]
    fn trace_mem_write_word(&mut self, pc: u64, op: OpClass, addr: u64, value: u32) {
        self.trace_event(Event::MemoryWrite {
            pc,
            op,
            addr,
            access: MemAccess::Word(value),
        });
    }

    #[inline]
    fn trace_mem_write_dword(&mut self, pc: u64, op: OpClass, addr: u64, value: u64) {
        self.trace_event(Event::MemoryWrite {
            pc,
            op,
            addr,
            access: MemAccess::Dword(value),
        });
    }

    /// Called when branch is taken.
    #[inline]
    fn trace_branch_taken(&mut self, pc: u64, op: OpClass, target: u64) {
        self.trace_event(Event::BranchTaken { pc, op, target });
    }

    /// Called when branch is not taken. `target` is the would-be target.
    #[inline]
    fn trace_branch_not_taken(&mut self, pc: u64, op: OpClass, target: u64) {
        self.trace_event(Event::BranchNotTaken { pc, op, target });
    }

    /// Called on CSR read.
    #[inline]
    fn trace_csr_read(&mut self, pc: u64, op: OpClass, csr: u16, value: u64) {
        self.trace_event(Event::CsrRead { pc, op, csr, value });
    }

    /// Called on CSR write.
    #[inline]
    fn trace_csr_write(&mut self, pc: u64, op: OpClass, csr: u16, value: u64) {
        self.trace_event(Event::CsrWrite { pc, op, csr, value });
    }
}

impl Event {
    /// Issue this event to `tracer` through the matching per-kind method.
    #[inline]
    pub fn replay<T: Tracer + ?Sized>(self, tracer: &mut T) {
        match self {
            Self::BlockEnter { pc } => tracer.trace_block(pc),
            Self::InstructionFetch { pc, op } => tracer.trace_pc(pc, op),
            Self::OpcodeDecoded { pc, op, opcode } => tracer.trace_opcode(pc, op, opcode),
            Self::RegisterRead { pc, op, reg, value } => tracer.trace_reg_read(pc, op, reg, value),
            Self::RegisterWrite { pc, op, reg, value } => {
                tracer.trace_reg_write(pc, op, reg, value);
            }
            Self::MemoryRead {
                pc,
                op,
                addr,
                access,
            } => match access {
                MemAccess::Byte(v) => tracer.trace_mem_read_byte(pc, op, addr, v),
                MemAccess::Halfword(v) => tracer.trace_mem_read_halfword(pc, op, addr, v),
                MemAccess::Word(v) => tracer.trace_mem_read_word(pc, op, addr, v),
                MemAccess::Dword(v) => tracer.trace_mem_read_dword(pc, op, addr, v),
            },
            Self::MemoryWrite {
                pc,
                op,
                addr,
                access,
            } => match access {
                MemAccess::Byte(v) => tracer.trace_mem_write_byte(pc, op, addr, v),
                MemAccess::Halfword(v) => tracer.trace_mem_write_halfword(pc, op, addr, v),
                MemAccess::Word(v) => tracer.trace_mem_write_word(pc, op, addr, v),
                MemAccess::Dword(v) => tracer.trace_mem_write_dword(pc, op, addr, v),
            },
            Self::BranchTaken { pc, op, target } => tracer.trace_branch_taken(pc, op, target),
            Self::BranchNotTaken { pc, op, target } => {
                tracer.trace_branch_not_taken(pc, op, target);
            }
            Self::CsrRead { pc, op, csr, value } => tracer.trace_csr_read(pc, op, csr, value),
            Self::CsrWrite { pc, op, csr, value } => tracer.trace_csr_write(pc, op, csr, value),
        }
    }
}

/// Replay a whole sequence in order.
pub fn replay_all<'a, T, I>(tracer: &mut T, events: I)
where
    T: Tracer + ?Sized,
    I: IntoIterator<Item = &'a Event>,
{
    for event in events {
        event.replay(tracer);
    }
}

/// Forward every method, so overrides in the wrapped tracer are honored.
macro_rules! forward_tracer {
    () => {
        fn init(&mut self) -> Result<()> {
            (**self).init()
        }
        fn fini(&mut self) -> Result<()> {
            (**self).fini()
        }
        #[inline]
        fn trace_event(&mut self, event: Event) {
            (**self).trace_event(event);
        }
        #[inline]
        fn trace_block(&mut self, pc: u64) {
            (**self).trace_block(pc);
        }
        #[inline]
        fn trace_pc(&mut self, pc: u64, op: OpClass) {
            (**self).trace_pc(pc, op);
        }
        #[inline]
        fn trace_opcode(&mut self, pc: u64, op: OpClass, opcode: u32) {
            (**self).trace_opcode(pc, op, opcode);
        }
        #[inline]
        fn trace_reg_read(&mut self, pc: u64, op: OpClass, reg: u8, value: u64) {
            (**self).trace_reg_read(pc, op, reg, value);
        }
        #[inline]
        fn trace_reg_write(&mut self, pc: u64, op: OpClass, reg: u8, value: u64) {
            (**self).trace_reg_write(pc, op, reg, value);
        }
        #[inline]
        fn trace_mem_read_byte(&mut self, pc: u64, op: OpClass, addr: u64, value: u8) {
            (**self).trace_mem_read_byte(pc, op, addr, value);
        }
        #[inline]
        fn trace_mem_read_halfword(&mut self, pc: u64, op: OpClass, addr: u64, value: u16) {
            (**self).trace_mem_read_halfword(pc, op, addr, value);
        }
        #[inline]
        fn trace_mem_read_word(&mut self, pc: u64, op: OpClass, addr: u64, value: u32) {
            (**self).trace_mem_read_word(pc, op, addr, value);
        }
        #[inline]
        fn trace_mem_read_dword(&mut self, pc: u64, op: OpClass, addr: u64, value: u64) {
            (**self).trace_mem_read_dword(pc, op, addr, value);
        }
        #[inline]
        fn trace_mem_write_byte(&mut self, pc: u64, op: OpClass, addr: u64, value: u8) {
            (**self).trace_mem_write_byte(pc, op, addr, value);
        }
        #[inline]
        fn trace_mem_write_halfword(&mut self, pc: u64, op: OpClass, addr: u64, value: u16) {
            (**self).trace_mem_write_halfword(pc, op, addr, value);
        }
        #[inline]
        fn trace_mem_write_word(&mut self, pc: u64, op: OpClass, addr: u64, value: u32) {
            (**self).trace_mem_write_word(pc, op, addr, value);
        }
        #[inline]
        fn trace_mem_write_dword(&mut self, pc: u64, op: OpClass, addr: u64, value: u64) {
            (**self).trace_mem_write_dword(pc, op, addr, value);
        }
        #[inline]
        fn trace_branch_taken(&mut self, pc: u64, op: OpClass, target: u64) {
            (**self).trace_branch_taken(pc, op, target);
        }
        #[inline]
        fn trace_branch_not_taken(&mut self, pc: u64, op: OpClass, target: u64) {
            (**self).trace_branch_not_taken(pc, op, target);
        }
        #[inline]
        fn trace_csr_read(&mut self, pc: u64, op: OpClass, csr: u16, value: u64) {
            (**self).trace_csr_read(pc, op, csr, value);
        }
        #[inline]
        fn trace_csr_write(&mut self, pc: u64, op: OpClass, csr: u16, value: u64) {
            (**self).trace_csr_write(pc, op, csr, value);
        }
    };
}

impl<T: Tracer + ?Sized> Tracer for &mut T {
    forward_tracer!();
}

impl<T: Tracer + ?Sized> Tracer for Box<T> {
    forward_tracer!();
}
