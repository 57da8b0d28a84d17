//! Kind-filtering decorator.
//!
//! Forwards only the event kinds in an allow-set to the wrapped tracer and
//! absorbs the rest. Forwarded events reach the inner tracer through the same
//! per-kind methods the engine called, in the same order.

use crate::error::Result;
use crate::event::{Event, KindSet};
use crate::metrics;
use crate::tracer::Tracer;

/// Decorator that forwards only allowed event kinds to `inner`.
pub struct FilterTracer<T: Tracer> {
    inner: T,
    allow: KindSet,
    forwarded: u64,
    absorbed: u64,
}

impl<T: Tracer> FilterTracer<T> {
    /// Wrap `inner`, passing through the kinds in `allow`.
    pub const fn new(inner: T, allow: KindSet) -> Self {
        Self {
            inner,
            allow,
            forwarded: 0,
            absorbed: 0,
        }
    }

    /// Kinds forwarded to the inner tracer.
    pub const fn allow(&self) -> KindSet {
        self.allow
    }

    pub const fn forwarded(&self) -> u64 {
        self.forwarded
    }

    /// Events filtered out.
    pub const fn absorbed(&self) -> u64 {
        self.absorbed
    }

    /// Wrapped tracer.
    pub const fn inner(&self) -> &T {
        &self.inner
    }

    pub const fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Tracer> Tracer for FilterTracer<T> {
    fn init(&mut self) -> Result<()> {
        self.inner.init()
    }

    fn fini(&mut self) -> Result<()> {
        metrics::record_filtered(self.absorbed);
        self.inner.fini()
    }

    #[inline]
    fn trace_event(&mut self, event: Event) {
        if self.allow.contains(event.kind()) {
            self.forwarded += 1;
            event.replay(&mut self.inner);
        } else {
            self.absorbed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, MemAccess, OpClass};

    #[derive(Default)]
    struct Collect {
        events: Vec<Event>,
        finished: bool,
    }

    impl Tracer for Collect {
        fn fini(&mut self) -> Result<()> {
            self.finished = true;
            Ok(())
        }

        fn trace_event(&mut self, event: Event) {
            self.events.push(event);
        }
    }

    #[test]
    fn test_branch_only_filter() {
        let mut filter = FilterTracer::new(Collect::default(), KindSet::BRANCHES);
        filter.init().unwrap();
        let mut expected = Vec::new();
        for i in 0..5u64 {
            let pc = 0x100 + i * 4;
            filter.trace_pc(pc, OpClass::BRANCH);
            filter.trace_reg_read(pc, OpClass::BRANCH, 1, i);
            let target = pc + 0x40;
            if i % 2 == 0 {
                filter.trace_branch_taken(pc, OpClass::BRANCH, target);
                expected.push(Event::BranchTaken {
                    pc,
                    op: OpClass::BRANCH,
                    target,
                });
            } else {
                filter.trace_branch_not_taken(pc, OpClass::BRANCH, target);
                expected.push(Event::BranchNotTaken {
                    pc,
                    op: OpClass::BRANCH,
                    target,
                });
            }
        }
        filter.fini().unwrap();

        assert_eq!(filter.forwarded(), 5);
        assert_eq!(filter.absorbed(), 10);
        let inner = filter.into_inner();
        assert!(inner.finished);
        assert_eq!(inner.events, expected);
    }

    #[test]
    fn test_width_specific_filter() {
        let allow = KindSet::EMPTY.with(EventKind::MemWriteByte);
        let mut filter = FilterTracer::new(Collect::default(), allow);
        filter.trace_mem_write_byte(0, OpClass::STORE, 0x10, 1);
        filter.trace_mem_write_word(4, OpClass::STORE, 0x20, 2);
        filter.trace_mem_read_byte(8, OpClass::LOAD, 0x10, 1);

        assert_eq!(
            filter.inner().events,
            vec![Event::MemoryWrite {
                pc: 0,
                op: OpClass::STORE,
                addr: 0x10,
                access: MemAccess::Byte(1),
            }]
        );
    }

    #[test]
    fn test_empty_allow_set_absorbs_all() {
        let mut filter = FilterTracer::new(Collect::default(), KindSet::EMPTY);
        filter.trace_block(0);
        filter.trace_csr_read(0, OpClass::CSR, 0x300, 0);
        assert!(filter.inner().events.is_empty());
        assert_eq!(filter.absorbed(), 2);
    }

    #[test]
    fn test_nested_filters_intersect() {
        let outer = KindSet::BRANCHES.union(KindSet::REGISTERS);
        let inner = FilterTracer::new(Collect::default(), KindSet::REGISTERS);
        let mut filter = FilterTracer::new(inner, outer);
        filter.trace_reg_write(0, OpClass::ALU, 3, 7);
        filter.trace_branch_taken(0, OpClass::BRANCH, 8);
        filter.trace_pc(0, OpClass::ALU);

        assert_eq!(filter.inner().inner().events.len(), 1);
        assert_eq!(filter.inner().absorbed(), 1);
        assert_eq!(filter.absorbed(), 1);
    }
}
