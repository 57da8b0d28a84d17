//! No-op tracer.

use crate::tracer::Tracer;

/// Tracer that discards every event.
///
/// Used when tracing is disabled and as the cost baseline for every other
/// backend. Every method is the trait's inline default ending in an empty
/// `trace_event`, so an engine instantiated with `NoopTracer` compiles its
/// trace calls away entirely.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::OpClass;

    #[test]
    fn test_noop_is_zst() {
        assert_eq!(std::mem::size_of::<NoopTracer>(), 0);
    }

    #[test]
    fn test_noop_lifecycle() {
        let mut tracer = NoopTracer;
        tracer.init().unwrap();
        tracer.trace_pc(0x8000, OpClass::LOAD);
        tracer.trace_mem_read_word(0x8000, OpClass::LOAD, 0x1000, 0x2A);
        tracer.fini().unwrap();
    }

    #[test]
    fn test_noop_zero_length_run() {
        let mut tracer = NoopTracer;
        tracer.init().unwrap();
        tracer.fini().unwrap();
    }
}
