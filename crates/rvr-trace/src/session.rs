//! Scoped tracer lifecycle.
//!
//! `TraceSession` pairs `init` with exactly one `fini`, on every exit path:
//! explicit `finish`, early return, or unwinding out of a faulting engine.

use std::ops::{Deref, DerefMut};

use tracing::{debug, error};

use crate::error::Result;
use crate::tracer::Tracer;

pub struct TraceSession<T: Tracer> {
    tracer: Option<T>,
}

impl<T: Tracer> TraceSession<T> {
    /// Initialize `tracer` and open a session over it.
    ///
    /// # Errors
    ///
    /// Returns the `init` error after running `fini` so partially acquired
    /// resources are released. A cleanup failure is logged, not returned.
    pub fn start(mut tracer: T) -> Result<Self> {
        if let Err(e) = tracer.init() {
            if let Err(cleanup) = tracer.fini() {
                debug!(error = %cleanup, "fini after failed init");
            }
            return Err(e);
        }
        debug!("trace session started");
        Ok(Self {
            tracer: Some(tracer),
        })
    }

    /// End the session and get the tracer back for inspection.
    ///
    /// # Errors
    ///
    /// Returns the backend's `fini` error. The tracer is finished either way.
    pub fn finish(mut self) -> Result<T> {
        let Some(mut tracer) = self.tracer.take() else {
            unreachable!("session tracer taken before finish")
        };
        tracer.fini()?;
        debug!("trace session finished");
        Ok(tracer)
    }
}

impl<T: Tracer> Deref for TraceSession<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.tracer {
            Some(t) => t,
            None => unreachable!("session tracer taken before finish"),
        }
    }
}

impl<T: Tracer> DerefMut for TraceSession<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.tracer {
            Some(t) => t,
            None => unreachable!("session tracer taken before finish"),
        }
    }
}

impl<T: Tracer> Drop for TraceSession<T> {
    fn drop(&mut self) {
        if let Some(mut tracer) = self.tracer.take() {
            if let Err(e) = tracer.fini() {
                error!(error = %e, "tracer fini failed during drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::TraceError;
    use crate::event::OpClass;

    #[derive(Default)]
    struct Lifecycle {
        inits: Arc<AtomicU32>,
        finis: Arc<AtomicU32>,
        fail_init: bool,
        fail_fini: bool,
        events: u32,
    }

    impl Tracer for Lifecycle {
        fn init(&mut self) -> Result<()> {
            self.inits.fetch_add(1, Ordering::Relaxed);
            if self.fail_init {
                return Err(TraceError::SinkFailed("no space".into()));
            }
            Ok(())
        }

        fn fini(&mut self) -> Result<()> {
            self.finis.fetch_add(1, Ordering::Relaxed);
            if self.fail_fini {
                return Err(TraceError::SinkFailed("flush".into()));
            }
            Ok(())
        }

        fn trace_pc(&mut self, _pc: u64, _op: OpClass) {
            self.events += 1;
        }
    }

    #[test]
    fn test_finish_runs_fini_once() {
        let finis = Arc::new(AtomicU32::new(0));
        let tracer = Lifecycle {
            finis: Arc::clone(&finis),
            ..Lifecycle::default()
        };
        let mut session = TraceSession::start(tracer).unwrap();
        session.trace_pc(0, OpClass::ALU);
        let tracer = session.finish().unwrap();
        assert_eq!(tracer.events, 1);
        assert_eq!(finis.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_drop_runs_fini() {
        let finis = Arc::new(AtomicU32::new(0));
        {
            let _session = TraceSession::start(Lifecycle {
                finis: Arc::clone(&finis),
                fail_fini: true,
                ..Lifecycle::default()
            })
            .unwrap();
        }
        assert_eq!(finis.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_fini_runs_on_panic() {
        let finis = Arc::new(AtomicU32::new(0));
        let session = TraceSession::start(Lifecycle {
            finis: Arc::clone(&finis),
            ..Lifecycle::default()
        })
        .unwrap();
        let result = catch_unwind(AssertUnwindSafe(move || {
            let mut session = session;
            session.trace_pc(0x40, OpClass::SYSTEM);
            panic!("illegal instruction");
        }));
        assert!(result.is_err());
        assert_eq!(finis.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_failed_init_cleans_up() {
        let inits = Arc::new(AtomicU32::new(0));
        let finis = Arc::new(AtomicU32::new(0));
        let result = TraceSession::start(Lifecycle {
            inits: Arc::clone(&inits),
            finis: Arc::clone(&finis),
            fail_init: true,
            ..Lifecycle::default()
        });
        assert!(matches!(result, Err(TraceError::SinkFailed(_))));
        assert_eq!(inits.load(Ordering::Relaxed), 1);
        assert_eq!(finis.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_finish_reports_fini_error() {
        let session = TraceSession::start(Lifecycle {
            fail_fini: true,
            ..Lifecycle::default()
        })
        .unwrap();
        assert!(session.finish().is_err());
    }
}
