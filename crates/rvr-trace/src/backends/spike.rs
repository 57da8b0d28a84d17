//! Spike-compatible commit log.
//!
//! Writes one line per retired instruction in Spike's `--log-commits` format
//! for differential testing against the reference simulator:
//!
//! ```text
//! core   0: 3 0x<PC> (0x<OPCODE>) [x<RD> 0x<VALUE>] [mem 0x<ADDR>]
//! ```
//!
//! An instruction's line is emitted when the next instruction is fetched, or at
//! `fini` for the last one. Writes to x0 are not reported.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Result, TraceError};
use crate::event::Event;
use crate::metrics;
use crate::tracer::Tracer;

/// Env var naming the commit log file.
pub const TRACE_FILE_ENV: &str = "RVR_TRACE_FILE";

type Opener<W> = Box<dyn FnOnce() -> Result<W> + Send>;

/// Instruction whose line has not been written yet.
#[derive(Clone, Copy, Debug, Default)]
struct Pending {
    pc: u64,
    opcode: u32,
    rd: Option<(u8, u64)>,
    mem: Option<u64>,
}

/// Spike `--log-commits` writer over any `Write` sink.
pub struct SpikeTracer<W: Write + Send> {
    out: Option<W>,
    opener: Option<Opener<W>>,
    pending: Option<Pending>,
    count: u64,
    dropped: u64,
    error: Option<io::Error>,
}

impl<W: Write + Send> SpikeTracer<W> {
    /// Write to an already-open sink.
    pub const fn new(out: W) -> Self {
        Self {
            out: Some(out),
            opener: None,
            pending: None,
            count: 0,
            dropped: 0,
            error: None,
        }
    }

    /// Defer opening the output to `init`.
    pub fn with_opener(opener: impl FnOnce() -> Result<W> + Send + 'static) -> Self {
        Self {
            out: None,
            opener: Some(Box::new(opener)),
            pending: None,
            count: 0,
            dropped: 0,
            error: None,
        }
    }

    /// Instructions logged.
    pub const fn count(&self) -> u64 {
        self.count
    }

    /// Lines lost after a write failure.
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// The sink, once opened.
    pub const fn output(&self) -> Option<&W> {
        self.out.as_ref()
    }

    /// Take the sink back after `fini`.
    pub fn into_inner(self) -> Option<W> {
        self.out
    }

    fn flush_pending(&mut self) {
        let Some(p) = self.pending.take() else {
            return;
        };
        let result = match (&self.error, self.out.as_mut()) {
            (None, Some(out)) => write_line(out, &p),
            _ => {
                self.dropped += 1;
                return;
            }
        };
        if let Err(e) = result {
            self.write_failed(e);
        }
    }

    #[cold]
    fn write_failed(&mut self, e: io::Error) {
        warn!(error = %e, "spike trace write failed, dropping remaining lines");
        self.dropped += 1;
        self.error = Some(e);
    }
}

impl SpikeTracer<BufWriter<File>> {
    /// Log to `path`. The file is created in `init`.
    pub fn create(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::with_opener(move || {
            let file = File::create(&path).map_err(|source| TraceError::Open {
                path: path.clone(),
                source,
            })?;
            debug!(path = %path.display(), "spike trace opened");
            Ok(BufWriter::new(file))
        })
    }

    /// Log to `$RVR_TRACE_FILE`, or `default` when unset.
    pub fn from_env(default: &Path) -> Self {
        let path = std::env::var_os(TRACE_FILE_ENV)
            .map_or_else(|| default.to_path_buf(), PathBuf::from);
        Self::create(path)
    }
}

fn write_line(out: &mut impl Write, p: &Pending) -> io::Result<()> {
    write!(out, "core   0: 3 0x{:016x} (0x{:08x})", p.pc, p.opcode)?;
    if let Some((rd, value)) = p.rd {
        write!(out, " x{rd} 0x{value:016x}")?;
    }
    if let Some(addr) = p.mem {
        write!(out, " mem 0x{addr:016x}")?;
    }
    writeln!(out)
}

impl<W: Write + Send> Tracer for SpikeTracer<W> {
    fn init(&mut self) -> Result<()> {
        if self.out.is_some() {
            return Ok(());
        }
        let opener = self
            .opener
            .take()
            .ok_or_else(|| TraceError::SinkFailed("no output for spike trace".into()))?;
        self.out = Some(opener()?);
        Ok(())
    }

    fn fini(&mut self) -> Result<()> {
        self.flush_pending();
        if self.error.is_none() {
            if let Some(Err(e)) = self.out.as_mut().map(Write::flush) {
                self.write_failed(e);
            }
        }
        metrics::record_session("spike", self.count, self.dropped);
        debug!(instructions = self.count, "spike trace finished");
        match self.error.take() {
            Some(e) => Err(TraceError::SinkFailed(e.to_string())),
            None => Ok(()),
        }
    }

    /// Every kind lands here, whether sent directly or through the
    /// per-kind defaults.
    #[inline]
    fn trace_event(&mut self, event: Event) {
        match event {
            Event::InstructionFetch { pc, .. } => {
                self.flush_pending();
                self.pending = Some(Pending {
                    pc,
                    ..Pending::default()
                });
                self.count += 1;
            }
            Event::OpcodeDecoded { opcode, .. } => {
                if let Some(p) = self.pending.as_mut() {
                    p.opcode = opcode;
                }
            }
            Event::RegisterWrite { reg, value, .. } if reg != 0 => {
                if let Some(p) = self.pending.as_mut() {
                    p.rd = Some((reg, value));
                }
            }
            Event::MemoryRead { addr, .. } | Event::MemoryWrite { addr, .. } => {
                if let Some(p) = self.pending.as_mut() {
                    p.mem = Some(addr);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{MemAccess, OpClass};

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    const LOAD_LINE: &str = concat!(
        "core   0: 3 0x0000000000008000 (0x0000a283)",
        " x5 0x000000000000002a mem 0x0000000000001000"
    );

    fn lines(tracer: SpikeTracer<Vec<u8>>) -> Vec<String> {
        let out = tracer.into_inner().unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn test_load_line() {
        let mut tracer = SpikeTracer::new(Vec::<u8>::new());
        tracer.init().unwrap();
        tracer.trace_pc(0x8000, OpClass::LOAD);
        tracer.trace_opcode(0x8000, OpClass::LOAD, 0x0000_a283);
        tracer.trace_mem_read_word(0x8000, OpClass::LOAD, 0x1000, 0x2A);
        tracer.trace_reg_write(0x8000, OpClass::LOAD, 5, 0x2A);
        tracer.fini().unwrap();

        assert_eq!(tracer.count(), 1);
        assert_eq!(lines(tracer), vec![LOAD_LINE]);
    }

    #[test]
    fn test_events_sent_directly() {
        let mut tracer = SpikeTracer::new(Vec::<u8>::new());
        tracer.init().unwrap();
        let events = [
            Event::InstructionFetch {
                pc: 0x8000,
                op: OpClass::LOAD,
            },
            Event::OpcodeDecoded {
                pc: 0x8000,
                op: OpClass::LOAD,
                opcode: 0x0000_a283,
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
        ];
        for event in events {
            tracer.trace_event(event);
        }
        tracer.fini().unwrap();

        assert_eq!(tracer.count(), 1);
        assert_eq!(lines(tracer), vec![LOAD_LINE]);
    }

    #[test]
    fn test_line_emitted_at_next_fetch() {
        let mut tracer = SpikeTracer::new(Vec::<u8>::new());
        tracer.init().unwrap();
        tracer.trace_pc(0x100, OpClass::ALU);
        tracer.trace_reg_write(0x100, OpClass::ALU, 0, 7);
        assert!(tracer.output().unwrap().is_empty());
        tracer.trace_pc(0x104, OpClass::STORE);
        tracer.trace_mem_write_dword(0x104, OpClass::STORE, 0x2000, 1);
        let newlines = tracer.output().unwrap().iter().filter(|b| **b == b'\n');
        assert_eq!(newlines.count(), 1);
        tracer.fini().unwrap();

        let lines = lines(tracer);
        assert_eq!(lines[0], "core   0: 3 0x0000000000000100 (0x00000000)");
        assert_eq!(
            lines[1],
            "core   0: 3 0x0000000000000104 (0x00000000) mem 0x0000000000002000"
        );
    }

    #[test]
    fn test_zero_length_run() {
        let mut tracer = SpikeTracer::new(Vec::<u8>::new());
        tracer.init().unwrap();
        tracer.fini().unwrap();
        assert!(lines(tracer).is_empty());
    }

    #[test]
    fn test_write_failure_reported_once() {
        let mut tracer = SpikeTracer::new(BrokenPipe);
        tracer.init().unwrap();
        for pc in 0..4 {
            tracer.trace_pc(pc * 4, OpClass::ALU);
        }
        assert!(matches!(tracer.fini(), Err(TraceError::SinkFailed(_))));
        assert_eq!(tracer.dropped(), 4);
    }

    #[test]
    fn test_create_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commits.log");
        let mut tracer = SpikeTracer::create(&path);
        tracer.init().unwrap();
        tracer.trace_pc(0x80, OpClass::JUMP);
        tracer.trace_reg_write(0x80, OpClass::JUMP, 1, 0x84);
        tracer.fini().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "core   0: 3 0x0000000000000080 (0x00000000) x1 0x0000000000000084\n"
        );
    }

    #[test]
    fn test_create_in_missing_dir_fails_init() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracer = SpikeTracer::create(dir.path().join("missing/commits.log"));
        assert!(matches!(tracer.init(), Err(TraceError::Open { .. })));
        tracer.fini().unwrap();
    }
}
