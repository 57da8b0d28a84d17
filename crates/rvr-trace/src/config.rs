//! Tracer selection and configuration.
//!
//! Engines are generic over their tracer, so the normal way to pick a backend
//! is a type parameter. `TracerConfig` covers the case where the choice comes
//! from a string or the environment: it builds an [`AnyTracer`], an enum over
//! the file-backed and in-memory backends that dispatches with a `match`
//! instead of a vtable.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use tracing::debug;

use crate::backends::{
    BinaryLogTracer, BufferedDiffTracer, CompressedFile, DEFAULT_FLUSH_THRESHOLD,
    DEFAULT_RING_CAPACITY, FilterTracer, NoopTracer, PreflightTracer, RingBufferTracer, SpikeTracer,
    StatsTracer,
};
use crate::error::{Result, TraceError};
use crate::event::{Event, KindSet, OpClass};
use crate::tracer::Tracer;

/// Env var selecting the backend (`none`, `ring`, `binlog`, `binlog-zst`, `stats`, `spike`,
/// `diff`, `preflight`).
pub const TRACE_ENV: &str = "RVR_TRACE";
/// Env var overriding the output path.
pub const TRACE_FILE_ENV: &str = crate::backends::TRACE_FILE_ENV;
/// Env var overriding the ring capacity.
pub const TRACE_CAPACITY_ENV: &str = "RVR_TRACE_CAPACITY";
/// Env var with a kind-set filter, e.g. `branch,csr`.
pub const TRACE_FILTER_ENV: &str = "RVR_TRACE_FILTER";

/// Default binary log path.
pub const DEFAULT_LOG_PATH: &str = "rvr_trace.bin";
/// Default Spike commit log path.
pub const DEFAULT_SPIKE_PATH: &str = "rvr_trace.log";

const ZSTD_LEVEL: i32 = 3;

/// Tracer kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TracerKind {
    /// No tracing - all calls optimize away.
    #[default]
    None,
    /// Last-N ring buffer.
    Ring,
    /// Binary record stream.
    BinLog,
    /// Aggregate counters.
    Stats,
    /// Spike commit log.
    Spike,
    /// Last-N per-instruction effects for differential testing.
    Diff,
    /// Split pc and data streams for replay.
    Preflight,
}

impl TracerKind {
    /// Check if tracing is disabled.
    pub const fn is_none(self) -> bool {
        matches!(self, Self::None)
    }

    /// Whether the backend writes to `TracerConfig::path`.
    pub const fn writes_file(self) -> bool {
        matches!(self, Self::BinLog | Self::Spike)
    }
}

/// Tracer configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TracerConfig {
    /// Backend to build.
    pub kind: TracerKind,
    /// Ring window size, in events (ring) or instructions (diff).
    pub ring_capacity: usize,
    /// Output file for file-backed kinds.
    pub path: PathBuf,
    /// Binary log buffer size before a write.
    pub flush_threshold: usize,
    /// zstd-compress the binary log.
    pub compress: bool,
    /// Only these kinds reach the backend.
    pub filter: Option<KindSet>,
}

impl TracerConfig {
    /// Create config with given kind and default settings.
    pub fn new(kind: TracerKind) -> Self {
        let path = match kind {
            TracerKind::Spike => DEFAULT_SPIKE_PATH,
            _ => DEFAULT_LOG_PATH,
        };
        Self {
            kind,
            ring_capacity: DEFAULT_RING_CAPACITY,
            path: PathBuf::from(path),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            compress: false,
            filter: None,
        }
    }

    /// No tracing.
    pub fn none() -> Self {
        Self::new(TracerKind::None)
    }

    /// Last-N ring buffer holding `capacity` events.
    pub fn ring(capacity: usize) -> Self {
        Self {
            ring_capacity: capacity,
            ..Self::new(TracerKind::Ring)
        }
    }

    /// Uncompressed binary log at `path`.
    pub fn binlog(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::new(TracerKind::BinLog)
        }
    }

    /// Aggregate counters.
    pub fn stats() -> Self {
        Self::new(TracerKind::Stats)
    }

    /// Spike commit log at `path`.
    pub fn spike(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::new(TracerKind::Spike)
        }
    }

    /// Forward only `filter` kinds to the backend.
    #[must_use]
    pub const fn with_filter(mut self, filter: KindSet) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Check if tracing is disabled.
    pub fn is_none(&self) -> bool {
        self.kind.is_none()
    }

    /// Parse tracer type from string.
    pub fn from_string(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "off" => Some(Self::none()),
            "ring" => Some(Self::new(TracerKind::Ring)),
            "binlog" | "bin" => Some(Self::new(TracerKind::BinLog)),
            "binlog-zst" | "zst" => Some(Self {
                compress: true,
                ..Self::new(TracerKind::BinLog)
            }),
            "stats" => Some(Self::stats()),
            "spike" => Some(Self::new(TracerKind::Spike)),
            "diff" | "buffered-diff" => Some(Self::new(TracerKind::Diff)),
            "preflight" => Some(Self::new(TracerKind::Preflight)),
            _ => None,
        }
    }

    /// Read configuration from `RVR_TRACE*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown tracer name, a malformed capacity, or
    /// an unknown filter kind.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable lookup.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match var(TRACE_ENV) {
            Some(name) => {
                Self::from_string(&name).ok_or_else(|| TraceError::UnknownTracer(name.clone()))?
            }
            None => Self::none(),
        };
        if let Some(path) = var(TRACE_FILE_ENV) {
            config.path = PathBuf::from(path);
        }
        if let Some(value) = var(TRACE_CAPACITY_ENV) {
            config.ring_capacity = value.trim().parse().map_err(|_| TraceError::InvalidConfig {
                name: TRACE_CAPACITY_ENV,
                value: value.clone(),
            })?;
        }
        if let Some(filter) = var(TRACE_FILTER_ENV) {
            config.filter = Some(filter.parse()?);
        }
        Ok(config)
    }

    /// Construct the configured backend. Files are opened later, in `init`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCapacity` for a zero ring or diff capacity.
    pub fn build(&self) -> Result<AnyTracer> {
        let tracer = match self.kind {
            TracerKind::None => AnyTracer::None(NoopTracer),
            TracerKind::Ring => AnyTracer::Ring(RingBufferTracer::new(self.ring_capacity)?),
            TracerKind::BinLog if self.compress => AnyTracer::CompressedLog(
                BinaryLogTracer::create_compressed(&self.path, ZSTD_LEVEL)
                    .with_flush_threshold(self.flush_threshold),
            ),
            TracerKind::BinLog => AnyTracer::BinLog(
                BinaryLogTracer::create(&self.path).with_flush_threshold(self.flush_threshold),
            ),
            TracerKind::Stats => AnyTracer::Stats(StatsTracer::new()),
            TracerKind::Spike => AnyTracer::Spike(SpikeTracer::create(&self.path)),
            TracerKind::Diff => AnyTracer::Diff(BufferedDiffTracer::new(self.ring_capacity)?),
            TracerKind::Preflight => AnyTracer::Preflight(PreflightTracer::new()),
        };
        debug!(kind = ?self.kind, filter = ?self.filter, "tracer configured");
        Ok(match self.filter {
            Some(allow) => AnyTracer::Filtered(Box::new(FilterTracer::new(tracer, allow))),
            None => tracer,
        })
    }
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self::none()
    }
}

/// Backend chosen at runtime.
pub enum AnyTracer {
    /// Tracing off.
    None(NoopTracer),
    /// Last-N event window.
    Ring(RingBufferTracer),
    /// Uncompressed binary log file.
    BinLog(BinaryLogTracer<File>),
    /// zstd-compressed binary log file.
    CompressedLog(BinaryLogTracer<CompressedFile>),
    /// Aggregate counters.
    Stats(StatsTracer),
    /// Spike commit log file.
    Spike(SpikeTracer<BufWriter<File>>),
    /// Last-N instruction effects.
    Diff(BufferedDiffTracer),
    /// Split pc and data streams.
    Preflight(PreflightTracer),
    /// Any of the above behind a kind filter.
    Filtered(Box<FilterTracer<AnyTracer>>),
}

impl AnyTracer {
    /// The backend behind any filter.
    pub fn backend(&self) -> &Self {
        match self {
            Self::Filtered(filter) => filter.inner().backend(),
            other => other,
        }
    }

    /// Mutable access to the backend behind any filter.
    pub fn backend_mut(&mut self) -> &mut Self {
        match self {
            Self::Filtered(filter) => filter.inner_mut().backend_mut(),
            other => other,
        }
    }

    /// The ring buffer, if that is the backend.
    pub fn as_ring_mut(&mut self) -> Option<&mut RingBufferTracer> {
        match self.backend_mut() {
            Self::Ring(ring) => Some(ring),
            _ => None,
        }
    }

    /// The stats counters, if that is the backend.
    pub fn as_stats(&self) -> Option<&StatsTracer> {
        match self.backend() {
            Self::Stats(stats) => Some(stats),
            _ => None,
        }
    }

    /// The diff buffer, if that is the backend.
    pub fn as_diff(&self) -> Option<&BufferedDiffTracer> {
        match self.backend() {
            Self::Diff(diff) => Some(diff),
            _ => None,
        }
    }

    /// The preflight recorder, if that is the backend.
    pub fn as_preflight(&self) -> Option<&PreflightTracer> {
        match self.backend() {
            Self::Preflight(preflight) => Some(preflight),
            _ => None,
        }
    }

    /// Events lost to backpressure or sink failure.
    pub fn dropped(&self) -> u64 {
        match self {
            Self::None(_) | Self::Stats(_) => 0,
            Self::Ring(t) => t.dropped(),
            Self::BinLog(t) => t.dropped(),
            Self::CompressedLog(t) => t.dropped(),
            Self::Spike(t) => t.dropped(),
            Self::Diff(t) => t.dropped(),
            Self::Preflight(t) => t.dropped(),
            Self::Filtered(t) => t.inner().dropped(),
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $t:ident => $call:expr) => {
        match $self {
            AnyTracer::None($t) => $call,
            AnyTracer::Ring($t) => $call,
            AnyTracer::BinLog($t) => $call,
            AnyTracer::CompressedLog($t) => $call,
            AnyTracer::Stats($t) => $call,
            AnyTracer::Spike($t) => $call,
            AnyTracer::Diff($t) => $call,
            AnyTracer::Preflight($t) => $call,
            AnyTracer::Filtered($t) => $call,
        }
    };
}

/// Forward each per-kind hook so backend overrides are reached directly.
macro_rules! forward_hooks {
    ($($name:ident($($arg:ident: $ty:ty),*);)*) => {
        $(
            #[inline]
            fn $name(&mut self, $($arg: $ty),*) {
                dispatch!(self, t => t.$name($($arg),*));
            }
        )*
    };
}

impl Tracer for AnyTracer {
    fn init(&mut self) -> Result<()> {
        dispatch!(self, t => t.init())
    }

    fn fini(&mut self) -> Result<()> {
        dispatch!(self, t => t.fini())
    }

    forward_hooks! {
        trace_event(event: Event);
        trace_block(pc: u64);
        trace_pc(pc: u64, op: OpClass);
        trace_opcode(pc: u64, op: OpClass, opcode: u32);
        trace_reg_read(pc: u64, op: OpClass, reg: u8, value: u64);
        trace_reg_write(pc: u64, op: OpClass, reg: u8, value: u64);
        trace_mem_read_byte(pc: u64, op: OpClass, addr: u64, value: u8);
        trace_mem_read_halfword(pc: u64, op: OpClass, addr: u64, value: u16);
        trace_mem_read_word(pc: u64, op: OpClass, addr: u64, value: u32);
        trace_mem_read_dword(pc: u64, op: OpClass, addr: u64, value: u64);
        trace_mem_write_byte(pc: u64, op: OpClass, addr: u64, value: u8);
        trace_mem_write_halfword(pc: u64, op: OpClass, addr: u64, value: u16);
        trace_mem_write_word(pc: u64, op: OpClass, addr: u64, value: u32);
        trace_mem_write_dword(pc: u64, op: OpClass, addr: u64, value: u64);
        trace_branch_taken(pc: u64, op: OpClass, target: u64);
        trace_branch_not_taken(pc: u64, op: OpClass, target: u64);
        trace_csr_read(pc: u64, op: OpClass, csr: u16, value: u64);
        trace_csr_write(pc: u64, op: OpClass, csr: u16, value: u64);
    }
}

#[cfg(test)]
mod tests {
    use rustc_hash::FxHashMap;

    use super::*;
    use crate::codec::TraceReader;
    use crate::event::EventKind;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: FxHashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_tracer_kind() {
        assert!(TracerKind::None.is_none());
        assert!(!TracerKind::Ring.is_none());
        assert!(TracerKind::BinLog.writes_file());
        assert!(!TracerKind::Stats.writes_file());
        assert!(!TracerKind::Preflight.writes_file());
    }

    #[test]
    fn test_tracer_from_string() {
        assert!(TracerConfig::from_string("none").unwrap().is_none());
        assert_eq!(
            TracerConfig::from_string("ring").unwrap().kind,
            TracerKind::Ring
        );
        assert_eq!(
            TracerConfig::from_string("Stats").unwrap().kind,
            TracerKind::Stats
        );
        assert_eq!(
            TracerConfig::from_string("diff").unwrap().kind,
            TracerKind::Diff
        );
        assert_eq!(
            TracerConfig::from_string("preflight").unwrap().kind,
            TracerKind::Preflight
        );
        let zst = TracerConfig::from_string("binlog-zst").unwrap();
        assert_eq!(zst.kind, TracerKind::BinLog);
        assert!(zst.compress);
        assert_eq!(
            TracerConfig::from_string("spike").unwrap().path,
            PathBuf::from(DEFAULT_SPIKE_PATH)
        );
        assert!(TracerConfig::from_string("invalid").is_none());
    }

    #[test]
    fn test_defaults() {
        let config = TracerConfig::default();
        assert!(config.is_none());
        assert_eq!(config.ring_capacity, 4096);
        assert_eq!(config.flush_threshold, 64 * 1024);
        assert_eq!(config.path, PathBuf::from("rvr_trace.bin"));
        assert!(config.filter.is_none());
    }

    #[test]
    fn test_from_vars() {
        let config = TracerConfig::from_vars(vars(&[
            ("RVR_TRACE", "ring"),
            ("RVR_TRACE_CAPACITY", "16"),
            ("RVR_TRACE_FILTER", "branch,csr_write"),
        ]))
        .unwrap();
        assert_eq!(config.kind, TracerKind::Ring);
        assert_eq!(config.ring_capacity, 16);
        let filter = config.filter.unwrap();
        assert!(filter.contains(EventKind::BranchTaken));
        assert!(filter.contains(EventKind::CsrWrite));
        assert!(!filter.contains(EventKind::CsrRead));

        assert_eq!(
            TracerConfig::from_vars(vars(&[])).unwrap(),
            TracerConfig::none()
        );
    }

    #[test]
    fn test_from_vars_errors() {
        assert!(matches!(
            TracerConfig::from_vars(vars(&[("RVR_TRACE", "gdb")])),
            Err(TraceError::UnknownTracer(name)) if name == "gdb"
        ));
        assert!(matches!(
            TracerConfig::from_vars(vars(&[("RVR_TRACE_CAPACITY", "lots")])),
            Err(TraceError::InvalidConfig {
                name: TRACE_CAPACITY_ENV,
                ..
            })
        ));
        assert!(matches!(
            TracerConfig::from_vars(vars(&[("RVR_TRACE_FILTER", "branch,jumps")])),
            Err(TraceError::UnknownEventKind(item)) if item == "jumps"
        ));
    }

    #[test]
    fn test_build_zero_capacity_fails() {
        assert!(matches!(
            TracerConfig::ring(0).build(),
            Err(TraceError::InvalidCapacity(0))
        ));
        let mut diff = TracerConfig::new(TracerKind::Diff);
        diff.ring_capacity = 0;
        assert!(matches!(diff.build(), Err(TraceError::InvalidCapacity(0))));
    }

    #[test]
    fn test_filtered_ring() {
        let mut tracer = TracerConfig::ring(8)
            .with_filter(KindSet::BRANCHES)
            .build()
            .unwrap();
        tracer.init().unwrap();
        tracer.trace_pc(0, OpClass::BRANCH);
        tracer.trace_branch_taken(0, OpClass::BRANCH, 0x20);
        tracer.fini().unwrap();

        let ring = tracer.as_ring_mut().unwrap();
        assert_eq!(
            ring.drain(),
            vec![Event::BranchTaken {
                pc: 0,
                op: OpClass::BRANCH,
                target: 0x20,
            }]
        );
    }

    #[test]
    fn test_stats_selected_at_runtime() {
        let mut tracer = TracerConfig::stats().build().unwrap();
        tracer.init().unwrap();
        tracer.trace_block(0x100);
        tracer.trace_pc(0x100, OpClass::ALU);
        tracer.fini().unwrap();
        assert_eq!(tracer.as_stats().unwrap().total(), 2);
        assert_eq!(tracer.dropped(), 0);
    }

    #[test]
    fn test_diff_selected_at_runtime() {
        let mut config = TracerConfig::new(TracerKind::Diff);
        config.ring_capacity = 2;
        let mut tracer = config.build().unwrap();
        tracer.init().unwrap();
        for pc in [0x100, 0x104, 0x108] {
            tracer.trace_pc(pc, OpClass::ALU);
            tracer.trace_reg_write(pc, OpClass::ALU, 1, pc);
        }
        tracer.fini().unwrap();

        let diff = tracer.as_diff().unwrap();
        assert_eq!(diff.len(), 2);
        assert_eq!(diff.get(1).unwrap().get_rd_value(), Some(0x108));
        assert_eq!(tracer.dropped(), 1);
    }

    #[test]
    fn test_preflight_selected_at_runtime() {
        let mut tracer = TracerConfig::new(TracerKind::Preflight).build().unwrap();
        assert!(tracer.as_preflight().is_some());
        assert!(tracer.as_ring_mut().is_none());
        // Events before init are recorded without a reservation.
        tracer.trace_pc(0x100, OpClass::ALU);
        assert_eq!(tracer.as_preflight().unwrap().pcs(), &[0x100]);
    }

    #[test]
    fn test_binlog_selected_at_runtime() {
        let dir = tempfile::tempdir().unwrap();
        for compress in [false, true] {
            let path = dir.path().join(format!("trace-{compress}.bin"));
            let mut config = TracerConfig::binlog(&path);
            config.compress = compress;
            let mut tracer = config.build().unwrap();
            tracer.init().unwrap();
            tracer.trace_reg_write(0x8000, OpClass::LOAD, 5, 0x2A);
            tracer.fini().unwrap();

            let events: Vec<Event> = if compress {
                TraceReader::open_compressed(&path)
                    .unwrap()
                    .collect::<std::result::Result<_, _>>()
                    .unwrap()
            } else {
                TraceReader::open(&path)
                    .unwrap()
                    .collect::<std::result::Result<_, _>>()
                    .unwrap()
            };
            assert_eq!(
                events,
                vec![Event::RegisterWrite {
                    pc: 0x8000,
                    op: OpClass::LOAD,
                    reg: 5,
                    value: 0x2A,
                }]
            );
        }
    }
}
