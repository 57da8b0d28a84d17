//! Binary-log tracer.
//!
//! Streams every event to a sink as one fixed-width record (see
//! [`crate::codec`]) with no reordering and no loss while the sink is healthy.
//! Records accumulate in an internal buffer that is written out whenever it
//! crosses the flush threshold, and once more on `fini`.
//!
//! A write failure never reaches the engine. It is logged once, the pending
//! batch is dropped, and the backpressure policy decides whether the tracer
//! keeps writing later batches or degrades to dropping everything. A batch
//! that failed after part of it reached the sink always degrades, since
//! records appended after a torn one could not be decoded. `fini` returns the
//! first failure so the caller learns the log is incomplete.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::codec::{self, MAX_RECORD_LEN};
use crate::error::{Result, TraceError};
use crate::event::Event;
use crate::metrics;
use crate::policy::{Backpressure, DropOldest, SinkAction};
use crate::tracer::Tracer;

/// Default flush threshold (64KB).
pub const DEFAULT_FLUSH_THRESHOLD: usize = 64 * 1024;

/// Destination for encoded records.
pub trait LogSink: Write + Send {
    /// Complete the stream. Called once from `fini` after the final flush.
    fn finish(&mut self) -> io::Result<()> {
        self.flush()
    }
}

impl LogSink for File {
    fn finish(&mut self) -> io::Result<()> {
        self.flush()?;
        self.sync_data()
    }
}

impl LogSink for Vec<u8> {}

impl<W: LogSink> LogSink for BufWriter<W> {
    fn finish(&mut self) -> io::Result<()> {
        self.flush()?;
        self.get_mut().finish()
    }
}

impl<W: Write + Send> LogSink for zstd::stream::write::Encoder<'static, W> {
    fn finish(&mut self) -> io::Result<()> {
        self.do_finish()
    }
}

/// zstd-compressed log file.
pub type CompressedFile = zstd::stream::write::Encoder<'static, File>;

type Opener<W> = Box<dyn FnOnce() -> Result<W> + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LogState {
    Idle,
    Active,
    Degraded,
    Finished,
}

/// Streaming binary trace writer.
pub struct BinaryLogTracer<W: LogSink, P: Backpressure = DropOldest> {
    sink: Option<W>,
    opener: Option<Opener<W>>,
    buf: Vec<u8>,
    flush_threshold: usize,
    /// Whether the stream header has reached the sink.
    header_flushed: bool,
    /// Records in `buf` not yet written.
    batch_records: u64,
    state: LogState,
    policy: P,
    records: u64,
    dropped: u64,
    bytes_written: u64,
    sink_errors: u64,
    first_error: Option<io::Error>,
}

impl<W: LogSink> BinaryLogTracer<W> {
    /// Write to an already-open sink.
    pub fn new(sink: W) -> Self {
        Self::build(Some(sink), None)
    }

    /// Open the sink lazily in `init`, so open failures surface there.
    pub fn with_opener(opener: impl FnOnce() -> Result<W> + Send + 'static) -> Self {
        Self::build(None, Some(Box::new(opener)))
    }

    fn build(sink: Option<W>, opener: Option<Opener<W>>) -> Self {
        Self {
            sink,
            opener,
            buf: Vec::new(),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            header_flushed: false,
            batch_records: 0,
            state: LogState::Idle,
            policy: DropOldest,
            records: 0,
            dropped: 0,
            bytes_written: 0,
            sink_errors: 0,
            first_error: None,
        }
    }
}

fn open_file(path: &Path) -> Result<File> {
    File::create(path).map_err(|source| TraceError::Open {
        path: path.to_path_buf(),
        source,
    })
}

impl BinaryLogTracer<File> {
    /// Log to `path`, created (or truncated) in `init`.
    pub fn create(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::with_opener(move || {
            debug!(path = %path.display(), "opening binary trace log");
            open_file(&path)
        })
    }
}

impl BinaryLogTracer<CompressedFile> {
    /// Log to a zstd-compressed file at `path`, created in `init`.
    pub fn create_compressed(path: impl Into<PathBuf>, level: i32) -> Self {
        let path = path.into();
        Self::with_opener(move || {
            debug!(path = %path.display(), level, "opening compressed binary trace log");
            let file = open_file(&path)?;
            Ok(zstd::stream::write::Encoder::new(file, level)?)
        })
    }
}

impl<W: LogSink, P: Backpressure> BinaryLogTracer<W, P> {
    /// Replace the sink-failure policy.
    pub fn with_policy<Q: Backpressure>(self, policy: Q) -> BinaryLogTracer<W, Q> {
        BinaryLogTracer {
            sink: self.sink,
            opener: self.opener,
            buf: self.buf,
            flush_threshold: self.flush_threshold,
            header_flushed: self.header_flushed,
            batch_records: self.batch_records,
            state: self.state,
            policy,
            records: self.records,
            dropped: self.dropped,
            bytes_written: self.bytes_written,
            sink_errors: self.sink_errors,
            first_error: self.first_error,
        }
    }

    /// Set the buffered byte count that triggers a write.
    #[must_use]
    pub fn with_flush_threshold(mut self, bytes: usize) -> Self {
        self.flush_threshold = bytes.max(1);
        self
    }

    /// Records accepted for writing.
    pub const fn records(&self) -> u64 {
        self.records
    }

    /// Records lost to sink failures or received outside an active session.
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    pub const fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Whether a sink failure has switched the tracer to dropping events.
    pub fn is_degraded(&self) -> bool {
        self.state == LogState::Degraded
    }

    pub const fn sink(&self) -> Option<&W> {
        self.sink.as_ref()
    }

    /// Take the sink back, e.g. an in-memory `Vec<u8>` after `fini`.
    pub fn into_sink(self) -> Option<W> {
        self.sink
    }

    fn flush_buf(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        let (landed, result) = write_counted(sink, &self.buf);
        self.bytes_written += landed as u64;
        if landed > 0 {
            self.header_flushed = true;
        }
        if let Err(e) = result {
            // A failed batch counts as dropped even if some of its records landed.
            self.dropped += self.batch_records;
            self.sink_failed(e, landed > 0);
        }
        self.buf.clear();
        self.batch_records = 0;
    }

    /// Record a sink failure. A torn batch leaves a partial record on the
    /// sink, so nothing written after it could be decoded: that always
    /// degrades, whatever the policy says.
    #[cold]
    fn sink_failed(&mut self, error: io::Error, torn: bool) {
        self.sink_errors += 1;
        let action = if torn {
            SinkAction::Degrade
        } else {
            self.policy.on_sink_error(&error)
        };
        if self.first_error.is_none() {
            warn!(error = %error, ?action, torn, "binary trace log write failed");
            self.first_error = Some(error);
        }
        if action == SinkAction::Degrade {
            self.state = LogState::Degraded;
        }
    }
}

/// `write_all` that reports how many bytes reached the sink, even on failure.
fn write_counted<W: Write + ?Sized>(sink: &mut W, mut buf: &[u8]) -> (usize, io::Result<()>) {
    let mut landed = 0;
    while !buf.is_empty() {
        match sink.write(buf) {
            Ok(0) => return (landed, Err(io::ErrorKind::WriteZero.into())),
            Ok(n) => {
                landed += n;
                buf = &buf[n..];
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return (landed, Err(e)),
        }
    }
    (landed, Ok(()))
}

impl<W: LogSink, P: Backpressure> Tracer for BinaryLogTracer<W, P> {
    fn init(&mut self) -> Result<()> {
        if self.state != LogState::Idle {
            return Err(TraceError::AlreadyInitialized);
        }
        if self.sink.is_none() {
            let opener = self
                .opener
                .take()
                .ok_or_else(|| TraceError::SinkFailed("no sink to open".to_string()))?;
            self.sink = Some(opener()?);
        }
        self.buf
            .try_reserve(self.flush_threshold + MAX_RECORD_LEN + codec::HEADER_LEN)?;
        self.state = LogState::Active;
        Ok(())
    }

    fn fini(&mut self) -> Result<()> {
        match self.state {
            LogState::Finished => return Err(TraceError::AlreadyFinished),
            LogState::Idle => {
                // init never ran or failed before acquiring the sink.
                self.state = LogState::Finished;
                return Ok(());
            }
            LogState::Active => {
                self.flush_buf();
                if self.state == LogState::Active {
                    if let Some(Err(e)) = self.sink.as_mut().map(LogSink::finish) {
                        self.sink_failed(e, false);
                    }
                }
            }
            LogState::Degraded => {}
        }
        self.state = LogState::Finished;

        metrics::record_session("binlog", self.records, self.dropped);
        metrics::record_sink(self.bytes_written, self.sink_errors);
        debug!(
            records = self.records,
            bytes = self.bytes_written,
            dropped = self.dropped,
            "binary trace log closed"
        );

        match self.first_error.take() {
            Some(e) => Err(TraceError::SinkFailed(e.to_string())),
            None => Ok(()),
        }
    }

    #[inline]
    fn trace_event(&mut self, event: Event) {
        if self.state != LogState::Active {
            self.dropped += 1;
            return;
        }
        if !self.header_flushed && self.buf.is_empty() {
            self.buf.extend_from_slice(&codec::header());
        }
        codec::encode_event(&mut self.buf, &event);
        self.records += 1;
        self.batch_records += 1;
        if self.buf.len() >= self.flush_threshold {
            self.flush_buf();
        }
    }
}
