use std::path::PathBuf;

use thiserror::Error;

/// Tracing errors.
///
/// These only surface at session boundaries (`init`, `fini`), during
/// configuration, or when decoding a log. Event methods never fail.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to open trace file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("tracer already initialized")]
    AlreadyInitialized,
    #[error("tracer already finished")]
    AlreadyFinished,
    #[error("allocation failed: {0}")]
    Alloc(#[from] std::collections::TryReserveError),
    #[error("invalid ring buffer capacity: {0}")]
    InvalidCapacity(usize),
    #[error("trace sink failed: {0}")]
    SinkFailed(String),
    #[error("unknown tracer: {0}")]
    UnknownTracer(String),
    #[error("unknown event kind: {0}")]
    UnknownEventKind(String),
    #[error("invalid value for {name}: {value}")]
    InvalidConfig { name: &'static str, value: String },
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// Binary log decoding errors.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("bad trace magic")]
    BadMagic,
    #[error("unsupported trace format version {0}")]
    UnsupportedVersion(u16),
    #[error("unknown record tag {tag:#04x} at offset {offset}")]
    UnknownTag { tag: u8, offset: u64 },
    #[error("truncated record at offset {offset}")]
    Truncated { offset: u64 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TraceError>;
