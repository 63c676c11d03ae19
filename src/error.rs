use std::io;

use thiserror::Error;

use crate::event::{Level, ThreadId, Timestamp};

/// A raw record that cannot be turned into an event. Always recovered
/// locally: the record is skipped and the run continues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("unknown struct type {kind} for {level} record")]
    UnknownKind { level: Level, kind: u32 },
    #[error("interval ends at {end} before it starts at {start}")]
    InvertedInterval { start: Timestamp, end: Timestamp },
    #[error("{found} record in {expected} record stream")]
    LevelMismatch { expected: Level, found: Level },
}

/// Failure reading raw records through the upstream boundary.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Failure writing flushed rows through the downstream boundary. Surfaced
/// as a hard error for the run; retries belong to the storage layer.
#[derive(Debug, Error)]
pub enum FlushError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to read {level} records")]
    Source {
        level: Level,
        #[source]
        source: SourceError,
    },
    #[error("failed to read side-channel records")]
    ExtraSource {
        #[source]
        source: SourceError,
    },
    #[error("failed to flush {level} rows")]
    Flush {
        level: Level,
        #[source]
        source: FlushError,
    },
}

/// One analysis chain aborted; the owning thread's rows for the run are
/// incomplete but every other thread still flushes.
#[derive(Debug, Error)]
#[error("analysis chain for thread {thread_id} aborted")]
pub struct ChainFailure {
    pub thread_id: ThreadId,
}
