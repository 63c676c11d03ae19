use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use nonmax::NonMaxU64;
use serde::Deserialize;
use serde_json::Value;

use crate::error::NormalizationError;
use crate::event::{Event, Level, RecordKind, ThreadId, Timestamp};

/// Sequence generator for side-channel record identity. Owned by one run
/// and passed by reference; two concurrent runs never share a counter.
#[derive(Debug, Default)]
pub struct SeqGen(AtomicU64);

impl SeqGen {
    pub fn new() -> Self {
        SeqGen(AtomicU64::new(0))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// One flat record as captured by the trace decoder, one variant per
/// level. Fields beyond the ones this engine keys on are preserved
/// opaquely in `extra` and travel with the record through the store.
#[rustfmt::skip]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum RawRecord {
    RootSpan { thread_id: u64, start: u64, end: Option<u64>, kind: u32, #[serde(flatten)] extra: BTreeMap<String, Value> },
    ApiCall { thread_id: u64, start: u64, end: Option<u64>, kind: u32, item_id: Option<u64>, #[serde(flatten)] extra: BTreeMap<String, Value> },
    ModelExec { thread_id: u64, model_id: u64, start: u64, end: Option<u64>, kind: u32, #[serde(flatten)] extra: BTreeMap<String, Value> },
    NodeExec { thread_id: u64, start: u64, end: Option<u64>, kind: u32, op_index: Option<u64>, #[serde(flatten)] extra: BTreeMap<String, Value> },
    TaskExec { thread_id: u64, stream_id: u64, task_id: u64, start: u64, end: Option<u64>, kind: u32, #[serde(flatten)] extra: BTreeMap<String, Value> },
    HcclOp { thread_id: u64, start: u64, end: Option<u64>, kind: u32, comm_id: Option<u64>, #[serde(flatten)] extra: BTreeMap<String, Value> },
}

impl RawRecord {
    pub fn level(&self) -> Level {
        match self {
            RawRecord::RootSpan { .. } => Level::Root,
            RawRecord::ApiCall { .. } => Level::Acl,
            RawRecord::ModelExec { .. } => Level::Model,
            RawRecord::NodeExec { .. } => Level::Node,
            RawRecord::TaskExec { .. } => Level::Task,
            RawRecord::HcclOp { .. } => Level::Hccl,
        }
    }

    fn fields(&self) -> (u64, u64, Option<u64>, u32, Option<u64>) {
        match *self {
            RawRecord::RootSpan {
                thread_id,
                start,
                end,
                kind,
                ..
            } => (thread_id, start, end, kind, None),
            RawRecord::ApiCall {
                thread_id,
                start,
                end,
                kind,
                item_id,
                ..
            } => (thread_id, start, end, kind, item_id),
            RawRecord::ModelExec {
                thread_id,
                model_id,
                start,
                end,
                kind,
                ..
            } => (thread_id, start, end, kind, Some(model_id)),
            RawRecord::NodeExec {
                thread_id,
                start,
                end,
                kind,
                op_index,
                ..
            } => (thread_id, start, end, kind, op_index),
            RawRecord::TaskExec {
                thread_id,
                task_id,
                start,
                end,
                kind,
                ..
            } => (thread_id, start, end, kind, Some(task_id)),
            RawRecord::HcclOp {
                thread_id,
                start,
                end,
                kind,
                comm_id,
                ..
            } => (thread_id, start, end, kind, comm_id),
        }
    }

    /// Synthesize the event key for this record. Malformed records are
    /// rejected here so the generator can skip them without aborting.
    pub fn normalize(&self) -> Result<Event, NormalizationError> {
        let level = self.level();
        let (thread_id, start, end, kind, item_id) = self.fields();
        let kind =
            RecordKind::try_from(kind).map_err(|_| NormalizationError::UnknownKind { level, kind })?;
        let start = Timestamp(start);
        let end = end.map(Timestamp);
        if let Some(end) = end {
            if end < start {
                return Err(NormalizationError::InvertedInterval { start, end });
            }
        }
        Ok(Event {
            level,
            thread_id: ThreadId(thread_id),
            start,
            end,
            kind,
            item_id: item_id.and_then(NonMaxU64::new),
        })
    }
}

/// Side-channel annotation as captured: not a call-tree node, just
/// metadata (an operator's display name, a tensor shape) to be attached
/// to rows at flush time.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawExtraRecord {
    pub thread_id: u64,
    pub timestamp: u64,
    pub kind: u32,
    pub item_id: Option<u64>,
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Normalized side-channel record. `seq` is its run-scoped identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtraRecord {
    pub seq: u64,
    pub thread_id: ThreadId,
    pub timestamp: Timestamp,
    pub kind: RecordKind,
    pub item_id: Option<NonMaxU64>,
    pub name: Option<String>,
    pub extra: BTreeMap<String, Value>,
}

impl RawExtraRecord {
    pub fn normalize(self, seq: &SeqGen) -> Result<ExtraRecord, NormalizationError> {
        let kind = RecordKind::try_from(self.kind).map_err(|_| NormalizationError::UnknownKind {
            level: Level::Root,
            kind: self.kind,
        })?;
        Ok(ExtraRecord {
            seq: seq.next(),
            thread_id: ThreadId(self.thread_id),
            timestamp: Timestamp(self.timestamp),
            kind,
            item_id: self.item_id.and_then(NonMaxU64::new),
            name: self.name,
            extra: self.extra,
        })
    }
}
