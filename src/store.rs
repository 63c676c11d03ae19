use std::cmp::max;
use std::collections::BTreeMap;

use nonmax::NonMaxU64;

use crate::event::{Event, RecordKind, ThreadId, Timestamp};
use crate::record::{ExtraRecord, RawRecord};

/// Deduplicating map from an event key back to the rich record it was
/// synthesized from. Written only during generation; read-only once the
/// per-thread chains start.
///
/// `max_bound` is the highest interval end observed across every `put`,
/// used to tell a trailing unterminated interval from one that simply
/// ends last.
#[derive(Debug)]
pub struct RecordStore<R> {
    records: BTreeMap<Event, R>,
    max_bound: Option<Timestamp>,
}

impl<R> Default for RecordStore<R> {
    fn default() -> Self {
        RecordStore::new()
    }
}

impl<R> RecordStore<R> {
    pub fn new() -> Self {
        RecordStore {
            records: BTreeMap::new(),
            max_bound: None,
        }
    }

    /// Store `record` under `event`. The last write for an identical key
    /// wins; keys are never removed mid-run.
    pub fn put(&mut self, event: Event, record: R) -> Event {
        if let Some(end) = event.end {
            self.max_bound = Some(self.max_bound.map_or(end, |m| max(m, end)));
        }
        self.records.insert(event, record);
        event
    }

    pub fn get(&self, event: &Event) -> Option<&R> {
        self.records.get(event)
    }

    pub fn max_bound(&self) -> Option<Timestamp> {
        self.max_bound
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Event, &R)> {
        self.records.iter()
    }
}

/// Side-channel store, keyed by `(thread, timestamp, seq)` so lookups can
/// walk backwards from a point in time to the most recent annotation.
#[derive(Debug, Default)]
pub struct ExtraStore {
    records: BTreeMap<(ThreadId, Timestamp, u64), ExtraRecord>,
}

impl ExtraStore {
    pub fn new() -> Self {
        ExtraStore {
            records: BTreeMap::new(),
        }
    }

    pub fn put(&mut self, record: ExtraRecord) {
        self.records
            .insert((record.thread_id, record.timestamp, record.seq), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Latest annotation of `kind` on `thread` at or before `at`, filtered
    /// by correlation key. Resolution runs back-to-front: the newest
    /// annotation wins.
    pub fn latest(
        &self,
        thread_id: ThreadId,
        at: Timestamp,
        kind: RecordKind,
        item_id: Option<NonMaxU64>,
    ) -> Option<&ExtraRecord> {
        self.records
            .range((thread_id, Timestamp(0), 0)..=(thread_id, at, u64::MAX))
            .rev()
            .map(|(_, r)| r)
            .find(|r| r.kind == kind && r.item_id == item_id)
    }

    /// Resolved display name for a call-tree node, if one was recorded.
    pub fn resolve_name(
        &self,
        thread_id: ThreadId,
        at: Timestamp,
        item_id: Option<NonMaxU64>,
    ) -> Option<&str> {
        self.latest(thread_id, at, RecordKind::OpName, item_id)
            .and_then(|r| r.name.as_deref())
    }
}

/// The two keyed stores for one trace-collection run. Constructed once
/// per run and passed by reference; never a process-wide singleton, so
/// two runs cannot see each other's records.
#[derive(Debug)]
pub struct RunStores {
    pub calls: RecordStore<RawRecord>,
    pub extra: ExtraStore,
}

impl RunStores {
    pub fn new() -> Self {
        RunStores {
            calls: RecordStore::new(),
            extra: ExtraStore::new(),
        }
    }
}

impl Default for RunStores {
    fn default() -> Self {
        RunStores::new()
    }
}
