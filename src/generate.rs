use std::collections::BTreeSet;

use log::{debug, warn};

use crate::error::{NormalizationError, RunError};
use crate::event::{Level, ThreadId};
use crate::queue::ThreadQueues;
use crate::record::SeqGen;
use crate::source::RecordSource;
use crate::store::RunStores;

/// Everything the generation step produces: the fully populated per-thread
/// queues and the set of threads that showed any activity. The stores are
/// populated as a side effect and are read-only afterwards.
#[derive(Debug)]
pub struct Generated {
    pub queues: ThreadQueues,
    pub threads: BTreeSet<ThreadId>,
    pub skipped: u64,
}

/// Synchronous preparation step: normalize every level's raw records into
/// events, register the originals in the keyed stores, and queue the
/// events per thread. Runs to completion before any chain starts.
///
/// A record that fails normalization is skipped and logged; it never
/// aborts the run.
pub fn generate(
    source: &dyn RecordSource,
    stores: &mut RunStores,
    seq: &SeqGen,
) -> Result<Generated, RunError> {
    let mut queues = ThreadQueues::new();
    let mut threads = BTreeSet::new();
    let mut skipped = 0u64;

    for level in Level::ALL {
        let records = source
            .records(level)
            .map_err(|source| RunError::Source { level, source })?;
        debug!("read {} {} records", records.len(), level);
        for record in records {
            if record.level() != level {
                skip(
                    level,
                    &NormalizationError::LevelMismatch {
                        expected: level,
                        found: record.level(),
                    },
                    &mut skipped,
                );
                continue;
            }
            match record.normalize() {
                Ok(event) => {
                    let event = stores.calls.put(event, record);
                    queues.add(event);
                    threads.insert(event.thread_id);
                }
                Err(err) => skip(level, &err, &mut skipped),
            }
        }
    }

    let extras = source
        .extra_records()
        .map_err(|source| RunError::ExtraSource { source })?;
    debug!("read {} side-channel records", extras.len());
    for raw in extras {
        match raw.normalize(seq) {
            Ok(record) => stores.extra.put(record),
            Err(err) => {
                warn!("skipping malformed side-channel record: {}", err);
                skipped += 1;
            }
        }
    }

    Ok(Generated {
        queues,
        threads,
        skipped,
    })
}

fn skip(level: Level, err: &NormalizationError, skipped: &mut u64) {
    warn!("skipping malformed {} record: {}", level, err);
    *skipped += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RawExtraRecord, RawRecord};
    use crate::source::MemorySource;
    use std::collections::BTreeMap;

    fn api(thread_id: u64, start: u64, end: u64, kind: u32) -> RawRecord {
        RawRecord::ApiCall {
            thread_id,
            start,
            end: Some(end),
            kind,
            item_id: None,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_generate_populates_queues_and_threads() {
        let source = MemorySource::new(
            vec![api(1, 10, 50, 10), api(2, 5, 8, 10), api(1, 60, 70, 11)],
            vec![],
        );
        let mut stores = RunStores::new();
        let seq = SeqGen::new();
        let generated = generate(&source, &mut stores, &seq).unwrap();
        assert_eq!(
            generated.threads,
            BTreeSet::from([ThreadId(1), ThreadId(2)])
        );
        assert_eq!(generated.queues.total_len(), 3);
        assert_eq!(stores.calls.len(), 3);
        assert_eq!(generated.skipped, 0);
    }

    #[test]
    fn test_malformed_records_are_skipped_not_fatal() {
        let source = MemorySource::new(
            vec![
                api(1, 10, 50, 10),
                api(1, 60, 70, 12345), // unknown struct type
            ],
            vec![RawExtraRecord {
                thread_id: 1,
                timestamp: 20,
                kind: 9999, // unknown struct type
                item_id: None,
                name: None,
                extra: BTreeMap::new(),
            }],
        );
        let mut stores = RunStores::new();
        let seq = SeqGen::new();
        let generated = generate(&source, &mut stores, &seq).unwrap();
        assert_eq!(generated.skipped, 2);
        assert_eq!(generated.queues.total_len(), 1);
        assert_eq!(stores.extra.len(), 0);
    }

    #[test]
    fn test_extra_records_reach_the_side_store() {
        let source = MemorySource::new(
            vec![],
            vec![RawExtraRecord {
                thread_id: 1,
                timestamp: 20,
                kind: 60,
                item_id: Some(7),
                name: Some("Conv2D".to_owned()),
                extra: BTreeMap::new(),
            }],
        );
        let mut stores = RunStores::new();
        let seq = SeqGen::new();
        let generated = generate(&source, &mut stores, &seq).unwrap();
        assert!(generated.threads.is_empty());
        assert_eq!(stores.extra.len(), 1);
    }
}
