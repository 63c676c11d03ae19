use std::panic::{self, AssertUnwindSafe};

use log::{info, warn};
use rayon::prelude::*;

use crate::backend::RowSink;
use crate::error::{ChainFailure, RunError};
use crate::event::{Level, ThreadId, Timestamp, NUM_LEVELS};
use crate::gear::{GearSet, LevelRows, RowCollector, ThreadTrees};
use crate::generate::generate;
use crate::queue::ThreadQueue;
use crate::record::SeqGen;
use crate::source::RecordSource;
use crate::store::RunStores;

/// Replay one thread's queue through its gear set, in priority order.
/// Every popped event is routed to exactly one gear; the chain ends when
/// the queue is empty.
pub fn run_chain(thread_id: ThreadId, mut queue: ThreadQueue) -> ThreadTrees {
    let mut gears = GearSet::new(thread_id);
    while let Some(event) = queue.pop() {
        gears.accept(event);
    }
    gears.finish();
    gears.into_trees()
}

/// What one full run produced, beyond the flushed rows themselves.
#[derive(Debug)]
pub struct RunSummary {
    pub threads: usize,
    /// Threads whose chain aborted; their rows for this run are
    /// incomplete.
    pub incomplete: Vec<ThreadId>,
    pub skipped_records: u64,
    pub anomalies: u64,
    pub rows_per_level: [usize; NUM_LEVELS],
    /// Rows whose interval never terminated.
    pub unterminated: usize,
    /// Highest interval end observed anywhere in the run; unterminated
    /// intervals do not advance it.
    pub last_observed_end: Option<Timestamp>,
}

impl RunSummary {
    pub fn total_rows(&self) -> usize {
        self.rows_per_level.iter().sum()
    }
}

/// End-to-end orchestration of one trace-collection run: generate events,
/// run one analysis chain per observed thread, then flush one row set per
/// level, outermost level first.
pub fn calculate(source: &dyn RecordSource, sink: &mut dyn RowSink) -> Result<RunSummary, RunError> {
    let seq = SeqGen::new();
    let mut stores = RunStores::new();
    let generated = generate(source, &mut stores, &seq)?;
    info!(
        "generated {} events across {} threads",
        generated.queues.total_len(),
        generated.threads.len()
    );

    // Stores are read-only from here on; chains share them immutably.
    let stores = &stores;
    let threads = generated.threads.len();

    let results: Vec<(ThreadId, Option<ThreadTrees>)> = generated
        .queues
        .into_threads()
        .into_par_iter()
        .map(|(thread_id, queue)| {
            let trees = panic::catch_unwind(AssertUnwindSafe(|| run_chain(thread_id, queue))).ok();
            (thread_id, trees)
        })
        .collect();

    let mut incomplete = Vec::new();
    let mut anomalies = 0;
    let mut collector = RowCollector::new(stores);
    for (thread_id, trees) in &results {
        match trees {
            Some(trees) => {
                anomalies += trees.anomalies;
                collector.collect(trees);
            }
            None => {
                let failure = ChainFailure {
                    thread_id: *thread_id,
                };
                warn!("{}; its rows for this run are incomplete", failure);
                incomplete.push(failure.thread_id);
            }
        }
    }
    let rows = collector.into_rows();

    flush(sink, &rows)?;

    let mut rows_per_level = [0usize; NUM_LEVELS];
    let mut unterminated = 0;
    for (level, level_rows) in rows.iter() {
        rows_per_level[level.depth()] = level_rows.len();
        unterminated += level_rows.iter().filter(|r| r.end.is_none()).count();
    }
    Ok(RunSummary {
        threads,
        incomplete,
        skipped_records: generated.skipped,
        anomalies,
        rows_per_level,
        unterminated,
        last_observed_end: stores.calls.max_bound(),
    })
}

/// Flush every level exactly once, Root first so ancestor rows exist
/// before their descendants' rows reference them.
fn flush(sink: &mut dyn RowSink, rows: &LevelRows) -> Result<(), RunError> {
    for level in Level::ALL {
        sink.write_level(level, &rows[level])
            .map_err(|source| RunError::Flush { level, source })?;
    }
    Ok(())
}
