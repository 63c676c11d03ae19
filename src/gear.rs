use std::ops::{Index, IndexMut};

use log::warn;
use serde::Serialize;

use crate::event::{Event, Level, RecordKind, ThreadId, Timestamp, NUM_LEVELS};
use crate::store::RunStores;

/// One node of the reconstructed call hierarchy: an event plus its
/// children in attachment order. Children are exclusively owned by their
/// parent.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub event: Event,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn new(event: Event) -> Self {
        TreeNode {
            event,
            children: Vec::new(),
        }
    }

    pub fn add_child(&mut self, child: TreeNode) {
        self.children.push(child);
    }

    /// Number of nodes in this subtree, self included.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(|c| c.size()).sum::<usize>()
    }
}

/// Matcher for one level on one thread: holds the level's currently open
/// interval and the finished trees that found no enclosing parent.
#[derive(Debug, Default)]
struct LevelGear {
    open: Option<TreeNode>,
    roots: Vec<TreeNode>,
    accepted: u64,
}

/// The six per-level gears for one thread. Because the levels strictly
/// order (Root encloses ACL encloses Model ...), the open intervals across
/// the gears form the current nesting stack: at most one open node per
/// level, outer levels above inner ones.
#[derive(Debug)]
pub struct GearSet {
    thread_id: ThreadId,
    gears: [LevelGear; NUM_LEVELS],
    anomalies: u64,
}

impl GearSet {
    pub fn new(thread_id: ThreadId) -> Self {
        GearSet {
            thread_id,
            gears: Default::default(),
            anomalies: 0,
        }
    }

    /// Route one event, arriving in chronological order, to its level's
    /// gear. Opens the event's interval after closing everything it
    /// supersedes: any open interval at the same or a deeper level, and
    /// any open ancestor that already ended before this event starts.
    pub fn accept(&mut self, event: Event) {
        debug_assert_eq!(event.thread_id, self.thread_id);
        let depth = event.level.depth();

        let mut close_from = depth;
        for lvl in 0..depth {
            if let Some(open) = &self.gears[lvl].open {
                if let Some(end) = open.event.end {
                    if end < event.start {
                        close_from = lvl;
                        break;
                    }
                }
            }
        }
        self.close_range(close_from);

        self.gears[depth].open = Some(TreeNode::new(event));
        self.gears[depth].accepted += 1;
    }

    /// Close every open interval; called once the thread's queue is
    /// drained so unterminated tails still reach the flush.
    pub fn finish(&mut self) {
        self.close_range(0);
    }

    fn close_range(&mut self, from: usize) {
        for lvl in (from..NUM_LEVELS).rev() {
            self.close_one(lvl);
        }
    }

    /// Close the open interval at `lvl`, attaching it to the nearest
    /// enclosing open parent, or keeping it as a root of its own level if
    /// no parent is open. Nothing is ever dropped.
    fn close_one(&mut self, lvl: usize) {
        let Some(node) = self.gears[lvl].open.take() else {
            return;
        };
        let Some(parent_lvl) = self.enclosing_open(node.event.level) else {
            self.gears[lvl].roots.push(node);
            return;
        };
        if let Some(parent) = self.gears[parent_lvl].open.as_mut() {
            if !contains(&parent.event, &node.event) {
                self.anomalies += 1;
                warn!(
                    "thread {}: {} interval {}..{} does not nest under open {} interval \
                     {}..{}; attaching to nearest enclosing parent",
                    self.thread_id,
                    node.event.level,
                    node.event.start,
                    fmt_end(node.event.end),
                    parent.event.level,
                    parent.event.start,
                    fmt_end(parent.event.end),
                );
            }
            parent.add_child(node);
        } else {
            self.gears[lvl].roots.push(node);
        }
    }

    /// Nearest ancestor level of `level` with an open interval.
    fn enclosing_open(&self, level: Level) -> Option<usize> {
        let mut ancestor = level.parent();
        while let Some(l) = ancestor {
            if self.gears[l.depth()].open.is_some() {
                return Some(l.depth());
            }
            ancestor = l.parent();
        }
        None
    }

    /// Consume the gears after `finish`, yielding the thread's trees.
    pub fn into_trees(mut self) -> ThreadTrees {
        self.close_range(0);
        let mut accepted = [0u64; NUM_LEVELS];
        let mut roots = Vec::new();
        for (lvl, gear) in self.gears.iter_mut().enumerate() {
            accepted[lvl] = gear.accepted;
            roots.append(&mut gear.roots);
        }
        // Present roots in chronological order, not close order.
        roots.sort_by_key(|n| n.event);
        ThreadTrees {
            thread_id: self.thread_id,
            roots,
            accepted,
            anomalies: self.anomalies,
        }
    }
}

/// `parent.start <= child.start` and, while the parent is still open (no
/// end observed), anything nests; otherwise the child must end within it.
fn contains(parent: &Event, child: &Event) -> bool {
    if parent.start > child.start {
        return false;
    }
    match (parent.end, child.end) {
        (None, _) => true,
        (Some(pe), Some(ce)) => ce <= pe,
        (Some(pe), None) => child.start <= pe,
    }
}

fn fmt_end(end: Option<Timestamp>) -> String {
    end.map_or_else(|| "?".to_owned(), |t| t.to_string())
}

/// The reconstructed hierarchy for one thread. Roots may sit at any
/// level: an event with no enclosing parent is still kept.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadTrees {
    pub thread_id: ThreadId,
    pub roots: Vec<TreeNode>,
    pub accepted: [u64; NUM_LEVELS],
    pub anomalies: u64,
}

impl ThreadTrees {
    pub fn total_nodes(&self) -> usize {
        self.roots.iter().map(|r| r.size()).sum()
    }
}

/// One flushed row: everything the storage layer needs to rebuild the
/// relational joins across levels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub row_id: u64,
    pub parent_id: Option<u64>,
    pub level: Level,
    pub thread_id: ThreadId,
    pub start: Timestamp,
    pub end: Option<Timestamp>,
    pub kind: RecordKind,
    pub item_id: Option<u64>,
    pub name: Option<String>,
}

/// Flushable rows for all six levels.
#[derive(Debug, Default, PartialEq)]
pub struct LevelRows([Vec<Row>; NUM_LEVELS]);

impl LevelRows {
    pub fn iter(&self) -> impl Iterator<Item = (Level, &Vec<Row>)> + '_ {
        Level::ALL.iter().map(move |&l| (l, &self[l]))
    }

    pub fn total_len(&self) -> usize {
        self.0.iter().map(|v| v.len()).sum()
    }
}

impl Index<Level> for LevelRows {
    type Output = Vec<Row>;

    fn index(&self, level: Level) -> &Vec<Row> {
        &self.0[level.depth()]
    }
}

impl IndexMut<Level> for LevelRows {
    fn index_mut(&mut self, level: Level) -> &mut Vec<Row> {
        &mut self.0[level.depth()]
    }
}

/// Walks finished trees top-down, assigning synthesized row ids and
/// resolving display names from the side-channel store.
pub struct RowCollector<'a> {
    stores: &'a RunStores,
    next_row: u64,
    rows: LevelRows,
}

impl<'a> RowCollector<'a> {
    pub fn new(stores: &'a RunStores) -> Self {
        RowCollector {
            stores,
            next_row: 0,
            rows: LevelRows::default(),
        }
    }

    pub fn collect(&mut self, trees: &ThreadTrees) {
        for root in &trees.roots {
            self.visit(root, None);
        }
    }

    fn visit(&mut self, node: &TreeNode, parent_id: Option<u64>) {
        let event = &node.event;
        let row_id = self.next_row;
        self.next_row += 1;
        let name = self
            .stores
            .extra
            .resolve_name(event.thread_id, event.start, event.item_id)
            .map(str::to_owned);
        self.rows[event.level].push(Row {
            row_id,
            parent_id,
            level: event.level,
            thread_id: event.thread_id,
            start: event.start,
            end: event.end,
            kind: event.kind,
            item_id: event.item_id.map(|i| i.get()),
            name,
        });
        for child in &node.children {
            self.visit(child, Some(row_id));
        }
    }

    pub fn into_rows(self) -> LevelRows {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RecordKind;

    fn event(level: Level, start: u64, end: Option<u64>) -> Event {
        let kind = match level {
            Level::Root => RecordKind::RootSpan,
            Level::Acl => RecordKind::AclApi,
            Level::Model => RecordKind::ModelExecute,
            Level::Node => RecordKind::NodeCompute,
            Level::Task => RecordKind::TaskKernel,
            Level::Hccl => RecordKind::HcclOp,
        };
        Event {
            level,
            thread_id: ThreadId(5),
            start: Timestamp(start),
            end: end.map(Timestamp),
            kind,
            item_id: None,
        }
    }

    fn assemble(events: Vec<Event>) -> ThreadTrees {
        let mut events = events;
        events.sort();
        let mut gears = GearSet::new(ThreadId(5));
        for e in events {
            gears.accept(e);
        }
        gears.finish();
        gears.into_trees()
    }

    fn check_containment(node: &TreeNode) {
        for child in &node.children {
            assert!(
                contains(&node.event, &child.event),
                "child {:?} not contained in parent {:?}",
                child.event,
                node.event
            );
            check_containment(child);
        }
    }

    #[test]
    fn test_three_level_nesting() {
        let trees = assemble(vec![
            event(Level::Acl, 10, Some(50)),
            event(Level::Node, 15, Some(30)),
            event(Level::Task, 18, Some(22)),
        ]);
        assert_eq!(trees.roots.len(), 1);
        let acl = &trees.roots[0];
        assert_eq!(acl.event.level, Level::Acl);
        assert_eq!(acl.children.len(), 1);
        let node = &acl.children[0];
        assert_eq!(node.event.level, Level::Node);
        assert_eq!(node.children.len(), 1);
        assert_eq!(node.children[0].event.level, Level::Task);
        check_containment(acl);
    }

    #[test]
    fn test_skipped_level_attaches_to_nearest_ancestor() {
        // No Node interval: the Task nests directly under the ACL call.
        let trees = assemble(vec![
            event(Level::Acl, 10, Some(50)),
            event(Level::Task, 18, Some(22)),
        ]);
        assert_eq!(trees.roots.len(), 1);
        let acl = &trees.roots[0];
        assert_eq!(acl.children.len(), 1);
        assert_eq!(acl.children[0].event.level, Level::Task);
    }

    #[test]
    fn test_sibling_supersedes_open_interval_at_same_level() {
        let trees = assemble(vec![
            event(Level::Acl, 10, Some(100)),
            event(Level::Node, 15, Some(30)),
            event(Level::Node, 40, Some(60)),
        ]);
        assert_eq!(trees.roots.len(), 1);
        let acl = &trees.roots[0];
        assert_eq!(acl.children.len(), 2);
        assert_eq!(acl.children[0].event.start, Timestamp(15));
        assert_eq!(acl.children[1].event.start, Timestamp(40));
        assert!(acl.children.iter().all(|c| c.children.is_empty()));
    }

    #[test]
    fn test_expired_parent_closes_before_new_child() {
        // The second Node starts after the first ACL call ended, so it
        // must not be adopted by it.
        let trees = assemble(vec![
            event(Level::Acl, 10, Some(20)),
            event(Level::Node, 12, Some(18)),
            event(Level::Node, 30, Some(40)),
        ]);
        assert_eq!(trees.roots.len(), 2);
        assert_eq!(trees.roots[0].event.level, Level::Acl);
        assert_eq!(trees.roots[0].children.len(), 1);
        assert_eq!(trees.roots[1].event.level, Level::Node);
        assert!(trees.roots[1].children.is_empty());
    }

    #[test]
    fn test_unmatched_event_kept_as_root() {
        let trees = assemble(vec![event(Level::Task, 100, Some(110))]);
        assert_eq!(trees.roots.len(), 1);
        assert_eq!(trees.roots[0].event.level, Level::Task);
    }

    #[test]
    fn test_open_parent_shares_start_with_child() {
        // An unterminated Model interval starting together with a closed
        // Node must still adopt it, not leave it as a second root.
        let trees = assemble(vec![
            event(Level::Model, 10, None),
            event(Level::Node, 10, Some(20)),
        ]);
        assert_eq!(trees.anomalies, 0);
        assert_eq!(trees.roots.len(), 1);
        let model = &trees.roots[0];
        assert_eq!(model.event.level, Level::Model);
        assert_eq!(model.children.len(), 1);
        assert_eq!(model.children[0].event.level, Level::Node);
    }

    #[test]
    fn test_unterminated_tail_is_flushed() {
        let trees = assemble(vec![
            event(Level::Acl, 10, Some(50)),
            event(Level::Task, 100, None),
        ]);
        assert_eq!(trees.roots.len(), 2);
        let tail = &trees.roots[1];
        assert_eq!(tail.event.level, Level::Task);
        assert_eq!(tail.event.end, None);
    }

    #[test]
    fn test_overflowing_child_attaches_with_anomaly() {
        // Child ends after its only enclosing parent; still attached.
        let trees = assemble(vec![
            event(Level::Acl, 10, Some(50)),
            event(Level::Node, 20, Some(80)),
        ]);
        assert_eq!(trees.anomalies, 1);
        assert_eq!(trees.roots.len(), 1);
        assert_eq!(trees.roots[0].children.len(), 1);
    }

    #[test]
    fn test_open_parent_adopts_everything_after_start() {
        let trees = assemble(vec![
            event(Level::Model, 5, None),
            event(Level::Node, 10, Some(20)),
            event(Level::Node, 500, Some(600)),
        ]);
        assert_eq!(trees.anomalies, 0);
        assert_eq!(trees.roots.len(), 1);
        assert_eq!(trees.roots[0].event.level, Level::Model);
        assert_eq!(trees.roots[0].children.len(), 2);
    }

    #[test]
    fn test_accepted_counts_per_level() {
        let trees = assemble(vec![
            event(Level::Acl, 10, Some(50)),
            event(Level::Node, 15, Some(30)),
            event(Level::Node, 35, Some(45)),
            event(Level::Task, 18, Some(22)),
        ]);
        assert_eq!(trees.accepted[Level::Acl.depth()], 1);
        assert_eq!(trees.accepted[Level::Node.depth()], 2);
        assert_eq!(trees.accepted[Level::Task.depth()], 1);
        assert_eq!(trees.total_nodes(), 4);
    }

    #[test]
    fn test_row_collection_links_parents() {
        let stores = RunStores::new();
        let trees = assemble(vec![
            event(Level::Acl, 10, Some(50)),
            event(Level::Node, 15, Some(30)),
            event(Level::Task, 18, Some(22)),
        ]);
        let mut collector = RowCollector::new(&stores);
        collector.collect(&trees);
        let rows = collector.into_rows();
        assert_eq!(rows[Level::Acl].len(), 1);
        assert_eq!(rows[Level::Node].len(), 1);
        assert_eq!(rows[Level::Task].len(), 1);
        let acl = &rows[Level::Acl][0];
        let node = &rows[Level::Node][0];
        let task = &rows[Level::Task][0];
        assert_eq!(acl.parent_id, None);
        assert_eq!(node.parent_id, Some(acl.row_id));
        assert_eq!(task.parent_id, Some(node.row_id));
    }

    #[test]
    fn test_flush_accounting_matches_accepted() {
        let stores = RunStores::new();
        let trees = assemble(vec![
            event(Level::Acl, 10, Some(100)),
            event(Level::Node, 15, Some(30)),
            event(Level::Node, 40, Some(60)),
            event(Level::Task, 45, Some(50)),
            event(Level::Task, 200, None),
        ]);
        let mut collector = RowCollector::new(&stores);
        collector.collect(&trees);
        let rows = collector.into_rows();
        for level in Level::ALL {
            assert_eq!(
                rows[level].len() as u64,
                trees.accepted[level.depth()],
                "row count mismatch at {}",
                level
            );
        }
    }
}
