use std::cmp::Ordering;
use std::fmt;

use derive_more::{Add, From, Sub};
use nonmax::NonMaxU64;
use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Add,
    Sub,
    From,
    Serialize,
    Deserialize,
)]
pub struct Timestamp(pub u64 /* ns */);

impl Timestamp {
    pub const fn from_us(microseconds: u64) -> Timestamp {
        Timestamp(microseconds * 1000)
    }
    pub fn to_us(&self) -> f64 {
        self.0 as f64 / 1000.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Time is stored in nanoseconds. But it is displayed in microseconds.
        let nanoseconds = self.0;
        let divisor = 1000;
        let microseconds = nanoseconds / divisor;
        let remainder = nanoseconds % divisor;
        write!(f, "{}.{:0>3}", microseconds, remainder)
    }
}

/// The six abstraction levels activity is recorded at, ordered from the
/// outermost (Root) to the innermost (HCCL). A level strictly encloses
/// every level with a larger discriminant.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    TryFromPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u32)]
pub enum Level {
    Root = 0,
    Acl = 1,
    Model = 2,
    Node = 3,
    Task = 4,
    Hccl = 5,
}

pub const NUM_LEVELS: usize = 6;

impl Level {
    pub const ALL: [Level; NUM_LEVELS] = [
        Level::Root,
        Level::Acl,
        Level::Model,
        Level::Node,
        Level::Task,
        Level::Hccl,
    ];

    pub fn parent(self) -> Option<Level> {
        (self as u32)
            .checked_sub(1)
            .and_then(|v| Level::try_from(v).ok())
    }

    pub fn depth(self) -> usize {
        self as usize
    }

    /// Stem used for per-level record and row filenames.
    pub fn file_stem(self) -> &'static str {
        match self {
            Level::Root => "root",
            Level::Acl => "acl",
            Level::Model => "model",
            Level::Node => "node",
            Level::Task => "task",
            Level::Hccl => "hccl",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Acl => write!(f, "ACL"),
            Level::Hccl => write!(f, "HCCL"),
            _ => write!(f, "{:?}", self),
        }
    }
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From,
)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Discriminator distinguishing record kinds within a level. The numeric
/// values are the `struct_type` codes emitted by the trace decoder; keep
/// this in sync with that table.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, TryFromPrimitive, Serialize,
)]
#[repr(u32)]
pub enum RecordKind {
    RootSpan = 0,
    AclApi = 10,
    AclRuntime = 11,
    ModelLoad = 20,
    ModelExecute = 21,
    NodeLaunch = 30,
    NodeCompute = 31,
    TaskSchedule = 40,
    TaskKernel = 41,
    HcclOp = 50,
    HcclNotify = 51,
    OpName = 60,
    TensorShape = 61,
}

/// One timestamped occurrence at one level on one thread. This is both the
/// priority-queue element and the key under which the originating record is
/// stored; two events are the same occurrence iff every field matches.
///
/// `end` is `None` for an interval whose termination was never observed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Event {
    pub level: Level,
    pub thread_id: ThreadId,
    pub start: Timestamp,
    pub end: Option<Timestamp>,
    pub kind: RecordKind,
    pub item_id: Option<NonMaxU64>,
}

impl Event {
    /// Chronological replay order: by start time, then outermost level
    /// first so an enclosing interval is opened before a child sharing
    /// its start (an open-ended parent included), then end time with open
    /// intervals after closed ones.
    fn sort_key(&self) -> (u64, u32, u8, u64, u64, u32, u64) {
        let (open, end) = match self.end {
            Some(end) => (0, end.0),
            None => (1, 0),
        };
        let item = self.item_id.map_or(u64::MAX, |i| i.get());
        (
            self.start.0,
            self.level as u32,
            open,
            end,
            self.thread_id.0,
            self.kind as u32,
            item,
        )
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
