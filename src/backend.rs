use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::FlushError;
use crate::event::Level;
use crate::gear::Row;

/// Downstream boundary: one row set per level, written exactly once per
/// run after every chain has finished.
pub trait RowSink {
    fn write_level(&mut self, level: Level, rows: &[Row]) -> Result<(), FlushError>;
}

/// Writes one CSV file per level into an output directory.
#[derive(Debug)]
pub struct CsvSink {
    dir: PathBuf,
}

impl CsvSink {
    /// Create the output directory, refusing to clobber an existing one
    /// unless `force` is set.
    pub fn create<P: AsRef<Path>>(dir: P, force: bool) -> io::Result<Self> {
        let dir = dir.as_ref().to_owned();
        if dir.exists() {
            if !force {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!(
                        "output directory {:?} exists (pass --force to overwrite)",
                        dir
                    ),
                ));
            }
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        Ok(CsvSink { dir })
    }
}

impl RowSink for CsvSink {
    fn write_level(&mut self, level: Level, rows: &[Row]) -> Result<(), FlushError> {
        let path = self.dir.join(format!("{}.csv", level.file_stem()));
        let mut writer = csv::Writer::from_path(path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Accumulates rows in memory; used by tests and embedding callers that
/// persist rows themselves.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub rows: BTreeMap<Level, Vec<Row>>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink {
            rows: BTreeMap::new(),
        }
    }

    pub fn level(&self, level: Level) -> &[Row] {
        self.rows.get(&level).map_or(&[], |v| v.as_slice())
    }
}

impl RowSink for MemorySink {
    fn write_level(&mut self, level: Level, rows: &[Row]) -> Result<(), FlushError> {
        self.rows.entry(level).or_default().extend_from_slice(rows);
        Ok(())
    }
}
