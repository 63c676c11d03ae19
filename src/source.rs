use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::de::DeserializeOwned;

use crate::error::SourceError;
use crate::event::Level;
use crate::record::{RawExtraRecord, RawRecord};

/// Upstream boundary: the trace decoder hands over flat per-level record
/// lists plus the side-channel annotations.
pub trait RecordSource {
    fn records(&self, level: Level) -> Result<Vec<RawRecord>, SourceError>;
    fn extra_records(&self) -> Result<Vec<RawExtraRecord>, SourceError>;
}

/// Reads decoded records from a directory of per-level JSON files
/// (`root.json`, `acl.json`, ..., `extra.json`), transparently
/// decompressing a `.json.gz` sibling when the plain file is absent. A
/// level with no file simply has no records.
#[derive(Debug, Clone)]
pub struct DirSource {
    dir: PathBuf,
}

impl DirSource {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        DirSource {
            dir: dir.as_ref().to_owned(),
        }
    }

    fn read_stem<T: DeserializeOwned>(&self, stem: &str) -> Result<Vec<T>, SourceError> {
        let plain = self.dir.join(format!("{}.json", stem));
        if plain.is_file() {
            return read_json(File::open(plain)?);
        }
        let gz = self.dir.join(format!("{}.json.gz", stem));
        if gz.is_file() {
            return read_json(GzDecoder::new(File::open(gz)?));
        }
        Ok(Vec::new())
    }
}

fn read_json<T: DeserializeOwned, R: Read>(reader: R) -> Result<Vec<T>, SourceError> {
    Ok(serde_json::from_reader(reader)?)
}

impl RecordSource for DirSource {
    fn records(&self, level: Level) -> Result<Vec<RawRecord>, SourceError> {
        self.read_stem(level.file_stem())
    }

    fn extra_records(&self) -> Result<Vec<RawExtraRecord>, SourceError> {
        self.read_stem("extra")
    }
}

/// In-memory source for tests and embedding callers.
#[derive(Debug, Default)]
pub struct MemorySource {
    pub records: Vec<RawRecord>,
    pub extras: Vec<RawExtraRecord>,
}

impl MemorySource {
    pub fn new(records: Vec<RawRecord>, extras: Vec<RawExtraRecord>) -> Self {
        MemorySource { records, extras }
    }
}

impl RecordSource for MemorySource {
    fn records(&self, level: Level) -> Result<Vec<RawRecord>, SourceError> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.level() == level)
            .cloned()
            .collect())
    }

    fn extra_records(&self) -> Result<Vec<RawExtraRecord>, SourceError> {
        Ok(self.extras.clone())
    }
}
