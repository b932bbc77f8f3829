//! Filesystem access used for freshness checks.

use crate::graph::NodeId;
use rustc_hash::FxHashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// MTime info gathered for a file.  This also models "file is absent".
/// It's not using an Option<> just because it makes the code using it easier
/// to follow.  Ordered so that `Missing` sorts before any stamp.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MTime {
    Missing,
    /// Milliseconds since the Unix epoch.
    Stamp(u64),
}

impl MTime {
    pub fn millis(self) -> Option<u64> {
        match self {
            MTime::Missing => None,
            MTime::Stamp(ms) => Some(ms),
        }
    }

    pub fn exists(self) -> bool {
        self != MTime::Missing
    }
}

/// Milliseconds since the epoch for a wall-clock time, saturating at zero.
pub fn millis_since_epoch(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub trait FileSystem {
    /// stat() an on-disk path, producing its MTime.
    fn stat(&self, path: &str) -> std::io::Result<MTime>;
    /// Delete a file.  Deleting an absent file is not an error.
    fn remove(&self, path: &str) -> std::io::Result<()>;
}

#[derive(Default)]
pub struct RealFileSystem {}

impl RealFileSystem {
    pub fn new() -> Self {
        RealFileSystem {}
    }
}

impl FileSystem for RealFileSystem {
    fn stat(&self, path: &str) -> std::io::Result<MTime> {
        match std::fs::metadata(path) {
            Ok(meta) => Ok(MTime::Stamp(millis_since_epoch(meta.modified()?))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(MTime::Missing),
            Err(err) => Err(err),
        }
    }

    fn remove(&self, path: &str) -> std::io::Result<()> {
        match std::fs::remove_file(path) {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            r => r,
        }
    }
}

/// Per-run cache of stat() results, keyed by node.
///
/// Entries are dropped explicitly: all at once after planning, and per node
/// when a job that writes that node finishes.
#[derive(Default)]
pub struct MTimeCache {
    entries: FxHashMap<NodeId, MTime>,
}

impl MTimeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stat(&mut self, fs: &dyn FileSystem, id: NodeId, path: &str) -> std::io::Result<MTime> {
        if let Some(&mtime) = self.entries.get(&id) {
            return Ok(mtime);
        }
        let mtime = fs.stat(path)?;
        self.entries.insert(id, mtime);
        Ok(mtime)
    }

    pub fn invalidate(&mut self, id: NodeId) {
        self.entries.remove(&id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
