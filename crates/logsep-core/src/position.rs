//! Durable read position of the input log.
//!
//! The position file holds a single tab-separated record:
//!
//! ```text
//! <input-path>\t<16-hex-digit byte offset>\t<16-hex-digit file identity>
//! ```
//!
//! It is rewritten in place after every consumed line (seek, truncate,
//! write, flush). That sequence is not atomic, so a crash can leave the file
//! empty or torn; `load()` treats any such content as "start of file".

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::identity::FileIdentity;

/// Last persisted position, as read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionRecord {
    pub tracked_path: PathBuf,
    pub byte_offset: u64,
    pub file_identity: u64,
}

impl PositionRecord {
    /// Record used when nothing usable is on disk.
    pub fn start_of(path: &Path) -> Self {
        Self {
            tracked_path: path.to_path_buf(),
            byte_offset: 0,
            file_identity: 0,
        }
    }

    /// Parses `path\toffset\tidentity`. Returns `None` on any malformation.
    pub fn parse(content: &str) -> Option<Self> {
        let fields: Vec<&str> = content.split('\t').collect();
        let [path, offset, identity] = fields.as_slice() else {
            return None;
        };
        if path.is_empty() {
            return None;
        }
        Some(Self {
            tracked_path: PathBuf::from(*path),
            byte_offset: u64::from_str_radix(offset.trim(), 16).ok()?,
            file_identity: u64::from_str_radix(identity.trim(), 16).ok()?,
        })
    }

    pub fn encode(&self) -> String {
        format!(
            "{}\t{:016x}\t{:016x}",
            self.tracked_path.display(),
            self.byte_offset,
            self.file_identity
        )
    }
}

/// Owner of the position file handle for one engine generation.
#[derive(Debug)]
pub struct PositionStore {
    path: PathBuf,
    file: Option<File>,
}

impl PositionStore {
    /// Opens (creating if absent) the position file for reading and writing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| Error::PositionOpen {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    /// A store whose file could not be opened. Loads yield the default
    /// record and every persist reports `PositionStoreClosed`.
    pub fn unavailable(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Reads the stored record. Never fails: an empty, unreadable or
    /// malformed file yields the start-of-file record for `input_path`.
    pub fn load(&mut self, input_path: &Path) -> PositionRecord {
        let Some(file) = self.file.as_mut() else {
            return PositionRecord::start_of(input_path);
        };

        let mut content = String::new();
        let read = file
            .seek(SeekFrom::Start(0))
            .and_then(|_| file.read_to_string(&mut content));
        if let Err(e) = read {
            error!(path = %self.path.display(), error = %e, "cannot read position file");
            return PositionRecord::start_of(input_path);
        }

        match PositionRecord::parse(&content) {
            Some(record) => record,
            None => {
                debug!(
                    path = %self.path.display(),
                    "position file is empty or not correct, starting from offset 0"
                );
                PositionRecord::start_of(input_path)
            }
        }
    }

    /// Returns the offset to resume from: the stored offset when the stored
    /// identity matches the current file, 0 otherwise (rotated or unknown).
    pub fn reconcile(record: &PositionRecord, current: Option<FileIdentity>) -> u64 {
        match current {
            Some(id) if id.as_u64() == record.file_identity => record.byte_offset,
            Some(id) => {
                debug!(
                    stored = %FileIdentity::from_raw(record.file_identity),
                    current = %id,
                    "file identity changed, reading from start"
                );
                0
            }
            None => 0,
        }
    }

    /// Overwrites the record with the given position.
    pub fn persist(&mut self, tracked_path: &Path, offset: u64, identity: FileIdentity) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(Error::PositionStoreClosed {
                path: self.path.clone(),
            });
        };

        let record = PositionRecord {
            tracked_path: tracked_path.to_path_buf(),
            byte_offset: offset,
            file_identity: identity.as_u64(),
        };

        let written = file
            .seek(SeekFrom::Start(0))
            .and_then(|_| file.set_len(0))
            .and_then(|_| file.write_all(record.encode().as_bytes()))
            .and_then(|_| file.flush());

        written.map_err(|source| Error::PositionWrite {
            path: self.path.clone(),
            source,
        })
    }

    /// Syncs and releases the file handle. Further calls are no-ops.
    pub fn close(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        debug!(path = %self.path.display(), "closing position file");
        file.sync_all().map_err(|source| Error::PositionWrite {
            path: self.path.clone(),
            source,
        })
    }
}

impl Drop for PositionStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "position file close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(content: &str) -> (tempfile::TempDir, PositionStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logsep.pos");
        std::fs::write(&path, content).unwrap();
        let store = PositionStore::open(&path).unwrap();
        (dir, store)
    }

    #[test]
    fn test_open_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logsep.pos");
        let mut store = PositionStore::open(&path).unwrap();
        assert!(path.exists());

        let record = store.load(Path::new("/var/log/in.log"));
        assert_eq!(record, PositionRecord::start_of(Path::new("/var/log/in.log")));
    }

    #[test]
    fn test_load_parses_stored_record() {
        let (_dir, mut store) =
            store_with("/var/log/in.log\t00000000000004d2\t00000000000000ff");
        let record = store.load(Path::new("/var/log/in.log"));
        assert_eq!(record.byte_offset, 1234);
        assert_eq!(record.file_identity, 255);
    }

    #[test]
    fn test_resume_when_identity_matches() {
        let (_dir, mut store) =
            store_with("/var/log/in.log\t00000000000004d2\t00000000000000ff");
        let record = store.load(Path::new("/var/log/in.log"));
        let offset = PositionStore::reconcile(&record, Some(FileIdentity::from_raw(255)));
        assert_eq!(offset, 1234);
    }

    #[test]
    fn test_identity_mismatch_resets_offset() {
        let (_dir, mut store) =
            store_with("/var/log/in.log\t00000000ffffffff\t00000000000000ff");
        let record = store.load(Path::new("/var/log/in.log"));
        assert_eq!(
            PositionStore::reconcile(&record, Some(FileIdentity::from_raw(256))),
            0
        );
        assert_eq!(PositionStore::reconcile(&record, None), 0);
    }

    #[test]
    fn test_malformed_records_yield_offset_zero() {
        let cases = [
            "",
            "/var/log/in.log",
            "/var/log/in.log\t10",
            "/var/log/in.log\t10\t20\textra",
            "/var/log/in.log\tnot-hex\t00000000000000ff",
            "/var/log/in.log\t0000000000000010\tzz",
            "/var/log/in.log\t0000000000",
        ];
        for content in cases {
            let (_dir, mut store) = store_with(content);
            let record = store.load(Path::new("/var/log/in.log"));
            let offset = PositionStore::reconcile(&record, Some(FileIdentity::from_raw(0xff)));
            assert_eq!(offset, 0, "content {:?}", content);
        }
    }

    #[test]
    fn test_persist_overwrites_in_place() {
        let (dir, mut store) = store_with("/very/long/previous/path.log\tffffffffffffffff\t1");
        store
            .persist(Path::new("/in.log"), 42, FileIdentity::from_raw(7))
            .unwrap();

        let content = std::fs::read_to_string(dir.path().join("logsep.pos")).unwrap();
        assert_eq!(content, "/in.log\t000000000000002a\t0000000000000007");

        store
            .persist(Path::new("/in.log"), 43, FileIdentity::from_raw(7))
            .unwrap();
        let record = store.load(Path::new("/in.log"));
        assert_eq!(record.byte_offset, 43);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (_dir, mut store) = store_with("");
        store.close().unwrap();
        store.close().unwrap();
        assert!(!store.is_open());

        let err = store
            .persist(Path::new("/in.log"), 1, FileIdentity::from_raw(1))
            .unwrap_err();
        assert!(matches!(err, Error::PositionStoreClosed { .. }));
    }

    #[test]
    fn test_unavailable_store_loads_default() {
        let mut store = PositionStore::unavailable("/nonexistent/logsep.pos");
        let record = store.load(Path::new("/in.log"));
        assert_eq!(record.byte_offset, 0);
    }

    #[test]
    fn test_open_fails_when_parent_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = PositionStore::open(dir.path().join("missing").join("logsep.pos")).unwrap_err();
        assert!(matches!(err, Error::PositionOpen { .. }));
    }
}
