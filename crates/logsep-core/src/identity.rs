//! Path-independent file identity used to detect log rotation.

use std::fmt;
use std::fs::Metadata;
use std::path::Path;

use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Error, Result};

/// Stable identifier of a physical file.
///
/// Two values are equal only if they were taken from the same file
/// (same device and inode), so a path that now resolves to a different
/// identity has been rotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileIdentity(u64);

impl FileIdentity {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Stats `path` and returns the identity of the file it refers to now.
    pub fn resolve(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path).map_err(|source| Error::IdentityResolve {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_metadata(&metadata))
    }

    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&metadata.dev().to_le_bytes());
        key[8..].copy_from_slice(&metadata.ino().to_le_bytes());
        Self(xxh3_64(&key))
    }

    /// Without inodes the creation time stands in; a recreated file gets a new one.
    #[cfg(not(unix))]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let created = metadata
            .created()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Self(xxh3_64(&created.to_le_bytes()))
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
