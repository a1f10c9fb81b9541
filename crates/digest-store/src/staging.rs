//! Staging: bytes in flight before their digest is known.
//!
//! Every ingest writes into a staging file created inside the store root, so
//! the final rename never crosses a filesystem. Staging names start with a dot
//! and end in `.tmp`, which keeps them out of [`handles()`](crate::DigestStore::handles)
//! and makes leftovers from a crashed process easy to spot.
//!
//! Layout:
//! ```text
//! {root}/
//! ├── ops4jstore-aaf4c61d....bin    # Published objects
//! └── .ops4jstore-Xy12Ab.tmp        # In-flight ingest (removed on drop)
//! ```

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{Result, StoreError};

const STAGING_PREFIX: &str = ".ops4jstore-";
const STAGING_SUFFIX: &str = ".tmp";

/// Outcome of publishing a staging file under its final name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Published {
    /// The staged bytes became the stored object.
    Created,
    /// An object with this digest already existed; the staged bytes were dropped.
    AlreadyPresent,
}

/// A staging file being filled by one ingest.
///
/// Dropping a `StagingFile` that was never published deletes it, so every
/// early return on the ingest path cleans up after itself.
#[derive(Debug)]
pub struct StagingFile {
    file: NamedTempFile,
    bytes_written: u64,
}

impl StagingFile {
    /// Create a new, empty staging file inside `dir`.
    pub(crate) fn create_in(dir: &Path) -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(STAGING_SUFFIX)
            .tempfile_in(dir)
            .map_err(|e| StoreError::storage("failed to create staging file", e))?;

        Ok(Self {
            file,
            bytes_written: 0,
        })
    }

    /// Path of the staging file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append a chunk.
    pub(crate) fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Flush and sync, then move the file to `dest` without ever replacing
    /// an existing object.
    ///
    /// The move is a same-directory rename that refuses to clobber, so a
    /// concurrent reader sees either no file or the complete object. Losing
    /// the race to another writer of the same digest counts as success.
    pub(crate) fn publish(mut self, dest: &Path) -> Result<Published> {
        self.file
            .flush()
            .and_then(|_| self.file.as_file().sync_data())
            .map_err(|e| StoreError::storage("failed to sync staging file", e))?;

        if dest.exists() {
            return Ok(Published::AlreadyPresent);
        }

        match self.file.persist_noclobber(dest) {
            Ok(_) => Ok(Published::Created),
            // The returned temp file is dropped here, which removes it.
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                Ok(Published::AlreadyPresent)
            }
            Err(err) => Err(StoreError::storage(
                format!("failed to publish {}", dest.display()),
                err.error,
            )),
        }
    }
}

/// Whether `name` looks like a staging file.
pub fn is_staging_name(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX) && name.ends_with(STAGING_SUFFIX)
}

/// Staging files currently present under `dir` (useful for diagnostics).
pub fn staging_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if is_staging_name(&entry.file_name().to_string_lossy()) {
            found.push(entry.path());
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_staging_write_and_publish() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let mut staging = StagingFile::create_in(dir.path())?;
        staging.write(b"Hello, ").unwrap();
        staging.write(b"World!").unwrap();
        assert_eq!(staging.bytes_written(), 13);

        let staged_path = staging.path().to_path_buf();
        assert!(is_staging_name(&staged_path.file_name().unwrap().to_string_lossy()));

        let dest = dir.path().join("object.bin");
        assert_eq!(staging.publish(&dest)?, Published::Created);
        assert!(!staged_path.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"Hello, World!");
        Ok(())
    }

    #[test]
    fn test_publish_does_not_rewrite_existing() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("object.bin");
        std::fs::write(&dest, b"original").unwrap();

        let mut staging = StagingFile::create_in(dir.path())?;
        staging.write(b"imposter").unwrap();
        let staged_path = staging.path().to_path_buf();

        assert_eq!(staging.publish(&dest)?, Published::AlreadyPresent);
        assert!(!staged_path.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"original");
        Ok(())
    }

    #[test]
    fn test_drop_removes_unpublished() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let staging = StagingFile::create_in(dir.path())?;
        let path = staging.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(staging_files(dir.path()).unwrap(), vec![path.clone()]);

        drop(staging);
        assert!(!path.exists());
        assert!(staging_files(dir.path()).unwrap().is_empty());
        Ok(())
    }

    #[test]
    fn test_create_in_missing_dir_is_storage_error() {
        let result = StagingFile::create_in(Path::new("/nonexistent/digest-store/root"));
        assert!(matches!(result, Err(StoreError::Storage { .. })));
    }
}
