//! DigestStore: filesystem-backed, content-addressed stream storage.
//!
//! Implements the StreamStore trait over a single flat directory.
//!
//! Layout:
//! ```text
//! {root}/
//! ├── ops4jstore-aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d.bin
//! └── ops4jstore-da39a3ee5e6b4b0d3255bfef95601890afd80709.bin
//! ```
//!
//! No index, no metadata, no subdirectories: whether an object exists is a
//! plain presence check on `{root}/{FILENAME_PREFIX}{hex}{FILENAME_SUFFIX}`.
//! Any number of stores, in any number of processes, may share a root.

use std::env;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use stream_monitor::StreamReporter;
use tracing::{debug, warn};
use url::Url;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::hash::{HashAlgorithm, Handle};
use crate::staging::{Published, StagingFile};

/// Stable prefix of every stored object's file name.
pub const FILENAME_PREFIX: &str = "ops4jstore-";
/// Stable suffix of every stored object's file name.
pub const FILENAME_SUFFIX: &str = ".bin";
/// Bytes read from the source per ingest iteration.
pub const CHUNK_SIZE: usize = 8192;

const SHARED_ROOT_NAME: &str = "tb";
const ANONYMOUS_PREFIX: &str = "ops4j-store-anonymous-";

/// Trait for stream storage backends.
pub trait StreamStore: Send + Sync {
    /// Read `source` to its end and store it, returning its handle.
    ///
    /// If an object with the same digest exists, nothing is written.
    fn ingest(&self, source: &mut dyn Read) -> Result<Handle>;

    /// Open a fresh reader over the stored object.
    ///
    /// Fails with [`StoreError::NotFound`] if nothing is stored for the handle.
    fn open(&self, handle: &Handle) -> Result<Box<dyn Read + Send>>;

    /// A `file://` URI for the stored object, for handing to other processes.
    fn locate(&self, handle: &Handle) -> Result<Url>;

    /// Release the store. Anonymous stores delete their root. Idempotent.
    fn close(&self);
}

/// Optional knobs for [`DigestStore::ingest_with`].
#[derive(Default, Clone, Copy)]
pub struct IngestOptions<'a> {
    reporter: Option<&'a dyn StreamReporter>,
    cancel: Option<&'a AtomicBool>,
    label: Option<&'a str>,
}

impl<'a> IngestOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report progress per chunk, then completion or failure.
    pub fn reporter(mut self, reporter: &'a dyn StreamReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Abort with [`StoreError::Cancelled`] once `flag` is set.
    ///
    /// Checked before every chunk read; a read already blocked in the source
    /// finishes first.
    pub fn cancel(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Resource label passed to the reporter (default: `ingest`).
    pub fn label(mut self, label: &'a str) -> Self {
        self.label = Some(label);
        self
    }
}

/// Content-addressed store over one root directory.
#[derive(Debug)]
pub struct DigestStore {
    root: PathBuf,
    hash: HashAlgorithm,
    anonymous: bool,
    closed: AtomicBool,
}

impl DigestStore {
    /// Create a store with the given configuration.
    ///
    /// Creates the root if missing. With `flush_on_open`, the root is wiped
    /// first, unless it is a filesystem root or the home directory.
    pub fn new(config: StoreConfig) -> Result<Self> {
        if config.flush_on_open {
            flush_root(&config.root)?;
        }

        fs::create_dir_all(&config.root).map_err(|e| {
            StoreError::Configuration(format!(
                "store root {} is not usable: {}",
                config.root.display(),
                e
            ))
        })?;

        let root = fs::canonicalize(&config.root).map_err(|e| {
            StoreError::Configuration(format!(
                "cannot resolve store root {}: {}",
                config.root.display(),
                e
            ))
        })?;
        if !root.is_dir() {
            return Err(StoreError::Configuration(format!(
                "store root {} is not a directory",
                root.display()
            )));
        }

        debug!(
            root = %root.display(),
            hash = %config.hash,
            anonymous = config.anonymous,
            "storage area ready"
        );

        Ok(Self {
            root,
            hash: config.hash,
            anonymous: config.anonymous,
            closed: AtomicBool::new(false),
        })
    }

    /// Create a shared store at a specific path.
    pub fn at_path(root: impl Into<PathBuf>) -> Result<Self> {
        Self::new(StoreConfig::shared(root))
    }

    /// The shared store under the system temp dir.
    ///
    /// Objects survive process restarts and are shared by everything that
    /// opens this store.
    pub fn shared_local() -> Result<Self> {
        Self::at_path(env::temp_dir().join(SHARED_ROOT_NAME))
    }

    /// If you just need somewhere to put a stream, use this one.
    pub fn default_store() -> Result<Self> {
        Self::shared_local()
    }

    /// A private store in a fresh temp directory, deleted on close.
    pub fn anonymous() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(ANONYMOUS_PREFIX)
            .tempdir()
            .map_err(|e| {
                StoreError::Configuration(format!("no temp directory for anonymous store: {}", e))
            })?;
        // Teardown is ours: close() removes it, not TempDir's drop.
        #[allow(deprecated)]
        let root = dir.into_path();
        Self::new(StoreConfig::anonymous_in(root))
    }

    /// Canonical path of the store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.hash
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Where the object for `handle` lives, whether or not it exists yet.
    pub fn path(&self, handle: &Handle) -> PathBuf {
        self.root.join(format!(
            "{}{}{}",
            FILENAME_PREFIX,
            handle.identification(),
            FILENAME_SUFFIX
        ))
    }

    /// Check if an object exists without opening it.
    pub fn contains(&self, handle: &Handle) -> bool {
        self.path(handle).is_file()
    }

    /// Ingest with a reporter and/or cancel flag.
    ///
    /// On any failure the staging file is removed and nothing is published.
    pub fn ingest_with(&self, source: &mut dyn Read, options: IngestOptions<'_>) -> Result<Handle> {
        self.ensure_open()?;
        let label = options.label.unwrap_or("ingest");

        let result = self.ingest_staged(source, &options, label);

        if let Some(reporter) = options.reporter {
            match &result {
                Ok(_) => reporter.complete(label),
                Err(e) => reporter.error(label, &e.to_string()),
            }
        }
        result
    }

    fn ingest_staged(
        &self,
        source: &mut dyn Read,
        options: &IngestOptions<'_>,
        label: &str,
    ) -> Result<Handle> {
        let mut staging = StagingFile::create_in(&self.root)?;
        let mut hasher = self.hash.hasher();
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            if options.cancel.is_some_and(|flag| flag.load(Ordering::Acquire)) {
                debug!(label, "ingest cancelled");
                return Err(StoreError::Cancelled);
            }

            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    return Err(StoreError::Cancelled);
                }
                Err(e) => return Err(StoreError::Read(e)),
            };

            hasher.update(&buf[..n]);
            staging
                .write(&buf[..n])
                .map_err(|e| StoreError::storage("failed to write staging file", e))?;

            if let Some(reporter) = options.reporter {
                reporter.update(label, None, staging.bytes_written());
            }
        }

        let handle = hasher.finalize();
        let size = staging.bytes_written();
        match staging.publish(&self.path(&handle))? {
            Published::Created => debug!(id = %handle, size, "stored new object"),
            Published::AlreadyPresent => debug!(id = %handle, "object already exists in store"),
        }
        Ok(handle)
    }

    /// Open the stored object as a plain file.
    pub fn open_file(&self, handle: &Handle) -> Result<File> {
        self.ensure_open()?;
        File::open(self.path(handle)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound(handle.to_string()),
            _ => StoreError::storage(format!("failed to open object {}", handle), e),
        })
    }

    /// Handles of every object currently under the root, sorted.
    ///
    /// Staging files and anything not named like an object are skipped.
    pub fn handles(&self) -> Result<Vec<Handle>> {
        self.ensure_open()?;
        let entries = fs::read_dir(&self.root)
            .map_err(|e| StoreError::storage("failed to list store root", e))?;

        let mut handles = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::storage("failed to list store root", e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(id) = name
                .strip_prefix(FILENAME_PREFIX)
                .and_then(|rest| rest.strip_suffix(FILENAME_SUFFIX))
            else {
                continue;
            };
            if let Ok(handle) = id.parse::<Handle>() {
                handles.push(handle);
            }
        }
        handles.sort();
        Ok(handles)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

impl StreamStore for DigestStore {
    fn ingest(&self, source: &mut dyn Read) -> Result<Handle> {
        self.ingest_with(source, IngestOptions::default())
    }

    fn open(&self, handle: &Handle) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(self.open_file(handle)?))
    }

    fn locate(&self, handle: &Handle) -> Result<Url> {
        self.ensure_open()?;
        let path = self.path(handle);
        if !path.is_file() {
            return Err(StoreError::NotFound(handle.to_string()));
        }
        Url::from_file_path(&path).map_err(|_| {
            StoreError::Configuration(format!("cannot express {} as a file URI", path.display()))
        })
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if !self.anonymous {
            debug!(root = %self.root.display(), "closed shared store");
            return;
        }

        // Best effort: another process may still hold files open in here.
        match fs::remove_dir_all(&self.root) {
            Ok(()) => debug!(root = %self.root.display(), "removed anonymous store"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                root = %self.root.display(),
                "failed to remove anonymous store root: {}",
                e
            ),
        }
    }
}

impl Drop for DigestStore {
    fn drop(&mut self) {
        self.close();
    }
}

/// Wipe `root` before use, refusing paths whose loss would be catastrophic.
fn flush_root(root: &Path) -> Result<()> {
    let absolute = match fs::canonicalize(root) {
        Ok(path) => path,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(StoreError::Configuration(format!(
                "cannot resolve store root {}: {}",
                root.display(),
                e
            )))
        }
    };

    if absolute.parent().is_none() {
        return Err(StoreError::Configuration(format!(
            "refusing to flush filesystem root {}",
            absolute.display()
        )));
    }
    if let Some(dirs) = directories::BaseDirs::new() {
        if fs::canonicalize(dirs.home_dir()).ok().as_deref() == Some(absolute.as_path()) {
            return Err(StoreError::Configuration(format!(
                "refusing to flush home directory {}",
                absolute.display()
            )));
        }
    }

    warn!(root = %absolute.display(), "flushing store root");
    fs::remove_dir_all(&absolute)
        .map_err(|e| StoreError::storage(format!("failed to flush {}", absolute.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use tempfile::TempDir;

    fn read_all(mut reader: Box<dyn Read + Send>) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        out
    }

    /// Yields `good` bytes, then fails with `kind`.
    struct FailingReader {
        good: Cursor<Vec<u8>>,
        kind: io::ErrorKind,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.good.read(buf)?;
            if n == 0 {
                Err(io::Error::new(self.kind, "source went away"))
            } else {
                Ok(n)
            }
        }
    }

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<String>>,
    }

    impl StreamReporter for Recording {
        fn update(&self, resource: &str, _expected: Option<u64>, count: u64) {
            self.events.lock().unwrap().push(format!("update {} {}", resource, count));
        }

        fn complete(&self, resource: &str) {
            self.events.lock().unwrap().push(format!("complete {}", resource));
        }

        fn error(&self, resource: &str, _message: &str) {
            self.events.lock().unwrap().push(format!("error {}", resource));
        }
    }

    fn object_count(store: &DigestStore) -> usize {
        fs::read_dir(store.root()).unwrap().count()
    }

    #[test]
    fn test_ingest_and_open() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = DigestStore::at_path(temp_dir.path())?;

        let handle = store.ingest(&mut &b"Hello, World!"[..])?;
        assert_eq!(handle.identification().len(), 40);
        assert_eq!(read_all(store.open(&handle)?), b"Hello, World!");
        Ok(())
    }

    #[test]
    fn test_deduplication() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = DigestStore::at_path(temp_dir.path())?;

        let h1 = store.ingest(&mut &b"Duplicate Me"[..])?;
        let h2 = store.ingest(&mut &b"Duplicate Me"[..])?;
        assert_eq!(h1, h2);
        assert_eq!(object_count(&store), 1);
        Ok(())
    }

    #[test]
    fn test_path_naming() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = DigestStore::at_path(temp_dir.path())?;

        let handle = store.ingest(&mut &b"hello"[..])?;
        let name = store.path(&handle).file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name, "ops4jstore-aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d.bin");
        assert!(store.contains(&handle));
        Ok(())
    }

    #[test]
    fn test_open_missing_is_not_found() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = DigestStore::at_path(temp_dir.path())?;

        let missing: Handle = "0000000000000000000000000000000000000000".parse().unwrap();
        assert!(!store.contains(&missing));
        assert!(matches!(store.open(&missing), Err(StoreError::NotFound(_))));
        assert!(store.locate(&missing).unwrap_err().is_not_found());
        Ok(())
    }

    #[test]
    fn test_locate_is_file_uri() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = DigestStore::at_path(temp_dir.path())?;

        let handle = store.ingest(&mut &b"locate me"[..])?;
        let url = store.locate(&handle)?;
        assert_eq!(url.scheme(), "file");
        assert_eq!(url.to_file_path().unwrap(), store.path(&handle));
        Ok(())
    }

    #[test]
    fn test_read_failure_leaves_no_trace() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = DigestStore::at_path(temp_dir.path())?;

        let mut source = FailingReader {
            good: Cursor::new(vec![7u8; 3 * CHUNK_SIZE]),
            kind: io::ErrorKind::ConnectionReset,
        };
        let result = store.ingest(&mut source);
        assert!(matches!(result, Err(StoreError::Read(_))));
        assert_eq!(object_count(&store), 0);
        Ok(())
    }

    #[test]
    fn test_interrupted_source_cancels() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = DigestStore::at_path(temp_dir.path())?;

        let mut source = FailingReader {
            good: Cursor::new(b"partial".to_vec()),
            kind: io::ErrorKind::Interrupted,
        };
        assert!(matches!(store.ingest(&mut source), Err(StoreError::Cancelled)));
        assert_eq!(object_count(&store), 0);
        Ok(())
    }

    #[test]
    fn test_cancel_flag() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = DigestStore::at_path(temp_dir.path())?;

        let cancel = AtomicBool::new(true);
        let result = store.ingest_with(&mut &b"never stored"[..], IngestOptions::new().cancel(&cancel));
        assert!(matches!(result, Err(StoreError::Cancelled)));
        assert_eq!(object_count(&store), 0);
        Ok(())
    }

    #[test]
    fn test_reporter_sees_progress_and_completion() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = DigestStore::at_path(temp_dir.path())?;
        let reporter = Recording::default();

        let data = vec![1u8; CHUNK_SIZE + 10];
        store.ingest_with(
            &mut data.as_slice(),
            IngestOptions::new().reporter(&reporter).label("blob"),
        )?;

        let events = reporter.events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                format!("update blob {}", CHUNK_SIZE),
                format!("update blob {}", CHUNK_SIZE + 10),
                "complete blob".to_string(),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_reporter_sees_failure() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = DigestStore::at_path(temp_dir.path())?;
        let reporter = Recording::default();

        let mut source = FailingReader {
            good: Cursor::new(Vec::new()),
            kind: io::ErrorKind::BrokenPipe,
        };
        let _ = store.ingest_with(&mut source, IngestOptions::new().reporter(&reporter));
        assert_eq!(*reporter.events.lock().unwrap(), vec!["error ingest".to_string()]);
        Ok(())
    }

    #[test]
    fn test_handles_skips_foreign_files() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = DigestStore::at_path(temp_dir.path())?;

        let a = store.ingest(&mut &b"a"[..])?;
        let b = store.ingest(&mut &b"b"[..])?;
        fs::write(store.root().join("README"), b"not an object").unwrap();
        fs::write(store.root().join(".ops4jstore-abandoned.tmp"), b"staging").unwrap();
        fs::write(store.root().join("ops4jstore-nothex.bin"), b"bogus").unwrap();

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(store.handles()?, expected);
        Ok(())
    }

    #[test]
    fn test_closed_store_rejects_operations() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = DigestStore::at_path(temp_dir.path())?;
        let handle = store.ingest(&mut &b"before close"[..])?;

        store.close();
        assert!(store.is_closed());
        assert!(matches!(store.ingest(&mut &b"after"[..]), Err(StoreError::Closed)));
        assert!(matches!(store.open(&handle), Err(StoreError::Closed)));
        assert!(matches!(store.locate(&handle), Err(StoreError::Closed)));
        Ok(())
    }

    #[test]
    fn test_flush_on_open_wipes_root() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("store");
        let handle = {
            let store = DigestStore::at_path(&root)?;
            store.ingest(&mut &b"doomed"[..])?
        };

        let store = DigestStore::new(StoreConfig::shared(&root).flush_on_open(true))?;
        assert!(!store.contains(&handle));
        assert!(root.is_dir());
        Ok(())
    }

    #[test]
    fn test_flush_refuses_filesystem_root() {
        let config = StoreConfig::shared("/").flush_on_open(true);
        assert!(matches!(DigestStore::new(config), Err(StoreError::Configuration(_))));
    }

    #[test]
    fn test_root_that_is_a_file_is_configuration_error() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("occupied");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            DigestStore::at_path(&file),
            Err(StoreError::Configuration(_))
        ));
    }

    #[test]
    fn test_alternate_algorithm_changes_key() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = DigestStore::new(
            StoreConfig::shared(temp_dir.path()).hash(HashAlgorithm::Sha256),
        )?;

        let handle = store.ingest(&mut &b""[..])?;
        assert_eq!(
            handle.identification(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(store.algorithm(), HashAlgorithm::Sha256);
        Ok(())
    }

    #[test]
    fn test_concurrent_ingest() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(DigestStore::at_path(temp_dir.path())?);
        let data: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
        let expected = HashAlgorithm::Sha1.digest(&data);

        let workers: Vec<_> = (0..10)
            .map(|_| {
                let store = Arc::clone(&store);
                let data = data.clone();
                thread::spawn(move || store.ingest(&mut data.as_slice()).expect("ingest failed"))
            })
            .collect();

        for worker in workers {
            assert_eq!(worker.join().unwrap(), expected);
        }
        assert_eq!(object_count(&store), 1);
        assert_eq!(read_all(store.open(&expected)?), data);
        Ok(())
    }
}
