//! Store configuration with environment variable and file-based loading.
//!
//! Environment variables:
//! - `DIGEST_STORE_ROOT`: Directory holding stored objects
//! - `DIGEST_STORE_HASH`: Digest algorithm (`sha1`, `sha256`, `blake3`)
//! - `DIGEST_STORE_ANONYMOUS`: Set to "true" to delete the root on close
//! - `DIGEST_STORE_FLUSH_ON_OPEN`: Set to "true" to wipe the root at open
//!
//! Default root: `<user cache dir>/digest-store`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::hash::HashAlgorithm;

/// Configuration for a [`DigestStore`](crate::DigestStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding stored objects. Created if missing.
    pub root: PathBuf,

    /// Erase the root and recreate it before first use.
    ///
    /// Destructive: everything under `root` is deleted, including files
    /// that were never put there by a store.
    #[serde(default)]
    pub flush_on_open: bool,

    /// Delete the root when the store is closed.
    #[serde(default)]
    pub anonymous: bool,

    /// Digest algorithm used to key objects.
    #[serde(default)]
    pub hash: HashAlgorithm,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::shared(default_store_root())
    }
}

/// Get the default store root (`<cache dir>/digest-store`).
fn default_store_root() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.cache_dir().join("digest-store"))
        .unwrap_or_else(|| env::temp_dir().join("digest-store"))
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| v.to_lowercase() == "true" || v == "1")
        .unwrap_or(false)
}

impl StoreConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// Fails if `DIGEST_STORE_HASH` names an algorithm we cannot compute.
    pub fn from_env() -> Result<Self> {
        let root = env::var("DIGEST_STORE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_store_root());

        let hash = match env::var("DIGEST_STORE_HASH") {
            Ok(name) => name
                .parse()
                .context("DIGEST_STORE_HASH is not a supported algorithm")?,
            Err(_) => HashAlgorithm::default(),
        };

        Ok(Self {
            root,
            flush_on_open: env_flag("DIGEST_STORE_FLUSH_ON_OPEN"),
            anonymous: env_flag("DIGEST_STORE_ANONYMOUS"),
            hash,
        })
    }

    /// Load configuration from a TOML file, falling back to environment.
    ///
    /// The file should contain a `[store]` section:
    /// ```toml
    /// [store]
    /// root = "/var/cache/digest-store"
    /// hash = "sha256"
    /// anonymous = false
    /// flush_on_open = false
    /// ```
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let table: toml::Table = contents
            .parse()
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?;

        if let Some(section) = table.get("store") {
            let config: StoreConfig = section
                .clone()
                .try_into()
                .context("failed to parse [store] section")?;
            Ok(config)
        } else {
            Self::from_env()
        }
    }

    /// A shared store at `root`: the root outlives the store.
    pub fn shared(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            flush_on_open: false,
            anonymous: false,
            hash: HashAlgorithm::default(),
        }
    }

    /// Alias of [`shared`](Self::shared).
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self::shared(root)
    }

    /// An anonymous store at `root`: the root is deleted on close.
    pub fn anonymous_in(root: impl Into<PathBuf>) -> Self {
        Self {
            anonymous: true,
            ..Self::shared(root)
        }
    }

    /// Use a different digest algorithm.
    pub fn hash(mut self, hash: HashAlgorithm) -> Self {
        self.hash = hash;
        self
    }

    /// Request (or cancel) wiping the root at open.
    pub fn flush_on_open(mut self, flush: bool) -> Self {
        self.flush_on_open = flush;
        self
    }
}
