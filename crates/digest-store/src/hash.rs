//! Digests, the algorithms that produce them, and the handles that carry them.
//!
//! SHA-1 is the default so existing roots keep their keys. SHA-256 and BLAKE3
//! are available for callers who need real collision resistance; switching
//! algorithm changes every on-disk name, so two stores only share objects when
//! they agree on the algorithm.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HashAlgorithm {
    #[default]
    Sha1,
    Sha256,
    Blake3,
}

/// The requested algorithm name is not one we can compute.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported hash algorithm: {0}")]
pub struct UnknownAlgorithm(pub String);

impl HashAlgorithm {
    /// Canonical lowercase name, as written in config files.
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Blake3 => "blake3",
        }
    }

    /// Length of the hex identification this algorithm produces.
    pub fn hex_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 40,
            HashAlgorithm::Sha256 | HashAlgorithm::Blake3 => 64,
        }
    }

    /// Start a fresh incremental digest.
    pub fn hasher(&self) -> StreamHasher {
        let state = match self {
            HashAlgorithm::Sha1 => HasherState::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Blake3 => HasherState::Blake3(Box::new(blake3::Hasher::new())),
        };
        StreamHasher { state }
    }

    /// Digest a complete buffer.
    pub fn digest(&self, data: &[u8]) -> Handle {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(HashAlgorithm::Sha1),
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            "blake3" => Ok(HashAlgorithm::Blake3),
            _ => Err(UnknownAlgorithm(s.to_string())),
        }
    }
}

impl TryFrom<String> for HashAlgorithm {
    type Error = UnknownAlgorithm;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HashAlgorithm> for String {
    fn from(alg: HashAlgorithm) -> Self {
        alg.name().to_string()
    }
}

enum HasherState {
    Sha1(Sha1),
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

/// Incremental digest state fed chunk by chunk as bytes stream past.
pub struct StreamHasher {
    state: HasherState,
}

impl StreamHasher {
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha1(h) => h.update(data),
            HasherState::Sha256(h) => h.update(data),
            HasherState::Blake3(h) => {
                h.update(data);
            }
        }
    }

    /// Consume the state and render the digest as a handle.
    pub fn finalize(self) -> Handle {
        let hex = match self.state {
            HasherState::Sha1(h) => hex::encode(h.finalize()),
            HasherState::Sha256(h) => hex::encode(h.finalize()),
            HasherState::Blake3(h) => hex::encode(h.finalize().as_bytes()),
        };
        Handle(hex)
    }
}

/// Opaque reference to a stored object.
///
/// The only thing a handle carries is the lowercase hex digest of the
/// object's content. Handles compare by that identification; they do not own
/// storage and stay valid across store instances that share a root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Handle(String);

/// Errors that can occur when parsing a handle from text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandleError {
    #[error("invalid identification length {0}: expected a non-zero even number of hex chars")]
    InvalidLength(usize),

    #[error("invalid hex character in identification")]
    InvalidHex,
}

impl Handle {
    /// Parse an identification (validates format, normalizes to lowercase).
    pub fn from_str_checked(s: &str) -> Result<Self, HandleError> {
        if s.is_empty() || s.len() % 2 != 0 {
            return Err(HandleError::InvalidLength(s.len()));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HandleError::InvalidHex);
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// The hex digest this handle refers to.
    pub fn identification(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Handle {
    type Err = HandleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_checked(s)
    }
}

impl TryFrom<String> for Handle {
    type Error = HandleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str_checked(&value)
    }
}

impl From<Handle> for String {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}

impl AsRef<str> for Handle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
