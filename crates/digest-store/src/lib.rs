//! Content-addressed stream storage.
//!
//! Streams go in, handles come out. Each stream is hashed while it is being
//! written to a staging file, then published under a name derived only from
//! its digest. Storing the same bytes twice stores them once.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::io::Read;
//! use digest_store::{DigestStore, StreamStore};
//!
//! // A private store, deleted when closed or dropped
//! let store = DigestStore::anonymous().unwrap();
//!
//! // Or shared at a specific path
//! let _shared = DigestStore::at_path("/var/cache/blobs").unwrap();
//!
//! // Store a stream
//! let handle = store.ingest(&mut &b"hello"[..]).unwrap();
//! assert_eq!(handle.identification(), "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
//!
//! // Read it back
//! let mut data = Vec::new();
//! store.open(&handle).unwrap().read_to_end(&mut data).unwrap();
//!
//! // Hand the file to another process
//! println!("{}", store.locate(&handle).unwrap());
//! ```
//!
//! # Sharing a root
//!
//! Stores never lock. Publishing is a rename that refuses to replace an
//! existing name, so concurrent writers of the same content agree on one
//! file and readers never see a partial object. Stores in different
//! processes may point at the same root as long as they use the same
//! [`HashAlgorithm`].

pub mod config;
pub mod error;
pub mod hash;
pub mod staging;
pub mod store;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use hash::{Handle, HandleError, HashAlgorithm, StreamHasher, UnknownAlgorithm};
pub use staging::Published;
pub use store::{
    DigestStore, IngestOptions, StreamStore, CHUNK_SIZE, FILENAME_PREFIX, FILENAME_SUFFIX,
};
