//! EMS Store is the storage core of a small shift time-tracking service.
//!
//! Application code reads and writes a fixed set of *logical files*
//! (`data/users.json`, `data/time_entries.json`, ...) while the bytes actually
//! live in a shared document store, one singleton document per file.
//!
//! ## Core Components
//! - [`engine`]: The embedded document store (in-memory with atomic persistence) and the vault.
//! - [`sdk`]: Remote TCP client and store discovery from a URI.
//! - [`server`]: TCP daemon serving a store to several application processes.
//! - [`registry`], [`normalize`], [`adapter`]: The logical-file façade.
//! - [`bootstrap`], [`migrate`]: Legacy flat-file import.
//! - [`compat`]: File-like access for call sites written against literal paths.
//! - [`service`]: Member, entry, message and admin operations built on the façade.

pub mod adapter;
pub mod bootstrap;
pub mod compat;
pub mod config;
pub mod engine;
pub mod migrate;
pub mod normalize;
pub mod records;
pub mod registry;
pub mod sdk;
pub mod server;
pub mod service;

#[cfg(test)]
pub(crate) mod test_support;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors returned by the store and the layers built on it.
#[derive(Error, Debug)]
pub enum Error {
    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    ConnectionUnavailable(String),
    /// The path does not name one of the registered logical files.
    #[error("unknown logical file: {0}")]
    UnknownLogicalFile(String),
    /// A write to a logical file did not reach the store.
    #[error("failed to write {path}: {reason}")]
    WriteFailed { path: String, reason: String },
    /// A compare-and-swap write found a different revision than expected.
    #[error("revision conflict: expected {expected}, found {current}")]
    Conflict { expected: u64, current: u64 },
    /// The operator declined to overwrite existing collections.
    #[error("migration cancelled")]
    MigrationCancelled,
    /// An export bundle could not be imported.
    #[error("invalid bundle: {0}")]
    InvalidBundle(String),
    /// A request was rejected by validation.
    #[error("invalid request: {0}")]
    Invalid(String),
    /// The requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The caller may not perform this operation.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// The permanent boss account cannot be removed.
    #[error("cannot delete permanent boss account")]
    PermanentAdmin,
    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
    /// An I/O error occurred during persistence or network communication.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Error during JSON serialization or deserialization.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A specialized Result type for EMS Store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Key under which every logical file keeps its single document.
pub const SINGLETON_KEY: &str = "current";

/// Identity field some stores and dumps embed in a document body.
pub const IDENTITY_FIELD: &str = "_id";

/// A document as held by the store, with its replace counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub body: Value,
    pub revision: u64,
}

/// Defines read operations on a document store.
#[async_trait]
pub trait DocumentReader: Send + Sync {
    /// Fetches the document stored under `key`, if any.
    async fn find_one(&self, db: &str, collection: &str, key: &str) -> Result<Option<StoredDocument>>;
    /// Counts the documents in a collection.
    async fn count(&self, db: &str, collection: &str) -> Result<usize>;
}

/// Defines write operations on a document store.
#[async_trait]
pub trait DocumentWriter: Send + Sync {
    /// Creates or fully overwrites the document under `key` and returns its new revision.
    ///
    /// With `expected_revision` set, the write only happens if the stored revision
    /// matches; `Some(0)` means the document must not exist yet.
    async fn replace_one(
        &self,
        db: &str,
        collection: &str,
        key: &str,
        body: Value,
        expected_revision: Option<u64>,
    ) -> Result<u64>;
    /// Removes every document in a collection and returns how many were removed.
    async fn delete_many(&self, db: &str, collection: &str) -> Result<usize>;
}

/// Connection health and collection management.
#[async_trait]
pub trait CollectionAdmin: Send + Sync {
    /// Succeeds when the store answers.
    async fn ping(&self) -> Result<()>;
    /// Creates an empty collection. Returns `false` if it already existed.
    async fn create_collection(&self, db: &str, collection: &str) -> Result<bool>;
    /// Lists the collections of a database.
    async fn list_collections(&self, db: &str) -> Result<Vec<String>>;
    /// Waits until every accepted write is durable. Stores that write through need not override it.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// The backing store handle shared by the whole process.
pub trait DocumentStore: DocumentReader + DocumentWriter + CollectionAdmin {}

impl<T: DocumentReader + DocumentWriter + CollectionAdmin> DocumentStore for T {}

/// A logical file body together with the revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub document: Value,
    /// `0` when the logical file has never been written.
    pub revision: u64,
}

/// The read/write capability application code uses for logical files.
#[async_trait]
pub trait LogicalFileStore: Send + Sync {
    /// Returns the canonical document, or its empty default when nothing is stored
    /// or the store is unreachable.
    async fn read(&self, path: &str) -> Result<Value>;
    /// Normalizes and stores a document, overwriting whatever was there.
    async fn write(&self, path: &str, document: &Value) -> Result<()>;
    /// Strict read that also reports the current revision.
    async fn read_versioned(&self, path: &str) -> Result<Versioned>;
    /// Writes only if the stored revision still equals `expected`.
    async fn write_versioned(&self, path: &str, document: &Value, expected: u64) -> Result<u64>;
}
