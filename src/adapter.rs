//! Read/write façade that maps logical files onto singleton store documents.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde_json::Value;

use crate::normalize::{empty_default, normalize};
use crate::registry::{self, LogicalFile};
use crate::{
    DocumentStore, Error, LogicalFileStore, Result, StoredDocument, Versioned, IDENTITY_FIELD,
    SINGLETON_KEY,
};

/// Attempts made by [`modify`] before giving up on a contended document.
pub const MODIFY_ATTEMPTS: usize = 5;

/// [`LogicalFileStore`] backed by a [`DocumentStore`].
///
/// Reads are fail-soft: a store failure logs and yields the empty default.
/// Writes are not: a failure comes back as [`Error::WriteFailed`].
pub struct StorageAdapter {
    store: Arc<dyn DocumentStore>,
    database: String,
}

impl StorageAdapter {
    pub fn new(store: Arc<dyn DocumentStore>, database: impl Into<String>) -> Self {
        Self {
            store,
            database: database.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Creates the collection of every logical file. Safe to call repeatedly.
    pub async fn initialize(&self) -> Result<()> {
        for file in LogicalFile::ALL {
            if self.store.create_collection(&self.database, file.collection()).await? {
                info!("Created collection: {}", file.collection());
            } else {
                debug!("Collection already exists: {}", file.collection());
            }
        }
        Ok(())
    }

    /// Fetches the stored singleton, propagating store errors.
    pub async fn fetch(&self, file: LogicalFile) -> Result<Option<StoredDocument>> {
        self.store
            .find_one(&self.database, file.collection(), SINGLETON_KEY)
            .await
    }

    /// Whether the logical file has a stored document. `false` when the store is unreachable.
    pub async fn exists(&self, path: &str) -> Result<bool> {
        let file = registry::resolve(path)?;
        match self.store.count(&self.database, file.collection()).await {
            Ok(n) => Ok(n > 0),
            Err(e) => {
                warn!("Could not check {}: {}", file, e);
                Ok(false)
            }
        }
    }

    /// Typed variant of [`LogicalFileStore::write`] for callers that already resolved the file.
    pub async fn put(&self, file: LogicalFile, document: &Value) -> Result<u64> {
        let normalized = normalize(file, document);
        self.store
            .replace_one(&self.database, file.collection(), SINGLETON_KEY, normalized, None)
            .await
            .map_err(|e| Error::WriteFailed {
                path: file.path().to_string(),
                reason: e.to_string(),
            })
    }
}

fn canonical(file: LogicalFile, stored: Option<StoredDocument>) -> (Value, u64) {
    match stored {
        Some(StoredDocument { mut body, revision }) => {
            if let Value::Object(map) = &mut body {
                map.remove(IDENTITY_FIELD);
            }
            (normalize(file, &body), revision)
        }
        None => (empty_default(file), 0),
    }
}

#[async_trait]
impl LogicalFileStore for StorageAdapter {
    async fn read(&self, path: &str) -> Result<Value> {
        let file = registry::resolve(path)?;
        match self.fetch(file).await {
            Ok(stored) => Ok(canonical(file, stored).0),
            Err(e) => {
                error!("Error reading {} from collection {}: {}", file, file.collection(), e);
                Ok(empty_default(file))
            }
        }
    }

    async fn write(&self, path: &str, document: &Value) -> Result<()> {
        let file = registry::resolve(path)?;
        let revision = self.put(file, document).await?;
        debug!("Wrote {} (revision {})", file, revision);
        Ok(())
    }

    async fn read_versioned(&self, path: &str) -> Result<Versioned> {
        let file = registry::resolve(path)?;
        let (document, revision) = canonical(file, self.fetch(file).await?);
        Ok(Versioned { document, revision })
    }

    async fn write_versioned(&self, path: &str, document: &Value, expected: u64) -> Result<u64> {
        let file = registry::resolve(path)?;
        let normalized = normalize(file, document);
        self.store
            .replace_one(
                &self.database,
                file.collection(),
                SINGLETON_KEY,
                normalized,
                Some(expected),
            )
            .await
            .map_err(|e| match e {
                conflict @ Error::Conflict { .. } => conflict,
                other => Error::WriteFailed {
                    path: file.path().to_string(),
                    reason: other.to_string(),
                },
            })
    }
}

/// Read-modify-write of one logical file with optimistic retries.
///
/// `f` receives the current document and may mutate it; the result is written
/// only if nobody else wrote in between. On a conflict the document is re-read
/// and `f` runs again, so it must not have side effects outside the document.
/// An `Err` from `f` aborts without writing.
pub async fn modify<S, T, F>(store: &S, path: &str, mut f: F) -> Result<T>
where
    S: LogicalFileStore + ?Sized,
    F: FnMut(&mut Value) -> Result<T> + Send,
    T: Send,
{
    let mut last_conflict = None;
    for attempt in 0..MODIFY_ATTEMPTS {
        let Versioned { mut document, revision } = store.read_versioned(path).await?;
        let out = f(&mut document)?;
        match store.write_versioned(path, &document, revision).await {
            Ok(_) => return Ok(out),
            Err(e @ Error::Conflict { .. }) => {
                debug!("Conflict on {} (attempt {}): {}", path, attempt + 1, e);
                last_conflict = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_conflict.unwrap_or_else(|| Error::Internal(format!("no attempt made on {}", path))))
}
