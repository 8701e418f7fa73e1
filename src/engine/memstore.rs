use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::Persistence;
use crate::{CollectionAdmin, DocumentReader, DocumentWriter, Error, Result, StoredDocument};

/// Documents of one collection, keyed by document key.
pub type CollectionData = HashMap<String, StoredDocument>;
/// Collections of one database.
pub type DatabaseData = HashMap<String, CollectionData>;
/// Every database held by the store.
pub type StoreData = HashMap<String, DatabaseData>;

/// In-process document store.
///
/// Every mutation of a database schedules a snapshot of that database on a
/// blocking task when a [`Persistence`] is attached. Once a snapshot fails to
/// reach disk the store stops accepting mutations and [`CollectionAdmin::flush`]
/// reports the failure.
pub struct MemStore {
    data: RwLock<StoreData>,
    persistence: Option<Arc<Persistence>>,
    pending_tasks: Arc<AtomicUsize>,
    sequence: AtomicU64,
    persist_failure: Arc<Mutex<Option<String>>>,
}

impl MemStore {
    pub fn new(initial_data: StoreData, persistence: Option<Arc<Persistence>>) -> Self {
        Self {
            data: RwLock::new(initial_data),
            persistence,
            pending_tasks: Arc::new(AtomicUsize::new(0)),
            sequence: AtomicU64::new(0),
            persist_failure: Arc::new(Mutex::new(None)),
        }
    }

    /// Waits until every scheduled snapshot has been written.
    pub async fn wait(&self) {
        while self.pending_tasks.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    /// Names of all databases currently held.
    pub fn databases(&self) -> Result<Vec<String>> {
        Ok(self.read_data()?.keys().cloned().collect())
    }

    fn read_data(&self) -> Result<RwLockReadGuard<'_, StoreData>> {
        self.data
            .read()
            .map_err(|_| Error::Internal("store lock poisoned".to_string()))
    }

    fn write_data(&self) -> Result<RwLockWriteGuard<'_, StoreData>> {
        self.data
            .write()
            .map_err(|_| Error::Internal("store lock poisoned".to_string()))
    }

    /// Fails if an earlier snapshot could not be written.
    fn ensure_persisting(&self) -> Result<()> {
        let failure = self
            .persist_failure
            .lock()
            .map_err(|_| Error::Internal("store lock poisoned".to_string()))?;
        match failure.as_ref() {
            Some(reason) => Err(Error::Internal(format!("persistence failed: {}", reason))),
            None => Ok(()),
        }
    }

    fn persist(&self, db: String) -> Result<()> {
        let Some(p) = &self.persistence else {
            return Ok(());
        };
        let (snapshot, seq) = {
            let data = self.read_data()?;
            // Sequence is taken under the read lock so snapshots order like the data they copy.
            let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            match data.get(&db) {
                Some(d) => (d.clone(), seq),
                None => return Ok(()),
            }
        };
        let p = p.clone();
        let pending = self.pending_tasks.clone();
        let failure = self.persist_failure.clone();
        pending.fetch_add(1, Ordering::SeqCst);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = p.save_database(&db, seq, &snapshot) {
                log::error!("Failed to persist database {}: {}", db, e);
                if let Ok(mut slot) = failure.lock() {
                    slot.get_or_insert_with(|| format!("database {}: {}", db, e));
                }
            }
            pending.fetch_sub(1, Ordering::SeqCst);
        });
        Ok(())
    }
}

#[async_trait]
impl DocumentReader for MemStore {
    async fn find_one(&self, db: &str, collection: &str, key: &str) -> Result<Option<StoredDocument>> {
        let data = self.read_data()?;
        Ok(data
            .get(db)
            .and_then(|d| d.get(collection))
            .and_then(|c| c.get(key))
            .cloned())
    }

    async fn count(&self, db: &str, collection: &str) -> Result<usize> {
        let data = self.read_data()?;
        Ok(data
            .get(db)
            .and_then(|d| d.get(collection))
            .map(|c| c.len())
            .unwrap_or(0))
    }
}

#[async_trait]
impl DocumentWriter for MemStore {
    async fn replace_one(
        &self,
        db: &str,
        collection: &str,
        key: &str,
        body: Value,
        expected_revision: Option<u64>,
    ) -> Result<u64> {
        self.ensure_persisting()?;
        let revision = {
            let mut data = self.write_data()?;
            let docs = data
                .entry(db.to_string())
                .or_default()
                .entry(collection.to_string())
                .or_default();
            let current = docs.get(key).map(|d| d.revision).unwrap_or(0);
            if let Some(expected) = expected_revision {
                if expected != current {
                    return Err(Error::Conflict { expected, current });
                }
            }
            let revision = current + 1;
            docs.insert(key.to_string(), StoredDocument { body, revision });
            revision
        };
        self.persist(db.to_string())?;
        Ok(revision)
    }

    async fn delete_many(&self, db: &str, collection: &str) -> Result<usize> {
        self.ensure_persisting()?;
        let removed = {
            let mut data = self.write_data()?;
            match data.get_mut(db).and_then(|d| d.get_mut(collection)) {
                Some(docs) => {
                    let n = docs.len();
                    docs.clear();
                    n
                }
                None => 0,
            }
        };
        if removed > 0 {
            self.persist(db.to_string())?;
        }
        Ok(removed)
    }
}

#[async_trait]
impl CollectionAdmin for MemStore {
    async fn ping(&self) -> Result<()> {
        self.read_data().map(|_| ())
    }

    async fn create_collection(&self, db: &str, collection: &str) -> Result<bool> {
        self.ensure_persisting()?;
        let created = {
            let mut data = self.write_data()?;
            let database = data.entry(db.to_string()).or_default();
            if database.contains_key(collection) {
                false
            } else {
                database.insert(collection.to_string(), CollectionData::new());
                true
            }
        };
        if created {
            self.persist(db.to_string())?;
        }
        Ok(created)
    }

    async fn list_collections(&self, db: &str) -> Result<Vec<String>> {
        let data = self.read_data()?;
        let mut names: Vec<String> = data
            .get(db)
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }

    async fn flush(&self) -> Result<()> {
        self.wait().await;
        self.ensure_persisting()
    }
}
