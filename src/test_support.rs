//! Store doubles shared by the unit tests.
use async_trait::async_trait;
use serde_json::Value;

use crate::engine::MemStore;
use crate::{CollectionAdmin, DocumentReader, DocumentWriter, Error, Result, StoredDocument};

/// A store whose every call fails, standing in for an unreachable daemon.
pub struct DownStore;

fn down<T>() -> Result<T> {
    Err(Error::ConnectionUnavailable("down".to_string()))
}

#[async_trait]
impl DocumentReader for DownStore {
    async fn find_one(&self, _: &str, _: &str, _: &str) -> Result<Option<StoredDocument>> {
        down()
    }
    async fn count(&self, _: &str, _: &str) -> Result<usize> {
        down()
    }
}

#[async_trait]
impl DocumentWriter for DownStore {
    async fn replace_one(&self, _: &str, _: &str, _: &str, _: Value, _: Option<u64>) -> Result<u64> {
        down()
    }
    async fn delete_many(&self, _: &str, _: &str) -> Result<usize> {
        down()
    }
}

#[async_trait]
impl CollectionAdmin for DownStore {
    async fn ping(&self) -> Result<()> {
        down()
    }
    async fn create_collection(&self, _: &str, _: &str) -> Result<bool> {
        down()
    }
    async fn list_collections(&self, _: &str) -> Result<Vec<String>> {
        down()
    }
}

/// Delegates to a [`MemStore`] but refuses every `replace_one`.
pub struct RejectingReplace(pub MemStore);

#[async_trait]
impl DocumentReader for RejectingReplace {
    async fn find_one(&self, db: &str, collection: &str, key: &str) -> Result<Option<StoredDocument>> {
        self.0.find_one(db, collection, key).await
    }
    async fn count(&self, db: &str, collection: &str) -> Result<usize> {
        self.0.count(db, collection).await
    }
}

#[async_trait]
impl DocumentWriter for RejectingReplace {
    async fn replace_one(&self, _: &str, _: &str, _: &str, _: Value, _: Option<u64>) -> Result<u64> {
        Err(Error::Internal("replace rejected".to_string()))
    }
    async fn delete_many(&self, db: &str, collection: &str) -> Result<usize> {
        self.0.delete_many(db, collection).await
    }
}

#[async_trait]
impl CollectionAdmin for RejectingReplace {
    async fn ping(&self) -> Result<()> {
        self.0.ping().await
    }
    async fn create_collection(&self, db: &str, collection: &str) -> Result<bool> {
        self.0.create_collection(db, collection).await
    }
    async fn list_collections(&self, db: &str) -> Result<Vec<String>> {
        self.0.list_collections(db).await
    }
}
