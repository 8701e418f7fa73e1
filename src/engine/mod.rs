//! The embedded document store, its on-disk snapshots and the export vault.
pub mod memstore;
pub mod persistence;
pub mod vault;

pub use memstore::MemStore;
pub use persistence::Persistence;
pub use vault::Vault;
