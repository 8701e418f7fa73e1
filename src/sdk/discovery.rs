use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{StoreConfig, StoreLocation};
use crate::engine::{MemStore, Persistence};
use crate::sdk::Client;
use crate::{DocumentStore, Error, Result};

/// Opens the backing store described by `config`.
///
/// 1. `tcp://host:port` connects to a daemon in **Remote Mode**; an unreachable
///    daemon yields [`Error::ConnectionUnavailable`] within the connect timeout.
/// 2. `file://dir` loads an embedded [`MemStore`] with [`Persistence`] in `dir`.
/// 3. `memory://` starts an empty embedded store that is never persisted.
///
/// The handle is meant to be created once and shared for the process lifetime.
///
/// # Examples
///
/// ```no_run
/// use ems_store::{config::StoreConfig, sdk};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let store = sdk::connect(&StoreConfig::from_env()).await?;
///     store.ping().await?;
///     Ok(())
/// }
/// ```
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>> {
    match config.location()? {
        StoreLocation::Remote(addr) => {
            let client = Client::connect(&addr).await.map_err(|e| match e {
                e @ Error::ConnectionUnavailable(_) => e,
                other => Error::ConnectionUnavailable(other.to_string()),
            })?;
            log::info!("Connected to store daemon at {} (database {})", addr, config.database);
            Ok(Arc::new(client))
        }
        StoreLocation::File(dir) => {
            let persistence = Arc::new(Persistence::new(&dir)?);
            let initial_data = persistence.load_all()?;
            log::info!(
                "Opened embedded store in {:?} (database {})",
                persistence.data_dir(),
                config.database
            );
            Ok(Arc::new(MemStore::new(initial_data, Some(persistence))))
        }
        StoreLocation::Memory => {
            log::debug!("Opened in-memory store");
            Ok(Arc::new(MemStore::new(HashMap::new(), None)))
        }
    }
}
