use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::warn;

use crate::engine::memstore::{DatabaseData, StoreData};
use crate::{Error, Result};

#[allow(unused_imports)]
use crate::engine::MemStore;

/// Handles disk I/O for the [`MemStore`].
///
/// Persistence uses an atomic "write-then-rename" strategy to ensure data integrity.
/// Each database is stored in its own `.json` file.
pub struct Persistence {
    data_dir: PathBuf,
    written: Mutex<HashMap<String, u64>>,
}

impl Persistence {
    /// Initializes a new `Persistence` handler in the specified directory.
    ///
    /// If the directory does not exist, it will be created.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(Self {
            data_dir: dir,
            written: Mutex::new(HashMap::new()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Writes a single database snapshot to a JSON file atomically.
    ///
    /// Snapshots are taken on concurrent tasks, so `seq` orders them: a snapshot
    /// older than the last one written for the same database is dropped.
    pub fn save_database(&self, db: &str, seq: u64, data: &DatabaseData) -> Result<()> {
        let mut written = self
            .written
            .lock()
            .map_err(|_| Error::Internal("persistence lock poisoned".to_string()))?;
        if written.get(db).is_some_and(|&last| last >= seq) {
            return Ok(());
        }

        let file_path = self.data_dir.join(format!("{}.json", db));
        let temp_path = file_path.with_extension("json.tmp");

        let bytes = serde_json::to_vec_pretty(data)?;

        fs::write(&temp_path, bytes)?;
        fs::rename(&temp_path, &file_path)?;

        written.insert(db.to_string(), seq);
        Ok(())
    }

    /// Loads every database found in the data directory.
    ///
    /// Files that cannot be read or parsed are skipped with a warning.
    pub fn load_all(&self) -> Result<StoreData> {
        let mut all_data = HashMap::new();

        if !self.data_dir.exists() {
            return Ok(all_data);
        }

        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                let db = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .ok_or_else(|| Error::Internal("Invalid filename".to_string()))?
                    .to_string();

                let content = match fs::read(&path) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("Could not read database file {:?}: {}", path, e);
                        continue;
                    }
                };

                let db_data: DatabaseData = match serde_json::from_slice(&content) {
                    Ok(d) => d,
                    Err(e) => {
                        warn!("Could not unmarshal database from {:?}: {}", path, e);
                        continue;
                    }
                };

                all_data.insert(db, db_data);
            }
        }

        Ok(all_data)
    }
}
