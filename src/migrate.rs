//! Full reload of the legacy flat files into the store.
//!
//! Unlike [`crate::bootstrap`], this overwrites collections that already hold
//! data, so it requires explicit confirmation when anything would be replaced.

use std::fmt;
use std::path::PathBuf;

use log::{info, warn};

use crate::adapter::StorageAdapter;
use crate::bootstrap::{read_legacy, LegacyFile};
use crate::normalize::{normalize, record_count};
use crate::registry::LogicalFile;
use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub total_files: usize,
    pub migrated: Vec<LogicalFile>,
    pub skipped: Vec<LogicalFile>,
    pub records: usize,
    pub errors: Vec<String>,
}

impl MigrationReport {
    /// At least one file made it into the store.
    pub fn is_success(&self) -> bool {
        !self.migrated.is_empty()
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total files processed: {}", self.total_files)?;
        writeln!(f, "Successfully migrated: {}", self.migrated.len())?;
        writeln!(f, "Skipped files: {}", self.skipped.len())?;
        write!(f, "Total records migrated: {}", self.records)?;
        if !self.errors.is_empty() {
            write!(f, "\nErrors ({}):", self.errors.len())?;
            for e in &self.errors {
                write!(f, "\n  - {}", e)?;
            }
        }
        Ok(())
    }
}

pub struct Migrator<'a> {
    adapter: &'a StorageAdapter,
    legacy_dir: PathBuf,
}

impl<'a> Migrator<'a> {
    pub fn new(adapter: &'a StorageAdapter, legacy_dir: impl Into<PathBuf>) -> Self {
        Self {
            adapter,
            legacy_dir: legacy_dir.into(),
        }
    }

    /// Logical files whose collection already holds data.
    pub async fn occupied(&self) -> Result<Vec<LogicalFile>> {
        let store = self.adapter.store();
        let mut out = Vec::new();
        for file in LogicalFile::ALL {
            if store.count(self.adapter.database(), file.collection()).await? > 0 {
                out.push(file);
            }
        }
        Ok(out)
    }

    /// Loads every legacy file in full.
    ///
    /// `confirm` is asked only when some collection already holds data; a
    /// `false` answer cancels before anything is written. Each loaded file
    /// replaces the stored document in full. Per-file problems are
    /// collected in the report and do not stop the remaining files.
    pub async fn run<F>(&self, confirm: F) -> Result<MigrationReport>
    where
        F: FnOnce(&[LogicalFile]) -> bool,
    {
        self.adapter.initialize().await?;

        let occupied = self.occupied().await?;
        for file in &occupied {
            warn!("Collection '{}' already contains data", file.collection());
        }
        if !occupied.is_empty() && !confirm(&occupied) {
            return Err(Error::MigrationCancelled);
        }

        let mut report = MigrationReport::default();
        for file in LogicalFile::ALL {
            report.total_files += 1;
            let path = self.legacy_dir.join(file.path());
            info!("Migrating {} -> {} ({})", file, file.collection(), file.description());

            let raw = match read_legacy(&path) {
                LegacyFile::Missing => {
                    info!("{} not found, skipped", path.display());
                    report.skipped.push(file);
                    continue;
                }
                LegacyFile::Broken(reason) => {
                    report.errors.push(reason);
                    continue;
                }
                LegacyFile::Parsed(raw) => raw,
            };

            // The singleton is replaced in place, so a failed load keeps the previous content.
            let doc = normalize(file, &raw);
            match self.adapter.put(file, &doc).await {
                Ok(_) => {
                    let records = record_count(&doc);
                    info!("Imported {} records into {}", records, file.collection());
                    report.records += records;
                    report.migrated.push(file);
                }
                Err(e) => report.errors.push(format!("Error migrating {}: {}", file, e)),
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemStore;
    use crate::test_support::RejectingReplace;
    use crate::{DocumentReader, DocumentWriter, LogicalFileStore, SINGLETON_KEY};
    use serde_json::json;
    use std::collections::HashMap;
    use std::fs;
    use std::sync::Arc;

    fn adapter() -> StorageAdapter {
        StorageAdapter::new(Arc::new(MemStore::new(HashMap::new(), None)), "test")
    }

    fn legacy_dir(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("data")).unwrap();
        for (p, c) in files {
            fs::write(dir.path().join(p), c).unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_migrates_into_empty_store_without_prompt() {
        let a = adapter();
        let dir = legacy_dir(&[
            ("data/users.json", r#"{"users": [{"id": 1}, {"id": 2}]}"#),
            ("data/message.json", r#"{"message": "hello"}"#),
        ]);
        let report = Migrator::new(&a, dir.path())
            .run(|_| panic!("no prompt expected"))
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.total_files, 5);
        assert_eq!(report.migrated, vec![LogicalFile::Users, LogicalFile::Message]);
        assert_eq!(report.skipped.len(), 3);
        assert_eq!(report.records, 3);
        assert_eq!(a.read("data/message.json").await.unwrap(), json!({"message": "hello"}));
    }

    #[tokio::test]
    async fn test_declined_confirmation_writes_nothing() {
        let a = adapter();
        a.write("data/message.json", &json!({"message": "keep"})).await.unwrap();
        let dir = legacy_dir(&[("data/message.json", r#"{"message": "replace"}"#)]);

        let mut asked = Vec::new();
        let res = Migrator::new(&a, dir.path())
            .run(|occ| {
                asked = occ.to_vec();
                false
            })
            .await;

        assert!(matches!(res, Err(Error::MigrationCancelled)));
        assert_eq!(asked, vec![LogicalFile::Message]);
        assert_eq!(a.read("data/message.json").await.unwrap(), json!({"message": "keep"}));
    }

    #[tokio::test]
    async fn test_confirmed_overwrite() {
        let a = adapter();
        a.write("data/message.json", &json!({"message": "old"})).await.unwrap();
        let dir = legacy_dir(&[("data/message.json", r#"{"message": "new"}"#)]);

        let report = Migrator::new(&a, dir.path()).run(|_| true).await.unwrap();
        assert_eq!(report.migrated, vec![LogicalFile::Message]);
        assert_eq!(a.read("data/message.json").await.unwrap(), json!({"message": "new"}));
        assert_eq!(a.store().count("test", "message").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_broken_file_reported_others_continue() {
        let a = adapter();
        let dir = legacy_dir(&[
            ("data/admins.json", "[oops"),
            ("data/admin_settings.json", r#"{"theme": "dark"}"#),
        ]);
        let report = Migrator::new(&a, dir.path()).run(|_| true).await.unwrap();

        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("admins.json"));
        assert_eq!(report.migrated, vec![LogicalFile::AdminSettings]);
        assert_eq!(a.read("data/admin_settings.json").await.unwrap(), json!({"theme": "dark"}));
    }

    #[tokio::test]
    async fn test_failed_load_keeps_previous_document() {
        let mem = MemStore::new(HashMap::new(), None);
        mem.replace_one("test", "message", SINGLETON_KEY, json!({"message": "old"}), None)
            .await
            .unwrap();
        let a = StorageAdapter::new(Arc::new(RejectingReplace(mem)), "test");
        let dir = legacy_dir(&[("data/message.json", r#"{"message": "new"}"#)]);

        let report = Migrator::new(&a, dir.path()).run(|_| true).await.unwrap();
        assert!(!report.is_success());
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("message.json"));

        let kept = a.store().find_one("test", "message", SINGLETON_KEY).await.unwrap().unwrap();
        assert_eq!(kept.body, json!({"message": "old"}));
    }

    #[tokio::test]
    async fn test_nothing_to_migrate_is_not_success() {
        let a = adapter();
        let dir = legacy_dir(&[]);
        let report = Migrator::new(&a, dir.path()).run(|_| true).await.unwrap();
        assert!(!report.is_success());
        assert_eq!(report.skipped.len(), 5);
        assert!(report.to_string().contains("Skipped files: 5"));
    }
}
