//! One-time import of legacy flat files, run before the application serves requests.
//!
//! Running it again is a no-op: files whose collection already holds a document
//! are left alone, and the admin invariant is only rewritten when it is broken.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde_json::{json, Value};

use crate::adapter::StorageAdapter;
use crate::config::FallbackAdmin;
use crate::normalize::{empty_default, normalize, record_count};
use crate::records::{next_id, MEMBER_ROLE};
use crate::registry::LogicalFile;
use crate::{Error, Result};

/// What happened to one logical file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    AlreadyPresent,
    Imported { records: usize },
    SeededEmpty,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub file: LogicalFile,
    pub outcome: FileOutcome,
}

/// How the permanent boss was secured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermanentBoss {
    Existing { id: i64 },
    Promoted { id: i64 },
    Created { id: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub files: Vec<FileReport>,
    /// Users moved into the admins file by this run.
    pub migrated_admins: usize,
    pub permanent: PermanentBoss,
}

impl BootstrapReport {
    pub fn outcome(&self, file: LogicalFile) -> Option<&FileOutcome> {
        self.files.iter().find(|r| r.file == file).map(|r| &r.outcome)
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileReport> {
        self.files
            .iter()
            .filter(|r| matches!(r.outcome, FileOutcome::Failed { .. }))
    }
}

impl fmt::Display for BootstrapReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in &self.files {
            match &r.outcome {
                FileOutcome::AlreadyPresent => writeln!(f, "{}: already present", r.file)?,
                FileOutcome::Imported { records } => {
                    writeln!(f, "{}: imported {} records", r.file, records)?
                }
                FileOutcome::SeededEmpty => writeln!(f, "{}: seeded empty", r.file)?,
                FileOutcome::Failed { reason } => writeln!(f, "{}: FAILED ({})", r.file, reason)?,
            }
        }
        if self.migrated_admins > 0 {
            writeln!(f, "moved {} admin accounts out of users", self.migrated_admins)?;
        }
        match self.permanent {
            PermanentBoss::Existing { id } => write!(f, "permanent boss: id {}", id),
            PermanentBoss::Promoted { id } => write!(f, "permanent boss: promoted id {}", id),
            PermanentBoss::Created { id } => write!(f, "permanent boss: created fallback id {}", id),
        }
    }
}

/// Result of looking for a legacy flat file.
pub(crate) enum LegacyFile {
    Missing,
    Parsed(Value),
    Broken(String),
}

pub(crate) fn read_legacy(path: &Path) -> LegacyFile {
    match fs::read(path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(v) => LegacyFile::Parsed(v),
            Err(e) => LegacyFile::Broken(format!("invalid JSON in {}: {}", path.display(), e)),
        },
        Err(e) if e.kind() == ErrorKind::NotFound => LegacyFile::Missing,
        Err(e) => LegacyFile::Broken(format!("cannot read {}: {}", path.display(), e)),
    }
}

pub struct Bootstrap<'a> {
    adapter: &'a StorageAdapter,
    legacy_dir: PathBuf,
    fallback: FallbackAdmin,
}

impl<'a> Bootstrap<'a> {
    pub fn new(adapter: &'a StorageAdapter, legacy_dir: impl Into<PathBuf>, fallback: FallbackAdmin) -> Self {
        Self {
            adapter,
            legacy_dir: legacy_dir.into(),
            fallback,
        }
    }

    /// Seeds every logical file and secures the permanent boss.
    ///
    /// Legacy files that cannot be parsed are reported and skipped; store
    /// failures abort the run.
    pub async fn run(&self) -> Result<BootstrapReport> {
        self.adapter.initialize().await?;

        let mut files = Vec::with_capacity(LogicalFile::ALL.len());
        for file in LogicalFile::ALL {
            let outcome = self.seed(file).await?;
            if let FileOutcome::Failed { reason } = &outcome {
                warn!("Bootstrap of {} failed: {}", file, reason);
            }
            files.push(FileReport { file, outcome });
        }

        // Users imported on this run may still hold admins, even when the admins
        // file was seeded by an earlier run that could not read users.json.
        let outcome_of = |file: LogicalFile| files.iter().find(|r| r.file == file).map(|r| &r.outcome);
        let admins_fresh = outcome_of(LogicalFile::Admins) == Some(&FileOutcome::SeededEmpty);
        let users_imported = matches!(outcome_of(LogicalFile::Users), Some(FileOutcome::Imported { .. }));
        let admins_imported = matches!(outcome_of(LogicalFile::Admins), Some(FileOutcome::Imported { .. }));
        let migrated_admins = if admins_fresh || (users_imported && !admins_imported) {
            self.partition_users().await?
        } else {
            0
        };
        let permanent = self.ensure_permanent_boss().await?;

        let report = BootstrapReport {
            files,
            migrated_admins,
            permanent,
        };
        info!("Bootstrap complete");
        Ok(report)
    }

    async fn seed(&self, file: LogicalFile) -> Result<FileOutcome> {
        if self.adapter.fetch(file).await?.is_some() {
            return Ok(FileOutcome::AlreadyPresent);
        }
        match read_legacy(&self.legacy_dir.join(file.path())) {
            LegacyFile::Parsed(raw) => {
                let doc = normalize(file, &raw);
                self.adapter.put(file, &doc).await?;
                let records = record_count(&doc);
                info!("Imported {} records into {}", records, file.collection());
                Ok(FileOutcome::Imported { records })
            }
            LegacyFile::Broken(reason) => Ok(FileOutcome::Failed { reason }),
            LegacyFile::Missing => {
                self.adapter.put(file, &empty_default(file)).await?;
                Ok(FileOutcome::SeededEmpty)
            }
        }
    }

    /// Moves every non-member record out of `users` into the admins list.
    ///
    /// Accounts whose username is already an admin are dropped from `users`
    /// without creating a second admin.
    async fn partition_users(&self) -> Result<usize> {
        let users_doc = self.current(LogicalFile::Users).await?;
        let users = users_doc
            .get("users")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let admins_doc = self.current(LogicalFile::Admins).await?;
        let mut admins = admins_doc
            .get("admins")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let total = users.len();
        let mut id = next_id(admins.iter().map(id_of));
        let mut moved = 0;
        let mut remaining = Vec::new();
        for user in users {
            if user.get("role").and_then(Value::as_str) == Some(MEMBER_ROLE) {
                remaining.push(user);
                continue;
            }
            let username = user.get("username").cloned().unwrap_or(Value::Null);
            if admins.iter().any(|a| a.get("username") == Some(&username)) {
                info!("{} is already an admin; dropping the copy in users", username);
                continue;
            }
            admins.push(json!({
                "id": id,
                "username": username,
                "password": user.get("password").cloned().unwrap_or(Value::Null),
                "role": admin_role_of(&user),
                "name": user.get("name").and_then(Value::as_str).unwrap_or("Admin"),
                "permanent": false,
            }));
            id += 1;
            moved += 1;
        }

        if remaining.len() == total {
            return Ok(0);
        }
        if moved > 0 {
            self.adapter
                .put(LogicalFile::Admins, &json!({ "admins": admins }))
                .await?;
        }
        self.adapter
            .put(LogicalFile::Users, &json!({ "users": remaining }))
            .await?;
        info!("Moved {} admin accounts from users to admins", moved);
        Ok(moved)
    }

    /// Guarantees exactly one permanent admin, and that it is a boss.
    async fn ensure_permanent_boss(&self) -> Result<PermanentBoss> {
        let doc = self.current(LogicalFile::Admins).await?;
        let mut admins = doc
            .get("admins")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let (outcome, changed) = secure_permanent_boss(&mut admins, Some(&self.fallback))
            .ok_or_else(|| Error::Internal("no permanent boss could be secured".to_string()))?;
        if changed {
            self.adapter
                .put(LogicalFile::Admins, &json!({ "admins": admins }))
                .await?;
        }
        Ok(outcome)
    }

    async fn current(&self, file: LogicalFile) -> Result<Value> {
        Ok(match self.adapter.fetch(file).await? {
            Some(stored) => normalize(file, &stored.body),
            None => empty_default(file),
        })
    }
}

/// Leaves exactly one permanent admin in `admins`, and makes it a boss.
///
/// Keeps an existing permanent boss, else promotes the lowest-id boss, else the
/// lowest-id admin, else appends `fallback`. Returns `None` when there is nobody
/// to promote and no fallback. The flag reports whether `admins` changed.
pub(crate) fn secure_permanent_boss(
    admins: &mut Vec<Value>,
    fallback: Option<&FallbackAdmin>,
) -> Option<(PermanentBoss, bool)> {
    let (outcome, mut changed) = match admins.iter().find(|a| is_permanent(a) && role(a) == Some("boss")) {
        Some(a) => (PermanentBoss::Existing { id: id_of(a) }, false),
        None => {
            let target = lowest_id(admins, |a| role(a) == Some("boss")).or_else(|| lowest_id(admins, |_| true));
            match (target, fallback) {
                (Some(idx), _) => {
                    let admin = &mut admins[idx];
                    admin["permanent"] = Value::Bool(true);
                    admin["role"] = Value::String("boss".to_string());
                    (PermanentBoss::Promoted { id: id_of(admin) }, true)
                }
                (None, Some(fallback)) => {
                    let id = next_id(admins.iter().map(id_of));
                    warn!(
                        "No admin accounts exist; created fallback boss '{}'. Change its password.",
                        fallback.username
                    );
                    admins.push(json!({
                        "id": id,
                        "username": fallback.username,
                        "password": fallback.password,
                        "role": "boss",
                        "name": "Administrator",
                        "permanent": true,
                    }));
                    (PermanentBoss::Created { id }, true)
                }
                (None, None) => return None,
            }
        }
    };

    let keeper = match outcome {
        PermanentBoss::Existing { id } | PermanentBoss::Promoted { id } | PermanentBoss::Created { id } => id,
    };
    let mut kept = false;
    for admin in admins.iter_mut() {
        if !is_permanent(admin) {
            continue;
        }
        if !kept && id_of(admin) == keeper && role(admin) == Some("boss") {
            kept = true;
        } else {
            admin["permanent"] = Value::Bool(false);
            changed = true;
        }
    }
    Some((outcome, changed))
}

fn admin_role_of(user: &Value) -> &'static str {
    match user.get("role").and_then(Value::as_str) {
        None => "boss",
        Some("boss") => "boss",
        Some("manager") => "manager",
        Some("moderator") => "moderator",
        Some(other) => {
            warn!("Unrecognized role '{}' migrated as moderator", other);
            "moderator"
        }
    }
}

fn id_of(admin: &Value) -> i64 {
    admin.get("id").and_then(Value::as_i64).unwrap_or(0)
}

fn role(admin: &Value) -> Option<&str> {
    admin.get("role").and_then(Value::as_str)
}

fn is_permanent(admin: &Value) -> bool {
    admin.get("permanent").and_then(Value::as_bool).unwrap_or(false)
}

fn lowest_id(admins: &[Value], pred: impl Fn(&Value) -> bool) -> Option<usize> {
    admins
        .iter()
        .enumerate()
        .filter(|(_, a)| a.is_object() && pred(*a))
        .min_by_key(|(_, a)| id_of(a))
        .map(|(i, _)| i)
}
