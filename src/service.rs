//! Application operations on members, time entries, the message and admins.
//!
//! Every mutation is a read-modify-write through [`modify`], so two requests
//! appending to the same logical file cannot drop each other's record.
//! Route-level gating (who may call what) stays with the caller; only rules
//! that depend on the data itself, like entry ownership, are enforced here.

use std::sync::Arc;

use log::{info, warn};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::adapter::modify;
use crate::bootstrap::{secure_permanent_boss, PermanentBoss};
use crate::engine::Vault;
use crate::records::{
    list, next_id, store_list, AdminAccount, AdminRole, MemberAccount, TimeEntry, MEMBER_ROLE,
};
use crate::registry::{LogicalFile, Shape};
use crate::{Error, LogicalFileStore, Result};

/// Format version written into export bundles.
pub const BUNDLE_VERSION: &str = "1.0";

const ENCRYPTED_FLAG: &str = "password_encrypted";

fn field(file: LogicalFile) -> &'static str {
    match file.shape() {
        Shape::List { field } | Shape::Text { field } => field,
        Shape::Mapping => "",
    }
}

/// The authenticated caller of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Admin {
        id: i64,
        username: String,
        name: String,
        role: AdminRole,
    },
    Member {
        id: i64,
        username: String,
        name: String,
    },
}

impl Principal {
    pub fn id(&self) -> i64 {
        match self {
            Self::Admin { id, .. } | Self::Member { id, .. } => *id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Admin { name, .. } | Self::Member { name, .. } => name,
        }
    }

    pub fn is_member(&self) -> bool {
        matches!(self, Self::Member { .. })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewMember {
    pub username: String,
    pub password: String,
    pub name: String,
    pub postname: String,
    pub callsign: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MemberUpdate {
    pub username: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub postname: Option<String>,
    pub callsign: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewEntry {
    pub date: String,
    pub time_in: String,
    pub time_out: String,
    pub total_hours: Value,
    pub out_of_service: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EntryUpdate {
    pub date: Option<String>,
    pub time_in: Option<String>,
    pub time_out: Option<String>,
    pub total_hours: Option<Value>,
    pub out_of_service: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewAdmin {
    pub username: String,
    pub password: String,
    pub role: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdminUpdate {
    pub username: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
    pub password: Option<String>,
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn parse_role(role: &str) -> Result<AdminRole> {
    AdminRole::parse(role).ok_or_else(|| Error::Invalid(format!("unknown admin role: {}", role)))
}

fn require_passwords(current: &str, new: &str) -> Result<()> {
    if current.is_empty() || new.is_empty() {
        return Err(Error::Invalid("current and new password required".to_string()));
    }
    Ok(())
}

pub struct Service {
    store: Arc<dyn LogicalFileStore>,
}

impl Service {
    pub fn new(store: Arc<dyn LogicalFileStore>) -> Self {
        Self { store }
    }

    async fn read_list<T: serde::de::DeserializeOwned>(&self, file: LogicalFile) -> Result<Vec<T>> {
        let doc = self.store.read(file.path()).await?;
        list(&doc, field(file))
    }

    // Members

    /// Accounts with the member role.
    pub async fn list_members(&self) -> Result<Vec<MemberAccount>> {
        let users: Vec<MemberAccount> = self.read_list(LogicalFile::Users).await?;
        Ok(users.into_iter().filter(MemberAccount::is_member).collect())
    }

    pub async fn add_member(&self, new: NewMember) -> Result<MemberAccount> {
        if new.username.is_empty() || new.password.is_empty() || new.name.is_empty() {
            return Err(Error::Invalid("username, password, and name are required".to_string()));
        }
        let file = LogicalFile::Users;
        let member = modify(self.store.as_ref(), file.path(), |doc| {
            let mut users: Vec<MemberAccount> = list(doc, field(file))?;
            if users.iter().any(|u| u.username == new.username) {
                return Err(Error::Invalid(format!("username already exists: {}", new.username)));
            }
            let member = MemberAccount {
                id: next_id(users.iter().map(|u| u.id)),
                username: new.username.clone(),
                password: new.password.clone(),
                name: new.name.clone(),
                postname: new.postname.clone(),
                callsign: new.callsign.clone(),
                role: MEMBER_ROLE.to_string(),
                extra: Map::new(),
            };
            users.push(member.clone());
            store_list(doc, field(file), &users)?;
            Ok(member)
        })
        .await?;
        info!("Added member {} (id {})", member.username, member.id);
        Ok(member)
    }

    pub async fn update_member(&self, id: i64, update: MemberUpdate) -> Result<MemberAccount> {
        let file = LogicalFile::Users;
        modify(self.store.as_ref(), file.path(), |doc| {
            let mut users: Vec<MemberAccount> = list(doc, field(file))?;
            if let Some(username) = &update.username {
                if users.iter().any(|u| u.id != id && &u.username == username) {
                    return Err(Error::Invalid(format!("username already exists: {}", username)));
                }
            }
            let user = users
                .iter_mut()
                .find(|u| u.id == id)
                .ok_or_else(|| Error::NotFound(format!("member {}", id)))?;
            if let Some(v) = &update.username {
                user.username = v.clone();
            }
            if let Some(v) = &update.password {
                user.password = v.clone();
            }
            if let Some(v) = &update.name {
                user.name = v.clone();
            }
            if let Some(v) = &update.postname {
                user.postname = v.clone();
            }
            if let Some(v) = &update.callsign {
                user.callsign = v.clone();
            }
            let updated = user.clone();
            store_list(doc, field(file), &users)?;
            Ok(updated)
        })
        .await
    }

    pub async fn delete_member(&self, id: i64) -> Result<()> {
        let file = LogicalFile::Users;
        modify(self.store.as_ref(), file.path(), |doc| {
            let mut users: Vec<MemberAccount> = list(doc, field(file))?;
            let before = users.len();
            users.retain(|u| u.id != id);
            if users.len() == before {
                return Err(Error::NotFound(format!("member {}", id)));
            }
            store_list(doc, field(file), &users)
        })
        .await?;
        info!("Deleted member {}", id);
        Ok(())
    }

    pub async fn change_member_password(&self, id: i64, current: &str, new: &str) -> Result<()> {
        require_passwords(current, new)?;
        let file = LogicalFile::Users;
        modify(self.store.as_ref(), file.path(), |doc| {
            let mut users: Vec<MemberAccount> = list(doc, field(file))?;
            let user = users
                .iter_mut()
                .find(|u| u.id == id)
                .ok_or_else(|| Error::NotFound(format!("member {}", id)))?;
            if user.password != current {
                return Err(Error::Forbidden("current password incorrect".to_string()));
            }
            user.password = new.to_string();
            store_list(doc, field(file), &users)
        })
        .await
    }

    // Time entries

    /// All entries, or only those of `member_id`.
    pub async fn list_entries(&self, member_id: Option<i64>) -> Result<Vec<TimeEntry>> {
        let entries: Vec<TimeEntry> = self.read_list(LogicalFile::TimeEntries).await?;
        Ok(match member_id {
            Some(id) => entries.into_iter().filter(|e| e.member_id == id).collect(),
            None => entries,
        })
    }

    /// Records a shift for `actor`, snapshotting their display name.
    pub async fn add_entry(&self, actor: &Principal, new: NewEntry) -> Result<TimeEntry> {
        if new.date.is_empty() || new.time_in.is_empty() || new.time_out.is_empty() || is_blank(&new.total_hours) {
            return Err(Error::Invalid(
                "date, time_in, time_out, total_hours are required".to_string(),
            ));
        }
        let file = LogicalFile::TimeEntries;
        modify(self.store.as_ref(), file.path(), |doc| {
            let mut entries: Vec<TimeEntry> = list(doc, field(file))?;
            let entry = TimeEntry {
                id: next_id(entries.iter().map(|e| e.id)),
                member_id: actor.id(),
                member_name: actor.name().to_string(),
                date: new.date.clone(),
                time_in: new.time_in.clone(),
                time_out: new.time_out.clone(),
                total_hours: new.total_hours.clone(),
                out_of_service: new.out_of_service.clone().unwrap_or_else(|| "00:00".to_string()),
                extra: Map::new(),
            };
            entries.push(entry.clone());
            store_list(doc, field(file), &entries)?;
            Ok(entry)
        })
        .await
    }

    /// Members may only change their own entries; admins may change any.
    pub async fn update_entry(&self, actor: &Principal, id: i64, update: EntryUpdate) -> Result<TimeEntry> {
        let file = LogicalFile::TimeEntries;
        modify(self.store.as_ref(), file.path(), |doc| {
            let mut entries: Vec<TimeEntry> = list(doc, field(file))?;
            let entry = entries
                .iter_mut()
                .find(|e| e.id == id)
                .ok_or_else(|| Error::NotFound(format!("entry {}", id)))?;
            if actor.is_member() && entry.member_id != actor.id() {
                return Err(Error::Forbidden(format!("entry {} belongs to another member", id)));
            }
            if let Some(v) = &update.date {
                entry.date = v.clone();
            }
            if let Some(v) = &update.time_in {
                entry.time_in = v.clone();
            }
            if let Some(v) = &update.time_out {
                entry.time_out = v.clone();
            }
            if let Some(v) = &update.total_hours {
                entry.total_hours = v.clone();
            }
            if let Some(v) = &update.out_of_service {
                entry.out_of_service = v.clone();
            }
            let updated = entry.clone();
            store_list(doc, field(file), &entries)?;
            Ok(updated)
        })
        .await
    }

    pub async fn delete_entry(&self, actor: &Principal, id: i64) -> Result<()> {
        let file = LogicalFile::TimeEntries;
        modify(self.store.as_ref(), file.path(), |doc| {
            let mut entries: Vec<TimeEntry> = list(doc, field(file))?;
            let entry = entries
                .iter()
                .find(|e| e.id == id)
                .ok_or_else(|| Error::NotFound(format!("entry {}", id)))?;
            if actor.is_member() && entry.member_id != actor.id() {
                return Err(Error::Forbidden(format!("entry {} belongs to another member", id)));
            }
            entries.retain(|e| e.id != id);
            store_list(doc, field(file), &entries)
        })
        .await
    }

    /// Removes every entry of one member and returns how many were removed.
    pub async fn reset_member_entries(&self, member_id: i64) -> Result<usize> {
        let file = LogicalFile::TimeEntries;
        let removed = modify(self.store.as_ref(), file.path(), |doc| {
            let mut entries: Vec<TimeEntry> = list(doc, field(file))?;
            let before = entries.len();
            entries.retain(|e| e.member_id != member_id);
            store_list(doc, field(file), &entries)?;
            Ok(before - entries.len())
        })
        .await?;
        info!("Reset {} entries of member {}", removed, member_id);
        Ok(removed)
    }

    pub async fn reset_all_entries(&self) -> Result<()> {
        let file = LogicalFile::TimeEntries;
        self.store.write(file.path(), &json!({ field(file): [] })).await?;
        info!("Reset all time entries");
        Ok(())
    }

    // Message

    pub async fn get_message(&self) -> Result<String> {
        let file = LogicalFile::Message;
        let doc = self.store.read(file.path()).await?;
        Ok(doc.get(field(file)).and_then(Value::as_str).unwrap_or_default().to_string())
    }

    pub async fn set_message(&self, text: &str) -> Result<()> {
        let file = LogicalFile::Message;
        self.store.write(file.path(), &json!({ field(file): text })).await
    }

    // Admins

    pub async fn list_admins(&self) -> Result<Vec<AdminAccount>> {
        self.read_list(LogicalFile::Admins).await
    }

    /// Adds an admin; the role defaults to manager and the name to the username.
    pub async fn add_admin(&self, new: NewAdmin) -> Result<AdminAccount> {
        if new.username.is_empty() || new.password.is_empty() {
            return Err(Error::Invalid("username and password are required".to_string()));
        }
        let role = match &new.role {
            Some(r) => parse_role(r)?,
            None => AdminRole::Manager,
        };
        let file = LogicalFile::Admins;
        let admin = modify(self.store.as_ref(), file.path(), |doc| {
            let mut admins: Vec<AdminAccount> = list(doc, field(file))?;
            if admins.iter().any(|a| a.username == new.username) {
                return Err(Error::Invalid(format!("username already exists: {}", new.username)));
            }
            let admin = AdminAccount {
                id: next_id(admins.iter().map(|a| a.id)),
                username: new.username.clone(),
                password: new.password.clone(),
                role,
                name: new.name.clone().unwrap_or_else(|| new.username.clone()),
                permanent: false,
                extra: Map::new(),
            };
            admins.push(admin.clone());
            store_list(doc, field(file), &admins)?;
            Ok(admin)
        })
        .await?;
        info!("Added admin {} as {}", admin.username, admin.role);
        Ok(admin)
    }

    /// The permanent boss keeps the boss role whatever `update.role` says.
    pub async fn update_admin(&self, id: i64, update: AdminUpdate) -> Result<AdminAccount> {
        let role = update.role.as_deref().map(parse_role).transpose()?;
        let file = LogicalFile::Admins;
        modify(self.store.as_ref(), file.path(), |doc| {
            let mut admins: Vec<AdminAccount> = list(doc, field(file))?;
            if let Some(username) = &update.username {
                if admins.iter().any(|a| a.id != id && &a.username == username) {
                    return Err(Error::Invalid(format!("username already exists: {}", username)));
                }
            }
            let admin = admins
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or_else(|| Error::NotFound(format!("admin {}", id)))?;
            if let Some(v) = &update.username {
                admin.username = v.clone();
            }
            if let Some(v) = &update.name {
                admin.name = v.clone();
            }
            match role {
                Some(r) if admin.permanent && r != AdminRole::Boss => {
                    warn!("Refusing to demote permanent boss {} to {}", admin.username, r);
                }
                Some(r) => admin.role = r,
                None => {}
            }
            if let Some(v) = update.password.as_ref().filter(|p| !p.is_empty()) {
                admin.password = v.clone();
            }
            let updated = admin.clone();
            store_list(doc, field(file), &admins)?;
            Ok(updated)
        })
        .await
    }

    pub async fn delete_admin(&self, id: i64) -> Result<()> {
        let file = LogicalFile::Admins;
        modify(self.store.as_ref(), file.path(), |doc| {
            let mut admins: Vec<AdminAccount> = list(doc, field(file))?;
            match admins.iter().find(|a| a.id == id) {
                None => return Err(Error::NotFound(format!("admin {}", id))),
                Some(a) if a.permanent => return Err(Error::PermanentAdmin),
                Some(_) => {}
            }
            admins.retain(|a| a.id != id);
            store_list(doc, field(file), &admins)
        })
        .await?;
        info!("Deleted admin {}", id);
        Ok(())
    }

    pub async fn change_admin_password(&self, id: i64, current: &str, new: &str) -> Result<()> {
        require_passwords(current, new)?;
        let file = LogicalFile::Admins;
        modify(self.store.as_ref(), file.path(), |doc| {
            let mut admins: Vec<AdminAccount> = list(doc, field(file))?;
            let admin = admins
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or_else(|| Error::NotFound(format!("admin {}", id)))?;
            if admin.password != current {
                return Err(Error::Forbidden("current password incorrect".to_string()));
            }
            admin.password = new.to_string();
            store_list(doc, field(file), &admins)
        })
        .await
    }

    // Authentication

    /// Matches credentials against admins first, then members.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Option<Principal>> {
        let admins: Vec<AdminAccount> = self.read_list(LogicalFile::Admins).await?;
        if let Some(a) = admins
            .into_iter()
            .find(|a| a.username == username && a.password == password)
        {
            let name = if a.name.is_empty() { a.username.clone() } else { a.name };
            return Ok(Some(Principal::Admin {
                id: a.id,
                username: a.username,
                name,
                role: a.role,
            }));
        }

        let users: Vec<MemberAccount> = self.read_list(LogicalFile::Users).await?;
        Ok(users
            .into_iter()
            .find(|u| u.username == username && u.password == password)
            .map(|u| Principal::Member {
                id: u.id,
                username: u.username,
                name: u.name,
            }))
    }

    // Export / import

    /// Snapshot of all application data with admin passwords encrypted.
    pub async fn export_bundle(&self, vault: &Vault) -> Result<Value> {
        let users = self.store.read(LogicalFile::Users.path()).await?;
        let entries = self.store.read(LogicalFile::TimeEntries.path()).await?;
        let message = self.store.read(LogicalFile::Message.path()).await?;
        let admins_doc = self.store.read(LogicalFile::Admins.path()).await?;

        let admins_field = field(LogicalFile::Admins);
        let mut admins = admins_doc
            .get(admins_field)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for admin in admins.iter_mut() {
            let Value::Object(map) = admin else { continue };
            let password = map.get("password").and_then(Value::as_str).unwrap_or_default();
            let (stored, encrypted) = match vault.encrypt(password) {
                Ok(cipher) => (Value::String(cipher), true),
                Err(e) => {
                    warn!("Could not encrypt admin password, masking it: {}", e);
                    (json!("***"), false)
                }
            };
            map.insert("password".to_string(), stored);
            map.insert(ENCRYPTED_FLAG.to_string(), Value::Bool(encrypted));
        }

        Ok(json!({
            "users": users,
            "entries": entries,
            "message": message,
            "admins": { admins_field: admins },
            "export_date": chrono::Local::now().to_rfc3339(),
            "version": BUNDLE_VERSION,
        }))
    }

    /// Writes the files present in an export bundle and returns which ones.
    ///
    /// Imported admins always end up with exactly one permanent boss. A bundle
    /// whose admins list holds no account at all is rejected before anything is written.
    pub async fn import_bundle(&self, bundle: &Value, vault: &Vault) -> Result<Vec<LogicalFile>> {
        let Value::Object(parts) = bundle else {
            return Err(Error::InvalidBundle("expected a JSON object".to_string()));
        };
        let admins_field = field(LogicalFile::Admins);
        let admins = match parts.get("admins") {
            Some(payload) => Some(import_admins(payload, admins_field, vault)?),
            None => None,
        };

        let mut written = Vec::new();
        for (key, file) in [
            ("users", LogicalFile::Users),
            ("entries", LogicalFile::TimeEntries),
            ("message", LogicalFile::Message),
        ] {
            if let Some(doc @ Value::Object(_)) = parts.get(key) {
                self.store.write(file.path(), doc).await?;
                written.push(file);
            }
        }
        if let Some(admins) = admins {
            self.store
                .write(LogicalFile::Admins.path(), &json!({ admins_field: admins }))
                .await?;
            written.push(LogicalFile::Admins);
        }

        info!("Imported bundle: {:?}", written);
        Ok(written)
    }
}

/// Decrypts the admins of a bundle and secures their permanent boss.
fn import_admins(payload: &Value, admins_field: &str, vault: &Vault) -> Result<Vec<Value>> {
    let mut admins = match payload {
        Value::Object(m) => m.get(admins_field).and_then(Value::as_array).cloned().unwrap_or_default(),
        Value::Array(a) => a.clone(),
        _ => Vec::new(),
    };
    for admin in admins.iter_mut() {
        let Value::Object(map) = admin else { continue };
        let flagged = map.remove(ENCRYPTED_FLAG).and_then(|v| v.as_bool()).unwrap_or(false);
        if !flagged {
            continue;
        }
        let Some(cipher) = map.get("password").and_then(Value::as_str) else {
            continue;
        };
        match vault.decrypt(cipher) {
            Ok(plain) => {
                map.insert("password".to_string(), Value::String(plain));
            }
            Err(e) => warn!("Could not decrypt imported admin password, keeping it as-is: {}", e),
        }
    }
    match secure_permanent_boss(&mut admins, None) {
        Some((PermanentBoss::Promoted { id }, _)) => {
            warn!("Imported admins had no permanent boss; promoted admin {}", id);
        }
        Some(_) => {}
        None => {
            return Err(Error::InvalidBundle(
                "admins list holds no account to keep as permanent boss".to_string(),
            ))
        }
    }
    Ok(admins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::StorageAdapter;
    use crate::engine::MemStore;
    use std::collections::HashMap;

    fn service() -> (Arc<StorageAdapter>, Service) {
        let adapter = Arc::new(StorageAdapter::new(
            Arc::new(MemStore::new(HashMap::new(), None)),
            "test",
        ));
        (adapter.clone(), Service::new(adapter))
    }

    fn new_member(username: &str, name: &str) -> NewMember {
        NewMember {
            username: username.to_string(),
            password: "pw".to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn new_entry(date: &str) -> NewEntry {
        NewEntry {
            date: date.to_string(),
            time_in: "08:00".to_string(),
            time_out: "16:00".to_string(),
            total_hours: json!("8.0"),
            out_of_service: None,
        }
    }

    fn boss() -> Principal {
        Principal::Admin {
            id: 1,
            username: "boss".to_string(),
            name: "Boss".to_string(),
            role: AdminRole::Boss,
        }
    }

    async fn seed_admins(adapter: &StorageAdapter) {
        adapter
            .write(
                "data/admins.json",
                &json!({"admins": [
                    {"id": 1, "username": "boss", "password": "secret", "role": "boss", "name": "Boss", "permanent": true},
                    {"id": 2, "username": "mod", "password": "m", "role": "moderator", "name": "Mod", "permanent": false}
                ]}),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_add_and_list_members() {
        let (adapter, svc) = service();
        let ann = svc.add_member(new_member("ann", "Ann")).await.unwrap();
        let bob = svc.add_member(new_member("bob", "Bob")).await.unwrap();
        assert_eq!((ann.id, bob.id), (1, 2));
        assert_eq!(ann.role, "member");

        let listed = svc.list_members().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(
            adapter.read("data/users.json").await.unwrap()["users"][1]["username"],
            json!("bob")
        );
    }

    #[tokio::test]
    async fn test_add_member_validation() {
        let (_, svc) = service();
        let res = svc.add_member(new_member("", "Nobody")).await;
        assert!(matches!(res, Err(Error::Invalid(_))));

        svc.add_member(new_member("ann", "Ann")).await.unwrap();
        let res = svc.add_member(new_member("ann", "Other Ann")).await;
        assert!(matches!(res, Err(Error::Invalid(_))));
        assert_eq!(svc.list_members().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_and_delete_member() {
        let (_, svc) = service();
        let ann = svc.add_member(new_member("ann", "Ann")).await.unwrap();

        let update = MemberUpdate {
            callsign: Some("A1".to_string()),
            ..Default::default()
        };
        let updated = svc.update_member(ann.id, update).await.unwrap();
        assert_eq!(updated.callsign, "A1");
        assert_eq!(updated.name, "Ann");

        assert!(matches!(
            svc.update_member(99, MemberUpdate::default()).await,
            Err(Error::NotFound(_))
        ));

        svc.delete_member(ann.id).await.unwrap();
        assert!(svc.list_members().await.unwrap().is_empty());
        assert!(matches!(svc.delete_member(ann.id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_change_member_password() {
        let (_, svc) = service();
        let ann = svc.add_member(new_member("ann", "Ann")).await.unwrap();

        let res = svc.change_member_password(ann.id, "wrong", "new").await;
        assert!(matches!(res, Err(Error::Forbidden(_))));
        let res = svc.change_member_password(ann.id, "pw", "").await;
        assert!(matches!(res, Err(Error::Invalid(_))));

        svc.change_member_password(ann.id, "pw", "new").await.unwrap();
        assert!(svc.authenticate("ann", "new").await.unwrap().is_some());
        assert!(svc.authenticate("ann", "pw").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entries_belong_to_their_member() {
        let (_, svc) = service();
        svc.add_member(new_member("ann", "Ann")).await.unwrap();
        svc.add_member(new_member("bob", "Bob")).await.unwrap();
        let ann = svc.authenticate("ann", "pw").await.unwrap().unwrap();
        let bob = svc.authenticate("bob", "pw").await.unwrap().unwrap();

        let entry = svc.add_entry(&ann, new_entry("2024-03-01")).await.unwrap();
        assert_eq!(entry.member_id, ann.id());
        assert_eq!(entry.member_name, "Ann");
        assert_eq!(entry.out_of_service, "00:00");
        svc.add_entry(&bob, new_entry("2024-03-01")).await.unwrap();

        assert_eq!(svc.list_entries(Some(ann.id())).await.unwrap().len(), 1);
        assert_eq!(svc.list_entries(None).await.unwrap().len(), 2);

        let update = EntryUpdate {
            time_out: Some("17:00".to_string()),
            ..Default::default()
        };
        let res = svc.update_entry(&bob, entry.id, update.clone()).await;
        assert!(matches!(res, Err(Error::Forbidden(_))));
        assert!(matches!(svc.delete_entry(&bob, entry.id).await, Err(Error::Forbidden(_))));

        let updated = svc.update_entry(&ann, entry.id, update).await.unwrap();
        assert_eq!(updated.time_out, "17:00");

        svc.delete_entry(&boss(), entry.id).await.unwrap();
        assert!(svc.list_entries(Some(ann.id())).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_entry_requires_fields() {
        let (_, svc) = service();
        let mut entry = new_entry("2024-03-01");
        entry.total_hours = Value::Null;
        assert!(matches!(svc.add_entry(&boss(), entry).await, Err(Error::Invalid(_))));
    }

    #[tokio::test]
    async fn test_reset_entries() {
        let (adapter, svc) = service();
        let ann = Principal::Member {
            id: 5,
            username: "ann".to_string(),
            name: "Ann".to_string(),
        };
        svc.add_entry(&ann, new_entry("2024-03-01")).await.unwrap();
        svc.add_entry(&ann, new_entry("2024-03-02")).await.unwrap();
        svc.add_entry(&boss(), new_entry("2024-03-02")).await.unwrap();

        assert_eq!(svc.reset_member_entries(5).await.unwrap(), 2);
        assert_eq!(svc.list_entries(None).await.unwrap().len(), 1);

        svc.reset_all_entries().await.unwrap();
        assert_eq!(adapter.read("data/time_entries.json").await.unwrap(), json!({"entries": []}));
    }

    #[tokio::test]
    async fn test_message() {
        let (_, svc) = service();
        assert_eq!(svc.get_message().await.unwrap(), "");
        svc.set_message("Radio check at 9").await.unwrap();
        assert_eq!(svc.get_message().await.unwrap(), "Radio check at 9");
    }

    #[tokio::test]
    async fn test_add_admin_defaults_and_validation() {
        let (adapter, svc) = service();
        seed_admins(&adapter).await;

        let admin = svc
            .add_admin(NewAdmin {
                username: "mgr".to_string(),
                password: "p".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(admin.id, 3);
        assert_eq!(admin.role, AdminRole::Manager);
        assert_eq!(admin.name, "mgr");
        assert!(!admin.permanent);

        let dup = svc
            .add_admin(NewAdmin {
                username: "mgr".to_string(),
                password: "p".to_string(),
                ..Default::default()
            })
            .await;
        assert!(matches!(dup, Err(Error::Invalid(_))));

        let bad_role = svc
            .add_admin(NewAdmin {
                username: "x".to_string(),
                password: "p".to_string(),
                role: Some("owner".to_string()),
                name: None,
            })
            .await;
        assert!(matches!(bad_role, Err(Error::Invalid(_))));
    }

    #[tokio::test]
    async fn test_permanent_boss_is_protected() {
        let (adapter, svc) = service();
        seed_admins(&adapter).await;

        let update = AdminUpdate {
            role: Some("moderator".to_string()),
            name: Some("Chief".to_string()),
            ..Default::default()
        };
        let updated = svc.update_admin(1, update).await.unwrap();
        assert_eq!(updated.role, AdminRole::Boss);
        assert_eq!(updated.name, "Chief");

        assert!(matches!(svc.delete_admin(1).await, Err(Error::PermanentAdmin)));
        svc.delete_admin(2).await.unwrap();
        assert_eq!(svc.list_admins().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_change_admin_password() {
        let (adapter, svc) = service();
        seed_admins(&adapter).await;
        assert!(matches!(
            svc.change_admin_password(2, "nope", "n").await,
            Err(Error::Forbidden(_))
        ));
        svc.change_admin_password(2, "m", "n").await.unwrap();
        assert!(svc.authenticate("mod", "n").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_authenticate_prefers_admins() {
        let (adapter, svc) = service();
        seed_admins(&adapter).await;
        svc.add_member(new_member("boss", "Member Boss")).await.unwrap();

        let who = svc.authenticate("boss", "secret").await.unwrap().unwrap();
        assert!(matches!(who, Principal::Admin { role: AdminRole::Boss, .. }));
        let who = svc.authenticate("boss", "pw").await.unwrap().unwrap();
        assert!(who.is_member());
        assert!(svc.authenticate("boss", "bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_export_then_import_restores_passwords() {
        let (adapter, svc) = service();
        seed_admins(&adapter).await;
        svc.add_member(new_member("ann", "Ann")).await.unwrap();
        svc.set_message("hello").await.unwrap();
        let vault = Vault::from_secret("s3cret");

        let bundle = svc.export_bundle(&vault).await.unwrap();
        assert_eq!(bundle["version"], json!("1.0"));
        assert!(bundle["export_date"].as_str().is_some());
        let exported = &bundle["admins"]["admins"][0];
        assert_eq!(exported[ENCRYPTED_FLAG], json!(true));
        assert_ne!(exported["password"], json!("secret"));

        let (fresh_adapter, fresh) = service();
        let written = fresh.import_bundle(&bundle, &vault).await.unwrap();
        assert_eq!(written.len(), 4);

        let admins = fresh_adapter.read("data/admins.json").await.unwrap();
        assert_eq!(admins["admins"][0]["password"], json!("secret"));
        assert!(admins["admins"][0].get(ENCRYPTED_FLAG).is_none());
        assert_eq!(fresh.get_message().await.unwrap(), "hello");
        assert_eq!(fresh.list_members().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_import_admin_list_and_bad_cipher() {
        let (adapter, svc) = service();
        let vault = Vault::from_secret("k");
        let bundle = json!({
            "admins": [
                {"id": 1, "username": "b", "password": "not-hex", "role": "boss", "permanent": true, "password_encrypted": true}
            ]
        });
        let written = svc.import_bundle(&bundle, &vault).await.unwrap();
        assert_eq!(written, vec![LogicalFile::Admins]);
        let admins = adapter.read("data/admins.json").await.unwrap();
        assert_eq!(admins["admins"][0]["password"], json!("not-hex"));
        assert!(admins["admins"][0].get(ENCRYPTED_FLAG).is_none());
    }

    #[tokio::test]
    async fn test_import_without_admins_is_rejected() {
        let (adapter, svc) = service();
        seed_admins(&adapter).await;
        let vault = Vault::from_secret("k");
        let before = adapter.read("data/admins.json").await.unwrap();

        let bundle = json!({"message": {"message": "replaced"}, "admins": {"admins": []}});
        let res = svc.import_bundle(&bundle, &vault).await;
        assert!(matches!(res, Err(Error::InvalidBundle(_))));
        assert_eq!(adapter.read("data/admins.json").await.unwrap(), before);
        assert_eq!(svc.get_message().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_import_promotes_a_permanent_boss() {
        let (_, svc) = service();
        let bundle = json!({"admins": {"admins": [
            {"id": 6, "username": "mgr", "password": "p", "role": "manager", "name": "M", "permanent": false},
            {"id": 3, "username": "mod", "password": "p", "role": "moderator", "name": "N", "permanent": true}
        ]}});
        svc.import_bundle(&bundle, &Vault::from_secret("k")).await.unwrap();

        let admins = svc.list_admins().await.unwrap();
        let permanent: Vec<_> = admins.iter().filter(|a| a.permanent).collect();
        assert_eq!(permanent.len(), 1);
        assert_eq!(permanent[0].id, 3);
        assert!(permanent[0].is_permanent_boss());
        assert!(matches!(svc.delete_admin(3).await, Err(Error::PermanentAdmin)));
    }

    #[tokio::test]
    async fn test_legacy_nulls_do_not_hide_accounts() {
        let (adapter, svc) = service();
        adapter
            .write(
                "data/users.json",
                &json!({"users": [
                    {"id": 1, "username": "ann", "password": "pw", "name": "Ann", "postname": null, "callsign": null, "role": "member"}
                ]}),
            )
            .await
            .unwrap();
        adapter
            .write(
                "data/admins.json",
                &json!({"admins": [
                    {"id": 1, "username": "boss", "password": "secret", "role": "boss", "name": "Boss", "permanent": true},
                    {"id": 2, "username": "sup", "password": "s", "role": "supervisor", "name": null, "permanent": false}
                ]}),
            )
            .await
            .unwrap();

        let members = svc.list_members().await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].postname, "");
        assert!(svc.authenticate("ann", "pw").await.unwrap().unwrap().is_member());

        assert_eq!(svc.list_admins().await.unwrap().len(), 2);
        let who = svc.authenticate("sup", "s").await.unwrap().unwrap();
        assert!(matches!(who, Principal::Admin { role: AdminRole::Moderator, ref name, .. } if name == "sup"));
        assert!(svc.authenticate("boss", "secret").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_admin_rename_must_stay_unique() {
        let (adapter, svc) = service();
        seed_admins(&adapter).await;

        let update = AdminUpdate {
            username: Some("boss".to_string()),
            ..Default::default()
        };
        assert!(matches!(svc.update_admin(2, update).await, Err(Error::Invalid(_))));
        assert!(svc.authenticate("mod", "m").await.unwrap().is_some());

        let same = AdminUpdate {
            username: Some("mod".to_string()),
            ..Default::default()
        };
        assert_eq!(svc.update_admin(2, same).await.unwrap().username, "mod");
    }

    #[tokio::test]
    async fn test_import_rejects_non_object() {
        let (_, svc) = service();
        let res = svc.import_bundle(&json!([1, 2]), &Vault::from_secret("k")).await;
        assert!(matches!(res, Err(Error::InvalidBundle(_))));
    }
}
