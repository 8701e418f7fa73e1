//! Typed views of the records kept inside the logical files.
//!
//! Unknown fields survive a read-modify-write cycle through the `extra` maps.

use std::fmt;

use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

pub const MEMBER_ROLE: &str = "member";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberAccount {
    pub id: i64,
    pub username: String,
    pub password: String,
    #[serde(default, deserialize_with = "text_or_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "text_or_empty")]
    pub postname: String,
    #[serde(default, deserialize_with = "text_or_empty")]
    pub callsign: String,
    #[serde(default = "member_role", deserialize_with = "role_or_member")]
    pub role: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn member_role() -> String {
    MEMBER_ROLE.to_string()
}

// Legacy files carry `null` or numbers where text is expected.
fn loose_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn text_or_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(loose_text(Value::deserialize(deserializer)?).unwrap_or_default())
}

fn role_or_member<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(loose_text(Value::deserialize(deserializer)?).unwrap_or_else(member_role))
}

impl MemberAccount {
    pub fn is_member(&self) -> bool {
        self.role == MEMBER_ROLE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminRole {
    Boss,
    Manager,
    Moderator,
}

impl AdminRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "boss" => Some(Self::Boss),
            "manager" => Some(Self::Manager),
            "moderator" => Some(Self::Moderator),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Boss => "boss",
            Self::Manager => "manager",
            Self::Moderator => "moderator",
        }
    }
}

impl fmt::Display for AdminRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminAccount {
    pub id: i64,
    pub username: String,
    pub password: String,
    #[serde(default = "fallback_admin_role", deserialize_with = "admin_role_or_moderator")]
    pub role: AdminRole,
    #[serde(default, deserialize_with = "text_or_empty")]
    pub name: String,
    #[serde(default)]
    pub permanent: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn fallback_admin_role() -> AdminRole {
    AdminRole::Moderator
}

// An unreadable role grants the least privilege instead of hiding the whole admins list.
fn admin_role_or_moderator<'de, D>(deserializer: D) -> std::result::Result<AdminRole, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = loose_text(Value::deserialize(deserializer)?);
    Ok(match raw.as_deref().and_then(AdminRole::parse) {
        Some(role) => role,
        None => {
            warn!("Unknown admin role {:?}, treating it as moderator", raw);
            AdminRole::Moderator
        }
    })
}

impl AdminAccount {
    pub fn is_permanent_boss(&self) -> bool {
        self.permanent && self.role == AdminRole::Boss
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub id: i64,
    pub member_id: i64,
    #[serde(default, deserialize_with = "text_or_empty")]
    pub member_name: String,
    pub date: String,
    pub time_in: String,
    pub time_out: String,
    pub total_hours: Value,
    #[serde(default = "no_outage", deserialize_with = "outage_or_none")]
    pub out_of_service: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn no_outage() -> String {
    "00:00".to_string()
}

fn outage_or_none<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(loose_text(Value::deserialize(deserializer)?).unwrap_or_else(no_outage))
}

/// Next free id: one past the largest, or 1 for an empty set.
pub fn next_id<I: IntoIterator<Item = i64>>(ids: I) -> i64 {
    ids.into_iter().max().map_or(1, |m| m.max(0) + 1)
}

/// Deserializes the list stored under `field`. A missing field reads as empty.
pub fn list<T: DeserializeOwned>(doc: &Value, field: &str) -> Result<Vec<T>> {
    match doc.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(v) => serde_json::from_value(v.clone()).map_err(Error::from),
    }
}

/// Replaces the list stored under `field`.
pub fn store_list<T: Serialize>(doc: &mut Value, field: &str, items: &[T]) -> Result<()> {
    let value = serde_json::to_value(items)?;
    match doc {
        Value::Object(map) => {
            map.insert(field.to_string(), value);
            Ok(())
        }
        _ => Err(Error::Internal(format!("document holding {} is not an object", field))),
    }
}
