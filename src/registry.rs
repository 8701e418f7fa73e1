//! The closed set of logical files and where each one is stored.

use std::fmt;

use crate::{Error, Result};

/// Top-level layout a logical file's document must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// `{ <field>: [ ... ] }`
    List { field: &'static str },
    /// `{ <field>: "..." }`
    Text { field: &'static str },
    /// Any JSON object, stored verbatim.
    Mapping,
}

/// A named singleton document addressed by its legacy file path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogicalFile {
    Users,
    TimeEntries,
    Message,
    Admins,
    AdminSettings,
}

impl LogicalFile {
    /// Every logical file, in bootstrap order.
    pub const ALL: [LogicalFile; 5] = [
        LogicalFile::Users,
        LogicalFile::TimeEntries,
        LogicalFile::Message,
        LogicalFile::Admins,
        LogicalFile::AdminSettings,
    ];

    /// Legacy path call sites use to address the file.
    pub fn path(self) -> &'static str {
        match self {
            Self::Users => "data/users.json",
            Self::TimeEntries => "data/time_entries.json",
            Self::Message => "data/message.json",
            Self::Admins => "data/admins.json",
            Self::AdminSettings => "data/admin_settings.json",
        }
    }

    pub fn collection(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::TimeEntries => "time_entries",
            Self::Message => "message",
            Self::Admins => "admins",
            Self::AdminSettings => "admin_settings",
        }
    }

    pub fn shape(self) -> Shape {
        match self {
            Self::Users => Shape::List { field: "users" },
            Self::TimeEntries => Shape::List { field: "entries" },
            Self::Message => Shape::Text { field: "message" },
            Self::Admins => Shape::List { field: "admins" },
            Self::AdminSettings => Shape::Mapping,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Users => "member accounts",
            Self::TimeEntries => "time entry records",
            Self::Message => "system message",
            Self::Admins => "admin accounts",
            Self::AdminSettings => "admin settings",
        }
    }
}

impl fmt::Display for LogicalFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Looks up a logical file by path.
///
/// The path is normalized first, so `./data/users.json` and `data\users.json`
/// resolve like `data/users.json`. Matching is case-sensitive.
pub fn resolve(path: &str) -> Result<LogicalFile> {
    let normalized = normalize_path(path);
    LogicalFile::ALL
        .into_iter()
        .find(|f| f.path() == normalized)
        .ok_or_else(|| Error::UnknownLogicalFile(path.to_string()))
}

/// Whether `path` names one of the logical files.
pub fn is_logical(path: &str) -> bool {
    resolve(path).is_ok()
}

/// Converts separators to `/` and collapses `.` and `..` segments lexically.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let absolute = unified.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for seg in unified.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if matches!(segments.last(), Some(last) if *last != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            s => segments.push(s),
        }
    }
    let joined = segments.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}
