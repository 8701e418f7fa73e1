//! Process configuration read from the environment at startup.
//!
//! Every value has a local default so a bare `ems bootstrap` works against an
//! embedded store in the current directory. Binaries override individual
//! values with command line flags.

use std::env;
use std::path::PathBuf;

use crate::{Error, Result};

pub const DEFAULT_STORE_URI: &str = "file://store";
pub const DEFAULT_DB_NAME: &str = "ems_database";
pub const DEFAULT_SESSION_SECRET: &str = "default-secret-key";
pub const DEFAULT_FALLBACK_ADMIN: &str = "admin";

/// Where the backing store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// A daemon reachable at `host:port`.
    Remote(String),
    /// An embedded store persisted under a directory.
    File(PathBuf),
    /// An embedded store that is never written to disk.
    Memory,
}

impl StoreLocation {
    /// Parses `tcp://host:port`, `file://dir` or `memory://`.
    pub fn parse(uri: &str) -> Result<Self> {
        if let Some(addr) = uri.strip_prefix("tcp://") {
            if addr.is_empty() {
                return Err(Error::Invalid(format!("store uri without address: {}", uri)));
            }
            Ok(Self::Remote(addr.to_string()))
        } else if let Some(dir) = uri.strip_prefix("file://") {
            if dir.is_empty() {
                return Err(Error::Invalid(format!("store uri without directory: {}", uri)));
            }
            Ok(Self::File(PathBuf::from(dir)))
        } else if uri == "memory://" {
            Ok(Self::Memory)
        } else {
            Err(Error::Invalid(format!("unsupported store uri: {}", uri)))
        }
    }
}

/// Connection settings for the backing store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub uri: String,
    pub database: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_STORE_URI.to_string(),
            database: DEFAULT_DB_NAME.to_string(),
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Self {
        Self {
            uri: var_or("EMS_STORE_URI", DEFAULT_STORE_URI),
            database: var_or("EMS_DB_NAME", DEFAULT_DB_NAME),
        }
    }

    pub fn location(&self) -> Result<StoreLocation> {
        StoreLocation::parse(&self.uri)
    }
}

/// Deployment profile. `Direct` never routes path-based access through the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Direct,
    Compat,
}

impl Profile {
    fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "direct" | "serverless" => Self::Direct,
            _ => Self::Compat,
        }
    }
}

/// Identity created when no admin exists at all after bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackAdmin {
    pub username: String,
    pub password: String,
}

impl Default for FallbackAdmin {
    fn default() -> Self {
        Self {
            username: DEFAULT_FALLBACK_ADMIN.to_string(),
            password: DEFAULT_FALLBACK_ADMIN.to_string(),
        }
    }
}

/// Everything the application layer needs at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store: StoreConfig,
    /// Directory that contains the legacy `data/*.json` files.
    pub legacy_dir: PathBuf,
    pub profile: Profile,
    pub session_secret: String,
    pub fallback_admin: FallbackAdmin,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            legacy_dir: PathBuf::from("."),
            profile: Profile::Compat,
            session_secret: DEFAULT_SESSION_SECRET.to_string(),
            fallback_admin: FallbackAdmin::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            store: StoreConfig::from_env(),
            legacy_dir: PathBuf::from(var_or("EMS_LEGACY_DIR", ".")),
            profile: Profile::parse(&var_or("EMS_PROFILE", "compat")),
            session_secret: var_or("EMS_SESSION_SECRET", DEFAULT_SESSION_SECRET),
            fallback_admin: FallbackAdmin {
                username: var_or("EMS_FALLBACK_ADMIN_USER", DEFAULT_FALLBACK_ADMIN),
                password: var_or("EMS_FALLBACK_ADMIN_PASSWORD", DEFAULT_FALLBACK_ADMIN),
            },
        }
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_locations() {
        assert_eq!(
            StoreLocation::parse("tcp://127.0.0.1:7001").unwrap(),
            StoreLocation::Remote("127.0.0.1:7001".to_string())
        );
        assert_eq!(
            StoreLocation::parse("file://var/ems").unwrap(),
            StoreLocation::File(PathBuf::from("var/ems"))
        );
        assert_eq!(StoreLocation::parse("memory://").unwrap(), StoreLocation::Memory);
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(StoreLocation::parse("redis://localhost:6379").is_err());
        assert!(StoreLocation::parse("tcp://").is_err());
        assert!(StoreLocation::parse("file://").is_err());
    }

    #[test]
    fn test_profile() {
        assert_eq!(Profile::parse("DIRECT"), Profile::Direct);
        assert_eq!(Profile::parse("serverless"), Profile::Direct);
        assert_eq!(Profile::parse("anything"), Profile::Compat);
    }

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.store.uri, DEFAULT_STORE_URI);
        assert_eq!(cfg.store.database, DEFAULT_DB_NAME);
        assert_eq!(cfg.profile, Profile::Compat);
    }
}
