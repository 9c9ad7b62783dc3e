//! Typed view of the `CONNECTION_*` settings in an install's `.env`.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::EnvFile;
use crate::utils::fs::normalize_path;

/// Default location of the sqlite datastore relative to the install root.
pub const SQLITE_DATASTORE: &str = "app/db/db.sqlite";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseDriver {
    Sqlite,
    Mysql,
    Pgsql,
    /// Anything else; backups refuse it.
    Other(String),
}

impl DatabaseDriver {
    /// Map a `CONNECTION_DRIVER` value; missing or blank means sqlite.
    #[must_use]
    pub fn from_setting(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("sqlite") => Self::Sqlite,
            Some("mysql") => Self::Mysql,
            Some("pgsql") => Self::Pgsql,
            Some(other) => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for DatabaseDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite => write!(f, "sqlite"),
            Self::Mysql => write!(f, "mysql"),
            Self::Pgsql => write!(f, "pgsql"),
            Self::Other(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub driver: DatabaseDriver,
    pub host: Option<String>,
    pub port: Option<String>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Datastore file, meaningful for sqlite only: `CONNECTION_DATABASE` resolved
    /// against the install root, or [`SQLITE_DATASTORE`].
    pub sqlite_path: PathBuf,
}

impl DatabaseConfig {
    /// Build from an optional `.env`; `None` yields sqlite defaults.
    #[must_use]
    pub fn from_env(env: Option<&EnvFile>, root: &Path) -> Self {
        let value = |key: &str| env.and_then(|env| env.non_empty(key)).map(str::to_string);
        let driver = DatabaseDriver::from_setting(env.and_then(|env| env.get("CONNECTION_DRIVER")));
        let database = value("CONNECTION_DATABASE");

        let sqlite_path = match (&driver, &database) {
            (DatabaseDriver::Sqlite, Some(configured)) => normalize_path(&root.join(configured)),
            _ => root.join(SQLITE_DATASTORE),
        };

        Self {
            driver,
            host: value("CONNECTION_HOST"),
            port: value("CONNECTION_PORT"),
            database,
            username: value("CONNECTION_USERNAME"),
            password: value("CONNECTION_PASSWORD"),
            sqlite_path,
        }
    }
}

// Keeps the password out of debug logs.
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("sqlite_path", &self.sqlite_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_from_setting() {
        assert_eq!(DatabaseDriver::from_setting(None), DatabaseDriver::Sqlite);
        assert_eq!(DatabaseDriver::from_setting(Some("  ")), DatabaseDriver::Sqlite);
        assert_eq!(DatabaseDriver::from_setting(Some("MySQL")), DatabaseDriver::Mysql);
        assert_eq!(DatabaseDriver::from_setting(Some("pgsql")), DatabaseDriver::Pgsql);
        assert_eq!(
            DatabaseDriver::from_setting(Some("sqlsrv")),
            DatabaseDriver::Other("sqlsrv".to_string())
        );
    }

    #[test]
    fn test_from_env_without_file() {
        let config = DatabaseConfig::from_env(None, Path::new("/srv/mr"));
        assert_eq!(config.driver, DatabaseDriver::Sqlite);
        assert_eq!(config.database, None);
        assert_eq!(config.sqlite_path, PathBuf::from("/srv/mr/app/db/db.sqlite"));
    }

    #[test]
    fn test_from_env_reads_connection_settings() {
        let env = EnvFile::parse(
            "CONNECTION_DRIVER=pgsql\nCONNECTION_HOST=db.local\nCONNECTION_PORT=5433\n\
             CONNECTION_DATABASE=mr\nCONNECTION_USERNAME=report\nCONNECTION_PASSWORD=s3cret\n",
            ".env",
        )
        .unwrap();
        let config = DatabaseConfig::from_env(Some(&env), Path::new("/srv/mr"));

        assert_eq!(config.driver, DatabaseDriver::Pgsql);
        assert_eq!(config.host.as_deref(), Some("db.local"));
        assert_eq!(config.port.as_deref(), Some("5433"));
        assert_eq!(config.database.as_deref(), Some("mr"));
        assert_eq!(config.username.as_deref(), Some("report"));
        assert_eq!(config.password.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_sqlite_path_from_connection_database() {
        let absolute = EnvFile::parse(
            "CONNECTION_DRIVER=\"sqlite\"\nCONNECTION_DATABASE=\"/var/munki/data/db.sqlite\"\n",
            ".env",
        )
        .unwrap();
        let config = DatabaseConfig::from_env(Some(&absolute), Path::new("/srv/mr"));
        assert_eq!(config.sqlite_path, PathBuf::from("/var/munki/data/db.sqlite"));

        let relative = EnvFile::parse("CONNECTION_DATABASE=./app/data/munki.sqlite\n", ".env").unwrap();
        let config = DatabaseConfig::from_env(Some(&relative), Path::new("/srv/mr"));
        assert_eq!(config.driver, DatabaseDriver::Sqlite);
        assert_eq!(config.sqlite_path, PathBuf::from("/srv/mr/app/data/munki.sqlite"));

        // Only sqlite reads a path from it.
        let mysql = EnvFile::parse("CONNECTION_DRIVER=mysql\nCONNECTION_DATABASE=munkireport\n", ".env").unwrap();
        let config = DatabaseConfig::from_env(Some(&mysql), Path::new("/srv/mr"));
        assert_eq!(config.sqlite_path, PathBuf::from("/srv/mr/app/db/db.sqlite"));
    }

    #[test]
    fn test_debug_masks_password() {
        let env = EnvFile::parse("CONNECTION_PASSWORD=s3cret\n", ".env").unwrap();
        let config = DatabaseConfig::from_env(Some(&env), Path::new("/srv/mr"));
        let debug = format!("{config:?}");
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("***"));
    }
}
