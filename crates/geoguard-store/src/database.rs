//! Database connection management.
//!
//! A [`Database`] is only handed out once its schema is current, and it
//! runs in WAL mode so readers never block the tracker's writes.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Platform-appropriate location of the tracker database:
    /// - Linux:   `~/.local/share/geoguard/geoguard.db`
    /// - macOS:   `~/Library/Application Support/com.geoguard.geoguard/geoguard.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\geoguard\geoguard\data\geoguard.db`
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("com", "geoguard", "geoguard").ok_or(StoreError::NoDataDir)?;
        Ok(project_dirs.data_dir().join("geoguard.db"))
    }

    /// Open (or create) the default application database.
    pub fn new() -> Result<Self> {
        let db_path = Self::default_path()?;
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// `None` for in-memory databases.
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_twice_keeps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().is_some());
        drop(db);

        let db = Database::open_at(&path).expect("should reopen");
        let version: u32 = db
            .conn()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, migrations::latest_version());
    }

    #[test]
    fn newer_schema_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::open_at(&path).unwrap();
        db.conn().pragma_update(None, "user_version", 99).unwrap();
        drop(db);

        assert!(matches!(
            Database::open_at(&path),
            Err(StoreError::Migration(_))
        ));
    }
}
