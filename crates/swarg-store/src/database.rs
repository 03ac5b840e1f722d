//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

/// How long a writer waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the default server database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/swarg/swarg.db`
    /// - macOS:   `~/Library/Application Support/social.swarg.swarg/swarg.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\swarg\swarg\data\swarg.db`
    pub fn new() -> Result<Self> {
        let path = Self::default_path()?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        tracing::info!(path = %path.display(), "opening database");

        Self::open_at(&path)
    }

    /// Location used by [`Database::new`].
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("social", "swarg", "swarg").ok_or(StoreError::NoDataDir)?;
        Ok(project_dirs.data_dir().join("swarg.db"))
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    ///
    /// Callers should prefer the typed CRUD helpers, but direct access is
    /// occasionally needed for ad-hoc queries.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::User;
    use swarg_shared::UserId;

    /// Fresh database in a temp directory. Keep the `TempDir` alive.
    pub(crate) fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    pub(crate) fn add_user(db: &Database, name: &str) -> UserId {
        let id = UserId::new();
        db.upsert_user(&User::new(id, name)).unwrap();
        id
    }

    #[test]
    fn open_round_trip() {
        let (_dir, db) = test_db();
        assert!(db.path().is_some());
    }

    #[test]
    fn reopen_keeps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let id = {
            let db = Database::open_at(&path).unwrap();
            add_user(&db, "Asha")
        };

        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.get_user(id).unwrap().name, "Asha");
    }
}
