//! Schema migrations, applied in order and recorded in `PRAGMA user_version`.

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type Step = fn(&Connection) -> rusqlite::Result<()>;

/// `(version, name, step)`; versions are contiguous from 1.
const MIGRATIONS: &[(u32, &str, Step)] = &[(1, "v001_initial", v001_initial::up)];

/// Schema version after every migration has run.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|(v, _, _)| *v).unwrap_or(0)
}

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if current > latest_version() {
        return Err(StoreError::Migration(format!(
            "database schema v{current} is newer than this build (v{})",
            latest_version()
        )));
    }

    for (version, name, step) in MIGRATIONS.iter().filter(|(v, _, _)| *v > current) {
        tracing::info!(version, name, "applying migration");
        step(conn).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        conn.pragma_update(None, "user_version", version)?;
    }

    Ok(())
}
