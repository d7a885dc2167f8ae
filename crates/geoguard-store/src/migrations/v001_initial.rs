//! v001 -- Initial schema: `pending_samples` and `last_known_location`.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Samples waiting for re-delivery (bounded per account)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS pending_samples (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    account         TEXT NOT NULL,
    latitude        REAL NOT NULL,
    longitude       REAL NOT NULL,
    accuracy_meters REAL,
    captured_at_ms  INTEGER NOT NULL,
    enqueued_at_ms  INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pending_samples_account
    ON pending_samples(account, id DESC);

-- ----------------------------------------------------------------
-- Last known location (one row per account)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS last_known_location (
    account         TEXT PRIMARY KEY NOT NULL,
    latitude        REAL NOT NULL,
    longitude       REAL NOT NULL,
    accuracy_meters REAL,
    captured_at_ms  INTEGER NOT NULL,
    updated_at_ms   INTEGER NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
