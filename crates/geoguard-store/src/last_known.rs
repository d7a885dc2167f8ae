//! Last known location, one row per account.

use rusqlite::{params, OptionalExtension};

use geoguard_shared::PositionSample;

use crate::database::Database;
use crate::error::Result;

impl Database {
    pub fn save_last_known(
        &self,
        account: &str,
        sample: &PositionSample,
        updated_at_ms: i64,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO last_known_location
                (account, latitude, longitude, accuracy_meters, captured_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(account) DO UPDATE SET
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                accuracy_meters = excluded.accuracy_meters,
                captured_at_ms = excluded.captured_at_ms,
                updated_at_ms = excluded.updated_at_ms",
            params![
                account,
                sample.latitude,
                sample.longitude,
                sample.accuracy_meters,
                sample.captured_at_ms,
                updated_at_ms,
            ],
        )?;
        Ok(())
    }

    pub fn last_known(&self, account: &str) -> Result<Option<PositionSample>> {
        let sample = self
            .conn()
            .query_row(
                "SELECT latitude, longitude, accuracy_meters, captured_at_ms
                 FROM last_known_location WHERE account = ?1",
                params![account],
                |row| {
                    Ok(PositionSample {
                        latitude: row.get(0)?,
                        longitude: row.get(1)?,
                        accuracy_meters: row.get(2)?,
                        captured_at_ms: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_known_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("lk.db")).unwrap();

        assert!(db.last_known("acct").unwrap().is_none());

        let first = PositionSample::at(1.0, 2.0, None, 10);
        let second = PositionSample::at(3.0, 4.0, Some(8.0), 20);
        db.save_last_known("acct", &first, 11).unwrap();
        db.save_last_known("acct", &second, 21).unwrap();

        assert_eq!(db.last_known("acct").unwrap(), Some(second));
        assert!(db.last_known("other").unwrap().is_none());
    }
}
