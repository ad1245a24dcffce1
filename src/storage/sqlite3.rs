use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

use crate::storage::{BacklogStore, PendingBatch};

/// Durable backlog in a single sqlite table. `save` replaces the whole
/// list in one transaction so the stored state always matches the
/// dispatcher's in-memory view.
pub struct SqliteBacklog {
    db_path: PathBuf,
    conn: Connection,
}

impl SqliteBacklog {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let conn = Connection::open(&db_path)?;
        Self::init_db(&conn)?;

        Ok(Self { db_path, conn })
    }

    fn init_db(conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS pending_batches (
                id INTEGER PRIMARY KEY,
                endpoint TEXT NOT NULL,
                failed_at TEXT NOT NULL,
                events TEXT NOT NULL
            );",
        )?;
        Ok(())
    }
}

impl BacklogStore for SqliteBacklog {
    fn load(&mut self) -> Result<Vec<PendingBatch>> {
        let mut stmt = self.conn.prepare(
            "SELECT endpoint, failed_at, events FROM pending_batches ORDER BY id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut out: Vec<PendingBatch> = Vec::new();

        while let Some(row) = rows.next()? {
            let endpoint: String = row.get(0)?;
            let failed_s: String = row.get(1)?;
            let events_json: String = row.get(2)?;

            let failed_at = DateTime::parse_from_rfc3339(&failed_s)
                .map(|dt| dt.with_timezone(&Utc))
                .with_context(|| format!("Invalid failed_at in backlog DB: {}", failed_s))?;
            let events = serde_json::from_str(&events_json)
                .with_context(|| format!("Corrupt events column in {:?}", self.db_path))?;

            out.push(PendingBatch {
                endpoint,
                events,
                failed_at,
            });
        }

        Ok(out)
    }

    fn save(&mut self, batches: &[PendingBatch]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM pending_batches", [])?;
        for batch in batches {
            let events_json = serde_json::to_string(&batch.events)?;
            tx.execute(
                "INSERT INTO pending_batches (endpoint, failed_at, events) VALUES (?, ?, ?)",
                params![
                    batch.endpoint,
                    batch.failed_at.to_rfc3339(),
                    events_json
                ],
            )?;
        }
        tx.commit().context("Failed to commit backlog save")?;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.conn.execute("DELETE FROM pending_batches", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SessionContext;
    use crate::pipeline::model::{EventPayload, TelemetryEvent};
    use crate::util::ids;

    fn temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("courier-backlog-{}.sqlite3", ids::mint_id("t")))
    }

    fn sample_batch(n: usize) -> PendingBatch {
        let ctx = SessionContext::new(
            "session_a".into(),
            "user_b".into(),
            "device_c".into(),
            Utc::now(),
        );
        let events = (0..n)
            .map(|i| {
                TelemetryEvent::new(
                    &ctx,
                    Utc::now(),
                    "https://example.test/".into(),
                    EventPayload::MouseClick {
                        x: i as i32,
                        y: 0,
                        target: None,
                    },
                )
            })
            .collect();
        PendingBatch {
            endpoint: "events".into(),
            events,
            failed_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_load_clear_round_trip() {
        let path = temp_db_path();
        let mut store = SqliteBacklog::new(&path).unwrap();
        assert!(store.load().unwrap().is_empty());

        store.save(&[sample_batch(3), sample_batch(1)]).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].events.len(), 3);
        assert_eq!(loaded[1].events.len(), 1);
        assert_eq!(loaded[0].endpoint, "events");

        // save replaces rather than appends
        store.save(&[sample_batch(2)]).unwrap();
        assert_eq!(store.load().unwrap().len(), 1);

        store.clear().unwrap();
        assert!(store.load().unwrap().is_empty());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_backlog_survives_reopen() {
        let path = temp_db_path();
        {
            let mut store = SqliteBacklog::new(&path).unwrap();
            store.save(&[sample_batch(5)]).unwrap();
        }
        let mut reopened = SqliteBacklog::new(&path).unwrap();
        let loaded = reopened.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].events.len(), 5);
        let _ = std::fs::remove_file(&path);
    }
}
