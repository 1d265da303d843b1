//! SQLite-backed sample store and vote ledger.
//!
//! Descriptors are stored as little-endian `f32` blobs. The `votes` table is
//! keyed by identity, so the one-vote rule holds even across processes
//! sharing the same database file.

use chrono::{DateTime, Utc};
use facevote_core::{
    Descriptor, EnrollmentBatch, EnrollmentReceipt, FaceSample, Identity, LedgerStore,
    SampleStore, StoreError, Vote,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS enrollments (
    batch_id   TEXT PRIMARY KEY,
    identity   TEXT NOT NULL,
    samples    INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS samples (
    batch_id   TEXT NOT NULL REFERENCES enrollments(batch_id),
    seq        INTEGER NOT NULL,
    descriptor BLOB NOT NULL,
    PRIMARY KEY (batch_id, seq)
);

CREATE TABLE IF NOT EXISTS votes (
    identity TEXT PRIMARY KEY,
    choice   TEXT NOT NULL,
    cast_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_enrollments_identity ON enrollments(identity);
"#;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(StoreError::unavailable)?;
        }
        let conn = Connection::open(path).map_err(StoreError::unavailable)?;
        conn.busy_timeout(busy_timeout)
            .map_err(StoreError::unavailable)?;
        let mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(StoreError::unavailable)?;

        tracing::info!(path = %path.display(), journal_mode = %mode, "opened store");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::unavailable)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(StoreError::unavailable)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl SampleStore for SqliteStore {
    fn load(&self) -> Result<Vec<FaceSample>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT e.identity, s.descriptor FROM samples s
                 JOIN enrollments e ON e.batch_id = s.batch_id
                 ORDER BY e.rowid, s.seq",
            )
            .map_err(StoreError::unavailable)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)))
            .map_err(StoreError::unavailable)?;

        let mut samples = Vec::new();
        for row in rows {
            let (identity, blob) = row.map_err(StoreError::unavailable)?;
            samples.push(FaceSample {
                identity: decode_identity(identity)?,
                descriptor: decode_descriptor(&blob)?,
            });
        }
        Ok(samples)
    }

    /// One transaction per batch.
    fn append(&self, batch: &EnrollmentBatch) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(StoreError::unavailable)?;
        let batch_id = batch.id.to_string();

        tx.execute(
            "INSERT INTO enrollments (batch_id, identity, samples, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                batch_id,
                batch.identity.as_str(),
                batch.len() as i64,
                batch.created_at.to_rfc3339()
            ],
        )
        .map_err(StoreError::unavailable)?;
        {
            let mut insert = tx
                .prepare("INSERT INTO samples (batch_id, seq, descriptor) VALUES (?1, ?2, ?3)")
                .map_err(StoreError::unavailable)?;
            for (seq, descriptor) in batch.descriptors.iter().enumerate() {
                insert
                    .execute(params![batch_id, seq as i64, encode_descriptor(descriptor)])
                    .map_err(StoreError::unavailable)?;
            }
        }
        tx.commit().map_err(StoreError::unavailable)?;

        tracing::debug!(batch = %batch.id, samples = batch.len(), "batch stored");
        Ok(())
    }

    fn enrollments(&self) -> Result<Vec<EnrollmentReceipt>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT batch_id, identity, samples, created_at FROM enrollments ORDER BY rowid",
            )
            .map_err(StoreError::unavailable)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(StoreError::unavailable)?;

        let mut receipts = Vec::new();
        for row in rows {
            let (batch_id, identity, samples, created_at) = row.map_err(StoreError::unavailable)?;
            receipts.push(EnrollmentReceipt {
                batch_id: Uuid::parse_str(&batch_id)
                    .map_err(|e| StoreError::Corrupt(format!("batch id {batch_id:?}: {e}")))?,
                identity: decode_identity(identity)?,
                samples: usize::try_from(samples)
                    .map_err(|_| StoreError::Corrupt(format!("sample count {samples}")))?,
                created_at: decode_time(&created_at)?,
            });
        }
        Ok(receipts)
    }
}

impl LedgerStore for SqliteStore {
    fn exists(&self, identity: &Identity) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT 1 FROM votes WHERE identity = ?1",
            params![identity.as_str()],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
        .map_err(StoreError::unavailable)
    }

    fn insert_if_absent(&self, vote: &Vote) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "INSERT INTO votes (identity, choice, cast_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(identity) DO NOTHING",
                params![vote.identity.as_str(), vote.choice, vote.cast_at.to_rfc3339()],
            )
            .map_err(StoreError::unavailable)?;
        Ok(changed == 1)
    }

    fn get(&self, identity: &Identity) -> Result<Option<Vote>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT choice, cast_at FROM votes WHERE identity = ?1",
                params![identity.as_str()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(StoreError::unavailable)?;

        row.map(|(choice, cast_at)| {
            Ok(Vote {
                identity: identity.clone(),
                choice,
                cast_at: decode_time(&cast_at)?,
            })
        })
        .transpose()
    }

    fn tally(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT choice, COUNT(*) FROM votes GROUP BY choice")
            .map_err(StoreError::unavailable)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(StoreError::unavailable)?;

        let mut tally = BTreeMap::new();
        for row in rows {
            let (choice, count) = row.map_err(StoreError::unavailable)?;
            tally.insert(choice, count.max(0) as u64);
        }
        Ok(tally)
    }
}

fn encode_descriptor(descriptor: &Descriptor) -> Vec<u8> {
    descriptor
        .values
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect()
}

fn decode_descriptor(blob: &[u8]) -> Result<Descriptor, StoreError> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::Corrupt(format!(
            "descriptor blob of {} bytes is not a whole number of f32s",
            blob.len()
        )));
    }
    let values = blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect::<Vec<_>>();
    Ok(Descriptor::from(values))
}

fn decode_identity(raw: String) -> Result<Identity, StoreError> {
    Identity::new(raw).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn decode_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    fn id(s: &str) -> Identity {
        Identity::new(s).unwrap()
    }

    fn batch(identity: &str, base: f32) -> EnrollmentBatch {
        let descriptors = (0..3)
            .map(|i| Descriptor::from(vec![base + i as f32, -0.5, f32::MAX]))
            .collect();
        EnrollmentBatch::new(id(identity), descriptors)
    }

    fn vote(identity: &str, choice: &str) -> Vote {
        Vote {
            identity: id(identity),
            choice: choice.to_string(),
            cast_at: Utc::now(),
        }
    }

    #[test]
    fn test_load_preserves_append_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = batch("A", 1.0);
        let b = batch("B", 10.0);
        store.append(&a).unwrap();
        store.append(&b).unwrap();

        let loaded = store.load().unwrap();
        let expected: Vec<FaceSample> = a.samples().chain(b.samples()).collect();
        assert_eq!(loaded, expected);
    }

    #[test]
    fn test_enrollment_receipts() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = batch("A", 1.0);
        store.append(&a).unwrap();
        store.append(&batch("A", 2.0)).unwrap();

        let receipts = store.enrollments().unwrap();
        assert_eq!(receipts.len(), 2);
        assert_eq!(receipts[0].batch_id, a.id);
        assert_eq!(receipts[0].samples, 3);
        assert_eq!(
            receipts[0].created_at.timestamp_micros(),
            a.created_at.timestamp_micros()
        );
    }

    #[test]
    fn test_failed_sample_insert_rolls_back_batch() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .conn
            .lock()
            .execute_batch(
                "CREATE TRIGGER reject_third_sample BEFORE INSERT ON samples
                 WHEN NEW.seq = 2 BEGIN SELECT RAISE(ABORT, 'sample rejected'); END;",
            )
            .unwrap();

        assert!(matches!(
            store.append(&batch("A", 1.0)),
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.load().unwrap().is_empty());
        assert!(store.enrollments().unwrap().is_empty());

        store
            .conn
            .lock()
            .execute_batch("DROP TRIGGER reject_third_sample;")
            .unwrap();
        store.append(&batch("B", 1.0)).unwrap();
        assert_eq!(store.load().unwrap().len(), 3);
        assert_eq!(store.enrollments().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_vote_not_inserted() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(!store.exists(&id("A")).unwrap());
        assert!(store.insert_if_absent(&vote("A", "X")).unwrap());
        assert!(!store.insert_if_absent(&vote("A", "Y")).unwrap());
        assert!(store.exists(&id("A")).unwrap());
        assert_eq!(store.get(&id("A")).unwrap().unwrap().choice, "X");
        assert!(store.get(&id("B")).unwrap().is_none());
    }

    #[test]
    fn test_tally_groups_by_choice() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_if_absent(&vote("A", "X")).unwrap();
        store.insert_if_absent(&vote("B", "X")).unwrap();
        store.insert_if_absent(&vote("C", "Y")).unwrap();
        let tally = store.tally().unwrap();
        assert_eq!(tally.get("X"), Some(&2));
        assert_eq!(tally.get("Y"), Some(&1));
    }

    #[test]
    fn test_corrupt_descriptor_blob() {
        assert!(matches!(decode_descriptor(&[0, 1, 2]), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_reopen_file_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("facevote.db");
        {
            let store = SqliteStore::open(&path, Duration::from_secs(5)).unwrap();
            store.append(&batch("A", 1.0)).unwrap();
            store.insert_if_absent(&vote("A", "X")).unwrap();
        }
        let store = SqliteStore::open(&path, Duration::from_secs(5)).unwrap();
        assert_eq!(store.load().unwrap().len(), 3);
        assert!(store.exists(&id("A")).unwrap());
    }

    #[test]
    fn test_concurrent_connections_single_vote() {
        const BOOTHS: usize = 6;
        let dir = tempfile::tempdir().unwrap();
        let path = Arc::new(dir.path().join("facevote.db"));
        SqliteStore::open(&path, Duration::from_secs(5)).unwrap();

        let barrier = Arc::new(Barrier::new(BOOTHS));
        let handles: Vec<_> = (0..BOOTHS)
            .map(|i| {
                let path = Arc::clone(&path);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let store = SqliteStore::open(&path, Duration::from_secs(5)).unwrap();
                    barrier.wait();
                    store.insert_if_absent(&vote("A", &format!("choice-{i}"))).unwrap()
                })
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&inserted| inserted)
            .count();
        assert_eq!(wins, 1);

        let store = SqliteStore::open(&path, Duration::from_secs(5)).unwrap();
        assert_eq!(store.tally().unwrap().values().sum::<u64>(), 1);
    }
}
