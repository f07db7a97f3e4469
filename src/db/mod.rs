// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Fingerprint ledger: which files have already been classified and organized
//!
//! A file counts as processed when either its path or its content fingerprint
//! is present. The bulk [`FingerprintStore::list_unprocessed`] filter only checks
//! paths; the per-file [`FingerprintStore::is_processed`] check also hashes.

use chrono::{DateTime, Local};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::{Result, SortError};

/// Content fingerprint. Empty means "could not read", which never matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// 128-bit blake3 prefix over the file bytes, hex encoded
    pub fn of(path: &Path) -> Self {
        match hash_file(path) {
            Ok(hex) => Self(hex),
            Err(e) => {
                debug!("Cannot fingerprint {:?}: {}", path, e);
                Self::unreadable()
            }
        }
    }

    pub fn unreadable() -> Self {
        Self(String::new())
    }

    pub fn is_unreadable(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let hex = hasher.finalize().to_hex();
    Ok(hex.as_str()[..32].to_string())
}

/// One ledger row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub path: String,
    pub fingerprint: String,
    pub category: Option<String>,
    pub raw_result: String,
    pub processed_at: DateTime<Local>,
}

/// Ledger statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerStats {
    pub record_count: i64,
    pub categories: Vec<(String, i64)>,
}

/// SQLite-backed processed-file ledger (thread-safe wrapper)
///
/// Every call takes the connection lock, so concurrent workers never
/// interleave a read-modify-write.
#[derive(Clone)]
pub struct FingerprintStore {
    conn: Arc<Mutex<Connection>>,
}

impl FingerprintStore {
    /// Open or create the ledger
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Open an in-memory ledger (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize()?;
        Ok(store)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SortError::Config("Ledger lock poisoned".to_string()))
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS processed_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_path TEXT UNIQUE NOT NULL,
                file_hash TEXT NOT NULL,
                category TEXT,
                ai_result TEXT NOT NULL DEFAULT '',
                processed_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_processed_path ON processed_files(file_path);
            CREATE INDEX IF NOT EXISTS idx_processed_hash ON processed_files(file_hash);
        "#,
        )?;
        Ok(())
    }

    /// Path membership, then content fingerprint membership
    pub fn is_processed(&self, path: &Path) -> Result<bool> {
        self.is_processed_with(path, &Fingerprint::of(path))
    }

    /// [`Self::is_processed`] with a fingerprint the caller already computed
    pub fn is_processed_with(&self, path: &Path, fingerprint: &Fingerprint) -> Result<bool> {
        let conn = self.lock_conn()?;
        let hit: Option<i64> = conn
            .query_row(
                r#"SELECT id FROM processed_files
                   WHERE file_path = ?1 OR (?2 != '' AND file_hash = ?2)
                   LIMIT 1"#,
                params![path_key(path), fingerprint.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    /// Upsert by path, hashing the file at `path` now
    pub fn record_processed(&self, path: &Path, category: &str, raw_result: &str) -> Result<()> {
        let fingerprint = Fingerprint::of(path);
        self.record_with_fingerprint(path, &fingerprint, category, raw_result)
    }

    /// Upsert by path with a fingerprint taken earlier, e.g. before a move
    pub fn record_with_fingerprint(
        &self,
        path: &Path,
        fingerprint: &Fingerprint,
        category: &str,
        raw_result: &str,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"INSERT INTO processed_files (file_path, file_hash, category, ai_result, processed_at)
               VALUES (?1, ?2, ?3, ?4, ?5)
               ON CONFLICT(file_path) DO UPDATE SET
                   file_hash = excluded.file_hash,
                   category = excluded.category,
                   ai_result = excluded.ai_result,
                   processed_at = excluded.processed_at"#,
            params![
                path_key(path),
                fingerprint.as_str(),
                category,
                raw_result,
                Local::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Keep only candidates whose path is not in the ledger. No hashing.
    pub fn list_unprocessed(&self, paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT file_path FROM processed_files")?;
        let known = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;

        Ok(paths
            .iter()
            .filter(|p| !known.contains(&path_key(p)))
            .cloned()
            .collect())
    }

    /// Drop rows whose path no longer exists; returns how many went
    pub fn purge_missing(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT id, file_path FROM processed_files")?;
        let stale: Vec<i64> = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .filter(|(_, path)| !Path::new(path).exists())
            .map(|(id, _)| id)
            .collect();
        drop(stmt);

        if stale.is_empty() {
            return Ok(0);
        }

        let tx = conn.unchecked_transaction()?;
        for id in &stale {
            tx.execute("DELETE FROM processed_files WHERE id = ?1", params![id])?;
        }
        tx.commit()?;

        info!("Purged {} stale ledger records", stale.len());
        Ok(stale.len())
    }

    /// All rows, newest first
    pub fn all_records(&self) -> Result<Vec<ProcessedRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT file_path, file_hash, category, ai_result, processed_at
               FROM processed_files ORDER BY processed_at DESC"#,
        )?;
        let records = stmt
            .query_map([], |row| {
                let processed_at: String = row.get(4)?;
                Ok(ProcessedRecord {
                    path: row.get(0)?,
                    fingerprint: row.get(1)?,
                    category: row.get(2)?,
                    raw_result: row.get(3)?,
                    processed_at: DateTime::parse_from_rfc3339(&processed_at)
                        .map(|dt| dt.with_timezone(&Local))
                        .unwrap_or_else(|_| Local::now()),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn stats(&self) -> Result<LedgerStats> {
        let conn = self.lock_conn()?;
        let record_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM processed_files", [], |row| row.get(0))?;
        let mut stmt = conn.prepare(
            r#"SELECT COALESCE(category, '-'), COUNT(*) FROM processed_files
               GROUP BY category ORDER BY COUNT(*) DESC"#,
        )?;
        let categories = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(LedgerStats { record_count, categories })
    }

    pub fn clear_all(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        Ok(conn.execute("DELETE FROM processed_files", [])?)
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_fingerprint_unreadable_never_matches() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.jpg");
        assert!(Fingerprint::of(&missing).is_unreadable());

        let store = FingerprintStore::in_memory().unwrap();
        let other = dir.path().join("other.jpg");
        store
            .record_with_fingerprint(&other, &Fingerprint::unreadable(), "pets", "")
            .unwrap();
        // Both sides are empty hashes but that must not count as a match.
        assert!(!store.is_processed(&missing).unwrap());
    }

    #[test]
    fn test_processed_by_path_or_content() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("a.jpg");
        fs::write(&original, b"same bytes").unwrap();
        let store = FingerprintStore::in_memory().unwrap();

        assert!(!store.is_processed(&original).unwrap());
        store.record_processed(&original, "food", "food").unwrap();
        assert!(store.is_processed(&original).unwrap());

        let renamed = dir.path().join("renamed.jpg");
        fs::write(&renamed, b"same bytes").unwrap();
        assert!(store.is_processed(&renamed).unwrap());

        let different = dir.path().join("different.jpg");
        fs::write(&different, b"other bytes").unwrap();
        assert!(!store.is_processed(&different).unwrap());
    }

    #[test]
    fn test_processed_with_precomputed_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.mp4");
        let second = dir.path().join("second.mp4");
        fs::write(&first, b"clip").unwrap();
        fs::write(&second, b"clip").unwrap();

        let store = FingerprintStore::in_memory().unwrap();
        let fingerprint = Fingerprint::of(&first);
        assert!(!store.is_processed_with(&first, &fingerprint).unwrap());
        store.record_with_fingerprint(&first, &fingerprint, "people", "").unwrap();

        // The given fingerprint is used as-is, the file is not read again.
        fs::remove_file(&second).unwrap();
        assert!(store.is_processed_with(&second, &fingerprint).unwrap());
        assert!(!store.is_processed_with(&second, &Fingerprint::unreadable()).unwrap());
    }

    #[test]
    fn test_list_unprocessed_checks_paths_only() {
        let dir = tempfile::tempdir().unwrap();
        let done = dir.path().join("done.jpg");
        let copy = dir.path().join("copy.jpg");
        fs::write(&done, b"x").unwrap();
        fs::write(&copy, b"x").unwrap();

        let store = FingerprintStore::in_memory().unwrap();
        store.record_processed(&done, "other", "").unwrap();

        let left = store.list_unprocessed(&[done.clone(), copy.clone()]).unwrap();
        assert_eq!(left, vec![copy]);
        assert!(store.list_unprocessed(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_record_is_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.png");
        fs::write(&file, b"1").unwrap();
        let store = FingerprintStore::in_memory().unwrap();

        store.record_processed(&file, "pets", "first").unwrap();
        store.record_processed(&file, "food", "second").unwrap();

        let records = store.all_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].category.as_deref(), Some("food"));
        assert_eq!(records[0].raw_result, "second");
    }

    #[test]
    fn test_purge_missing() {
        let dir = tempfile::tempdir().unwrap();
        let kept = dir.path().join("kept.jpg");
        let gone = dir.path().join("gone.jpg");
        fs::write(&kept, b"k").unwrap();
        fs::write(&gone, b"g").unwrap();

        let store = FingerprintStore::in_memory().unwrap();
        store.record_processed(&kept, "other", "").unwrap();
        store.record_processed(&gone, "other", "").unwrap();
        fs::remove_file(&gone).unwrap();

        assert_eq!(store.purge_missing().unwrap(), 1);
        assert_eq!(store.purge_missing().unwrap(), 0);
        assert_eq!(store.stats().unwrap().record_count, 1);
    }

    #[test]
    fn test_ledger_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("ledger.db");
        let file = dir.path().join("a.jpg");
        fs::write(&file, b"data").unwrap();

        {
            let store = FingerprintStore::open(&db_path).unwrap();
            store.record_processed(&file, "people", "people").unwrap();
        }

        let store = FingerprintStore::open(&db_path).unwrap();
        assert!(store.list_unprocessed(&[file]).unwrap().is_empty());
        assert_eq!(store.clear_all().unwrap(), 1);
    }
}
