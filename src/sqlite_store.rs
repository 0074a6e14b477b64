//! [`KeyStore`] backed by a SQLite database file.
//!
//! Several processes may open the same file: every write runs in its own
//! `IMMEDIATE` transaction, and a writer that finds the database locked waits
//! up to [`BUSY_TIMEOUT`] before giving up.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::debug;
use uuid::Uuid;

use crate::alerts::Alert;
use crate::checks::TestReport;
use crate::error::{Error, Result};
use crate::store::{BrokenKey, KeyStore, PersistedKey, SubkeyRow, UidRow};
use crate::types::{Algorithm, Capability, EccCurve, KeyLine};

/// How long a write waits for another connection's lock.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS keys (
    fingerprint   TEXT PRIMARY KEY,
    algorithm     TEXT NOT NULL,
    length_bits   INTEGER,
    ecc_curve     TEXT,
    capabilities  TEXT NOT NULL,
    created_date  TEXT,
    expiry_date   TEXT,
    revoked       INTEGER NOT NULL,
    last_synced   TEXT,
    alerts        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS uids (
    id           BLOB PRIMARY KEY,
    fingerprint  TEXT NOT NULL REFERENCES keys(fingerprint) ON DELETE CASCADE,
    position     INTEGER NOT NULL,
    uid_string   TEXT NOT NULL,
    created_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_uids_fingerprint ON uids(fingerprint);

CREATE TABLE IF NOT EXISTS subkeys (
    id            BLOB PRIMARY KEY,
    fingerprint   TEXT NOT NULL REFERENCES keys(fingerprint) ON DELETE CASCADE,
    position      INTEGER NOT NULL,
    created_at    TEXT NOT NULL,
    long_id       TEXT NOT NULL,
    algorithm     TEXT NOT NULL,
    length_bits   INTEGER,
    ecc_curve     TEXT,
    capabilities  TEXT NOT NULL,
    created_date  TEXT NOT NULL,
    expiry_date   TEXT,
    revoked       INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_subkeys_fingerprint ON subkeys(fingerprint);

CREATE TABLE IF NOT EXISTS broken_keys (
    fingerprint      TEXT PRIMARY KEY,
    next_retry_sync  TEXT NOT NULL,
    error_message    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS test_reports (
    id           BLOB PRIMARY KEY,
    fingerprint  TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    results      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_test_reports_fingerprint ON test_reports(fingerprint);
CREATE INDEX IF NOT EXISTS idx_test_reports_created_at ON test_reports(created_at);
";

/// SQLite-backed storage for key records, broken-key markers and test reports.
///
/// `save_key` writes the key row and its UID and subkey rows in one
/// transaction. Child rows are deleted and reinserted only when their
/// identities differ from what is stored.
///
/// # Example
///
/// ```no_run
/// use keywarden::SqliteStore;
///
/// let store = SqliteStore::open("keywarden.db")?;
/// assert!(store.path().is_some());
/// # Ok::<(), keywarden::Error>(())
/// ```
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Opens or creates the database at `path`. Parent directories must exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// A private database that lives as long as the store.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = ?path, "opened key store");

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("sqlite connection lock poisoned".into()))
    }
}

#[async_trait]
impl KeyStore for SqliteStore {
    async fn load_key(&self, fingerprint: &str) -> Result<Option<PersistedKey>> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let key = read_key(&tx, fingerprint)?;
        tx.commit()?;
        Ok(key)
    }

    async fn save_key(&self, key: &PersistedKey) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO keys (fingerprint, algorithm, length_bits, ecc_curve, capabilities,
                               created_date, expiry_date, revoked, last_synced, alerts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(fingerprint) DO UPDATE SET
                 algorithm = excluded.algorithm,
                 length_bits = excluded.length_bits,
                 ecc_curve = excluded.ecc_curve,
                 capabilities = excluded.capabilities,
                 created_date = excluded.created_date,
                 expiry_date = excluded.expiry_date,
                 revoked = excluded.revoked,
                 last_synced = excluded.last_synced,
                 alerts = excluded.alerts",
            params![
                key.fingerprint,
                key.algorithm.as_str(),
                key.length_bits,
                key.ecc_curve.map(|c| c.as_str()),
                capabilities_column(&key.capabilities),
                key.created_date,
                key.expiry_date,
                key.revoked,
                key.last_synced,
                to_json(&key.alerts)?,
            ],
        )?;

        let uid_ids: Vec<Uuid> = key.uids.iter().map(|u| u.id).collect();
        if child_ids(&tx, "SELECT id FROM uids WHERE fingerprint = ?1 ORDER BY position", &key.fingerprint)? != uid_ids {
            tx.execute("DELETE FROM uids WHERE fingerprint = ?1", [&key.fingerprint])?;
            for (position, uid) in key.uids.iter().enumerate() {
                tx.execute(
                    "INSERT INTO uids (id, fingerprint, position, uid_string, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![uid.id, key.fingerprint, position, uid.uid_string, uid.created_at],
                )?;
            }
            debug!(fingerprint = %key.fingerprint, count = key.uids.len(), "rewrote uid rows");
        }

        let subkey_ids: Vec<Uuid> = key.subkeys.iter().map(|s| s.id).collect();
        if child_ids(&tx, "SELECT id FROM subkeys WHERE fingerprint = ?1 ORDER BY position", &key.fingerprint)? != subkey_ids {
            tx.execute("DELETE FROM subkeys WHERE fingerprint = ?1", [&key.fingerprint])?;
            for (position, subkey) in key.subkeys.iter().enumerate() {
                let line = &subkey.key;
                tx.execute(
                    "INSERT INTO subkeys (id, fingerprint, position, created_at, long_id, algorithm,
                                          length_bits, ecc_curve, capabilities, created_date,
                                          expiry_date, revoked)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![
                        subkey.id,
                        key.fingerprint,
                        position,
                        subkey.created_at,
                        line.long_id,
                        line.algorithm.as_str(),
                        line.length_bits,
                        line.ecc_curve.map(|c| c.as_str()),
                        capabilities_column(&line.capabilities),
                        line.created_date,
                        line.expiry_date,
                        line.revoked,
                    ],
                )?;
            }
            debug!(fingerprint = %key.fingerprint, count = key.subkeys.len(), "rewrote subkey rows");
        }

        tx.commit()?;
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<PersistedKey>> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;

        let fingerprints = {
            let mut stmt = tx.prepare("SELECT fingerprint FROM keys ORDER BY fingerprint")?;
            stmt.query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut keys = Vec::with_capacity(fingerprints.len());
        for fingerprint in &fingerprints {
            if let Some(key) = read_key(&tx, fingerprint)? {
                keys.push(key);
            }
        }
        tx.commit()?;
        Ok(keys)
    }

    async fn broken_key(&self, fingerprint: &str) -> Result<Option<BrokenKey>> {
        let conn = self.connection()?;
        let broken = conn
            .query_row(
                "SELECT next_retry_sync, error_message FROM broken_keys WHERE fingerprint = ?1",
                [fingerprint],
                |row| {
                    Ok(BrokenKey {
                        fingerprint: fingerprint.to_string(),
                        next_retry_sync: row.get(0)?,
                        error_message: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(broken)
    }

    async fn record_broken_key(&self, broken: &BrokenKey) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO broken_keys (fingerprint, next_retry_sync, error_message)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(fingerprint) DO UPDATE SET
                 next_retry_sync = excluded.next_retry_sync,
                 error_message = excluded.error_message",
            params![broken.fingerprint, broken.next_retry_sync, broken.error_message],
        )?;
        Ok(())
    }

    async fn save_test_report(&self, report: &TestReport) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO test_reports (id, fingerprint, created_at, results) VALUES (?1, ?2, ?3, ?4)",
            params![report.id, report.fingerprint, report.created_at, to_json(&report.results)?],
        )?;
        Ok(())
    }

    async fn test_reports_for(&self, fingerprint: &str) -> Result<Vec<TestReport>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, created_at, results FROM test_reports
             WHERE fingerprint = ?1 ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map([fingerprint], |row| {
                Ok((
                    row.get::<_, Uuid>(0)?,
                    row.get::<_, DateTime<Utc>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, created_at, results)| {
                Ok(TestReport {
                    id,
                    fingerprint: fingerprint.to_string(),
                    created_at,
                    results: from_json(&results)?,
                })
            })
            .collect()
    }

    async fn purge_test_reports(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.connection()?;
        let deleted = conn.execute("DELETE FROM test_reports WHERE created_at < ?1", params![cutoff])?;
        Ok(deleted)
    }
}

struct KeyColumns {
    algorithm: String,
    length_bits: Option<u32>,
    ecc_curve: Option<String>,
    capabilities: String,
    created_date: Option<NaiveDate>,
    expiry_date: Option<NaiveDate>,
    revoked: bool,
    last_synced: Option<DateTime<Utc>>,
    alerts: String,
}

struct SubkeyColumns {
    id: Uuid,
    created_at: DateTime<Utc>,
    long_id: String,
    algorithm: String,
    length_bits: Option<u32>,
    ecc_curve: Option<String>,
    capabilities: String,
    created_date: NaiveDate,
    expiry_date: Option<NaiveDate>,
    revoked: bool,
}

fn read_key(conn: &Connection, fingerprint: &str) -> Result<Option<PersistedKey>> {
    let columns = conn
        .query_row(
            "SELECT algorithm, length_bits, ecc_curve, capabilities, created_date,
                    expiry_date, revoked, last_synced, alerts
             FROM keys WHERE fingerprint = ?1",
            [fingerprint],
            |row| {
                Ok(KeyColumns {
                    algorithm: row.get(0)?,
                    length_bits: row.get(1)?,
                    ecc_curve: row.get(2)?,
                    capabilities: row.get(3)?,
                    created_date: row.get(4)?,
                    expiry_date: row.get(5)?,
                    revoked: row.get(6)?,
                    last_synced: row.get(7)?,
                    alerts: row.get(8)?,
                })
            },
        )
        .optional()?;
    let Some(columns) = columns else {
        return Ok(None);
    };

    let mut key = PersistedKey::new(fingerprint);
    key.algorithm = algorithm_from_column(&columns.algorithm)?;
    key.length_bits = columns.length_bits;
    key.ecc_curve = curve_from_column(columns.ecc_curve)?;
    key.capabilities = capabilities_from_column(&columns.capabilities)?;
    key.created_date = columns.created_date;
    key.expiry_date = columns.expiry_date;
    key.revoked = columns.revoked;
    key.last_synced = columns.last_synced;
    key.alerts = from_json::<Vec<Alert>>(&columns.alerts)?;
    key.uids = read_uids(conn, fingerprint)?;
    key.subkeys = read_subkeys(conn, fingerprint)?;
    Ok(Some(key))
}

fn read_uids(conn: &Connection, fingerprint: &str) -> Result<Vec<UidRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, uid_string, created_at FROM uids WHERE fingerprint = ?1 ORDER BY position",
    )?;
    let uids = stmt
        .query_map([fingerprint], |row| {
            Ok(UidRow {
                id: row.get(0)?,
                uid_string: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(uids)
}

fn read_subkeys(conn: &Connection, fingerprint: &str) -> Result<Vec<SubkeyRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, created_at, long_id, algorithm, length_bits, ecc_curve, capabilities,
                created_date, expiry_date, revoked
         FROM subkeys WHERE fingerprint = ?1 ORDER BY position",
    )?;
    let rows = stmt
        .query_map([fingerprint], |row| {
            Ok(SubkeyColumns {
                id: row.get(0)?,
                created_at: row.get(1)?,
                long_id: row.get(2)?,
                algorithm: row.get(3)?,
                length_bits: row.get(4)?,
                ecc_curve: row.get(5)?,
                capabilities: row.get(6)?,
                created_date: row.get(7)?,
                expiry_date: row.get(8)?,
                revoked: row.get(9)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|row| {
            Ok(SubkeyRow {
                id: row.id,
                created_at: row.created_at,
                key: KeyLine {
                    long_id: row.long_id,
                    algorithm: algorithm_from_column(&row.algorithm)?,
                    length_bits: row.length_bits,
                    ecc_curve: curve_from_column(row.ecc_curve)?,
                    capabilities: capabilities_from_column(&row.capabilities)?,
                    created_date: row.created_date,
                    expiry_date: row.expiry_date,
                    revoked: row.revoked,
                },
            })
        })
        .collect()
}

fn child_ids(conn: &Connection, sql: &str, fingerprint: &str) -> Result<Vec<Uuid>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map([fingerprint], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<Uuid>>>()?;
    Ok(ids)
}

fn capabilities_column(capabilities: &[Capability]) -> String {
    capabilities.iter().map(Capability::as_char).collect()
}

fn capabilities_from_column(value: &str) -> Result<Vec<Capability>> {
    value
        .chars()
        .map(|c| Capability::from_gpg_char(c).ok_or_else(|| unexpected("capabilities", value)))
        .collect()
}

fn algorithm_from_column(value: &str) -> Result<Algorithm> {
    Algorithm::ALL
        .into_iter()
        .find(|a| a.as_str() == value)
        .ok_or_else(|| unexpected("algorithm", value))
}

fn curve_from_column(value: Option<String>) -> Result<Option<EccCurve>> {
    value
        .map(|v| EccCurve::from_gpg_token(&v).ok_or_else(|| unexpected("ecc_curve", &v)))
        .transpose()
}

fn unexpected(column: &str, value: &str) -> Error {
    Error::Storage(format!("unexpected {column} value `{value}` in key store"))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Storage(format!("failed to encode column: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(value: &str) -> Result<T> {
    serde_json::from_str(value).map_err(|e| Error::Storage(format!("failed to decode column: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    const FINGERPRINT: &str = "A999B7498D1A8DC473E53C92309F635DAD1B5517";

    fn synced_key(fingerprint: &str, now: DateTime<Utc>) -> PersistedKey {
        let mut key = PersistedKey::new(fingerprint);
        key.algorithm = Algorithm::Rsa;
        key.length_bits = Some(4096);
        key.capabilities = vec![Capability::Sign, Capability::Certify];
        key.created_date = NaiveDate::from_ymd_opt(2014, 10, 31);
        key.expiry_date = NaiveDate::from_ymd_opt(2018, 5, 15);
        key.last_synced = Some(now);
        key.alerts = vec![Alert::warning("Primary key expires in 10 days")];
        key.uids = vec![
            UidRow::new("Paul <paul@example.com>", now),
            UidRow::new("paul@example.org", now),
        ];
        key.subkeys = vec![SubkeyRow::new(
            KeyLine {
                long_id: "1122334455667788".into(),
                algorithm: Algorithm::Ecc,
                length_bits: None,
                ecc_curve: Some(EccCurve::Cv25519),
                capabilities: vec![Capability::Encrypt],
                created_date: NaiveDate::from_ymd_opt(2019, 3, 1).unwrap(),
                expiry_date: None,
                revoked: false,
            },
            now,
        )];
        key
    }

    #[tokio::test]
    async fn test_key_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.load_key(FINGERPRINT).await.unwrap().is_none());

        let key = synced_key(FINGERPRINT, Utc::now());
        store.save_key(&key).await.unwrap();

        assert_eq!(store.load_key(FINGERPRINT).await.unwrap(), Some(key));
        assert!(store.path().is_none());
    }

    #[tokio::test]
    async fn test_unsynced_key_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let key = PersistedKey::new(FINGERPRINT);
        store.save_key(&key).await.unwrap();

        let loaded = store.load_key(FINGERPRINT).await.unwrap().unwrap();
        assert_eq!(loaded, key);
        assert!(loaded.algorithm.is_unknown());
    }

    #[tokio::test]
    async fn test_child_rows_replaced_as_a_whole() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        let mut key = synced_key(FINGERPRINT, now);
        store.save_key(&key).await.unwrap();

        key.uids = vec![UidRow::new("Paul <paul@new.example>", now)];
        key.subkeys.clear();
        store.save_key(&key).await.unwrap();

        let loaded = store.load_key(FINGERPRINT).await.unwrap().unwrap();
        assert_eq!(loaded.uid_strings(), vec!["Paul <paul@new.example>"]);
        assert_eq!(loaded.uids[0].id, key.uids[0].id);
        assert!(loaded.subkeys.is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_child_rows_keep_identity() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut key = synced_key(FINGERPRINT, Utc::now());
        store.save_key(&key).await.unwrap();

        key.revoked = true;
        store.save_key(&key).await.unwrap();

        let loaded = store.load_key(FINGERPRINT).await.unwrap().unwrap();
        assert!(loaded.revoked);
        assert_eq!(loaded.uids, key.uids);
        assert_eq!(loaded.subkeys, key.subkeys);
    }

    #[tokio::test]
    async fn test_two_handles_on_one_file_keep_both_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.db");
        let now = Utc::now();
        let first_fp = "A".repeat(40);
        let second_fp = "B".repeat(40);

        let first = SqliteStore::open(&path).unwrap();
        let second = SqliteStore::open(&path).unwrap();
        first.save_key(&synced_key(&first_fp, now)).await.unwrap();
        second.save_key(&synced_key(&second_fp, now)).await.unwrap();
        drop((first, second));

        let reopened = SqliteStore::open(&path).unwrap();
        let stored: Vec<String> = reopened
            .list_keys()
            .await
            .unwrap()
            .into_iter()
            .map(|k| k.fingerprint)
            .collect();
        assert_eq!(stored, vec![first_fp, second_fp]);
        assert_eq!(reopened.path(), Some(path.as_path()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_writers_on_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.db");
        SqliteStore::open(&path).unwrap();

        let mut workers = Vec::new();
        for prefix in ['1', '2'] {
            let path = path.clone();
            workers.push(tokio::spawn(async move {
                let store = SqliteStore::open(&path).unwrap();
                for i in 0..20 {
                    let fingerprint = format!("{prefix}{i:039X}");
                    store
                        .save_key(&synced_key(&fingerprint, Utc::now()))
                        .await
                        .unwrap();
                }
            }));
        }
        for worker in workers {
            worker.await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.list_keys().await.unwrap().len(), 40);
    }

    #[tokio::test]
    async fn test_broken_key_upsert() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        let mut broken = BrokenKey {
            fingerprint: FINGERPRINT.into(),
            next_retry_sync: now,
            error_message: "no fingerprint line".into(),
        };
        store.record_broken_key(&broken).await.unwrap();

        broken.next_retry_sync = now + TimeDelta::days(7);
        broken.error_message = "expected one pub line".into();
        store.record_broken_key(&broken).await.unwrap();

        assert_eq!(store.broken_key(FINGERPRINT).await.unwrap(), Some(broken));
        assert!(store.broken_key(&"C".repeat(40)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_test_reports_and_purge_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.db");
        let now = Utc::now();

        {
            let store = SqliteStore::open(&path).unwrap();
            let mut old = TestReport::new(FINGERPRINT, now - TimeDelta::hours(13));
            old.set_result("has_uid", Some(true)).unwrap();
            store.save_test_report(&old).await.unwrap();

            let mut fresh = TestReport::new(FINGERPRINT, now);
            fresh.set_result("not_expired", Some(false)).unwrap();
            fresh.set_result("primary_self_sig_strong_hash", None).unwrap();
            store.save_test_report(&fresh).await.unwrap();

            let cutoff = now - TimeDelta::hours(12);
            assert_eq!(store.purge_test_reports(cutoff).await.unwrap(), 1);
        }

        let reopened = SqliteStore::open(&path).unwrap();
        let reports = reopened.test_reports_for(FINGERPRINT).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].created_at, now);
        assert_eq!(reports[0].result("not_expired"), Some(false));
        assert!(reports[0].results.contains_key("primary_self_sig_strong_hash"));
    }

    #[test]
    fn test_missing_directory_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SqliteStore::open(dir.path().join("missing").join("keys.db")).unwrap_err();
        assert!(matches!(err, Error::Storage(_)), "got {err:?}");
    }

    #[test]
    fn test_non_database_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.db");
        std::fs::write(&path, "not a database\n".repeat(300)).unwrap();

        let err = SqliteStore::open(&path).unwrap_err();
        assert!(matches!(err, Error::Storage(_)), "got {err:?}");
    }
}
