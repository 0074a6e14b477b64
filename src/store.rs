//! Persisted key records and the storage seam the sync engine writes through.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::alerts::Alert;
use crate::checks::TestReport;
use crate::error::{Error, Result};
use crate::fingerprint;
use crate::types::{Algorithm, Capability, EccCurve, Expiring, KeyLine, friendly_type};
use crate::uid::parse_email_from_uid;

/// A User ID row belonging to a [`PersistedKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UidRow {
    pub id: Uuid,
    pub uid_string: String,
    pub created_at: DateTime<Utc>,
}

impl UidRow {
    pub fn new(uid_string: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            uid_string: uid_string.into(),
            created_at: now,
        }
    }

    /// The email address in this UID, if one can be found. Pure; nothing is stored.
    pub fn email_address(&self) -> Option<&str> {
        parse_email_from_uid(&self.uid_string)
    }
}

/// A subkey row belonging to a [`PersistedKey`], keyed by parent fingerprint and long id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubkeyRow {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub key: KeyLine,
}

impl SubkeyRow {
    pub fn new(key: KeyLine, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            key,
        }
    }
}

/// The durable record for one primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedKey {
    pub fingerprint: String,
    /// Empty until the first successful sync; never changes afterwards.
    pub algorithm: Algorithm,
    pub length_bits: Option<u32>,
    pub ecc_curve: Option<EccCurve>,
    pub capabilities: Vec<Capability>,
    pub created_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub revoked: bool,
    pub last_synced: Option<DateTime<Utc>>,
    pub alerts: Vec<Alert>,
    pub uids: Vec<UidRow>,
    pub subkeys: Vec<SubkeyRow>,
}

impl PersistedKey {
    /// A blank, never-synced record. Callers validate the fingerprint first.
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            algorithm: Algorithm::Unknown,
            length_bits: None,
            ecc_curve: None,
            capabilities: Vec::new(),
            created_date: None,
            expiry_date: None,
            revoked: false,
            last_synced: None,
            alerts: Vec::new(),
            uids: Vec::new(),
            subkeys: Vec::new(),
        }
    }

    /// Identifier used for keyserver lookups, e.g. `0x309F635DAD1B5517`.
    pub fn key_id(&self) -> String {
        fingerprint::key_id(&self.fingerprint)
    }

    pub fn zero_x_fingerprint(&self) -> String {
        fingerprint::zero_x_fingerprint(&self.fingerprint)
    }

    pub fn human_fingerprint(&self) -> String {
        fingerprint::human_fingerprint(&self.fingerprint)
    }

    pub fn uid_strings(&self) -> Vec<&str> {
        self.uids.iter().map(|u| u.uid_string.as_str()).collect()
    }

    pub fn uids_string(&self) -> String {
        self.uid_strings().join(", ")
    }

    /// Email addresses found in the key's UIDs, in UID order.
    pub fn email_addresses(&self) -> Vec<&str> {
        self.uids.iter().filter_map(UidRow::email_address).collect()
    }

    pub fn friendly_type(&self) -> String {
        friendly_type(self.algorithm, self.length_bits, self.ecc_curve)
    }

    pub fn friendly_capabilities(&self) -> Vec<&'static str> {
        self.capabilities.iter().map(Capability::description).collect()
    }

    /// A key is due when it has never been synced or was last synced more
    /// than `max_staleness` before `now`.
    pub fn is_due_for_sync(&self, now: DateTime<Utc>, max_staleness: TimeDelta) -> bool {
        match self.last_synced {
            None => true,
            Some(last) => now - last > max_staleness,
        }
    }
}

impl Expiring for PersistedKey {
    fn expiry_date(&self) -> Option<NaiveDate> {
        self.expiry_date
    }
}

/// Circuit-breaker record for a key gpg could not make sense of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenKey {
    pub fingerprint: String,
    pub next_retry_sync: DateTime<Utc>,
    pub error_message: String,
}

impl BrokenKey {
    /// Whether syncs should still be skipped at `now`.
    pub fn blocks_sync_at(&self, now: DateTime<Utc>) -> bool {
        now < self.next_retry_sync
    }
}

/// Storage for key records, broken-key markers and test reports.
///
/// `save_key` replaces the whole aggregate (fields, UID rows, subkey rows,
/// alerts, `last_synced`) as one unit: readers see either the previous record
/// or the new one, never a mix.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn load_key(&self, fingerprint: &str) -> Result<Option<PersistedKey>>;

    async fn save_key(&self, key: &PersistedKey) -> Result<()>;

    async fn list_keys(&self) -> Result<Vec<PersistedKey>>;

    async fn broken_key(&self, fingerprint: &str) -> Result<Option<BrokenKey>>;

    /// Inserts or replaces the marker for `broken.fingerprint`.
    async fn record_broken_key(&self, broken: &BrokenKey) -> Result<()>;

    async fn save_test_report(&self, report: &TestReport) -> Result<()>;

    async fn test_reports_for(&self, fingerprint: &str) -> Result<Vec<TestReport>>;

    /// Deletes reports created before `cutoff`, returning how many went.
    async fn purge_test_reports(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

#[derive(Debug, Default)]
struct StoreState {
    keys: BTreeMap<String, PersistedKey>,
    broken_keys: BTreeMap<String, BrokenKey>,
    test_reports: Vec<TestReport>,
}

impl StoreState {
    fn purge_test_reports(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.test_reports.len();
        self.test_reports.retain(|r| r.created_at >= cutoff);
        before - self.test_reports.len()
    }

    fn test_reports_for(&self, fingerprint: &str) -> Vec<TestReport> {
        self.test_reports
            .iter()
            .filter(|r| r.fingerprint == fingerprint)
            .cloned()
            .collect()
    }
}

/// Process-local [`KeyStore`]. Each call holds one lock for its whole update.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut StoreState) -> T) -> Result<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::Storage("memory store lock poisoned".into()))?;
        Ok(f(&mut state))
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn load_key(&self, fingerprint: &str) -> Result<Option<PersistedKey>> {
        self.with_state(|s| s.keys.get(fingerprint).cloned())
    }

    async fn save_key(&self, key: &PersistedKey) -> Result<()> {
        self.with_state(|s| {
            s.keys.insert(key.fingerprint.clone(), key.clone());
        })
    }

    async fn list_keys(&self) -> Result<Vec<PersistedKey>> {
        self.with_state(|s| s.keys.values().cloned().collect())
    }

    async fn broken_key(&self, fingerprint: &str) -> Result<Option<BrokenKey>> {
        self.with_state(|s| s.broken_keys.get(fingerprint).cloned())
    }

    async fn record_broken_key(&self, broken: &BrokenKey) -> Result<()> {
        self.with_state(|s| {
            s.broken_keys
                .insert(broken.fingerprint.clone(), broken.clone());
        })
    }

    async fn save_test_report(&self, report: &TestReport) -> Result<()> {
        self.with_state(|s| s.test_reports.push(report.clone()))
    }

    async fn test_reports_for(&self, fingerprint: &str) -> Result<Vec<TestReport>> {
        self.with_state(|s| s.test_reports_for(fingerprint))
    }

    async fn purge_test_reports(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.with_state(|s| s.purge_test_reports(cutoff))
    }
}
