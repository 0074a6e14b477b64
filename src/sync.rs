//! Key synchronization: fetch, decode, parse, reconcile, persist.
//!
//! [`KeySync`] ties a [`KeySource`], a [`KeyDecoder`] and a [`KeyStore`]
//! together. All settings arrive through the [`Config`] passed to
//! [`KeySync::new`].
//!
//! # Example
//!
//! ```no_run
//! use keywarden::{Config, Gpg, KeySync, Keyserver, MemoryStore};
//!
//! # async fn example() -> keywarden::Result<()> {
//! let config = Config::default();
//! let engine = KeySync::new(
//!     config.clone(),
//!     Keyserver::from_config(&config)?,
//!     Gpg::from_config(&config),
//!     MemoryStore::new(),
//! );
//!
//! let key = engine
//!     .get_or_sync("A999B7498D1A8DC473E53C92309F635DAD1B5517", config.max_staleness())
//!     .await?;
//! for alert in &key.alerts {
//!     println!("{}: {}", alert.severity, alert.text);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeSet;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, error, info, warn};

use crate::armor::validate_armored_public_key;
use crate::checks::{TestReport, run_key_tests};
use crate::config::Config;
use crate::error::{Error, KeyParsingError, Result};
use crate::fingerprint::{key_id, validate_fingerprint};
use crate::gpg::{DecodedKey, KeyDecoder};
use crate::keyserver::KeySource;
use crate::parse::{ParseError, parse_list_keys_with_packets};
use crate::reconcile::reconcile;
use crate::store::{BrokenKey, KeyStore, PersistedKey};
use crate::types::ParsedKey;

/// Stands in for a fingerprint in errors about keys supplied without one.
const SUPPLIED_KEY: &str = "supplied key";

/// A key record as found in the store, or freshly initialised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Loaded {
    Existing(PersistedKey),
    /// Not stored yet; persisted by the first successful sync.
    New(PersistedKey),
}

impl Loaded {
    pub fn is_new(&self) -> bool {
        matches!(self, Self::New(_))
    }

    pub fn into_inner(self) -> PersistedKey {
        match self {
            Self::Existing(key) | Self::New(key) => key,
        }
    }
}

/// Result of one successful sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub fingerprint: String,
    pub synced_at: DateTime<Utc>,
    pub uids_replaced: bool,
    pub subkeys_replaced: bool,
}

/// Counts from [`KeySync::sync_due_keys`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub new_keys: usize,
    pub never_synced: usize,
    pub stale: usize,
    pub synced: usize,
    /// Keys skipped because they are marked broken.
    pub skipped: usize,
    pub failed: usize,
}

impl BatchSummary {
    fn record(&mut self, fingerprint: &str, result: Result<()>) {
        match result {
            Ok(()) => self.synced += 1,
            Err(Error::BrokenKey { .. }) => self.skipped += 1,
            Err(e) => {
                warn!(fingerprint, error = %e, "sync failed");
                self.failed += 1;
            }
        }
    }
}

pub struct KeySync<S, D, St> {
    config: Config,
    source: S,
    decoder: D,
    store: St,
}

impl<S, D, St> KeySync<S, D, St>
where
    S: KeySource,
    D: KeyDecoder,
    St: KeyStore,
{
    pub fn new(config: Config, source: S, decoder: D, store: St) -> Self {
        Self {
            config,
            source,
            decoder,
            store,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    /// Loads the record for `fingerprint`, or builds an unsaved blank one.
    pub async fn load_or_init(&self, fingerprint: &str) -> Result<Loaded> {
        let fingerprint = validate_fingerprint(fingerprint)?;
        Ok(match self.store.load_key(fingerprint).await? {
            Some(key) => Loaded::Existing(key),
            None => Loaded::New(PersistedKey::new(fingerprint)),
        })
    }

    /// Brings `key` up to date and persists it.
    ///
    /// With `armored` set, those bytes are used instead of a keyserver download.
    /// `key` is only modified once the new state has been saved.
    pub async fn sync(&self, key: &mut PersistedKey, armored: Option<&[u8]>) -> Result<SyncReport> {
        let now = Utc::now();
        info!(fingerprint = %key.fingerprint, "syncing key");

        let parsed = self.fetch_parsed(&key.fingerprint, armored, now).await?;

        let mut updated = key.clone();
        let outcome = reconcile(&mut updated, &parsed, now, now.date_naive())?;
        self.store.save_key(&updated).await?;
        *key = updated;

        Ok(SyncReport {
            fingerprint: key.fingerprint.clone(),
            synced_at: now,
            uids_replaced: outcome.uids_replaced,
            subkeys_replaced: outcome.subkeys_replaced,
        })
    }

    /// Returns the stored record, syncing first if it is new, never synced,
    /// or older than `max_staleness`.
    ///
    /// A fingerprint the keyserver doesn't know fails with [`Error::NoSuchKey`]
    /// and nothing is stored.
    pub async fn get_or_sync(&self, fingerprint: &str, max_staleness: TimeDelta) -> Result<PersistedKey> {
        let mut key = match self.load_or_init(fingerprint).await? {
            Loaded::Existing(key) if !key.is_due_for_sync(Utc::now(), max_staleness) => {
                debug!(fingerprint, "key is fresh");
                return Ok(key);
            }
            loaded => loaded.into_inner(),
        };

        self.sync(&mut key, None).await?;
        Ok(key)
    }

    /// Syncs `fingerprint` from locally supplied armored bytes.
    ///
    /// The bytes must be a single ASCII-armored public key block; anything else
    /// fails with [`Error::InvalidArmoredKey`] before gpg sees it.
    pub async fn import(&self, fingerprint: &str, armored: &[u8]) -> Result<PersistedKey> {
        let mut key = self.load_or_init(fingerprint).await?.into_inner();
        self.sync(&mut key, Some(armored)).await?;
        Ok(key)
    }

    /// Syncs everything that needs it.
    ///
    /// Fingerprints in `candidates` that aren't stored yet go first, then
    /// stored keys that were never synced, then keys older than
    /// `max_staleness`, oldest first. Failures are logged and counted.
    pub async fn sync_due_keys(&self, candidates: &[String], max_staleness: TimeDelta) -> Result<BatchSummary> {
        let now = Utc::now();
        let stored = self.store.list_keys().await?;
        let known: BTreeSet<&str> = stored.iter().map(|k| k.fingerprint.as_str()).collect();

        let new_fingerprints: BTreeSet<&str> = candidates
            .iter()
            .map(String::as_str)
            .filter(|fp| !known.contains(fp))
            .collect();

        let (mut never_synced, mut stale): (Vec<PersistedKey>, Vec<PersistedKey>) = stored
            .iter()
            .filter(|k| k.is_due_for_sync(now, max_staleness))
            .cloned()
            .partition(|k| k.last_synced.is_none());
        never_synced.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        stale.sort_by_key(|k| k.last_synced);

        let mut summary = BatchSummary {
            new_keys: new_fingerprints.len(),
            never_synced: never_synced.len(),
            stale: stale.len(),
            ..BatchSummary::default()
        };
        info!(
            new = summary.new_keys,
            never_synced = summary.never_synced,
            stale = summary.stale,
            "starting batch sync"
        );

        for fingerprint in new_fingerprints {
            let result = match self.load_or_init(fingerprint).await {
                Ok(loaded) => {
                    let mut key = loaded.into_inner();
                    self.sync(&mut key, None).await.map(drop)
                }
                Err(e) => Err(e),
            };
            summary.record(fingerprint, result);
        }

        for mut key in never_synced.into_iter().chain(stale) {
            let result = self.sync(&mut key, None).await.map(drop);
            summary.record(&key.fingerprint, result);
        }

        info!(
            synced = summary.synced,
            skipped = summary.skipped,
            failed = summary.failed,
            "batch sync finished"
        );
        Ok(summary)
    }

    /// Runs the best-practice battery against the current published key and
    /// stores the results.
    pub async fn evaluate(&self, fingerprint: &str) -> Result<TestReport> {
        let fingerprint = validate_fingerprint(fingerprint)?;
        let now = Utc::now();
        let parsed = self.fetch_parsed(fingerprint, None, now).await?;

        self.store_report(fingerprint, &parsed, now).await
    }

    /// Runs the best-practice battery against a pasted ASCII-armored public key
    /// and stores the results under the fingerprint gpg reports.
    ///
    /// No key record is read or written. A key that gpg cannot make sense of
    /// fails with [`Error::KeyParsing`] and leaves no broken-key marker.
    pub async fn evaluate_armored(&self, armored: &[u8]) -> Result<TestReport> {
        let armored = validate_armored_public_key(armored)
            .inspect_err(|e| warn!(error = %e, "rejected supplied key"))?;
        let now = Utc::now();

        let decoded = self.decode(SUPPLIED_KEY, armored.as_bytes()).await?;
        let parsed = parse_list_keys_with_packets(&decoded.list_keys, decoded.packets.as_deref())
            .map_err(|e| {
                error!(error = %e, "failed to parse gpg output for supplied key");
                debug!(output = %decoded.list_keys, "raw gpg output");
                Error::KeyParsing {
                    fingerprint: SUPPLIED_KEY.to_string(),
                    source: KeyParsingError::Structure(e),
                }
            })?;

        let fingerprint = parsed.fingerprint.clone();
        self.store_report(&fingerprint, &parsed, now).await
    }

    /// Deletes test reports created more than `older_than` ago.
    pub async fn purge_test_reports(&self, older_than: TimeDelta) -> Result<usize> {
        let deleted = self
            .store
            .purge_test_reports(Utc::now() - older_than)
            .await?;
        info!(deleted, "deleted old test results");
        Ok(deleted)
    }

    async fn fetch_parsed(
        &self,
        fingerprint: &str,
        armored: Option<&[u8]>,
        now: DateTime<Utc>,
    ) -> Result<ParsedKey> {
        self.check_circuit_breaker(fingerprint, now).await?;

        let downloaded;
        let armored = match armored {
            Some(bytes) => validate_armored_public_key(bytes)
                .inspect_err(|e| warn!(fingerprint, error = %e, "rejected supplied key"))?
                .as_bytes(),
            None => {
                downloaded = self
                    .source
                    .download(&key_id(fingerprint))
                    .await
                    .inspect_err(|e| warn!(fingerprint, error = %e, "key download failed"))?;
                downloaded.as_slice()
            }
        };

        self.decode_and_parse(fingerprint, armored, now).await
    }

    async fn check_circuit_breaker(&self, fingerprint: &str, now: DateTime<Utc>) -> Result<()> {
        if let Some(broken) = self.store.broken_key(fingerprint).await?
            && broken.blocks_sync_at(now)
        {
            info!(
                fingerprint,
                next_retry_sync = %broken.next_retry_sync,
                "key marked as broken, not syncing"
            );
            return Err(Error::BrokenKey {
                fingerprint: fingerprint.to_string(),
                next_retry_sync: broken.next_retry_sync,
            });
        }
        Ok(())
    }

    async fn decode_and_parse(
        &self,
        fingerprint: &str,
        armored: &[u8],
        now: DateTime<Utc>,
    ) -> Result<ParsedKey> {
        let decoded = self.decode(fingerprint, armored).await?;

        let parsed = parse_list_keys_with_packets(&decoded.list_keys, decoded.packets.as_deref())
            .and_then(|parsed| check_fingerprint(fingerprint, parsed));

        match parsed {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                error!(fingerprint, error = %e, "failed to parse gpg output");
                debug!(fingerprint, output = %decoded.list_keys, "raw gpg output");
                self.record_broken_key(fingerprint, &e, now).await?;
                Err(Error::KeyParsing {
                    fingerprint: fingerprint.to_string(),
                    source: KeyParsingError::Structure(e),
                })
            }
        }
    }

    /// Runs gpg. Its failures are retryable and never mark the key broken.
    async fn decode(&self, fingerprint: &str, armored: &[u8]) -> Result<DecodedKey> {
        match self.decoder.decode(armored).await {
            Ok(decoded) => Ok(decoded),
            Err(e @ (Error::Gpg { .. } | Error::EmptyGpgOutput)) => {
                error!(fingerprint, error = %e, "gpg could not decode key");
                Err(Error::KeyParsing {
                    fingerprint: fingerprint.to_string(),
                    source: KeyParsingError::Toolkit(e.to_string()),
                })
            }
            Err(e) => {
                warn!(fingerprint, error = %e, "gpg did not finish");
                Err(e)
            }
        }
    }

    async fn store_report(
        &self,
        fingerprint: &str,
        parsed: &ParsedKey,
        now: DateTime<Utc>,
    ) -> Result<TestReport> {
        let outcomes = run_key_tests(parsed, now.date_naive());
        let report = TestReport::from_outcomes(fingerprint, now, &outcomes);
        self.store.save_test_report(&report).await?;

        debug!(fingerprint, report = %report.id, "stored test report");
        Ok(report)
    }

    async fn record_broken_key(&self, fingerprint: &str, e: &ParseError, now: DateTime<Utc>) -> Result<()> {
        let broken = BrokenKey {
            fingerprint: fingerprint.to_string(),
            next_retry_sync: now + self.config.broken_key_retry(),
            error_message: e.to_string(),
        };
        warn!(
            fingerprint,
            next_retry_sync = %broken.next_retry_sync,
            "marking key as broken"
        );
        self.store.record_broken_key(&broken).await
    }
}

/// Full fingerprints must match what gpg reports; long key ids can't be checked.
fn check_fingerprint(expected: &str, parsed: ParsedKey) -> std::result::Result<ParsedKey, ParseError> {
    if expected.len() == 40 && parsed.fingerprint != expected {
        return Err(ParseError::FingerprintMismatch {
            expected: expected.to_string(),
            found: parsed.fingerprint,
        });
    }
    Ok(parsed)
}
