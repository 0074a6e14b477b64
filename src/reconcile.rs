//! Folds a freshly parsed key into its persisted record.
//!
//! Reconciliation is pure: it mutates a [`PersistedKey`] in memory and never
//! touches storage. The caller persists the result as one unit.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info};

use crate::alerts::make_alerts;
use crate::error::{Error, Result};
use crate::store::{PersistedKey, SubkeyRow, UidRow};
use crate::types::{Algorithm, KeyLine, ParsedKey};

/// What reconciliation changed in the child collections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub uids_replaced: bool,
    pub subkeys_replaced: bool,
}

/// Applies `parsed` to `key`.
///
/// On error `key` is left exactly as it was.
pub fn reconcile(
    key: &mut PersistedKey,
    parsed: &ParsedKey,
    now: DateTime<Utc>,
    today: NaiveDate,
) -> Result<ReconcileOutcome> {
    reconcile_algorithm(key, parsed.algorithm)?;

    key.length_bits = parsed.length_bits;
    key.ecc_curve = parsed.ecc_curve;
    key.created_date = Some(parsed.created_date);
    key.expiry_date = parsed.expiry_date;
    key.revoked = parsed.revoked;
    key.capabilities = parsed.capabilities.clone();

    let outcome = ReconcileOutcome {
        uids_replaced: reconcile_uids(key, &parsed.uids, now),
        subkeys_replaced: reconcile_subkeys(key, &parsed.subkeys, now),
    };

    key.alerts = make_alerts(&*key, key.revoked, today);
    key.last_synced = Some(now);

    Ok(outcome)
}

fn reconcile_algorithm(key: &mut PersistedKey, parsed: Algorithm) -> Result<()> {
    if key.algorithm.is_unknown() {
        key.algorithm = parsed;
        return Ok(());
    }
    if key.algorithm != parsed {
        return Err(Error::AlgorithmMismatch {
            fingerprint: key.fingerprint.clone(),
            stored: key.algorithm,
            parsed,
        });
    }
    Ok(())
}

fn reconcile_uids(key: &mut PersistedKey, expected: &[String], now: DateTime<Utc>) -> bool {
    let unchanged = key
        .uids
        .iter()
        .map(|row| row.uid_string.as_str())
        .eq(expected.iter().map(String::as_str));
    if unchanged {
        return false;
    }

    info!(fingerprint = %key.fingerprint, count = expected.len(), "replacing UIDs");
    key.uids = expected
        .iter()
        .map(|uid| UidRow::new(uid.as_str(), now))
        .collect();
    true
}

fn reconcile_subkeys(key: &mut PersistedKey, expected: &[KeyLine], now: DateTime<Utc>) -> bool {
    let unchanged = key.subkeys.iter().map(|row| &row.key).eq(expected.iter());
    if unchanged {
        return false;
    }

    if key.subkeys.is_empty() {
        debug!(fingerprint = %key.fingerprint, count = expected.len(), "setting subkeys");
    } else {
        info!(
            fingerprint = %key.fingerprint,
            current = key.subkeys.len(),
            expected = expected.len(),
            "replacing subkeys"
        );
    }
    key.subkeys = expected
        .iter()
        .map(|sub| SubkeyRow::new(sub.clone(), now))
        .collect();
    true
}
