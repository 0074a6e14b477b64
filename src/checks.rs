//! The best-practice battery: a fixed set of named pass/fail/unknown checks.

use std::collections::BTreeMap;

use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{Capability, Expiring, KeyLine, ParsedKey};

/// Symmetric algorithm IDs considered strong: AES-128/192/256, Twofish, Camellia-128/192/256.
const STRONG_CIPHERS: &[u8] = &[7, 8, 9, 10, 11, 12, 13];

/// Hash algorithm IDs considered strong: SHA-256, SHA-384, SHA-512, SHA3-256 and SHA3-512.
const STRONG_DIGESTS: &[u8] = &[8, 9, 10, 12, 14];

const RSA_ACCEPTABLE_BITS: u32 = 3072;
const RSA_RECOMMENDED_BITS: u32 = 4096;
const MAX_EXPIRY_MONTHS: u32 = 24;

#[derive(Debug, Clone, Copy)]
pub struct KeyTest {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    check: fn(&ParsedKey, NaiveDate) -> Option<bool>,
}

impl PartialEq for KeyTest {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for KeyTest {}

impl KeyTest {
    pub fn run(&self, key: &ParsedKey, today: NaiveDate) -> Option<bool> {
        (self.check)(key, today)
    }
}

pub static KEY_TESTS: &[KeyTest] = &[
    KeyTest {
        id: "openpgp_v4_only",
        name: "OpenPGP version 4",
        description: "Every packet in the key uses the version 4 format",
        check: openpgp_v4_only,
    },
    KeyTest {
        id: "rsa_key_acceptable",
        name: "RSA key size acceptable",
        description: "RSA primary keys are at least 3072 bits",
        check: rsa_key_acceptable,
    },
    KeyTest {
        id: "rsa_key_recommended",
        name: "RSA key size recommended",
        description: "RSA primary keys are at least 4096 bits",
        check: rsa_key_recommended,
    },
    KeyTest {
        id: "expiry_within_two_years",
        name: "Expiry date set",
        description: "The primary key expires no more than two years from now",
        check: expiry_within_two_years,
    },
    KeyTest {
        id: "not_expired",
        name: "Not expired",
        description: "The primary key has not expired",
        check: not_expired,
    },
    KeyTest {
        id: "encryption_subkey",
        name: "Encryption subkey",
        description: "A valid subkey can encrypt",
        check: encryption_subkey,
    },
    KeyTest {
        id: "signing_subkey",
        name: "Signing subkey",
        description: "A valid subkey can sign",
        check: signing_subkey,
    },
    KeyTest {
        id: "has_uid",
        name: "User ID",
        description: "The key has at least one valid User ID",
        check: has_uid,
    },
    KeyTest {
        id: "strong_cipher_preferred",
        name: "Strong cipher preferred",
        description: "The first cipher preference is a strong algorithm",
        check: strong_cipher_preferred,
    },
    KeyTest {
        id: "strong_digest_preferred",
        name: "Strong digest preferred",
        description: "The first digest preference is a strong algorithm",
        check: strong_digest_preferred,
    },
    KeyTest {
        id: "primary_self_sig_strong_hash",
        name: "Primary key self-signature hash",
        description: "The primary key's self-signature uses a strong hash",
        check: not_evaluated,
    },
    KeyTest {
        id: "subkey_self_sig_strong_hash",
        name: "Subkey self-signature hash",
        description: "Subkey binding signatures use a strong hash",
        check: not_evaluated,
    },
];

pub fn find_key_test(id: &str) -> Option<&'static KeyTest> {
    KEY_TESTS.iter().find(|t| t.id == id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestOutcome {
    pub test: &'static KeyTest,
    /// `None` when the key doesn't carry what the check needs.
    pub result: Option<bool>,
}

pub fn run_key_tests(key: &ParsedKey, today: NaiveDate) -> Vec<TestOutcome> {
    KEY_TESTS
        .iter()
        .map(|test| TestOutcome {
            test,
            result: test.run(key, today),
        })
        .collect()
}

fn openpgp_v4_only(key: &ParsedKey, _today: NaiveDate) -> Option<bool> {
    let versions = key.openpgp_versions.as_ref()?;
    if versions.is_empty() {
        return None;
    }
    Some(versions.iter().all(|&v| v == 4))
}

fn rsa_key_acceptable(key: &ParsedKey, _today: NaiveDate) -> Option<bool> {
    rsa_at_least(key, RSA_ACCEPTABLE_BITS)
}

fn rsa_key_recommended(key: &ParsedKey, _today: NaiveDate) -> Option<bool> {
    rsa_at_least(key, RSA_RECOMMENDED_BITS)
}

fn rsa_at_least(key: &ParsedKey, bits: u32) -> Option<bool> {
    if !key.algorithm.is_rsa() {
        return None;
    }
    Some(key.length_bits.is_some_and(|len| len >= bits))
}

fn expiry_within_two_years(key: &ParsedKey, today: NaiveDate) -> Option<bool> {
    let Some(expiry) = key.expiry_date else {
        return Some(false);
    };
    let limit = today.checked_add_months(Months::new(MAX_EXPIRY_MONTHS))?;
    Some(expiry <= limit)
}

fn not_expired(key: &ParsedKey, today: NaiveDate) -> Option<bool> {
    Some(!key.has_expired(today))
}

fn encryption_subkey(key: &ParsedKey, today: NaiveDate) -> Option<bool> {
    Some(has_usable_subkey(key, Capability::Encrypt, today))
}

fn signing_subkey(key: &ParsedKey, today: NaiveDate) -> Option<bool> {
    Some(has_usable_subkey(key, Capability::Sign, today))
}

fn has_usable_subkey(key: &ParsedKey, capability: Capability, today: NaiveDate) -> bool {
    key.subkeys
        .iter()
        .any(|sub: &KeyLine| sub.has_capability(capability) && !sub.revoked && !sub.has_expired(today))
}

fn has_uid(key: &ParsedKey, _today: NaiveDate) -> Option<bool> {
    Some(!key.uids.is_empty())
}

fn strong_cipher_preferred(key: &ParsedKey, _today: NaiveDate) -> Option<bool> {
    first_is_strong(key.cipher_preferences.as_deref(), STRONG_CIPHERS)
}

fn strong_digest_preferred(key: &ParsedKey, _today: NaiveDate) -> Option<bool> {
    first_is_strong(key.digest_preferences.as_deref(), STRONG_DIGESTS)
}

fn first_is_strong(preferences: Option<&[u8]>, strong: &[u8]) -> Option<bool> {
    let first = preferences?.first()?;
    Some(strong.contains(first))
}

// Self-signature hash algorithms are not extracted from the packet dump yet.
fn not_evaluated(_key: &ParsedKey, _today: NaiveDate) -> Option<bool> {
    None
}

/// Stored results of one run of the battery against one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub id: Uuid,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    /// Test id to pass (`true`), fail (`false`) or not evaluated (`null`).
    pub results: BTreeMap<String, Option<bool>>,
}

impl TestReport {
    pub fn new(fingerprint: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            fingerprint: fingerprint.into(),
            created_at,
            results: BTreeMap::new(),
        }
    }

    pub fn from_outcomes(
        fingerprint: impl Into<String>,
        created_at: DateTime<Utc>,
        outcomes: &[TestOutcome],
    ) -> Self {
        let mut report = Self::new(fingerprint, created_at);
        for outcome in outcomes {
            report
                .results
                .insert(outcome.test.id.to_string(), outcome.result);
        }
        report
    }

    /// Records one result. Ids outside [`KEY_TESTS`] are rejected.
    pub fn set_result(&mut self, test_id: &str, result: Option<bool>) -> Result<()> {
        let test = find_key_test(test_id).ok_or_else(|| Error::UnknownKeyTest(test_id.to_string()))?;
        self.results.insert(test.id.to_string(), result);
        Ok(())
    }

    pub fn result(&self, test_id: &str) -> Option<bool> {
        self.results.get(test_id).copied().flatten()
    }

    /// Every known test with its recorded result, in battery order.
    pub fn outcomes(&self) -> Vec<TestOutcome> {
        KEY_TESTS
            .iter()
            .map(|test| TestOutcome {
                test,
                result: self.result(test.id),
            })
            .collect()
    }
}
