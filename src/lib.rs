//! Track OpenPGP keys published on a keyserver.
//!
//! This crate fetches ASCII-armored keys, decodes them with `gpg`, parses
//! gpg's listing into Rust types, and keeps a persisted record of each key in
//! step with what is published. Each record carries expiry and revocation
//! alerts, and a battery of best-practice checks can be run against any key.
//!
//! # Example
//!
//! ```no_run
//! use keywarden::{Config, Gpg, KeySync, Keyserver, SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> keywarden::Result<()> {
//!     let config = Config::default();
//!     let engine = KeySync::new(
//!         config.clone(),
//!         Keyserver::from_config(&config)?,
//!         Gpg::from_config(&config),
//!         SqliteStore::open(&config.store_path)?,
//!     );
//!
//!     let key = engine
//!         .get_or_sync("A999B7498D1A8DC473E53C92309F635DAD1B5517", config.max_staleness())
//!         .await?;
//!     println!("{} {}", key.human_fingerprint(), key.friendly_type());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Requirements
//!
//! - `gpg` (GnuPG 2.1 or later) on `PATH`, or configured via `gpg_binary`
//! - Network access to an HKP keyserver for anything other than local imports

mod alerts;
mod armor;
mod checks;
mod config;
mod error;
mod fingerprint;
mod gpg;
mod keyserver;
mod parse;
mod reconcile;
mod sqlite_store;
mod store;
mod sync;
mod types;
mod uid;

pub use alerts::{Alert, Severity, make_alerts};
pub use armor::{PUBLIC_KEY_FOOTER, PUBLIC_KEY_HEADER, validate_armored_public_key};
pub use checks::{KEY_TESTS, KeyTest, TestOutcome, TestReport, find_key_test, run_key_tests};
pub use config::{Config, DEFAULT_KEYSERVER_URL, KEYSERVER_URL_ENV_VAR, STORE_PATH_ENV_VAR};
pub use error::{Error, KeyParsingError, Result};
pub use fingerprint::{
    human_fingerprint, key_id, normalize_fingerprint, validate_fingerprint, zero_x_fingerprint,
};
pub use gpg::{DecodedKey, Gpg, KeyDecoder};
pub use keyserver::{KeySource, Keyserver};
pub use parse::{
    PacketInfo, ParseError, parse_key_line, parse_list_keys, parse_list_keys_with_packets,
    parse_packets,
};
pub use reconcile::{ReconcileOutcome, reconcile};
pub use sqlite_store::{BUSY_TIMEOUT, SqliteStore};
pub use store::{BrokenKey, KeyStore, MemoryStore, PersistedKey, SubkeyRow, UidRow};
pub use sync::{BatchSummary, KeySync, Loaded, SyncReport};
pub use types::{
    Algorithm, Capability, EccCurve, Expiring, KeyLine, ParsedKey, friendly_type,
};
pub use uid::{UidParts, parse_email_from_uid, parse_uid_parts};
