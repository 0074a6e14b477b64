use std::io;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::parse::ParseError;
use crate::types::Algorithm;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("command execution failed: {0}")]
    Command(#[from] io::Error),

    #[error("gpg exited with status {status}: {stderr}")]
    Gpg { status: i32, stderr: String },

    #[error("gpg produced no output")]
    EmptyGpgOutput,

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("invalid fingerprint '{fingerprint}': {reason}")]
    InvalidFingerprint { fingerprint: String, reason: String },

    #[error("not an ASCII-armored public key: {0}")]
    InvalidArmoredKey(&'static str),

    #[error("no such key: {0}")]
    NoSuchKey(String),

    #[error("keyserver request failed: {0}")]
    Transport(String),

    #[error("failed to parse key {fingerprint}: {source}")]
    KeyParsing {
        fingerprint: String,
        #[source]
        source: KeyParsingError,
    },

    #[error("key {fingerprint} marked as broken, not syncing until {next_retry_sync}")]
    BrokenKey {
        fingerprint: String,
        next_retry_sync: DateTime<Utc>,
    },

    #[error("key {fingerprint}: stored algorithm `{stored}` does not match parsed `{parsed}`")]
    AlgorithmMismatch {
        fingerprint: String,
        stored: Algorithm,
        parsed: Algorithm,
    },

    #[error("unknown key test `{0}`")]
    UnknownKeyTest(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether the same operation may reasonably be retried soon.
    ///
    /// Timeouts, keyserver transport failures and gpg process failures are
    /// transient. Missing keys, broken keys and invariant violations are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport(_) => true,
            Self::KeyParsing { source, .. } => !source.is_fatal(),
            _ => false,
        }
    }
}

/// Why a key could not be turned into a [`ParsedKey`](crate::ParsedKey).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum KeyParsingError {
    /// gpg itself failed (non-zero exit, empty output). No state is recorded.
    #[error("gpg could not decode the key: {0}")]
    Toolkit(String),

    /// gpg produced output that does not describe a single coherent key.
    #[error(transparent)]
    Structure(#[from] ParseError),
}

impl KeyParsingError {
    /// Fatal failures open the broken-key circuit breaker.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Structure(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
