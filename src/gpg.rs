use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};

/// Text gpg produced for one ASCII-armored key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedKey {
    /// Output of `--list-keys --with-fingerprint --keyid-format 0xlong`.
    pub list_keys: String,
    /// Output of `--list-packets`, when gpg managed to produce one.
    pub packets: Option<String>,
}

/// Turns ASCII-armored key bytes into gpg's textual description of the key.
#[async_trait]
pub trait KeyDecoder: Send + Sync {
    async fn decode(&self, armored: &[u8]) -> Result<DecodedKey>;
}

/// [`KeyDecoder`] backed by the system `gpg` binary.
///
/// Every call imports the key into a fresh temporary home directory, so keys
/// never meet each other and nothing touches the user's own keyring.
///
/// # Example
///
/// ```no_run
/// # async fn example(armored: &[u8]) -> keywarden::Result<()> {
/// use keywarden::{Gpg, KeyDecoder};
///
/// let gpg = Gpg::new();
/// let decoded = gpg.decode(armored).await?;
/// println!("{}", decoded.list_keys);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Gpg {
    binary: String,
    timeout: Duration,
}

impl Default for Gpg {
    fn default() -> Self {
        Self::new()
    }
}

impl Gpg {
    /// Uses `gpg` from `PATH` with a five second limit per invocation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            binary: "gpg".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            binary: config.gpg_binary.clone(),
            timeout: config.gpg_timeout(),
        }
    }

    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run_gpg<I, S>(&self, homedir: &Path, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.binary);
        cmd.env("LC_ALL", "C")
            .arg("--homedir")
            .arg(homedir)
            .args(["--batch", "--no-tty"])
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(binary = %self.binary, "running gpg");

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| Error::Timeout {
                operation: "gpg",
                timeout: self.timeout,
            })??;

        if !output.status.success() {
            return Err(gpg_error(output.status, &output.stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl KeyDecoder for Gpg {
    async fn decode(&self, armored: &[u8]) -> Result<DecodedKey> {
        let homedir = tempfile::Builder::new().prefix("keywarden-gpg-").tempdir()?;
        let key_path = homedir.path().join("key.asc");
        tokio::fs::write(&key_path, armored).await?;

        self.run_gpg(homedir.path(), [OsStr::new("--import"), key_path.as_os_str()])
            .await?;

        let list_keys = self
            .run_gpg(
                homedir.path(),
                [
                    "--list-keys",
                    "--with-fingerprint",
                    "--keyid-format",
                    "0xlong",
                    "--list-options",
                    "show-unusable-uids,show-unusable-subkeys",
                ],
            )
            .await?;

        if list_keys.trim().is_empty() {
            return Err(Error::EmptyGpgOutput);
        }

        let packets = match self
            .run_gpg(
                homedir.path(),
                [OsStr::new("--list-packets"), key_path.as_os_str()],
            )
            .await
        {
            Ok(dump) if !dump.trim().is_empty() => Some(dump),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "gpg --list-packets failed, continuing without preferences");
                None
            }
        };

        Ok(DecodedKey { list_keys, packets })
    }
}

fn gpg_error(status: std::process::ExitStatus, stderr: &[u8]) -> Error {
    Error::Gpg {
        status: status.code().unwrap_or(-1),
        stderr: String::from_utf8_lossy(stderr).trim().to_string(),
    }
}
