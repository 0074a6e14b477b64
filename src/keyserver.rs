use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};

/// Where ASCII-armored key material comes from.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Fetches the armored export of `key_id` (e.g. `0x309F635DAD1B5517`).
    async fn download(&self, key_id: &str) -> Result<Vec<u8>>;
}

/// HKP keyserver client.
///
/// Issues `GET {base}/pks/lookup?op=get&options=mr&search={key_id}`.
#[derive(Debug, Clone)]
pub struct Keyserver {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl Keyserver {
    /// `base_url` is trimmed and stripped of trailing slashes.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("keywarden/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.keyserver_url, config.keyserver_timeout())
    }

    fn lookup_url(&self, key_id: &str) -> String {
        format!(
            "{}/pks/lookup?op=get&options=mr&search={}",
            self.base_url, key_id
        )
    }

    fn map_send_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout {
                operation: "keyserver lookup",
                timeout: self.timeout,
            }
        } else {
            Error::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl KeySource for Keyserver {
    async fn download(&self, key_id: &str) -> Result<Vec<u8>> {
        let url = self.lookup_url(key_id);
        debug!(%url, "fetching key from keyserver");

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NoSuchKey(format!("keyserver HTTP 404 for key {key_id}")));
        }
        if !status.is_success() {
            warn!(%status, key_id, "keyserver returned an error");
            return Err(Error::Transport(format!("keyserver returned HTTP {status} for {key_id}")));
        }

        let body = resp.bytes().await.map_err(|e| self.map_send_error(e))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(Error::NoSuchKey(format!("keyserver returned no data for key {key_id}")));
        }

        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    /// Loopback HTTP server that answers exactly one request.
    struct MockServer {
        addr: String,
        listener: TcpListener,
    }

    impl MockServer {
        fn new() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
            Self { addr, listener }
        }

        fn url(&self) -> &str {
            &self.addr
        }

        /// Accepts one request, replies with `status` and `body`, and returns the request path.
        fn respond(self, status: u16, body: &str) -> String {
            let (mut stream, _) = self.listener.accept().unwrap();
            let path = read_request_path(&stream);

            let response = format!(
                "HTTP/1.1 {status} Status\r\nContent-Type: application/pgp-keys\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
            path
        }

        /// Accepts one request and holds the connection open without replying.
        fn stall(self, hold: Duration) {
            let (stream, _) = self.listener.accept().unwrap();
            read_request_path(&stream);
            std::thread::sleep(hold);
        }
    }

    fn read_request_path(stream: &std::net::TcpStream) -> String {
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut request_line = String::new();
        reader.read_line(&mut request_line).unwrap();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if line.trim().is_empty() {
                break;
            }
        }
        request_line
            .split_whitespace()
            .nth(1)
            .unwrap_or_default()
            .to_string()
    }

    const ARMORED: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----\n\nmQINBFRT...\n-----END PGP PUBLIC KEY BLOCK-----\n";

    #[test]
    fn test_base_url_normalised() {
        let keyserver = Keyserver::new("  https://keys.example.org//  ", Duration::from_secs(5)).unwrap();
        assert_eq!(
            keyserver.lookup_url("0x309F635DAD1B5517"),
            "https://keys.example.org/pks/lookup?op=get&options=mr&search=0x309F635DAD1B5517"
        );
    }

    #[tokio::test]
    async fn test_download_success() {
        let server = MockServer::new();
        let keyserver = Keyserver::new(server.url(), Duration::from_secs(5)).unwrap();
        let handle = std::thread::spawn(move || server.respond(200, ARMORED));

        let body = keyserver.download("0x309F635DAD1B5517").await.unwrap();
        let path = handle.join().unwrap();

        assert_eq!(body, ARMORED.as_bytes());
        assert_eq!(
            path,
            "/pks/lookup?op=get&options=mr&search=0x309F635DAD1B5517"
        );
    }

    #[tokio::test]
    async fn test_download_404_is_no_such_key() {
        let server = MockServer::new();
        let keyserver = Keyserver::new(server.url(), Duration::from_secs(5)).unwrap();
        let handle = std::thread::spawn(move || server.respond(404, "No results found"));

        let err = keyserver.download("0x309F635DAD1B5517").await.unwrap_err();
        handle.join().unwrap();

        assert!(matches!(err, Error::NoSuchKey(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_download_500_is_transport_error() {
        let server = MockServer::new();
        let keyserver = Keyserver::new(server.url(), Duration::from_secs(5)).unwrap();
        let handle = std::thread::spawn(move || server.respond(502, "bad gateway"));

        let err = keyserver.download("0x309F635DAD1B5517").await.unwrap_err();
        handle.join().unwrap();

        assert!(matches!(err, Error::Transport(_)), "got {err:?}");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_download_empty_body_is_no_such_key() {
        let server = MockServer::new();
        let keyserver = Keyserver::new(server.url(), Duration::from_secs(5)).unwrap();
        let handle = std::thread::spawn(move || server.respond(200, "\n"));

        let err = keyserver.download("0x309F635DAD1B5517").await.unwrap_err();
        handle.join().unwrap();

        assert!(matches!(err, Error::NoSuchKey(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_download_timeout() {
        let server = MockServer::new();
        let keyserver = Keyserver::new(server.url(), Duration::from_millis(200)).unwrap();
        let handle = std::thread::spawn(move || server.stall(Duration::from_secs(1)));

        let err = keyserver.download("0x309F635DAD1B5517").await.unwrap_err();
        handle.join().unwrap();

        assert!(
            matches!(
                err,
                Error::Timeout {
                    operation: "keyserver lookup",
                    ..
                }
            ),
            "got {err:?}"
        );
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let keyserver =
            Keyserver::new(&format!("http://127.0.0.1:{port}"), Duration::from_secs(5)).unwrap();
        let err = keyserver.download("0x309F635DAD1B5517").await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)), "got {err:?}");
    }
}
