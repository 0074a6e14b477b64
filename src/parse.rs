use chrono::NaiveDate;
use tracing::debug;

use crate::types::{Algorithm, Capability, EccCurve, KeyLine, ParsedKey};

/// gpg output that does not describe exactly one coherent key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ParseError {
    #[error("no `Key fingerprint = ...` line in gpg output")]
    MissingFingerprint,

    #[error("expected one fingerprint line, found {0}")]
    MultipleFingerprints(usize),

    #[error("fingerprint `{0}` is not hexadecimal")]
    BadFingerprint(String),

    #[error("no `pub` line in gpg output")]
    MissingPrimaryKey,

    #[error("expected one `pub` line, found {0}")]
    MultiplePrimaryKeys(usize),

    #[error("can't parse key line `{line}`: {reason}")]
    MalformedKeyLine { line: String, reason: &'static str },

    #[error("bad date `{0}`")]
    BadDate(String),

    #[error("unrecognised uid status `{0}`")]
    UnknownUidStatus(String),

    #[error("gpg returned key {found}, expected {expected}")]
    FingerprintMismatch { expected: String, found: String },
}

/// Values pulled from a `gpg --list-packets` dump.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketInfo {
    pub openpgp_versions: Vec<u8>,
    pub cipher_preferences: Option<Vec<u8>>,
    pub digest_preferences: Option<Vec<u8>>,
}

/// Parses the output of `gpg --list-keys --with-fingerprint --keyid-format 0xlong`
/// for a single key.
///
/// ```text
/// pub   rsa4096/0x309F635DAD1B5517 2014-10-31 [SC] [expires: 2018-05-15]
///       Key fingerprint = A999 B749 8D1A 8DC4 73E5  3C92 309F 635D AD1B 5517
/// uid                   [ unknown] Paul Fawkesley <paul@paulfurley.com>
/// sub   rsa4096/0x6F0E3F8F2C1D0B1A 2014-10-31 [E] [expires: 2018-05-15]
/// ```
pub fn parse_list_keys(output: &str) -> Result<ParsedKey, ParseError> {
    let fingerprint = parse_fingerprint_line(output)?;
    let primary = parse_pub_line(output)?;
    let uids = parse_uid_lines(output)?;
    let subkeys = parse_subkey_lines(output)?;

    Ok(ParsedKey {
        fingerprint,
        algorithm: primary.algorithm,
        length_bits: primary.length_bits,
        ecc_curve: primary.ecc_curve,
        capabilities: primary.capabilities,
        created_date: primary.created_date,
        expiry_date: primary.expiry_date,
        revoked: primary.revoked,
        uids,
        subkeys,
        openpgp_versions: None,
        cipher_preferences: None,
        digest_preferences: None,
    })
}

/// Like [`parse_list_keys`], adding preference data from a packet dump.
pub fn parse_list_keys_with_packets(
    output: &str,
    packets: Option<&str>,
) -> Result<ParsedKey, ParseError> {
    let mut parsed = parse_list_keys(output)?;

    if let Some(dump) = packets {
        let info = parse_packets(dump);
        parsed.openpgp_versions = Some(info.openpgp_versions);
        parsed.cipher_preferences = info.cipher_preferences;
        parsed.digest_preferences = info.digest_preferences;
    }

    Ok(parsed)
}

/// Parses a single `pub` or `sub` line.
pub fn parse_key_line(line: &str) -> Result<KeyLine, ParseError> {
    let malformed = |reason| ParseError::MalformedKeyLine {
        line: line.to_string(),
        reason,
    };

    let rest = line
        .strip_prefix("pub")
        .or_else(|| line.strip_prefix("sub"))
        .filter(|rest| rest.starts_with(char::is_whitespace))
        .ok_or_else(|| malformed("line does not start with `pub` or `sub`"))?;

    let mut tokens = rest.split_whitespace();

    let (algorithm_token, long_id) = tokens
        .next()
        .and_then(|t| t.split_once("/0x"))
        .ok_or_else(|| malformed("missing `<algorithm>/0x<long id>`"))?;

    if long_id.len() != 16
        || !long_id
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
    {
        return Err(malformed("long id is not 16 uppercase hex characters"));
    }

    let created_date = parse_date(tokens.next().ok_or_else(|| malformed("missing date"))?)?;

    let capabilities = tokens
        .next()
        .and_then(|t| t.strip_prefix('['))
        .and_then(|t| t.strip_suffix(']'))
        .filter(|letters| !letters.is_empty())
        .ok_or_else(|| malformed("missing `[capabilities]`"))?
        .chars()
        .map(Capability::from_gpg_char)
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| malformed("unknown capability letter"))?;

    let status = tokens.collect::<Vec<_>>().join(" ");
    let (expiry_date, revoked) = parse_status(&status).ok_or_else(|| malformed("bad status"))??;

    let (algorithm, length_bits, ecc_curve) = decode_algorithm(algorithm_token);

    Ok(KeyLine {
        long_id: long_id.to_string(),
        algorithm,
        length_bits,
        ecc_curve,
        capabilities,
        created_date,
        expiry_date,
        revoked,
    })
}

/// Extracts versions and algorithm preferences from `gpg --list-packets` output.
///
/// Only the first `pref-sym-algos` and `pref-hash-algos` subpackets count.
pub fn parse_packets(dump: &str) -> PacketInfo {
    let mut info = PacketInfo::default();

    for line in dump.lines() {
        let trimmed = line.trim_start();

        if let Some(rest) = trimmed.strip_prefix("version ") {
            let number = rest.split(',').next().unwrap_or_default().trim();
            match number.parse::<u8>() {
                Ok(version) if !info.openpgp_versions.contains(&version) => {
                    info.openpgp_versions.push(version);
                }
                Ok(_) => {}
                Err(_) => debug!(line = trimmed, "skipping unparsable version line"),
            }
        }

        if info.cipher_preferences.is_none() {
            info.cipher_preferences = parse_preference_list(trimmed, "(pref-sym-algos:");
        }

        if info.digest_preferences.is_none() {
            info.digest_preferences = parse_preference_list(trimmed, "(pref-hash-algos:");
        }
    }

    info.openpgp_versions.sort_unstable();
    info
}

fn parse_preference_list(line: &str, marker: &str) -> Option<Vec<u8>> {
    let start = line.find(marker)? + marker.len();
    let rest = &line[start..];
    let list = rest.split(')').next().unwrap_or(rest);

    Some(
        list.split_whitespace()
            .filter_map(|id| match id.parse::<u8>() {
                Ok(id) => Some(id),
                Err(_) => {
                    debug!(id, "skipping non-numeric algorithm preference");
                    None
                }
            })
            .collect(),
    )
}

fn parse_fingerprint_line(output: &str) -> Result<String, ParseError> {
    let fingerprints: Vec<&str> = output
        .lines()
        .filter_map(|line| line.trim_start().strip_prefix("Key fingerprint = "))
        .collect();

    let raw = match fingerprints.as_slice() {
        [] => return Err(ParseError::MissingFingerprint),
        [single] => *single,
        many => return Err(ParseError::MultipleFingerprints(many.len())),
    };

    let fingerprint: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();

    if fingerprint.is_empty() || !fingerprint.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ParseError::BadFingerprint(raw.to_string()));
    }

    Ok(fingerprint)
}

fn parse_pub_line(output: &str) -> Result<KeyLine, ParseError> {
    let pub_lines: Vec<&str> = record_lines(output, "pub").collect();

    match pub_lines.as_slice() {
        [] => Err(ParseError::MissingPrimaryKey),
        [line] => parse_key_line(line),
        many => Err(ParseError::MultiplePrimaryKeys(many.len())),
    }
}

fn parse_subkey_lines(output: &str) -> Result<Vec<KeyLine>, ParseError> {
    record_lines(output, "sub").map(parse_key_line).collect()
}

/// Keeps UIDs gpg does not mark as revoked or expired, in listing order.
///
/// ```text
/// uid                   [ revoked] Someone (comment) <a@example.com>
/// uid                   [ultimate] Someone <b@example.com>
/// ```
fn parse_uid_lines(output: &str) -> Result<Vec<String>, ParseError> {
    let mut uids = Vec::new();

    for line in record_lines(output, "uid") {
        let Some((status, uid)) = split_uid_line(line) else {
            debug!(line, "skipping uid line without a status");
            continue;
        };

        match status {
            "unknown" | "ultimate" => uids.push(uid.to_string()),
            "revoked" | "expired" => debug!(status, uid, "dropping unusable uid"),
            other => return Err(ParseError::UnknownUidStatus(other.to_string())),
        }
    }

    Ok(uids)
}

fn split_uid_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix("uid")?.trim_start().strip_prefix('[')?;
    let (status, uid) = rest.split_once(']')?;
    Some((status.trim(), uid.strip_prefix(' ').unwrap_or(uid)))
}

fn record_lines<'a>(output: &'a str, record_type: &'a str) -> impl Iterator<Item = &'a str> {
    output
        .lines()
        .filter(move |line| line.split_whitespace().next() == Some(record_type))
}

/// Interprets the optional trailing `[expires: ...]`, `[expired: ...]` or
/// `[revoked: ...]` clause. Returns `None` if the clause is not one of those.
fn parse_status(status: &str) -> Option<Result<(Option<NaiveDate>, bool), ParseError>> {
    if status.is_empty() {
        return Some(Ok((None, false)));
    }

    let (kind, value) = status
        .strip_prefix('[')?
        .strip_suffix(']')?
        .split_once(':')?;

    let value = value.trim();
    let parsed = match kind.trim() {
        "expires" | "expired" if value == "never" => Ok((None, false)),
        "expires" | "expired" => parse_date(value).map(|date| (Some(date), false)),
        "revoked" => Ok((None, true)),
        _ => return None,
    };
    Some(parsed)
}

fn parse_date(value: &str) -> Result<NaiveDate, ParseError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| ParseError::BadDate(value.to_string()))
}

/// Maps gpg's algorithm token (`rsa4096`, `ed25519`, `elg2048`, ...) to an
/// algorithm, a bit length and a curve.
///
/// Unrecognised tokens are not an error: new algorithms appear over time and
/// are recorded as [`Algorithm::Unknown`].
fn decode_algorithm(token: &str) -> (Algorithm, Option<u32>, Option<EccCurve>) {
    if let Some(curve) = EccCurve::from_gpg_token(token) {
        return (Algorithm::Ecc, None, Some(curve));
    }

    if let Some(split) = token.find(|c: char| c.is_ascii_digit()) {
        let (prefix, digits) = token.split_at(split);
        let algorithm = match prefix {
            "rsa" => Some(Algorithm::Rsa),
            "dsa" => Some(Algorithm::Dsa),
            "elg" => Some(Algorithm::Elgamal),
            _ => None,
        };

        if let Some(algorithm) = algorithm
            && let Ok(bits) = digits.parse::<u32>()
        {
            return (algorithm, Some(bits), None);
        }
    }

    debug!(token, "unrecognised algorithm token");
    (Algorithm::Unknown, None, None)
}
