use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Public-key algorithm of a primary key or subkey.
///
/// Serialised as the strings stored alongside a key record. Tokens gpg prints
/// that we do not recognise map to [`Algorithm::Unknown`], which is stored as
/// an empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Algorithm {
    #[default]
    #[serde(rename = "")]
    Unknown,
    #[serde(rename = "RSA")]
    Rsa,
    #[serde(rename = "RSA-ENCRYPT")]
    RsaEncrypt,
    #[serde(rename = "RSA-SIGN")]
    RsaSign,
    #[serde(rename = "ELGAMAL")]
    Elgamal,
    #[serde(rename = "DSA")]
    Dsa,
    #[serde(rename = "ECC")]
    Ecc,
}

impl Algorithm {
    pub const ALL: [Algorithm; 7] = [
        Self::Unknown,
        Self::Rsa,
        Self::RsaEncrypt,
        Self::RsaSign,
        Self::Elgamal,
        Self::Dsa,
        Self::Ecc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "",
            Self::Rsa => "RSA",
            Self::RsaEncrypt => "RSA-ENCRYPT",
            Self::RsaSign => "RSA-SIGN",
            Self::Elgamal => "ELGAMAL",
            Self::Dsa => "DSA",
            Self::Ecc => "ECC",
        }
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::Unknown
    }

    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::Rsa | Self::RsaEncrypt | Self::RsaSign)
    }

    /// Algorithms whose strength is described by a bit length rather than a curve.
    pub fn has_key_length(&self) -> bool {
        matches!(
            self,
            Self::Rsa | Self::RsaEncrypt | Self::RsaSign | Self::Dsa | Self::Elgamal
        )
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named elliptic curves gpg reports in place of a bit length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum EccCurve {
    #[serde(rename = "ed25519")]
    Ed25519,
    #[serde(rename = "cv25519")]
    Cv25519,
    #[serde(rename = "ed448")]
    Ed448,
    #[serde(rename = "cv448")]
    Cv448,
    #[serde(rename = "nistp256")]
    NistP256,
    #[serde(rename = "nistp384")]
    NistP384,
    #[serde(rename = "nistp521")]
    NistP521,
    #[serde(rename = "brainpoolP256r1")]
    BrainpoolP256r1,
    #[serde(rename = "brainpoolP384r1")]
    BrainpoolP384r1,
    #[serde(rename = "brainpoolP512r1")]
    BrainpoolP512r1,
    #[serde(rename = "secp256k1")]
    Secp256k1,
}

impl EccCurve {
    pub const ALL: [EccCurve; 11] = [
        Self::Ed25519,
        Self::Cv25519,
        Self::Ed448,
        Self::Cv448,
        Self::NistP256,
        Self::NistP384,
        Self::NistP521,
        Self::BrainpoolP256r1,
        Self::BrainpoolP384r1,
        Self::BrainpoolP512r1,
        Self::Secp256k1,
    ];

    /// Matches the algorithm token from a gpg key line, e.g. `ed25519` or `brainpoolP256r1`.
    ///
    /// Matching ignores case and accepts the `curve25519`/`curve448` spellings
    /// some gpg versions use for the encryption curves.
    pub fn from_gpg_token(token: &str) -> Option<Self> {
        let lower = token.to_ascii_lowercase();
        match lower.as_str() {
            "curve25519" => return Some(Self::Cv25519),
            "curve448" => return Some(Self::Cv448),
            _ => {}
        }
        Self::ALL
            .into_iter()
            .find(|curve| curve.as_str().eq_ignore_ascii_case(&lower))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::Cv25519 => "cv25519",
            Self::Ed448 => "ed448",
            Self::Cv448 => "cv448",
            Self::NistP256 => "nistp256",
            Self::NistP384 => "nistp384",
            Self::NistP521 => "nistp521",
            Self::BrainpoolP256r1 => "brainpoolP256r1",
            Self::BrainpoolP384r1 => "brainpoolP384r1",
            Self::BrainpoolP512r1 => "brainpoolP512r1",
            Self::Secp256k1 => "secp256k1",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Ed25519 => "Ed25519 (sign only)",
            Self::Cv25519 => "Curve25519 (encrypt only)",
            Self::Ed448 => "Ed448 (sign only)",
            Self::Cv448 => "Curve448 (encrypt only)",
            Self::NistP256 => "NIST P-256",
            Self::NistP384 => "NIST P-384",
            Self::NistP521 => "NIST P-521",
            Self::BrainpoolP256r1 => "Brainpool P-256",
            Self::BrainpoolP384r1 => "Brainpool P-384",
            Self::BrainpoolP512r1 => "Brainpool P-512",
            Self::Secp256k1 => "secp256k1 (sign only)",
        }
    }
}

impl fmt::Display for EccCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a key or subkey may be used for.
///
/// Values correspond to the capability letters gpg prints in square brackets
/// after the creation date, e.g. `[SC]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    #[serde(rename = "C")]
    Certify,
    #[serde(rename = "S")]
    Sign,
    #[serde(rename = "E")]
    Encrypt,
    #[serde(rename = "A")]
    Authenticate,
}

impl Capability {
    pub fn from_gpg_char(c: char) -> Option<Self> {
        match c {
            'C' => Some(Self::Certify),
            'S' => Some(Self::Sign),
            'E' => Some(Self::Encrypt),
            'A' => Some(Self::Authenticate),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Self::Certify => 'C',
            Self::Sign => 'S',
            Self::Encrypt => 'E',
            Self::Authenticate => 'A',
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Certify => "certifying other keys",
            Self::Sign => "signing data",
            Self::Encrypt => "encrypting data",
            Self::Authenticate => "authenticating",
        }
    }
}

/// One `pub` or `sub` line from gpg's key listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyLine {
    pub long_id: String,
    pub algorithm: Algorithm,
    pub length_bits: Option<u32>,
    pub ecc_curve: Option<EccCurve>,
    pub capabilities: Vec<Capability>,
    pub created_date: NaiveDate,
    pub expiry_date: Option<NaiveDate>,
    pub revoked: bool,
}

impl KeyLine {
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn friendly_type(&self) -> String {
        friendly_type(self.algorithm, self.length_bits, self.ecc_curve)
    }
}

impl Expiring for KeyLine {
    fn expiry_date(&self) -> Option<NaiveDate> {
        self.expiry_date
    }
}

/// Everything we learn about a key from one round of gpg output.
///
/// Built fresh on every sync and discarded after reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedKey {
    pub fingerprint: String,
    pub algorithm: Algorithm,
    pub length_bits: Option<u32>,
    pub ecc_curve: Option<EccCurve>,
    pub capabilities: Vec<Capability>,
    pub created_date: NaiveDate,
    pub expiry_date: Option<NaiveDate>,
    pub revoked: bool,
    /// UIDs in listing order, without the ones gpg marks revoked or expired.
    pub uids: Vec<String>,
    pub subkeys: Vec<KeyLine>,
    /// Distinct packet versions seen in the packet dump, ascending.
    pub openpgp_versions: Option<Vec<u8>>,
    /// `None` means the key states no preference, which is not the same as an empty list.
    pub cipher_preferences: Option<Vec<u8>>,
    pub digest_preferences: Option<Vec<u8>>,
}

impl ParsedKey {
    pub fn friendly_type(&self) -> String {
        friendly_type(self.algorithm, self.length_bits, self.ecc_curve)
    }
}

impl Expiring for ParsedKey {
    fn expiry_date(&self) -> Option<NaiveDate> {
        self.expiry_date
    }
}

/// Expiry arithmetic shared by keys, subkeys and stored records.
pub trait Expiring {
    fn expiry_date(&self) -> Option<NaiveDate>;

    fn expires(&self) -> bool {
        self.expiry_date().is_some()
    }

    /// A key expiring today has not expired yet.
    fn has_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date().is_some_and(|date| date < today)
    }

    /// Whole days from `today` until expiry; negative once expired.
    fn days_till_expiry(&self, today: NaiveDate) -> Option<i64> {
        self.expiry_date()
            .map(|date| date.signed_duration_since(today).num_days())
    }
}

/// Human-readable key type, e.g. `4096-bit RSA` or `Elliptic Curve (NIST P-256)`.
pub fn friendly_type(
    algorithm: Algorithm,
    length_bits: Option<u32>,
    ecc_curve: Option<EccCurve>,
) -> String {
    if algorithm.has_key_length() {
        match length_bits {
            Some(bits) => format!("{bits}-bit {algorithm}"),
            None => algorithm.to_string(),
        }
    } else if algorithm == Algorithm::Ecc {
        let curve = ecc_curve.map_or("Unknown", |c| c.description());
        format!("Elliptic Curve ({curve})")
    } else {
        "unknown".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_capability_from_gpg_char() {
        assert_eq!(Capability::from_gpg_char('C'), Some(Capability::Certify));
        assert_eq!(Capability::from_gpg_char('S'), Some(Capability::Sign));
        assert_eq!(Capability::from_gpg_char('E'), Some(Capability::Encrypt));
        assert_eq!(
            Capability::from_gpg_char('A'),
            Some(Capability::Authenticate)
        );
        assert_eq!(Capability::from_gpg_char('s'), None);
        assert_eq!(Capability::from_gpg_char('X'), None);
    }

    #[test]
    fn test_ecc_curve_from_gpg_token() {
        assert_eq!(EccCurve::from_gpg_token("ed25519"), Some(EccCurve::Ed25519));
        assert_eq!(EccCurve::from_gpg_token("cv25519"), Some(EccCurve::Cv25519));
        assert_eq!(
            EccCurve::from_gpg_token("curve25519"),
            Some(EccCurve::Cv25519)
        );
        assert_eq!(
            EccCurve::from_gpg_token("brainpoolP384r1"),
            Some(EccCurve::BrainpoolP384r1)
        );
        assert_eq!(
            EccCurve::from_gpg_token("BRAINPOOLP384R1"),
            Some(EccCurve::BrainpoolP384r1)
        );
        assert_eq!(EccCurve::from_gpg_token("nistp521"), Some(EccCurve::NistP521));
        assert_eq!(EccCurve::from_gpg_token("rsa4096"), None);
    }

    #[test]
    fn test_algorithm_serialises_to_stored_strings() {
        assert_eq!(serde_json::to_string(&Algorithm::Unknown).unwrap(), "\"\"");
        assert_eq!(
            serde_json::to_string(&Algorithm::RsaSign).unwrap(),
            "\"RSA-SIGN\""
        );
        let parsed: Algorithm = serde_json::from_str("\"ELGAMAL\"").unwrap();
        assert_eq!(parsed, Algorithm::Elgamal);
    }

    #[test]
    fn test_friendly_type() {
        assert_eq!(
            friendly_type(Algorithm::Rsa, Some(4096), None),
            "4096-bit RSA"
        );
        assert_eq!(
            friendly_type(Algorithm::Ecc, None, Some(EccCurve::Ed25519)),
            "Elliptic Curve (Ed25519 (sign only))"
        );
        assert_eq!(friendly_type(Algorithm::Unknown, None, None), "unknown");
    }

    #[test]
    fn test_expiry_arithmetic() {
        let line = KeyLine {
            long_id: "309F635DAD1B5517".into(),
            algorithm: Algorithm::Rsa,
            length_bits: Some(4096),
            ecc_curve: None,
            capabilities: vec![Capability::Sign, Capability::Certify],
            created_date: date(2014, 10, 31),
            expiry_date: Some(date(2018, 5, 15)),
            revoked: false,
        };

        assert!(line.expires());
        assert_eq!(line.days_till_expiry(date(2018, 5, 10)), Some(5));
        assert_eq!(line.days_till_expiry(date(2018, 5, 20)), Some(-5));
        assert!(!line.has_expired(date(2018, 5, 15)));
        assert!(line.has_expired(date(2018, 5, 16)));
    }
}
