use crate::error::{Error, Result};

/// Validates a key fingerprint.
///
/// Accepted formats:
/// - 40 uppercase hex characters (OpenPGP v4 fingerprint)
/// - 16 uppercase hex characters (long key ID, used as the identifier for legacy v3 keys)
///
/// No normalisation happens here; see [`normalize_fingerprint`] for user input.
pub fn validate_fingerprint(fingerprint: &str) -> Result<&str> {
    if !matches!(fingerprint.len(), 16 | 40) {
        return Err(Error::InvalidFingerprint {
            fingerprint: fingerprint.to_string(),
            reason: format!(
                "fingerprint must be 16 or 40 hex characters (got {})",
                fingerprint.len()
            ),
        });
    }

    if !fingerprint
        .chars()
        .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
    {
        return Err(Error::InvalidFingerprint {
            fingerprint: fingerprint.to_string(),
            reason: "fingerprint must contain only uppercase hexadecimal characters".to_string(),
        });
    }

    Ok(fingerprint)
}

/// Normalises a fingerprint typed or pasted by a person, then validates it.
///
/// Whitespace and a `0x` prefix are removed and hex digits are uppercased,
/// so `a999 b749 ... 5517` and `0xA999B749...5517` both work.
pub fn normalize_fingerprint(input: &str) -> Result<String> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let normalized = compact
        .strip_prefix("0x")
        .or_else(|| compact.strip_prefix("0X"))
        .unwrap_or(&compact)
        .to_uppercase();

    validate_fingerprint(&normalized)?;
    Ok(normalized)
}

/// The long key ID used to look a key up on a keyserver: `0x` plus the last 16 hex characters.
///
/// Counts characters rather than bytes, so unvalidated input never panics.
pub fn key_id(fingerprint: &str) -> String {
    let start = fingerprint
        .char_indices()
        .rev()
        .nth(15)
        .map_or(0, |(index, _)| index);
    format!("0x{}", &fingerprint[start..])
}

pub fn zero_x_fingerprint(fingerprint: &str) -> String {
    format!("0x{fingerprint}")
}

/// Groups a v4 fingerprint the way gpg prints it: ten blocks of four with a
/// wider gap in the middle. Other lengths are returned unchanged.
pub fn human_fingerprint(fingerprint: &str) -> String {
    if fingerprint.len() != 40 || !fingerprint.is_ascii() {
        return fingerprint.to_string();
    }

    let groups: Vec<&str> = (0..10).map(|i| &fingerprint[i * 4..i * 4 + 4]).collect();
    format!("{}  {}", groups[..5].join(" "), groups[5..].join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FINGERPRINT: &str = "A999B7498D1A8DC473E53C92309F635DAD1B5517";

    #[test]
    fn test_valid_v4_fingerprint() {
        assert_eq!(validate_fingerprint(FINGERPRINT).unwrap(), FINGERPRINT);
    }

    #[test]
    fn test_valid_v3_long_id() {
        assert_eq!(
            validate_fingerprint("309F635DAD1B5517").unwrap(),
            "309F635DAD1B5517"
        );
    }

    #[test]
    fn test_invalid_empty() {
        let err = validate_fingerprint("").unwrap_err();
        assert!(matches!(err, Error::InvalidFingerprint { .. }));
    }

    #[test]
    fn test_invalid_lowercase() {
        let err = validate_fingerprint(&FINGERPRINT.to_lowercase()).unwrap_err();
        assert!(matches!(err, Error::InvalidFingerprint { .. }));
    }

    #[test]
    fn test_invalid_non_hex() {
        let err = validate_fingerprint("G999B7498D1A8DC473E53C92309F635DAD1B5517").unwrap_err();
        assert!(matches!(err, Error::InvalidFingerprint { .. }));
    }

    #[test]
    fn test_invalid_lengths() {
        for len in [8, 15, 17, 32, 39, 41] {
            let candidate = "A".repeat(len);
            let err = validate_fingerprint(&candidate).unwrap_err();
            assert!(
                matches!(err, Error::InvalidFingerprint { .. }),
                "length {len} should be rejected"
            );
        }
    }

    #[test]
    fn test_invalid_contains_spaces() {
        let err = validate_fingerprint("A999 B749 8D1A 8DC4 73E5").unwrap_err();
        assert!(matches!(err, Error::InvalidFingerprint { .. }));
    }

    #[test]
    fn test_normalize_spaced_lowercase() {
        assert_eq!(
            normalize_fingerprint("a999 b749 8d1a 8dc4 73e5  3c92 309f 635d ad1b 5517").unwrap(),
            FINGERPRINT
        );
    }

    #[test]
    fn test_normalize_with_0x_prefix() {
        assert_eq!(
            normalize_fingerprint("0x309f635dad1b5517").unwrap(),
            "309F635DAD1B5517"
        );
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize_fingerprint("$(whoami)").is_err());
    }

    #[test]
    fn test_key_id() {
        assert_eq!(key_id(FINGERPRINT), "0x309F635DAD1B5517");
        assert_eq!(key_id("309F635DAD1B5517"), "0x309F635DAD1B5517");
    }

    #[test]
    fn test_human_fingerprint() {
        assert_eq!(
            human_fingerprint(FINGERPRINT),
            "A999 B749 8D1A 8DC4 73E5  3C92 309F 635D AD1B 5517"
        );
        assert_eq!(human_fingerprint("309F635DAD1B5517"), "309F635DAD1B5517");
    }

    #[test]
    fn test_key_id_of_unvalidated_input() {
        assert_eq!(key_id("309F635DAD1B5517"), "0x309F635DAD1B5517");
        assert_eq!(key_id("ABC"), "0xABC");
        assert_eq!(key_id(""), "0x");

        let wide = format!("ÄÖÜ{}", "é".repeat(20));
        assert_eq!(key_id(&wide), format!("0x{}", "é".repeat(16)));
    }
}
