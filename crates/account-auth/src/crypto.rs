//! Digest and encoding primitives
//!
//! Thin wrappers over `sha2` and `base64` so the rest of the workspace agrees
//! on one alphabet and padding policy per use:
//! - standard Base64 (padded) for stored signatures and Basic credentials
//! - Base64URL without padding for PKCE challenges
//! - a lenient decoder for JWT segments, which arrive in either alphabet with
//!   or without padding

use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Standard alphabet, padding optional on decode.
const LENIENT_STANDARD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

/// Lower-case hex SHA-256 digest of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex_encode(&sha256(data))
}

/// Lower-case hex encoding.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Standard Base64 with padding.
pub fn base64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode standard Base64. Surrounding whitespace is ignored.
pub fn base64_decode(encoded: &str) -> Result<Vec<u8>> {
    LENIENT_STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::Decode(format!("invalid base64: {e}")))
}

/// Base64URL without padding.
pub fn base64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decode Base64URL.
///
/// `-` and `_` are mapped onto the standard alphabet first, so input in
/// either alphabet decodes, and trailing padding is optional.
pub fn base64url_decode(encoded: &str) -> Result<Vec<u8>> {
    let normalized: String = encoded
        .trim()
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    LENIENT_STANDARD
        .decode(normalized)
        .map_err(|e| Error::Decode(format!("invalid base64url: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn base64url_has_no_padding_or_unsafe_chars() {
        let encoded = base64url_encode(&[0xfb, 0xff, 0xfe]);
        assert_eq!(encoded, "-__-");
        assert_eq!(base64_encode(&[0xfb, 0xff, 0xfe]), "+//+");
    }

    #[test]
    fn base64url_decode_accepts_padding_and_standard_alphabet() {
        assert_eq!(base64url_decode("aGk").unwrap(), b"hi");
        assert_eq!(base64url_decode("aGk=").unwrap(), b"hi");
        assert_eq!(base64url_decode("+//+").unwrap(), vec![0xfb, 0xff, 0xfe]);
        assert_eq!(base64url_decode("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn base64_decode_rejects_garbage() {
        assert!(base64_decode("not base64!").is_err());
        assert!(base64url_decode("a$b").is_err());
    }

    #[test]
    fn base64_decode_ignores_surrounding_whitespace() {
        assert_eq!(base64_decode(" dXNlcjpwYXNz\n").unwrap(), b"user:pass");
    }

    proptest! {
        #[test]
        fn base64url_roundtrips_arbitrary_bytes(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            prop_assert_eq!(base64url_decode(&base64url_encode(&data)).unwrap(), data);
        }
    }
}
