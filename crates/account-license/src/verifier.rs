//! RSASSA-PKCS1-v1_5 / SHA-256 signature verification
//!
//! Verification never fails loudly: every problem, from a missing key to a
//! forged signature, comes back as `Verification::Invalid` with a reason the
//! caller can log.

use std::fmt;

use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use sha2::Sha256;

/// Why a signature or entitlement was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    EmptyMessage,
    EmptySignature,
    /// The public key could not be read (missing file, IO error).
    KeyUnavailable(String),
    MalformedKey(String),
    MalformedSignature(String),
    SignatureMismatch,
    MalformedDate(String),
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => f.write_str("signed message is empty"),
            Self::EmptySignature => f.write_str("signature is empty"),
            Self::KeyUnavailable(detail) => write!(f, "public key unavailable: {detail}"),
            Self::MalformedKey(detail) => write!(f, "public key is malformed: {detail}"),
            Self::MalformedSignature(detail) => write!(f, "signature is malformed: {detail}"),
            Self::SignatureMismatch => f.write_str("signature does not match"),
            Self::MalformedDate(detail) => write!(f, "entitlement date is malformed: {detail}"),
        }
    }
}

/// Result of checking one signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Valid,
    Invalid(Reason),
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Parse a PEM public key, SPKI (`BEGIN PUBLIC KEY`) or PKCS#1
/// (`BEGIN RSA PUBLIC KEY`).
pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey, Reason> {
    let pem = pem.trim();
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| Reason::MalformedKey(e.to_string()))
}

/// Check `signature` over `message` with the RSA key in `public_key_pem`.
pub fn verify(message: &[u8], signature: &[u8], public_key_pem: &str) -> Verification {
    if message.is_empty() {
        return Verification::Invalid(Reason::EmptyMessage);
    }
    if signature.is_empty() {
        return Verification::Invalid(Reason::EmptySignature);
    }
    if public_key_pem.trim().is_empty() {
        return Verification::Invalid(Reason::KeyUnavailable("public key is empty".into()));
    }

    let key = match parse_public_key(public_key_pem) {
        Ok(key) => key,
        Err(reason) => return Verification::Invalid(reason),
    };
    let signature = match Signature::try_from(signature) {
        Ok(signature) => signature,
        Err(e) => return Verification::Invalid(Reason::MalformedSignature(e.to_string())),
    };

    match VerifyingKey::<Sha256>::new(key).verify(message, &signature) {
        Ok(()) => Verification::Valid,
        Err(_) => Verification::Invalid(Reason::SignatureMismatch),
    }
}
