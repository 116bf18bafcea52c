//! Offline license entitlement verification
//!
//! Decides whether the signed support record persisted for a user is genuine
//! and current: RSA PKCS#1 v1.5 / SHA-256 over the record's canonical message,
//! checked against a public key cached per installation, then a date-range
//! check against today. Nothing here touches the network.

pub mod entitlement;
pub mod error;
pub mod keys;
pub mod verifier;

#[cfg(test)]
mod test_support;

pub use entitlement::{Entitlement, EntitlementStatus, check_entitlement};
pub use error::{Error, Result};
pub use keys::{PUBLIC_KEY_FILE, PublicKeyCache, key_dir};
pub use verifier::{Reason, Verification, parse_public_key, verify};
