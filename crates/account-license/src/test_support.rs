//! Shared fixtures for unit tests

use rsa::RsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use sha2::Sha256;

/// Contents of `tests/fixtures/<name>`.
pub fn fixture(name: &str) -> String {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    std::fs::read_to_string(&path).unwrap()
}

/// Signature over `u1` / 2024 from the fixture, decoded.
pub fn signature_bytes() -> Vec<u8> {
    account_auth::crypto::base64_decode(&fixture("u1_2024.sig.b64")).unwrap()
}

/// Sign `message` with the fixture private key, as standard Base64.
pub fn sign(message: &str) -> String {
    let key = RsaPrivateKey::from_pkcs8_pem(&fixture("signing_key.pem")).unwrap();
    let signature = SigningKey::<Sha256>::new(key).sign(message.as_bytes());
    account_auth::crypto::base64_encode(&signature.to_vec())
}
