//! Signed entitlement records
//!
//! An entitlement says "user U is supported from START to END". The license
//! service signs `U + START + END + "true"` (no separators) with its private
//! key; the signature travels with the record as standard Base64. The record
//! is only trusted once the signature checks out against the cached public
//! key and today's date falls inside the period.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::verifier::{Reason, Verification, verify};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A claimed support period with its signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub user_id: String,
    /// `YYYY-MM-DD`
    pub start_date: String,
    /// `YYYY-MM-DD`, inclusive
    pub end_date: String,
    /// Standard Base64.
    pub signature: String,
    /// Whether the issuer claimed support at all.
    pub supported: bool,
}

impl Entitlement {
    /// The exact byte string the issuer signed.
    pub fn message(&self) -> String {
        format!("{}{}{}true", self.user_id, self.start_date, self.end_date)
    }
}

/// Outcome of checking an entitlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitlementStatus {
    Supported,
    /// The record does not claim support.
    Unsupported,
    /// Signature or record failed verification.
    Rejected(Reason),
    /// Genuine, but today is outside the support period.
    Expired,
}

impl EntitlementStatus {
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Supported)
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Supported => "supported",
            Self::Unsupported => "unsupported",
            Self::Rejected(_) => "rejected",
            Self::Expired => "expired",
        }
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, Reason> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|e| Reason::MalformedDate(format!("{value:?}: {e}")))
}

/// Verify `entitlement` against `public_key_pem` as of `today`.
///
/// The signature is checked before the dates, so a forged record is reported
/// as rejected even when its period has lapsed.
pub fn check_entitlement(
    entitlement: &Entitlement,
    public_key_pem: &str,
    today: NaiveDate,
) -> EntitlementStatus {
    let status = evaluate(entitlement, public_key_pem, today);
    metrics::counter!("license_verifications_total", "result" => status.label()).increment(1);
    match &status {
        EntitlementStatus::Rejected(reason) => {
            warn!(user_id = %entitlement.user_id, %reason, "entitlement rejected");
        }
        other => debug!(user_id = %entitlement.user_id, status = other.label(), "entitlement checked"),
    }
    status
}

fn evaluate(entitlement: &Entitlement, public_key_pem: &str, today: NaiveDate) -> EntitlementStatus {
    if !entitlement.supported {
        return EntitlementStatus::Unsupported;
    }

    let signature = match account_auth::crypto::base64_decode(&entitlement.signature) {
        Ok(bytes) => bytes,
        Err(e) => return EntitlementStatus::Rejected(Reason::MalformedSignature(e.to_string())),
    };
    if let Verification::Invalid(reason) =
        verify(entitlement.message().as_bytes(), &signature, public_key_pem)
    {
        return EntitlementStatus::Rejected(reason);
    }

    let (start, end) = match (parse_date(&entitlement.start_date), parse_date(&entitlement.end_date)) {
        (Ok(start), Ok(end)) => (start, end),
        (Err(reason), _) | (_, Err(reason)) => return EntitlementStatus::Rejected(reason),
    };
    if start <= today && today <= end {
        EntitlementStatus::Supported
    } else {
        EntitlementStatus::Expired
    }
}
