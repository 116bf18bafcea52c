//! Per-installation cache of the license service's public key
//!
//! Keys are stored as `<base>/<sha256-hex(client_id)>/public.key` so several
//! client ids can share one config directory without clobbering each other.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use account_auth::crypto::sha256_hex;
use chrono::NaiveDate;
use tracing::{debug, info};

use crate::entitlement::{Entitlement, EntitlementStatus, check_entitlement};
use crate::error::{Error, Result};
use crate::verifier::{Reason, parse_public_key};

pub const PUBLIC_KEY_FILE: &str = "public.key";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Directory holding the cached key for `client_id`.
pub fn key_dir(base: &Path, client_id: &str) -> PathBuf {
    base.join(sha256_hex(client_id.as_bytes()))
}

/// Reads and writes one cached `public.key`.
#[derive(Debug, Clone)]
pub struct PublicKeyCache {
    dir: PathBuf,
}

impl PublicKeyCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache for `client_id` under `base`.
    pub fn for_client(base: &Path, client_id: &str) -> Self {
        Self::new(key_dir(base, client_id))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(PUBLIC_KEY_FILE)
    }

    pub fn exists(&self) -> bool {
        self.path().is_file()
    }

    /// Read the cached PEM.
    pub fn load(&self) -> Result<String> {
        Ok(std::fs::read_to_string(self.path())?)
    }

    /// Validate and cache `pem`.
    ///
    /// The file is written to a sibling temp file and renamed into place, so
    /// a reader never observes a half-written key.
    pub fn store(&self, pem: &str) -> Result<()> {
        parse_public_key(pem).map_err(|reason| Error::MalformedKey(reason.to_string()))?;
        std::fs::create_dir_all(&self.dir)?;

        let path = self.path();
        // Unique per writer; concurrent refreshes may store at once.
        let tmp = self.dir.join(format!(
            ".{PUBLIC_KEY_FILE}.tmp.{}.{}",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(pem.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &path)?;
        info!(path = %path.display(), "public key cached");
        Ok(())
    }

    /// Check `entitlement` against the cached key.
    ///
    /// A missing or unreadable key rejects the entitlement, it never counts
    /// as supported.
    pub fn check(&self, entitlement: &Entitlement, today: NaiveDate) -> EntitlementStatus {
        if !entitlement.supported {
            return check_entitlement(entitlement, "", today);
        }
        match self.load() {
            Ok(pem) => check_entitlement(entitlement, &pem, today),
            Err(e) => {
                debug!(path = %self.path().display(), error = %e, "public key not readable");
                EntitlementStatus::Rejected(Reason::KeyUnavailable(e.to_string()))
            }
        }
    }
}
