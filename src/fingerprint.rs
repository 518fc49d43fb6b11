//! One-way host fingerprints for the failure registry.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Environment variable holding a 32-hex-digit fingerprint key.
pub const FINGERPRINT_KEY_ENV: &str = "DBCOLLECT_FINGERPRINT_KEY";

/// Version tag prepended to every fingerprint.
pub const FINGERPRINT_PREFIX: &str = "fp1:";

const DEFAULT_KEY: &str = "4d2a9c7e1f0b83d65a17e2c940bf6d18";

/// Keyed HMAC-SHA256 of a normalized host name.
///
/// The same host always yields the same fingerprint under the same key, and
/// the host cannot be recovered from it.
#[derive(Clone)]
pub struct Fingerprinter {
    key: Vec<u8>,
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new(DEFAULT_KEY)
    }
}

impl Fingerprinter {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: key.as_ref().to_vec(),
        }
    }

    /// Build from `DBCOLLECT_FINGERPRINT_KEY`, falling back to the built-in key.
    pub fn from_env() -> Self {
        match std::env::var(FINGERPRINT_KEY_ENV) {
            Ok(key) if is_valid_key(&key) => Self::new(key.to_ascii_lowercase()),
            Ok(_) => {
                tracing::warn!(
                    "{} must be 32 hex characters, using the built-in key",
                    FINGERPRINT_KEY_ENV
                );
                Self::default()
            }
            Err(_) => Self::default(),
        }
    }

    pub fn fingerprint(&self, host: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size");
        mac.update(host.trim().to_ascii_lowercase().as_bytes());
        format!("{}{:x}", FINGERPRINT_PREFIX, mac.finalize().into_bytes())
    }
}

fn is_valid_key(key: &str) -> bool {
    key.len() == 32 && key.chars().all(|c| c.is_ascii_hexdigit())
}
