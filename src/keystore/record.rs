//! Versioned encrypted key record
//!
//! On-disk shape (byte fields are `0x`-prefixed hex):
//!
//! ```json
//! {
//!   "address": "0x…",
//!   "crypto": {
//!     "cipher": "aes-256-gcm",
//!     "ciphertext": "0x…",
//!     "cipherparams": { "iv": "0x…" },
//!     "kdf": "pbkdf2",
//!     "kdfparams": { "c": 262144, "dklen": 32, "prf": "hmac-sha256", "salt": "0x…" },
//!     "mac": "0x…"
//!   },
//!   "version": 3,
//!   "id": "…"
//! }
//! ```
//!
//! `version` is checked before anything else is interpreted.

use alloy::primitives::Address;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use super::cipher::{CipherEngine, SealedData};
use crate::wallet::SigningSecret;
use crate::{Error, Result};

/// The only record format this crate reads and writes
pub const FORMAT_VERSION: u32 = 3;

/// An encrypted signing key as persisted in the keystore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Identity the encrypted key signs for
    pub address: Address,
    pub crypto: SealedData,
    pub version: u32,
    /// Random record id
    pub id: String,
}

impl KeyRecord {
    /// Encrypt a signing secret into a new record
    pub fn seal(
        secret: &SigningSecret,
        password: &SecretString,
        engine: &CipherEngine,
    ) -> Result<Self> {
        let address = secret.identity()?;
        let crypto = engine.encrypt(secret.expose(), password)?;

        Ok(Self {
            address,
            crypto,
            version: FORMAT_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
        })
    }

    /// Decrypt the record back into a signing secret
    pub fn open(&self, password: &SecretString) -> Result<SigningSecret> {
        let plaintext = CipherEngine::decrypt(&self.crypto, password)?;
        let secret = SigningSecret::from_slice(&plaintext)
            .map_err(|e| Error::InvalidRecord(e.to_string()))?;

        if secret.identity()? != self.address {
            return Err(Error::InvalidRecord(
                "decrypted key does not match the record address".to_string(),
            ));
        }
        Ok(secret)
    }

    /// Re-encrypt under a new password, keeping the record id
    pub fn reseal(
        &self,
        old_password: &SecretString,
        new_password: &SecretString,
        engine: &CipherEngine,
    ) -> Result<Self> {
        let secret = self.open(old_password)?;
        let mut resealed = Self::seal(&secret, new_password, engine)?;
        resealed.id = self.id.clone();
        Ok(resealed)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a record, gating on the format version first
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| Error::InvalidRecord(e.to_string()))?;

        let version = value
            .get("version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Error::InvalidRecord("missing version".to_string()))?;
        if version != FORMAT_VERSION as u64 {
            return Err(Error::UnsupportedVersion(
                u32::try_from(version).unwrap_or(u32::MAX),
            ));
        }

        serde_json::from_value(value).map_err(|e| Error::InvalidRecord(e.to_string()))
    }
}
