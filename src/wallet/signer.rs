//! Signing secrets and the signing provider seam
//!
//! SECURITY: decrypted key material only ever lives inside [`SigningSecret`].
//! - Bytes are zeroized on drop and on explicit [`SigningSecret::clear`]
//! - No Serialize impl, and Debug prints `[REDACTED]`
//! - Providers borrow the secret for the duration of one call

use alloy::primitives::{eip191_hash_message, Address, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::{Signature, SignerSync};
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

use crate::{Error, Result};

/// Raw private key length
pub const SECRET_LEN: usize = 32;

/// Failure reported by a signing provider. The reason is preserved verbatim.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct SigningError(pub String);

/// Failure recovering an identity from a signature
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct RecoveryError(pub String);

impl From<SigningError> for Error {
    fn from(e: SigningError) -> Self {
        Error::Signing(e.0)
    }
}

impl From<RecoveryError> for Error {
    fn from(e: RecoveryError) -> Self {
        Error::Recovery(e.0)
    }
}

/// Decrypted private key, held in memory only for one signing operation
pub struct SigningSecret {
    bytes: Zeroizing<[u8; SECRET_LEN]>,
}

impl SigningSecret {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        let signer = PrivateKeySigner::random();
        Self {
            bytes: Zeroizing::new(signer.to_bytes().0),
        }
    }

    /// Wrap raw key bytes, taking ownership of the buffer contents
    ///
    /// Fails if the bytes are not a valid secp256k1 scalar.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SECRET_LEN {
            return Err(Error::InvalidArgument(format!(
                "Private key must be {} bytes, got {}",
                SECRET_LEN,
                bytes.len()
            )));
        }
        PrivateKeySigner::from_slice(bytes)
            .map_err(|e| Error::InvalidArgument(format!("Invalid private key: {}", e)))?;

        let mut key = Zeroizing::new([0u8; SECRET_LEN]);
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }

    /// Import a hex-encoded private key (with or without `0x`)
    pub fn from_hex(key_hex: &str) -> Result<Self> {
        let key_hex = key_hex.trim();
        let key_hex = key_hex.strip_prefix("0x").unwrap_or(key_hex);
        let decoded = Zeroizing::new(
            alloy::hex::decode(key_hex)
                .map_err(|e| Error::InvalidArgument(format!("Invalid private key hex: {}", e)))?,
        );
        Self::from_slice(&decoded)
    }

    /// Public address of this key (safe to share)
    pub fn identity(&self) -> Result<Address> {
        Ok(self.local_signer()?.address())
    }

    /// Borrow the raw key bytes
    pub fn expose(&self) -> &[u8; SECRET_LEN] {
        &self.bytes
    }

    /// Overwrite the key material in place
    pub fn clear(&mut self) {
        self.bytes.zeroize();
    }

    /// True once cleared
    pub fn is_cleared(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }

    fn local_signer(&self) -> Result<PrivateKeySigner> {
        PrivateKeySigner::from_slice(self.bytes.as_slice())
            .map_err(|e| Error::Signing(format!("Unusable private key: {}", e)))
    }
}

// Implement Debug manually to avoid exposing the key
impl std::fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningSecret")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Turns digests into recoverable signatures and back into identities
pub trait SigningProvider: Send + Sync {
    /// Sign a 32-byte digest with the given secret
    fn sign_digest(
        &self,
        digest: &B256,
        secret: &SigningSecret,
    ) -> std::result::Result<Signature, SigningError>;

    /// Recover the signer's address from a digest and signature
    fn recover_identity(
        &self,
        digest: &B256,
        signature: &Signature,
    ) -> std::result::Result<Address, RecoveryError>;
}

/// secp256k1 provider backed by alloy's local signer
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSigner;

impl LocalSigner {
    pub fn new() -> Self {
        Self
    }

    /// Sign an EIP-191 personal message
    pub fn sign_message(&self, message: &[u8], secret: &SigningSecret) -> Result<Signature> {
        let digest = eip191_hash_message(message);
        Ok(self.sign_digest(&digest, secret)?)
    }

    /// Check that `signature` over `message` was produced by `address`
    pub fn verify_message(
        &self,
        message: &[u8],
        signature: &Signature,
        address: Address,
    ) -> Result<bool> {
        let digest = eip191_hash_message(message);
        let recovered = self.recover_identity(&digest, signature)?;
        Ok(recovered == address)
    }
}

impl SigningProvider for LocalSigner {
    fn sign_digest(
        &self,
        digest: &B256,
        secret: &SigningSecret,
    ) -> std::result::Result<Signature, SigningError> {
        let signer = secret
            .local_signer()
            .map_err(|e| SigningError(e.to_string()))?;
        signer
            .sign_hash_sync(digest)
            .map_err(|e| SigningError(format!("Signing failed: {}", e)))
    }

    fn recover_identity(
        &self,
        digest: &B256,
        signature: &Signature,
    ) -> std::result::Result<Address, RecoveryError> {
        signature
            .recover_address_from_prehash(digest)
            .map_err(|e| RecoveryError(format!("Recovery failed: {}", e)))
    }
}
