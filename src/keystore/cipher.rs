//! Password-based authenticated encryption
//!
//! Secrets are sealed with AES-256-GCM under a key stretched from the
//! password by PBKDF2-HMAC-SHA256 with a random 32-byte salt. The sealed form
//! is self-describing: the KDF name, iteration count, salt and nonce all
//! travel with the ciphertext, and decryption derives the key exactly as the
//! parameters declare.
//!
//! Two integrity checks guard every decryption:
//! - `mac = keccak256(derived_key[16..32] || ciphertext)`, checked first
//! - the GCM tag appended to the ciphertext
//!
//! Either failing yields [`Error::AuthenticationFailed`] and no plaintext.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use alloy::primitives::{keccak256, Bytes};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::{Error, Result};

pub const CIPHER_AES_256_GCM: &str = "aes-256-gcm";
pub const KDF_PBKDF2: &str = "pbkdf2";
pub const PRF_HMAC_SHA256: &str = "hmac-sha256";

/// Derived key length for AES-256
pub const DERIVED_KEY_LEN: u32 = 32;
/// Salt length for new encryptions
pub const SALT_LEN: usize = 32;
/// Smallest salt accepted on decryption
pub const MIN_SALT_LEN: usize = 16;
/// 96-bit GCM nonce
pub const NONCE_LEN: usize = 12;
/// Largest PBKDF2 iteration count accepted for sealing or opening
pub const MAX_KDF_ITERATIONS: u32 = 10_000_000;

/// Cipher parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherParams {
    pub iv: Bytes,
}

/// Key derivation parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Iteration count
    pub c: u32,
    /// Derived key length in bytes
    pub dklen: u32,
    /// Pseudo-random function
    pub prf: String,
    pub salt: Bytes,
}

/// A sealed secret: everything needed to decrypt, except the password
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedData {
    pub cipher: String,
    /// Ciphertext with the GCM tag appended
    pub ciphertext: Bytes,
    pub cipherparams: CipherParams,
    pub kdf: String,
    pub kdfparams: KdfParams,
    pub mac: Bytes,
}

/// Encrypts and decrypts arbitrary secret bytes under a password
#[derive(Debug, Clone, Copy)]
pub struct CipherEngine {
    iterations: u32,
}

impl CipherEngine {
    /// Create an engine that seals with the given PBKDF2 iteration count,
    /// clamped to `1..=MAX_KDF_ITERATIONS`
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: iterations.clamp(1, MAX_KDF_ITERATIONS),
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Seal `plaintext` under `password` with a fresh salt and nonce
    pub fn encrypt(&self, plaintext: &[u8], password: &SecretString) -> Result<SealedData> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let kdfparams = KdfParams {
            c: self.iterations,
            dklen: DERIVED_KEY_LEN,
            prf: PRF_HMAC_SHA256.to_string(),
            salt: Bytes::copy_from_slice(&salt),
        };
        let derived_key = derive_key(password, &kdfparams)?;

        let cipher = Aes256Gcm::new_from_slice(&derived_key[..32])
            .map_err(|e| Error::InvalidRecord(format!("Invalid key length: {}", e)))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| Error::InvalidArgument("Encryption failed".to_string()))?;

        let mac = compute_mac(&derived_key, &ciphertext);

        Ok(SealedData {
            cipher: CIPHER_AES_256_GCM.to_string(),
            ciphertext: Bytes::from(ciphertext),
            cipherparams: CipherParams {
                iv: Bytes::copy_from_slice(&nonce_bytes),
            },
            kdf: KDF_PBKDF2.to_string(),
            kdfparams,
            mac: Bytes::copy_from_slice(mac.as_slice()),
        })
    }

    /// Open a sealed secret. Fails closed on any integrity error.
    pub fn decrypt(sealed: &SealedData, password: &SecretString) -> Result<Zeroizing<Vec<u8>>> {
        if sealed.cipher != CIPHER_AES_256_GCM {
            return Err(Error::InvalidRecord(format!(
                "Unsupported cipher: {}",
                sealed.cipher
            )));
        }
        if sealed.kdf != KDF_PBKDF2 {
            return Err(Error::UnsupportedKdf(sealed.kdf.clone()));
        }
        if sealed.cipherparams.iv.len() != NONCE_LEN {
            return Err(Error::InvalidRecord(format!(
                "Nonce must be {} bytes, got {}",
                NONCE_LEN,
                sealed.cipherparams.iv.len()
            )));
        }

        let derived_key = derive_key(password, &sealed.kdfparams)?;

        let expected = compute_mac(&derived_key, &sealed.ciphertext);
        if !bool::from(expected.as_slice().ct_eq(&sealed.mac[..])) {
            return Err(Error::AuthenticationFailed);
        }

        let cipher = Aes256Gcm::new_from_slice(&derived_key[..32])
            .map_err(|e| Error::InvalidRecord(format!("Invalid key length: {}", e)))?;
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&sealed.cipherparams.iv),
                &sealed.ciphertext[..],
            )
            .map_err(|_| Error::AuthenticationFailed)?;

        Ok(Zeroizing::new(plaintext))
    }
}

impl Default for CipherEngine {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_KDF_ITERATIONS)
    }
}

/// Stretch the password exactly as `params` declare
fn derive_key(password: &SecretString, params: &KdfParams) -> Result<Zeroizing<Vec<u8>>> {
    if params.prf != PRF_HMAC_SHA256 {
        return Err(Error::UnsupportedKdf(format!("pbkdf2/{}", params.prf)));
    }
    if params.dklen != DERIVED_KEY_LEN {
        return Err(Error::InvalidRecord(format!(
            "Derived key length must be {}, got {}",
            DERIVED_KEY_LEN, params.dklen
        )));
    }
    if params.c == 0 {
        return Err(Error::InvalidRecord("Iteration count must be positive".to_string()));
    }
    if params.c > MAX_KDF_ITERATIONS {
        return Err(Error::InvalidRecord(format!(
            "Iteration count {} exceeds the maximum of {}",
            params.c, MAX_KDF_ITERATIONS
        )));
    }
    if params.salt.len() < MIN_SALT_LEN {
        return Err(Error::InvalidRecord(format!(
            "Salt must be at least {} bytes, got {}",
            MIN_SALT_LEN,
            params.salt.len()
        )));
    }

    let mut derived = Zeroizing::new(vec![0u8; params.dklen as usize]);
    pbkdf2::pbkdf2_hmac::<Sha256>(
        password.expose_secret().as_bytes(),
        &params.salt,
        params.c,
        &mut derived,
    );
    Ok(derived)
}

fn compute_mac(derived_key: &[u8], ciphertext: &[u8]) -> alloy::primitives::B256 {
    let mut input = Vec::with_capacity(16 + ciphertext.len());
    input.extend_from_slice(&derived_key[16..32]);
    input.extend_from_slice(ciphertext);
    keccak256(&input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TEST_ITERATIONS: u32 = 2;

    fn password(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[test]
    fn test_correct_horse_round_trip() {
        let engine = CipherEngine::new(TEST_ITERATIONS);
        let secret = [0x01u8; 32];
        let sealed = engine
            .encrypt(&secret, &password("correct horse battery staple"))
            .unwrap();

        let wrong = CipherEngine::decrypt(&sealed, &password("wrong password"));
        assert!(matches!(wrong, Err(Error::AuthenticationFailed)));

        let plaintext =
            CipherEngine::decrypt(&sealed, &password("correct horse battery staple")).unwrap();
        assert_eq!(plaintext.as_slice(), &secret);
    }

    #[test]
    fn test_declares_pbkdf2_parameters() {
        let engine = CipherEngine::new(1000);
        let sealed = engine.encrypt(b"data", &password("pw")).unwrap();

        assert_eq!(sealed.cipher, CIPHER_AES_256_GCM);
        assert_eq!(sealed.kdf, KDF_PBKDF2);
        assert_eq!(sealed.kdfparams.c, 1000);
        assert_eq!(sealed.kdfparams.dklen, 32);
        assert_eq!(sealed.kdfparams.salt.len(), SALT_LEN);
        assert_eq!(sealed.cipherparams.iv.len(), NONCE_LEN);
    }

    #[test]
    fn test_fresh_salt_and_nonce_per_encryption() {
        let engine = CipherEngine::new(TEST_ITERATIONS);
        let a = engine.encrypt(b"same", &password("pw")).unwrap();
        let b = engine.encrypt(b"same", &password("pw")).unwrap();

        assert_ne!(a.kdfparams.salt, b.kdfparams.salt);
        assert_ne!(a.cipherparams.iv, b.cipherparams.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_every_ciphertext_bit_flip_is_rejected() {
        let engine = CipherEngine::new(TEST_ITERATIONS);
        let pw = password("pw");
        let sealed = engine.encrypt(&[0x42u8; 8], &pw).unwrap();

        for byte in 0..sealed.ciphertext.len() {
            for bit in 0..8 {
                let mut tampered = sealed.clone();
                let mut bytes = tampered.ciphertext.to_vec();
                bytes[byte] ^= 1 << bit;
                tampered.ciphertext = Bytes::from(bytes);

                let result = CipherEngine::decrypt(&tampered, &pw);
                assert!(
                    matches!(result, Err(Error::AuthenticationFailed)),
                    "flip at byte {} bit {} was accepted",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_tampered_mac_and_nonce_rejected() {
        let engine = CipherEngine::new(TEST_ITERATIONS);
        let pw = password("pw");
        let sealed = engine.encrypt(b"secret", &pw).unwrap();

        let mut bad_mac = sealed.clone();
        let mut mac = bad_mac.mac.to_vec();
        mac[0] ^= 0x80;
        bad_mac.mac = Bytes::from(mac);
        assert!(matches!(
            CipherEngine::decrypt(&bad_mac, &pw),
            Err(Error::AuthenticationFailed)
        ));

        let mut bad_nonce = sealed.clone();
        let mut iv = bad_nonce.cipherparams.iv.to_vec();
        iv[11] ^= 0x01;
        bad_nonce.cipherparams.iv = Bytes::from(iv);
        assert!(matches!(
            CipherEngine::decrypt(&bad_nonce, &pw),
            Err(Error::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_declared_kdf_is_honored() {
        let engine = CipherEngine::new(TEST_ITERATIONS);
        let pw = password("pw");
        let mut sealed = engine.encrypt(b"secret", &pw).unwrap();

        // A different iteration count derives a different key
        sealed.kdfparams.c = TEST_ITERATIONS + 1;
        assert!(matches!(
            CipherEngine::decrypt(&sealed, &pw),
            Err(Error::AuthenticationFailed)
        ));

        sealed.kdf = "scrypt".to_string();
        assert!(matches!(
            CipherEngine::decrypt(&sealed, &pw),
            Err(Error::UnsupportedKdf(_))
        ));
    }

    #[test]
    fn test_short_salt_rejected() {
        let engine = CipherEngine::new(TEST_ITERATIONS);
        let pw = password("pw");
        let mut sealed = engine.encrypt(b"secret", &pw).unwrap();
        sealed.kdfparams.salt = Bytes::from(vec![0u8; 8]);

        assert!(matches!(
            CipherEngine::decrypt(&sealed, &pw),
            Err(Error::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_truncated_mac_rejected() {
        let engine = CipherEngine::new(TEST_ITERATIONS);
        let pw = password("pw");
        let sealed = engine.encrypt(b"secret", &pw).unwrap();

        for len in [0, 16, 31] {
            let mut short = sealed.clone();
            short.mac = Bytes::copy_from_slice(&sealed.mac[..len]);
            assert!(matches!(
                CipherEngine::decrypt(&short, &pw),
                Err(Error::AuthenticationFailed)
            ));
        }
    }

    #[test]
    fn test_excessive_iteration_count_rejected() {
        let engine = CipherEngine::new(TEST_ITERATIONS);
        let pw = password("pw");
        let mut sealed = engine.encrypt(b"secret", &pw).unwrap();

        sealed.kdfparams.c = u32::MAX;
        assert!(matches!(
            CipherEngine::decrypt(&sealed, &pw),
            Err(Error::InvalidRecord(_))
        ));

        sealed.kdfparams.c = MAX_KDF_ITERATIONS + 1;
        assert!(matches!(
            CipherEngine::decrypt(&sealed, &pw),
            Err(Error::InvalidRecord(_))
        ));

        assert_eq!(CipherEngine::new(u32::MAX).iterations(), MAX_KDF_ITERATIONS);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_round_trip(secret in proptest::collection::vec(any::<u8>(), 0..96), pw in "[ -~]{0,32}") {
            let engine = CipherEngine::new(TEST_ITERATIONS);
            let pw = password(&pw);
            let sealed = engine.encrypt(&secret, &pw).unwrap();
            let opened = CipherEngine::decrypt(&sealed, &pw).unwrap();
            prop_assert_eq!(opened.as_slice(), secret.as_slice());
        }

        #[test]
        fn prop_tag_tamper_rejected(secret in proptest::collection::vec(any::<u8>(), 1..64), bit in 0usize..128) {
            let engine = CipherEngine::new(TEST_ITERATIONS);
            let pw = password("pw");
            let mut sealed = engine.encrypt(&secret, &pw).unwrap();

            // The GCM tag occupies the last 16 bytes
            let mut bytes = sealed.ciphertext.to_vec();
            let tag_start = bytes.len() - 16;
            bytes[tag_start + bit / 8] ^= 1 << (bit % 8);
            sealed.ciphertext = Bytes::from(bytes);

            prop_assert!(matches!(
                CipherEngine::decrypt(&sealed, &pw),
                Err(Error::AuthenticationFailed)
            ));
        }
    }
}
