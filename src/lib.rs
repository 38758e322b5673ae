//! Cold Signer Vault
//!
//! Offline key custody and signing for EVM accounts:
//! - Password-encrypted keystore, one record per identity, with encrypted backups
//! - Concurrent batch signing with per-item isolation
//! - Receipt monitoring with state-change callbacks
//! - A persisted history of settled transactions
//!
//! # Security Model
//!
//! - Private keys are stored only as authenticated ciphertext
//! - Decrypted keys live in zeroizing buffers for the length of one signing call
//! - Keystore, backup and history files are written atomically, owner-only
//! - Secrets and passwords are never logged or serialized

pub mod config;
pub mod keystore;
pub mod persist;
pub mod tx;
pub mod wallet;

mod error;

// Re-export commonly used types
pub use config::{RpcConfig, VaultConfig};
pub use error::{Error, Result};
pub use keystore::{CipherEngine, KeyRecord, Keystore};
pub use tx::{HistoryStore, TransactionMonitor, TransactionRecord};
pub use wallet::{BatchSigner, LocalSigner, SigningSecret, UnsignedTransaction};
