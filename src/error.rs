//! Error types for the signing vault

use alloy::primitives::B256;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Wrong password or a corrupted record. Never carries partial plaintext.
    #[error("Authentication failed: wrong password or corrupted data")]
    AuthenticationFailed,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Transaction {0} is already being monitored")]
    AlreadyMonitored(B256),

    #[error("Transaction {0} is not being monitored")]
    NotMonitored(B256),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Signature recovery error: {0}")]
    Recovery(String),

    #[error("Ledger query error: {0}")]
    Query(String),

    #[error("Invalid keystore record: {0}")]
    InvalidRecord(String),

    #[error("Unsupported keystore format version: {0}")]
    UnsupportedVersion(u32),

    #[error("Unsupported key derivation function: {0}")]
    UnsupportedKdf(String),

    #[error("Invalid identity name: {0}")]
    InvalidName(String),

    #[error("Backup error: {0}")]
    Backup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
