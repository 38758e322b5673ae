//! Encrypted key storage
//!
//! - [`cipher`]: password-based authenticated encryption
//! - [`record`]: the versioned on-disk record
//! - [`manager`]: the directory of records, one per identity
//! - [`backup`]: encrypted archives of the whole keystore

pub mod backup;
pub mod cipher;
mod manager;
pub mod record;

pub use backup::{create_backup, restore_backup, BackupManifest};
pub use cipher::{CipherEngine, SealedData};
pub use manager::{validate_name, Keystore};
pub use record::{KeyRecord, FORMAT_VERSION};
