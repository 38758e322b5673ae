//! Encrypted keystore backups
//!
//! A backup is a gzip'd tar archive:
//!
//! - `manifest.json.enc`: the [`BackupManifest`]
//! - `records/<name>.json.enc`: one entry per identity
//!
//! Every entry is sealed with the [`CipherEngine`] under the backup password
//! before it goes into the archive. Restore decrypts and parses every entry
//! before touching the keystore, so one bad entry aborts the whole restore.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use super::cipher::{CipherEngine, SealedData};
use super::manager::{validate_name, Keystore};
use super::record::KeyRecord;
use crate::persist;
use crate::{Error, Result};

/// Layout version of the archive itself
pub const BACKUP_FORMAT_VERSION: u32 = 1;

const MANIFEST_ENTRY: &str = "manifest.json.enc";
const RECORD_DIR: &str = "records/";
const RECORD_SUFFIX: &str = ".json.enc";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub format_version: u32,
    pub created_at_epoch_seconds: u64,
    pub included_identity_names: Vec<String>,
}

/// Archive every identity in `keystore` to `path`
pub fn create_backup(
    keystore: &Keystore,
    path: &Path,
    password: &SecretString,
) -> Result<BackupManifest> {
    let engine = keystore.engine();
    let names: Vec<String> = keystore.list()?.into_iter().collect();
    let created_at = chrono::Utc::now().timestamp().max(0) as u64;

    let manifest = BackupManifest {
        format_version: BACKUP_FORMAT_VERSION,
        created_at_epoch_seconds: created_at,
        included_identity_names: names.clone(),
    };

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    append_sealed(
        &mut builder,
        MANIFEST_ENTRY,
        &serde_json::to_vec(&manifest)?,
        engine,
        password,
        created_at,
    )?;
    for name in &names {
        let record = keystore.load(name)?;
        append_sealed(
            &mut builder,
            &format!("{}{}{}", RECORD_DIR, name, RECORD_SUFFIX),
            record.to_json()?.as_bytes(),
            engine,
            password,
            created_at,
        )?;
    }
    let bytes = builder.into_inner()?.finish()?;

    persist::write_atomic(path, &bytes)?;
    tracing::info!(
        path = %path.display(),
        identities = names.len(),
        "Keystore backup created"
    );
    Ok(manifest)
}

/// Restore every identity from a backup, overwriting existing records.
///
/// Nothing is written unless every entry authenticates and parses.
pub fn restore_backup(
    keystore: &Keystore,
    path: &Path,
    password: &SecretString,
) -> Result<BackupManifest> {
    let bytes = std::fs::read(path)?;
    let entries = read_entries(&bytes)?;

    let manifest_blob = entries
        .get(MANIFEST_ENTRY)
        .ok_or_else(|| Error::Backup("archive has no manifest".to_string()))?;
    let manifest: BackupManifest = serde_json::from_slice(&open_sealed(manifest_blob, password)?)
        .map_err(|e| Error::Backup(format!("manifest: {}", e)))?;
    if manifest.format_version != BACKUP_FORMAT_VERSION {
        return Err(Error::UnsupportedVersion(manifest.format_version));
    }

    let mut records = Vec::with_capacity(manifest.included_identity_names.len());
    for name in &manifest.included_identity_names {
        validate_name(name)?;
        let entry = format!("{}{}{}", RECORD_DIR, name, RECORD_SUFFIX);
        let blob = entries
            .get(&entry)
            .ok_or_else(|| Error::Backup(format!("missing entry for {}", name)))?;
        let plaintext = open_sealed(blob, password)?;
        let json = std::str::from_utf8(&plaintext)
            .map_err(|e| Error::Backup(format!("{}: {}", name, e)))?;
        records.push((name, KeyRecord::from_json(json)?));
    }

    let listed = manifest.included_identity_names.len() + 1;
    if entries.len() != listed {
        return Err(Error::Backup(format!(
            "archive holds {} entries, manifest lists {}",
            entries.len(),
            listed
        )));
    }

    for (name, record) in &records {
        keystore.replace(name, record)?;
    }
    tracing::info!(
        path = %path.display(),
        identities = records.len(),
        created_at = manifest.created_at_epoch_seconds,
        "Keystore backup restored"
    );
    Ok(manifest)
}

fn append_sealed<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    entry: &str,
    plaintext: &[u8],
    engine: &CipherEngine,
    password: &SecretString,
    mtime: u64,
) -> Result<()> {
    let sealed = serde_json::to_vec(&engine.encrypt(plaintext, password)?)?;

    let mut header = tar::Header::new_gnu();
    header.set_size(sealed.len() as u64);
    header.set_mode(0o600);
    header.set_mtime(mtime);
    builder.append_data(&mut header, entry, &sealed[..])?;
    Ok(())
}

fn open_sealed(blob: &[u8], password: &SecretString) -> Result<zeroize::Zeroizing<Vec<u8>>> {
    let sealed: SealedData =
        serde_json::from_slice(blob).map_err(|e| Error::Backup(format!("entry: {}", e)))?;
    CipherEngine::decrypt(&sealed, password)
}

fn read_entries(bytes: &[u8]) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    let mut entries = BTreeMap::new();

    for entry in archive
        .entries()
        .map_err(|e| Error::Backup(format!("unreadable archive: {}", e)))?
    {
        let mut entry = entry.map_err(|e| Error::Backup(format!("unreadable entry: {}", e)))?;
        let name = entry
            .path()
            .map_err(|e| Error::Backup(e.to_string()))?
            .to_string_lossy()
            .into_owned();
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .map_err(|e| Error::Backup(format!("{}: {}", name, e)))?;
        if entries.insert(name.clone(), data).is_some() {
            return Err(Error::Backup(format!("duplicate entry {}", name)));
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::SigningSecret;
    use tempfile::TempDir;

    fn password(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    fn populated(dir: &TempDir, sub: &str, names: &[&str]) -> Keystore {
        let store = Keystore::open(dir.path().join(sub), CipherEngine::new(2)).unwrap();
        for name in names {
            store
                .create_identity(name, &SigningSecret::generate(), &password("key-pw"))
                .unwrap();
        }
        store
    }

    #[test]
    fn test_backup_restore_into_empty_keystore() {
        let dir = TempDir::new().unwrap();
        let source = populated(&dir, "source", &["alpha", "beta"]);
        let archive = dir.path().join("vault.tar.gz");

        let manifest = create_backup(&source, &archive, &password("backup-pw")).unwrap();
        assert_eq!(manifest.format_version, BACKUP_FORMAT_VERSION);
        assert_eq!(manifest.included_identity_names, vec!["alpha", "beta"]);
        assert!(manifest.created_at_epoch_seconds > 0);

        let target = populated(&dir, "target", &[]);
        let restored = restore_backup(&target, &archive, &password("backup-pw")).unwrap();
        assert_eq!(restored, manifest);

        for name in ["alpha", "beta"] {
            assert_eq!(target.load(name).unwrap(), source.load(name).unwrap());
            assert!(target.unlock(name, &password("key-pw")).is_ok());
        }
    }

    #[test]
    fn test_archive_entries_are_encrypted() {
        let dir = TempDir::new().unwrap();
        let source = populated(&dir, "source", &["alpha"]);
        let archive = dir.path().join("vault.tar.gz");
        create_backup(&source, &archive, &password("backup-pw")).unwrap();

        let entries = read_entries(&std::fs::read(&archive).unwrap()).unwrap();
        let names: Vec<_> = entries.keys().cloned().collect();
        assert_eq!(names, vec![MANIFEST_ENTRY, "records/alpha.json.enc"]);

        let address = source.load("alpha").unwrap().address.to_string();
        for blob in entries.values() {
            let text = String::from_utf8_lossy(blob).to_lowercase();
            assert!(!text.contains(&address.to_lowercase()));
            assert!(!text.contains("includedidentitynames"));
        }
    }

    #[test]
    fn test_wrong_password_restores_nothing() {
        let dir = TempDir::new().unwrap();
        let source = populated(&dir, "source", &["alpha"]);
        let archive = dir.path().join("vault.tar.gz");
        create_backup(&source, &archive, &password("backup-pw")).unwrap();

        let target = populated(&dir, "target", &[]);
        assert!(matches!(
            restore_backup(&target, &archive, &password("guess")),
            Err(Error::AuthenticationFailed)
        ));
        assert!(target.list().unwrap().is_empty());
    }

    #[test]
    fn test_tampered_entry_aborts_whole_restore() {
        let dir = TempDir::new().unwrap();
        let source = populated(&dir, "source", &["alpha", "beta"]);
        let archive = dir.path().join("vault.tar.gz");
        create_backup(&source, &archive, &password("backup-pw")).unwrap();

        // Rebuild the archive with one flipped ciphertext byte in "beta"
        let mut entries = read_entries(&std::fs::read(&archive).unwrap()).unwrap();
        let blob = entries.get_mut("records/beta.json.enc").unwrap();
        let mut sealed: SealedData = serde_json::from_slice(blob).unwrap();
        let mut ciphertext = sealed.ciphertext.to_vec();
        ciphertext[0] ^= 0x01;
        sealed.ciphertext = ciphertext.into();
        *blob = serde_json::to_vec(&sealed).unwrap();

        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (name, data) in &entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o600);
            builder.append_data(&mut header, name, &data[..]).unwrap();
        }
        std::fs::write(&archive, builder.into_inner().unwrap().finish().unwrap()).unwrap();

        let target = populated(&dir, "target", &[]);
        assert!(matches!(
            restore_backup(&target, &archive, &password("backup-pw")),
            Err(Error::AuthenticationFailed)
        ));
        // "alpha" authenticated fine but must not have been written either
        assert!(target.list().unwrap().is_empty());
    }

    #[test]
    fn test_restore_overwrites_existing_identity() {
        let dir = TempDir::new().unwrap();
        let source = populated(&dir, "source", &["alpha"]);
        let archive = dir.path().join("vault.tar.gz");
        create_backup(&source, &archive, &password("backup-pw")).unwrap();

        let target = populated(&dir, "target", &["alpha"]);
        assert_ne!(target.load("alpha").unwrap(), source.load("alpha").unwrap());

        restore_backup(&target, &archive, &password("backup-pw")).unwrap();
        assert_eq!(target.load("alpha").unwrap(), source.load("alpha").unwrap());
    }

    #[test]
    fn test_garbage_file_is_a_backup_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("junk.tar.gz");
        std::fs::write(&path, b"not an archive").unwrap();

        let target = populated(&dir, "target", &[]);
        assert!(matches!(
            restore_backup(&target, &path, &password("pw")),
            Err(Error::Backup(_))
        ));
    }
}
