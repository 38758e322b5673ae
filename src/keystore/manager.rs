//! Keystore manager
//!
//! One `<name>.json` record per identity inside a private directory. Loading
//! a record never decrypts it; [`Keystore::unlock`] is the only path that
//! turns a record back into a [`SigningSecret`].

use secrecy::SecretString;
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use super::cipher::CipherEngine;
use super::record::KeyRecord;
use crate::config::VaultConfig;
use crate::persist::{self, TEMP_PREFIX};
use crate::wallet::SigningSecret;
use crate::{Error, Result};

const RECORD_EXTENSION: &str = "json";
const MAX_NAME_LEN: usize = 128;

/// Directory-backed store of encrypted key records
#[derive(Debug, Clone)]
pub struct Keystore {
    dir: PathBuf,
    engine: CipherEngine,
}

impl Keystore {
    /// Open (creating if needed) a keystore directory, restricted to the owner
    pub fn open(dir: impl Into<PathBuf>, engine: CipherEngine) -> Result<Self> {
        let dir = dir.into();
        persist::ensure_private_dir(&dir)?;
        Ok(Self { dir, engine })
    }

    pub fn from_config(config: &VaultConfig) -> Result<Self> {
        Self::open(
            config.keystore_dir.clone(),
            CipherEngine::new(config.kdf_iterations),
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Engine used to seal new records
    pub fn engine(&self) -> &CipherEngine {
        &self.engine
    }

    /// Persist a record under a new name. Fails if the name is taken.
    pub fn save(&self, name: &str, record: &KeyRecord) -> Result<()> {
        let path = self.record_path(name)?;
        let json = record.to_json()?;

        persist::create_atomic(&path, json.as_bytes()).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                Error::AlreadyExists(name.to_string())
            } else {
                Error::Io(e)
            }
        })?;

        tracing::info!(identity = %name, address = %record.address, "Keystore record saved");
        Ok(())
    }

    /// Persist a record, replacing any existing one with the same name
    pub fn replace(&self, name: &str, record: &KeyRecord) -> Result<()> {
        let path = self.record_path(name)?;
        persist::write_atomic(&path, record.to_json()?.as_bytes())?;
        tracing::info!(identity = %name, address = %record.address, "Keystore record replaced");
        Ok(())
    }

    /// Read a record without decrypting it
    pub fn load(&self, name: &str) -> Result<KeyRecord> {
        let path = self.record_path(name)?;
        let json = match std::fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        KeyRecord::from_json(&json)
    }

    /// Names of every stored identity
    pub fn list(&self) -> Result<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !stem.starts_with(TEMP_PREFIX) && validate_name(stem).is_ok() {
                    names.insert(stem.to_string());
                }
            }
        }
        Ok(names)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.record_path(name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(identity = %name, "Keystore record deleted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::NotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.record_path(name).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Encrypt a secret and save it as a new identity
    pub fn create_identity(
        &self,
        name: &str,
        secret: &SigningSecret,
        password: &SecretString,
    ) -> Result<KeyRecord> {
        validate_name(name)?;
        let record = KeyRecord::seal(secret, password, &self.engine)?;
        self.save(name, &record)?;
        Ok(record)
    }

    /// Load and decrypt an identity's signing secret
    pub fn unlock(&self, name: &str, password: &SecretString) -> Result<SigningSecret> {
        let record = self.load(name)?;
        let secret = record.open(password).map_err(|e| {
            tracing::warn!(identity = %name, "Keystore unlock failed");
            e
        })?;
        tracing::debug!(identity = %name, "Keystore record unlocked");
        Ok(secret)
    }

    /// Re-encrypt an identity under a new password
    pub fn change_password(
        &self,
        name: &str,
        old_password: &SecretString,
        new_password: &SecretString,
    ) -> Result<()> {
        let record = self.load(name)?;
        let resealed = record.reseal(old_password, new_password, &self.engine)?;
        self.replace(name, &resealed)?;
        tracing::info!(identity = %name, "Keystore password changed");
        Ok(())
    }

    fn record_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{}.{}", name, RECORD_EXTENSION)))
    }
}

/// Identity names become file names, so only a conservative charset is accepted
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidName(format!(
            "name must be 1-{} characters",
            MAX_NAME_LEN
        )));
    }
    if name.starts_with('.') {
        return Err(Error::InvalidName(format!("{}: leading '.'", name)));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(Error::InvalidName(format!("{}: character {:?}", name, c)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::signer::tests::TEST_KEY;
    use tempfile::TempDir;

    fn keystore(dir: &TempDir) -> Keystore {
        Keystore::open(dir.path().join("keys"), CipherEngine::new(2)).unwrap()
    }

    fn password(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[test]
    fn test_save_load_list_delete() {
        let dir = TempDir::new().unwrap();
        let store = keystore(&dir);
        let secret = SigningSecret::from_hex(TEST_KEY).unwrap();

        let record = store
            .create_identity("treasury", &secret, &password("pw"))
            .unwrap();
        assert!(store.contains("treasury"));
        assert_eq!(store.load("treasury").unwrap(), record);
        assert_eq!(
            store.list().unwrap().into_iter().collect::<Vec<_>>(),
            vec!["treasury".to_string()]
        );

        store.delete("treasury").unwrap();
        assert!(store.list().unwrap().is_empty());
        assert!(matches!(store.delete("treasury"), Err(Error::NotFound(_))));
        assert!(matches!(store.load("treasury"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_save_refuses_existing_name() {
        let dir = TempDir::new().unwrap();
        let store = keystore(&dir);
        let first = store
            .create_identity("ops", &SigningSecret::generate(), &password("pw"))
            .unwrap();

        let err = store
            .create_identity("ops", &SigningSecret::generate(), &password("pw"))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(ref n) if n == "ops"));
        assert_eq!(store.load("ops").unwrap(), first);
    }

    #[test]
    fn test_unlock_and_change_password() {
        let dir = TempDir::new().unwrap();
        let store = keystore(&dir);
        let secret = SigningSecret::from_hex(TEST_KEY).unwrap();
        store
            .create_identity("cold", &secret, &password("old"))
            .unwrap();

        assert!(matches!(
            store.unlock("cold", &password("wrong")),
            Err(Error::AuthenticationFailed)
        ));

        store
            .change_password("cold", &password("old"), &password("new"))
            .unwrap();
        assert!(store.unlock("cold", &password("old")).is_err());
        let unlocked = store.unlock("cold", &password("new")).unwrap();
        assert_eq!(unlocked.expose(), secret.expose());
    }

    #[test]
    fn test_list_skips_foreign_files() {
        let dir = TempDir::new().unwrap();
        let store = keystore(&dir);
        store
            .create_identity("alpha", &SigningSecret::generate(), &password("pw"))
            .unwrap();

        std::fs::write(store.dir().join("notes.txt"), "x").unwrap();
        std::fs::write(store.dir().join(".tmp-abc.json"), "{").unwrap();
        std::fs::create_dir(store.dir().join("nested.json")).unwrap();

        let names: Vec<_> = store.list().unwrap().into_iter().collect();
        assert_eq!(names, vec!["alpha".to_string()]);
    }

    #[test]
    fn test_rejects_unsafe_names() {
        for bad in ["", "../escape", ".hidden", "a/b", "sp ace"] {
            assert!(matches!(validate_name(bad), Err(Error::InvalidName(_))), "{bad}");
        }
        for good in ["main", "hot-wallet_2", "v1.backup"] {
            assert!(validate_name(good).is_ok(), "{good}");
        }
    }

    #[test]
    fn test_corrupt_record_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = keystore(&dir);
        std::fs::write(store.dir().join("broken.json"), "{\"version\": 3}").unwrap();

        assert!(matches!(store.load("broken"), Err(Error::InvalidRecord(_))));
    }
}
