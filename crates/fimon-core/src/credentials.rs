//! Persisted credential record.
//!
//! One JSON document per installation holding every salt, IV and verifier
//! needed to check the operator password and re-derive the working keys. All
//! byte fields are stored as lowercase hex.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::crypto::{derive_key, random_bytes, DERIVED_KEY_LEN, IV_LEN, SALT_LEN};
use crate::error::{MonitorError, Result};

pub const RECORD_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialRecord {
    #[serde(default = "default_version")]
    pub version: u32,
    pub created_at: DateTime<Utc>,
    #[serde(with = "hex::serde")]
    pub salt: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub verifier_salt: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub config_salt: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub log_salt: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub config_iv: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub log_iv: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub password_verifier: Vec<u8>,
    pub iterations: u32,
    #[serde(default, with = "opt_hex")]
    pub config_tag: Option<Vec<u8>>,
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("credential record not found at {}", .0.display())]
    Missing(PathBuf),

    #[error("credential record is corrupted: {0}")]
    Corrupt(String),

    #[error("credential record unreadable: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RecordError> for MonitorError {
    fn from(e: RecordError) -> Self {
        MonitorError::Credentials(e.to_string())
    }
}

impl CredentialRecord {
    /// Fresh record for `password`: independent random salts and IVs, and the
    /// PBKDF2 verifier derived with the verifier salt.
    pub fn generate(password: &[u8], iterations: u32) -> Result<Self> {
        let verifier_salt = random_bytes(SALT_LEN)?;
        let verifier = derive_key(password, &verifier_salt, iterations, DERIVED_KEY_LEN)?;
        Ok(Self {
            version: RECORD_VERSION,
            created_at: Utc::now(),
            salt: random_bytes(SALT_LEN)?,
            verifier_salt,
            config_salt: random_bytes(SALT_LEN)?,
            log_salt: random_bytes(SALT_LEN)?,
            config_iv: random_bytes(IV_LEN)?,
            log_iv: random_bytes(IV_LEN)?,
            password_verifier: verifier.to_vec(),
            iterations,
            config_tag: None,
        })
    }

    /// Short fingerprint of the record salt, safe to log.
    pub fn record_id(&self) -> String {
        let digest = Sha256::digest(&self.salt);
        hex::encode(&digest[..8])
    }

    fn validate(&self) -> std::result::Result<(), RecordError> {
        if self.iterations == 0 {
            return Err(RecordError::Corrupt("iteration count must be >= 1".into()));
        }
        let required = [
            ("salt", &self.salt),
            ("verifier_salt", &self.verifier_salt),
            ("config_salt", &self.config_salt),
            ("log_salt", &self.log_salt),
            ("config_iv", &self.config_iv),
            ("log_iv", &self.log_iv),
            ("password_verifier", &self.password_verifier),
        ];
        for (name, value) in required {
            if value.is_empty() {
                return Err(RecordError::Corrupt(format!("{name} is empty")));
            }
        }
        if self.verifier_salt == self.config_salt
            || self.verifier_salt == self.log_salt
            || self.config_salt == self.log_salt
        {
            return Err(RecordError::Corrupt("salts are not independent".into()));
        }
        Ok(())
    }
}

/// File-backed store for the singleton [`CredentialRecord`].
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> std::result::Result<CredentialRecord, RecordError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RecordError::Missing(self.path.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        let record: CredentialRecord =
            serde_json::from_str(&data).map_err(|e| RecordError::Corrupt(e.to_string()))?;
        record.validate()?;
        debug!(record = %record.record_id(), "credential record loaded");
        Ok(record)
    }

    /// Writes through a temp file in the same directory so a crash never
    /// leaves a half-written record behind.
    pub fn save(&self, record: &CredentialRecord) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let data = serde_json::to_vec_pretty(record)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&data)?;
        tmp.flush()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))?;
        }
        tmp.persist(&self.path)
            .map_err(|e| MonitorError::Credentials(format!("persist record: {e}")))?;
        info!(path = %self.path.display(), record = %record.record_id(), "credential record written");
        Ok(())
    }

    pub fn config_tag(&self) -> std::result::Result<Option<Vec<u8>>, RecordError> {
        Ok(self.load()?.config_tag)
    }

    pub fn set_config_tag(&self, tag: &[u8]) -> Result<CredentialRecord> {
        let mut record = self.load()?;
        record.config_tag = Some(tag.to_vec());
        self.save(&record)?;
        Ok(record)
    }
}

fn default_version() -> u32 {
    RECORD_VERSION
}

mod opt_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_some(&hex::encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let text: Option<String> = Option::deserialize(d)?;
        text.filter(|t| !t.is_empty())
            .map(|t| hex::decode(t).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::constant_time_eq;
    use tempfile::tempdir;

    #[test]
    fn generate_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        let record = CredentialRecord::generate(b"correct horse", 1000).unwrap();
        assert_eq!(record.password_verifier.len(), DERIVED_KEY_LEN);
        assert_eq!(record.config_iv.len(), IV_LEN);
        assert!(record.config_tag.is_none());

        store.save(&record).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, record);

        let expected = derive_key(b"correct horse", &loaded.verifier_salt, 1000, 32).unwrap();
        assert!(constant_time_eq(&expected, &loaded.password_verifier));
    }

    #[test]
    fn salts_are_independent() {
        let record = CredentialRecord::generate(b"pw", 1).unwrap();
        assert_ne!(record.verifier_salt, record.config_salt);
        assert_ne!(record.config_salt, record.log_salt);
        assert_ne!(record.verifier_salt, record.log_salt);
        let other = CredentialRecord::generate(b"pw", 1).unwrap();
        assert_ne!(record.verifier_salt, other.verifier_salt);
    }

    #[test]
    fn fields_are_hex_on_disk() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("c.json"));
        let record = CredentialRecord::generate(b"pw", 5).unwrap();
        store.save(&record).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["iterations"], 5);
        assert_eq!(raw["config_salt"], hex::encode(&record.config_salt));
        assert!(raw["config_tag"].is_null());
    }

    #[test]
    fn missing_and_corrupt_records_are_distinguished() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("nope.json"));
        assert!(matches!(store.load(), Err(RecordError::Missing(_))));

        fs::write(store.path(), "{ not json").unwrap();
        assert!(matches!(store.load(), Err(RecordError::Corrupt(_))));

        let mut record = CredentialRecord::generate(b"pw", 1).unwrap();
        record.iterations = 0;
        fs::write(store.path(), serde_json::to_string(&record).unwrap()).unwrap();
        assert!(matches!(store.load(), Err(RecordError::Corrupt(_))));
    }

    #[test]
    fn config_tag_is_the_only_mutation() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("c.json"));
        let record = CredentialRecord::generate(b"pw", 1).unwrap();
        store.save(&record).unwrap();

        let updated = store.set_config_tag(&[0xab; 16]).unwrap();
        assert_eq!(store.config_tag().unwrap(), Some(vec![0xab; 16]));
        assert_eq!(updated.password_verifier, record.password_verifier);
        assert_eq!(updated.config_iv, record.config_iv);
        assert_eq!(updated.created_at, record.created_at);
    }

    #[cfg(unix)]
    #[test]
    fn record_is_not_world_readable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("c.json"));
        store
            .save(&CredentialRecord::generate(b"pw", 1).unwrap())
            .unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }
}
