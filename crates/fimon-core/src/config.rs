//! YAML configuration document with dotted-path lookup.
//!
//! The file on disk is either plain YAML or, once sealed with
//! `fimon security encrypt config`, a single line of hex ciphertext that is
//! opened with the config key, the stored config IV and the stored tag.

use serde::de::DeserializeOwned;
use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::crypto::{aead_decrypt, aead_encrypt, from_hex, is_hex, to_hex, CryptoError, TAG_LEN};
use crate::error::{MonitorError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigLookupError {
    #[error("config key `{0}` not found")]
    NotFound(String),

    #[error("config key `{path}` has the wrong type: {reason}")]
    WrongType { path: String, reason: String },
}

impl From<ConfigLookupError> for MonitorError {
    fn from(e: ConfigLookupError) -> Self {
        MonitorError::Configuration(e.to_string())
    }
}

/// Key material needed to open a sealed config file.
#[derive(Clone, Copy)]
pub struct ConfigSecret<'a> {
    pub key: &'a [u8],
    pub iv: &'a [u8],
    pub tag: Option<&'a [u8]>,
}

#[derive(Debug, Clone)]
pub struct Config {
    root: Value,
    source: Option<PathBuf>,
}

impl Config {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let root: Value = serde_yaml::from_str(text)
            .map_err(|e| MonitorError::config(format!("invalid YAML: {e}")))?;
        Ok(Self { root, source: None })
    }

    /// Reads `path`, opening it with `secret` when the content is sealed.
    pub fn load(path: &Path, secret: Option<ConfigSecret<'_>>) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| MonitorError::FileUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = if is_sealed(&text) {
            let secret = secret.ok_or_else(|| {
                MonitorError::config("config file is encrypted but no key is available")
            })?;
            let plain = open_config(&text, secret)?;
            info!(path = %path.display(), "encrypted configuration opened");
            Self::from_yaml(&plain)?
        } else {
            Self::from_yaml(&text)?
        };
        config.source = Some(path.to_path_buf());
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Node at `path`, where `path` is a dot-separated list of mapping keys.
    pub fn node(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(&self.root, |node, segment| node.get(segment))
    }

    pub fn get<T: DeserializeOwned>(&self, path: &str) -> std::result::Result<T, ConfigLookupError> {
        let node = self
            .node(path)
            .filter(|node| !node.is_null())
            .ok_or_else(|| ConfigLookupError::NotFound(path.to_string()))?;
        serde_yaml::from_value(node.clone()).map_err(|e| ConfigLookupError::WrongType {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Like [`Config::get`], with `default` standing in for a missing key. A
    /// present key of the wrong type is still an error.
    pub fn get_or<T: DeserializeOwned>(
        &self,
        path: &str,
        default: T,
    ) -> std::result::Result<T, ConfigLookupError> {
        match self.get(path) {
            Err(ConfigLookupError::NotFound(_)) => Ok(default),
            other => other,
        }
    }
}

/// A sealed config is one or more lines of pure hex.
pub fn is_sealed(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty() && trimmed.lines().all(|line| is_hex(line.trim()))
}

/// Seals `plaintext` and returns the hex ciphertext plus the full-length tag
/// the caller must persist alongside the credential record.
pub fn seal_config(plaintext: &str, key: &[u8], iv: &[u8]) -> Result<(String, Vec<u8>)> {
    let sealed = aead_encrypt(key, plaintext.as_bytes(), iv, TAG_LEN)?;
    Ok((to_hex(&sealed.ciphertext), sealed.tag))
}

pub fn open_config(text: &str, secret: ConfigSecret<'_>) -> Result<Zeroizing<String>> {
    let tag = secret
        .tag
        .ok_or_else(|| MonitorError::config("config is encrypted but no config tag is stored"))?;
    let joined: String = text.lines().map(str::trim).collect();
    let ciphertext = from_hex(&joined)?;
    let plain = aead_decrypt(secret.key, &ciphertext, secret.iv, tag)?;
    let text = String::from_utf8(plain.to_vec())
        .map_err(|_| MonitorError::Crypto(CryptoError::InvalidEncoding("config is not UTF-8".into())))?;
    Ok(Zeroizing::new(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
version: 1
files:
  - /etc/passwd
  - /etc/hosts
monitor:
  period: 30
  algorithm: sha3
  log:
    verbosity: 2
mailing:
  enable: true
  list: [ops@example.org]
"#;

    #[test]
    fn dotted_lookup() {
        let cfg = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(cfg.get::<u64>("monitor.period").unwrap(), 30);
        assert_eq!(cfg.get::<String>("monitor.algorithm").unwrap(), "sha3");
        assert_eq!(cfg.get::<u8>("monitor.log.verbosity").unwrap(), 2);
        assert_eq!(
            cfg.get::<Vec<String>>("files").unwrap(),
            vec!["/etc/passwd", "/etc/hosts"]
        );
        assert_eq!(
            cfg.get::<Vec<String>>("mailing.list").unwrap(),
            vec!["ops@example.org"]
        );
    }

    #[test]
    fn missing_and_wrong_type_are_distinct() {
        let cfg = Config::from_yaml(SAMPLE).unwrap();
        assert!(matches!(
            cfg.get::<u64>("monitor.key_length"),
            Err(ConfigLookupError::NotFound(_))
        ));
        assert!(matches!(
            cfg.get::<u64>("monitor.algorithm"),
            Err(ConfigLookupError::WrongType { .. })
        ));
        assert_eq!(cfg.get_or("monitor.key_length", 256u32).unwrap(), 256);
        assert!(cfg.get_or("monitor.algorithm", 0u32).is_err());
    }

    #[test]
    fn null_value_counts_as_missing() {
        let cfg = Config::from_yaml("files:\nfilter:\n").unwrap();
        assert!(matches!(
            cfg.get::<Vec<String>>("files"),
            Err(ConfigLookupError::NotFound(_))
        ));
    }

    #[test]
    fn sealed_config_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let key = [7u8; 32];
        let iv = [9u8; 12];

        let (hex_text, tag) = seal_config(SAMPLE, &key, &iv).unwrap();
        assert!(is_sealed(&hex_text));
        assert!(!is_sealed(SAMPLE));
        fs::write(&path, &hex_text).unwrap();

        let secret = ConfigSecret {
            key: &key,
            iv: &iv,
            tag: Some(&tag),
        };
        let cfg = Config::load(&path, Some(secret)).unwrap();
        assert_eq!(cfg.get::<u64>("monitor.period").unwrap(), 30);
        assert_eq!(cfg.source(), Some(path.as_path()));
    }

    #[test]
    fn sealed_config_with_bad_tag_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let key = [7u8; 32];
        let iv = [9u8; 12];
        let (hex_text, mut tag) = seal_config(SAMPLE, &key, &iv).unwrap();
        tag[0] ^= 1;
        fs::write(&path, &hex_text).unwrap();

        let secret = ConfigSecret {
            key: &key,
            iv: &iv,
            tag: Some(&tag),
        };
        assert!(matches!(
            Config::load(&path, Some(secret)),
            Err(MonitorError::Crypto(CryptoError::AuthenticationFailed))
        ));
        assert!(Config::load(&path, None).is_err());
    }

    #[test]
    fn missing_file_is_unavailable() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Config::load(&dir.path().join("absent.yaml"), None),
            Err(MonitorError::FileUnavailable { .. })
        ));
    }
}
