use std::path::PathBuf;

use thiserror::Error;

use crate::crypto::CryptoError;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("credential store error: {0}")]
    Credentials(String),

    #[error("elevated privilege required: {0}")]
    PrivilegeRequired(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("mail transport error: {0}")]
    MailTransport(String),

    #[error("file unavailable: {}: {source}", path.display())]
    FileUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MonitorError {
    pub fn config(msg: impl Into<String>) -> Self {
        MonitorError::Configuration(msg.into())
    }
}

impl From<rusqlite::Error> for MonitorError {
    fn from(e: rusqlite::Error) -> Self {
        MonitorError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(e: serde_json::Error) -> Self {
        MonitorError::Credentials(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
