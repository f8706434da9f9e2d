//! fimon-core: building blocks of the fimon file-integrity monitor
//!
//! # Module layout
//! - `crypto`       PBKDF2, AES-GCM with detached tags, constant-time compare, hex
//! - `credentials`  on-disk credential record (salts, IVs, verifier, config tag)
//! - `security`     password gate, enrollment and working-key custody
//! - `config`       YAML document with dotted lookup, sealed-config helpers
//! - `filters`      per-file line exclusion and segment removal
//! - `hashing`      filtered file digests and file codes
//! - `alerts`       incident alert state machine
//! - `mail`         mail transport trait and SMTP client
//! - `store`        baseline storage contract, SQLite and in-memory backends
//! - `secure_log`   sealed log line codec and log recovery
//! - `paths`        per-user data locations

pub mod alerts;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod filters;
pub mod hashing;
pub mod mail;
pub mod paths;
pub mod secure_log;
pub mod security;
pub mod store;

pub use error::{MonitorError, Result};
