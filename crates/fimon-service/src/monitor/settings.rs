//! Monitor settings read from the loaded configuration.

use chrono::Duration as ChronoDuration;
use fimon_core::alerts::AlertPolicy;
use fimon_core::config::{Config, ConfigLookupError};
use fimon_core::filters::FilterSet;
use fimon_core::hashing::HashAlgorithm;
use fimon_core::mail::{DEFAULT_SMTP_HOST, DEFAULT_SMTP_PORT};
use fimon_core::{MonitorError, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use zeroize::Zeroizing;

pub const DEFAULT_PERIOD_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct MailSettings {
    pub user: String,
    pub password: Zeroizing<String>,
    pub list: Vec<String>,
    pub limit: u32,
    pub spacing_secs: u64,
    pub reset_secs: u64,
    pub send_resolved: bool,
    pub dry_run: bool,
    pub host: String,
    pub port: u16,
}

impl MailSettings {
    pub fn policy(&self) -> AlertPolicy {
        AlertPolicy {
            max_per_incident: self.limit,
            min_interval: ChronoDuration::seconds(clamp_secs(self.spacing_secs)),
            reset_after: ChronoDuration::seconds(clamp_secs(self.reset_secs)),
            from: self.user.clone(),
            recipients: self.list.clone(),
        }
    }
}

fn clamp_secs(secs: u64) -> i64 {
    const MAX_SECS: i64 = i64::MAX / 1000;
    i64::try_from(secs).map_or(MAX_SECS, |s| s.min(MAX_SECS))
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub period: Duration,
    pub algorithm: HashAlgorithm,
    pub files: Vec<String>,
    pub filters: FilterSet,
    /// `None` when `mailing.enable` is false.
    pub mailing: Option<MailSettings>,
    pub storage_path: Option<PathBuf>,
}

impl MonitorSettings {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let period = cfg.get_or("monitor.period", DEFAULT_PERIOD_SECS)?;
        if period == 0 {
            return Err(MonitorError::config("monitor.period must be at least 1 second"));
        }

        let algorithm = HashAlgorithm::from_config(
            &cfg.get_or("monitor.algorithm", "sha".to_string())?,
            cfg.get_or("monitor.key_length", 256u32)?,
        )?;

        let files: Vec<String> = cfg
            .get("files")
            .map_err(|_| MonitorError::config("you need to provide at least one file for monitoring"))?;
        if files.is_empty() {
            return Err(MonitorError::config(
                "you need to provide at least one file for monitoring",
            ));
        }

        let filters = match FilterSet::from_config(cfg) {
            Ok(filters) => filters,
            Err(e) => {
                warn!(
                    "filter configuration is corrupted ({e}); monitoring continues without filters"
                );
                FilterSet::new()
            }
        };

        let mailing = Self::mailing(cfg)?;
        let storage_path = storage_path(cfg)?;

        info!(
            period_secs = period,
            algorithm = %algorithm,
            files = files.len(),
            mailing = mailing.is_some(),
            "monitor configured"
        );
        Ok(Self {
            period: Duration::from_secs(period),
            algorithm,
            files,
            filters,
            mailing,
            storage_path,
        })
    }

    fn mailing(cfg: &Config) -> Result<Option<MailSettings>> {
        if !cfg.get_or("mailing.enable", false)? {
            return Ok(None);
        }
        let dry_run = cfg.get_or("mailing.dry_run", false)?;
        let user: String = cfg.get_or("mailing.user", String::new())?;
        let password: String = cfg.get_or("mailing.password", String::new())?;
        let list: Vec<String> = cfg.get_or("mailing.list", Vec::new())?;
        if user.is_empty() || list.is_empty() || (password.is_empty() && !dry_run) {
            return Err(MonitorError::config(
                "mailing is enabled but mailing.user, mailing.password or mailing.list is missing",
            ));
        }
        Ok(Some(MailSettings {
            user,
            password: Zeroizing::new(password),
            list,
            limit: cfg.get_or("mailing.limit", 3)?,
            spacing_secs: cfg.get_or("mailing.spacing", 600)?,
            reset_secs: cfg.get_or("mailing.reset", 3600)?,
            send_resolved: cfg.get_or("mailing.resolved", true)?,
            dry_run,
            host: cfg.get_or("mailing.host", DEFAULT_SMTP_HOST.to_string())?,
            port: cfg.get_or("mailing.port", DEFAULT_SMTP_PORT)?,
        }))
    }
}

/// `storage.path`, if configured. A value of the wrong type is an error.
pub fn storage_path(cfg: &Config) -> Result<Option<PathBuf>> {
    match cfg.get::<PathBuf>("storage.path") {
        Ok(path) => Ok(Some(path)),
        Err(ConfigLookupError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let cfg = Config::from_yaml("files: [/etc/hosts]").unwrap();
        let settings = MonitorSettings::from_config(&cfg).unwrap();
        assert_eq!(settings.period, Duration::from_secs(60));
        assert_eq!(settings.algorithm, HashAlgorithm::Sha256);
        assert!(settings.mailing.is_none());
        assert!(settings.storage_path.is_none());
    }

    #[test]
    fn storage_path_type_is_checked() {
        let cfg = Config::from_yaml("files: [/a]\nstorage: {path: /srv/fimon/base.db}").unwrap();
        assert_eq!(
            MonitorSettings::from_config(&cfg).unwrap().storage_path,
            Some(PathBuf::from("/srv/fimon/base.db"))
        );
        let cfg = Config::from_yaml("files: [/a]\nstorage: {path: [1, 2]}").unwrap();
        assert!(matches!(
            MonitorSettings::from_config(&cfg),
            Err(MonitorError::Configuration(_))
        ));
        assert!(storage_path(&cfg).is_err());
    }

    #[test]
    fn files_are_required() {
        for text in ["monitor: {period: 5}", "files: []", "files:"] {
            let cfg = Config::from_yaml(text).unwrap();
            assert!(matches!(
                MonitorSettings::from_config(&cfg),
                Err(MonitorError::Configuration(_))
            ));
        }
    }

    #[test]
    fn bad_algorithm_is_fatal() {
        let cfg = Config::from_yaml("files: [/a]\nmonitor: {algorithm: md5}").unwrap();
        assert!(MonitorSettings::from_config(&cfg).is_err());
        let cfg = Config::from_yaml("files: [/a]\nmonitor: {key_length: 384}").unwrap();
        assert!(MonitorSettings::from_config(&cfg).is_err());
    }

    #[test]
    fn corrupt_filters_are_dropped() {
        let cfg = Config::from_yaml(
            "files: [/a]\nfilter:\n  - {type: lines, file: /a, lines: \"1\"}\n  - {type: lines, file: /a, lines: \"9-2\"}\n",
        )
        .unwrap();
        let settings = MonitorSettings::from_config(&cfg).unwrap();
        assert!(settings.filters.is_empty());
    }

    #[test]
    fn mailing_settings() {
        let cfg = Config::from_yaml(
            "files: [/a]\nmailing:\n  enable: true\n  user: m@example.org\n  password: app-pw\n  list: [ops@example.org]\n  limit: 2\n  resolved: false\n",
        )
        .unwrap();
        let mail = MonitorSettings::from_config(&cfg).unwrap().mailing.unwrap();
        assert_eq!(mail.limit, 2);
        assert_eq!(mail.spacing_secs, 600);
        assert!(!mail.send_resolved);
        assert_eq!(mail.port, 465);
        let policy = mail.policy();
        assert_eq!(policy.reset_after, ChronoDuration::seconds(3600));
        assert_eq!(policy.recipients, vec!["ops@example.org"]);

        let cfg = Config::from_yaml("files: [/a]\nmailing: {enable: true, user: m@example.org}")
            .unwrap();
        assert!(MonitorSettings::from_config(&cfg).is_err());
    }
}
