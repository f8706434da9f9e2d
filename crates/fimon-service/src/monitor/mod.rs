//! The integrity monitor: settings, the scan pass and the periodic loop.

pub mod scan_loop;
pub mod scanner;
pub mod settings;

use anyhow::{Context, Result};
use fimon_core::alerts::AlertManager;
use fimon_core::filters::FilterSet;
use fimon_core::hashing::HashAlgorithm;
use fimon_core::mail::{DryRunMailer, MailTransport, SmtpMailer};
use fimon_core::store::{BaselineStore, SqliteStore};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub use scan_loop::{spawn_scan_loop, ScanLoopHandle};
pub use scanner::{FileOutcome, FileReport, ScanReport};
pub use settings::{MailSettings, MonitorSettings};

pub struct Monitor {
    files: Vec<String>,
    algorithm: HashAlgorithm,
    filters: FilterSet,
    store: Arc<dyn BaselineStore>,
    alerts: Option<Arc<AlertManager>>,
    send_resolved: bool,
}

impl Monitor {
    /// Wires a monitor from explicit collaborators. `mailer` is only used when
    /// mailing is enabled in `settings`.
    pub fn new(
        settings: &MonitorSettings,
        store: Arc<dyn BaselineStore>,
        mailer: Arc<dyn MailTransport>,
    ) -> Self {
        let alerts = settings
            .mailing
            .as_ref()
            .map(|mail| Arc::new(AlertManager::new(mail.policy(), mailer)));
        if let Some(alerts) = &alerts {
            let policy = alerts.policy();
            info!(
                limit = policy.max_per_incident,
                spacing_secs = policy.min_interval.num_seconds(),
                recipients = policy.recipients.len(),
                "alerting enabled"
            );
        }
        Self {
            files: settings.files.clone(),
            algorithm: settings.algorithm,
            filters: settings.filters.clone(),
            store,
            alerts,
            send_resolved: settings
                .mailing
                .as_ref()
                .is_some_and(|mail| mail.send_resolved),
        }
    }

    /// Production wiring: SQLite baseline under `data_dir` (or
    /// `storage.path`) and an SMTP or dry-run mailer.
    pub fn open(settings: &MonitorSettings, data_dir: &Path) -> Result<Self> {
        let db_path = settings
            .storage_path
            .clone()
            .unwrap_or_else(|| fimon_core::paths::baseline_db_path(data_dir));
        let store = SqliteStore::open(&db_path)
            .with_context(|| format!("open baseline store {}", db_path.display()))?;
        let mailer: Arc<dyn MailTransport> = match &settings.mailing {
            Some(mail) if !mail.dry_run => Arc::new(
                SmtpMailer::new(&mail.host, mail.port, &mail.user, mail.password.clone())
                    .context("configure smtp transport")?,
            ),
            _ => Arc::new(DryRunMailer),
        };
        info!(store = %db_path.display(), "monitor wired");
        Ok(Self::new(settings, Arc::new(store), mailer))
    }

    pub fn alerts(&self) -> Option<&Arc<AlertManager>> {
        self.alerts.as_ref()
    }
}
