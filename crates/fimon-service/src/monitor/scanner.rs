//! One integrity pass over the configured files.

use chrono::{DateTime, Utc};
use fimon_core::hashing::{compute_hash, file_code};
use tracing::{debug, error, info, warn};

use super::Monitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// No baseline existed; the current hash was stored.
    BaselineCreated,
    Unchanged,
    /// Matches again after an ongoing incident.
    Resolved,
    /// Differs from the baseline. `alerted` is true when a mail went out.
    Mismatch { alerted: bool },
    Unavailable,
    StorageError,
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: String,
    pub code: String,
    pub outcome: FileOutcome,
}

#[derive(Debug, Clone)]
pub struct ScanReport {
    pub started_at: DateTime<Utc>,
    pub files: Vec<FileReport>,
}

impl ScanReport {
    pub fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.files.iter().filter(|f| pred(&f.outcome)).count()
    }

    pub fn mismatches(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Mismatch { .. }))
    }

    pub fn errors(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Unavailable | FileOutcome::StorageError))
    }

    pub fn outcome(&self, path: &str) -> Option<FileOutcome> {
        self.files.iter().find(|f| f.path == path).map(|f| f.outcome)
    }
}

impl Monitor {
    /// Checks every file in configured order. A failure on one file is
    /// logged and never stops the pass.
    pub async fn run_pass(&self) -> ScanReport {
        let started_at = Utc::now();
        let mut files = Vec::with_capacity(self.files.len());
        for path in &self.files {
            let code = file_code(path);
            let outcome = self.check_file(path, &code).await;
            files.push(FileReport {
                path: path.clone(),
                code,
                outcome,
            });
        }
        let report = ScanReport { started_at, files };
        info!(
            files = report.files.len(),
            mismatches = report.mismatches(),
            errors = report.errors(),
            "scan pass finished"
        );
        report
    }

    async fn check_file(&self, path: &str, code: &str) -> FileOutcome {
        let current = match compute_hash(path, self.algorithm, &self.filters) {
            Ok(hash) => hash,
            Err(e) => {
                error!(file = path, "cannot hash file: {e}");
                return FileOutcome::Unavailable;
            }
        };
        debug!(file = path, code, hash = %current, "file hashed");

        let baseline = match self.store.select(code) {
            Ok(baseline) => baseline,
            Err(e) => {
                error!(file = path, code, "baseline lookup failed: {e}");
                return FileOutcome::StorageError;
            }
        };

        let Some(baseline) = baseline else {
            return match self.store.insert(code, &current) {
                Ok(()) => {
                    info!(file = path, code, "baseline recorded");
                    FileOutcome::BaselineCreated
                }
                Err(e) => {
                    error!(file = path, code, "cannot store baseline: {e}");
                    FileOutcome::StorageError
                }
            };
        };

        if baseline == current {
            return match &self.alerts {
                Some(alerts) if alerts.is_ongoing(code) => {
                    if self.send_resolved {
                        let message = format!("File {path} matches its baseline again.");
                        alerts.report_resolved(code, &message).await;
                    }
                    alerts.mark_resolved(code);
                    info!(file = path, code, "file back to baseline");
                    FileOutcome::Resolved
                }
                _ => FileOutcome::Unchanged,
            };
        }

        warn!(
            file = path,
            code,
            "file fingerprint does not match baseline, file may be compromised"
        );
        let alerted = match &self.alerts {
            Some(alerts) => {
                let message = format!(
                    "File {path} fingerprint does not match baseline, file may be compromised.\n\
                     Expected: {baseline}\nActual:   {current}\nAlgorithm: {}",
                    self.algorithm
                );
                alerts.report_incident(code, &message).await
            }
            None => false,
        };
        FileOutcome::Mismatch { alerted }
    }
}
