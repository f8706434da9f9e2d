//! Per-incident alert bookkeeping with a send cap, pacing and a reset window.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::mail::{MailTransport, Outgoing};

#[derive(Debug, Clone)]
pub struct AlertPolicy {
    pub max_per_incident: u32,
    pub min_interval: Duration,
    pub reset_after: Duration,
    pub from: String,
    pub recipients: Vec<String>,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            max_per_incident: 3,
            min_interval: Duration::seconds(600),
            reset_after: Duration::seconds(3600),
            from: String::new(),
            recipients: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct IncidentState {
    count: u32,
    last_sent: Option<DateTime<Utc>>,
}

pub struct AlertManager {
    policy: AlertPolicy,
    mailer: Arc<dyn MailTransport>,
    incidents: Mutex<HashMap<String, IncidentState>>,
}

impl AlertManager {
    pub fn new(policy: AlertPolicy, mailer: Arc<dyn MailTransport>) -> Self {
        Self {
            policy,
            mailer,
            incidents: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    /// Returns true when an alert mail was dispatched. A failed send still
    /// counts against the cap.
    pub async fn report_incident(&self, key: &str, message: &str) -> bool {
        self.report_incident_at(key, message, Utc::now()).await
    }

    pub(crate) async fn report_incident_at(
        &self,
        key: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let count = {
            let mut incidents = self.incidents.lock();
            let state = incidents.entry(key.to_string()).or_default();
            if let Some(last) = state.last_sent {
                if now - last >= self.policy.reset_after {
                    debug!(incident = key, "reset window elapsed, counter cleared");
                    *state = IncidentState::default();
                }
            }
            if state.count >= self.policy.max_per_incident {
                debug!(incident = key, count = state.count, "alert cap reached");
                return false;
            }
            if let Some(last) = state.last_sent {
                if now - last < self.policy.min_interval {
                    debug!(incident = key, "alert suppressed by pacing");
                    return false;
                }
            }
            state.count += 1;
            state.last_sent = Some(now);
            state.count
        };

        let mail = self.compose_alert(key, message, count, now);
        self.dispatch(&mail).await;
        true
    }

    /// Sends the resolution notice. Bookkeeping is left alone; see
    /// [`AlertManager::mark_resolved`].
    pub async fn report_resolved(&self, key: &str, message: &str) {
        let now = Utc::now();
        let mail = Outgoing {
            from: self.policy.from.clone(),
            recipients: self.policy.recipients.clone(),
            subject: format!("[INFORMATION] Incident {key} resolved"),
            body: format!(
                "Incident ID: {key}\nTime: {}\n\nMessage:\n{message}\n\n",
                format_time(now)
            ),
        };
        self.dispatch(&mail).await;
    }

    pub fn mark_resolved(&self, key: &str) {
        if self.incidents.lock().remove(key).is_some() {
            info!(incident = key, "incident resolved");
        }
    }

    pub fn reset_all(&self) {
        let mut incidents = self.incidents.lock();
        let n = incidents.len();
        incidents.clear();
        info!(cleared = n, "all incidents reset");
    }

    pub fn is_ongoing(&self, key: &str) -> bool {
        self.incidents.lock().contains_key(key)
    }

    fn compose_alert(&self, key: &str, message: &str, count: u32, now: DateTime<Utc>) -> Outgoing {
        let max = self.policy.max_per_incident;
        let mut body = format!(
            "Incident ID: {key}\nTime: {}\n\nMessage:\n{message}\n\n\
             This is alert #{count} of {max} for this incident.\n",
            format_time(now)
        );
        if count >= max {
            body.push_str(&format!(
                "\nNOTE: Maximum number of alerts for this incident has been reached.\n\
                 No further emails will be sent for this incident until the counter is\n\
                 reset (no alerts for {} minutes) or a manual reset.\n",
                self.policy.reset_after.num_minutes()
            ));
        }
        Outgoing {
            from: self.policy.from.clone(),
            recipients: self.policy.recipients.clone(),
            subject: format!("[ALERT] Incident {key} ({count}/{max})"),
            body,
        }
    }

    async fn dispatch(&self, mail: &Outgoing) {
        if mail.recipients.is_empty() {
            error!(subject = %mail.subject, "mailing list is empty, mail not sent");
            return;
        }
        match self.mailer.send(mail).await {
            Ok(()) => info!(subject = %mail.subject, "notification sent"),
            Err(e) => warn!(subject = %mail.subject, "notification failed: {e}"),
        }
    }
}

fn format_time(t: DateTime<Utc>) -> String {
    t.format("%a %b %e %H:%M:%S %Y UTC").to_string()
}
