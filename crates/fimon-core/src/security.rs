//! Password gate and working-key custody.
//!
//! The manager moves through `Unverified -> Verified -> KeysDerived` and never
//! back. Enrolling a new password leaves the state where it was; a verified
//! manager switches to the new record. The log key lives here for the rest
//! of the process; the config key is handed out once and dropped (and wiped)
//! by the caller.

use std::io;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

use crate::credentials::{CredentialRecord, CredentialStore, RecordError};
use crate::crypto::{constant_time_eq, derive_key, DEFAULT_ITERATIONS, DERIVED_KEY_LEN};
use crate::error::{MonitorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityState {
    Unverified,
    Verified,
    KeysDerived,
}

/// Source of interactive operator input.
pub trait PasswordPrompt {
    fn read_password(&mut self, prompt: &str) -> io::Result<Zeroizing<String>>;
    fn confirm(&mut self, question: &str) -> io::Result<bool>;
}

pub const UNLOCK_PROMPT: &str = "Enter password";
pub const NEW_PASSWORD_PROMPT: &str = "Enter new password";
pub const CONFIRM_PROMPT: &str = "Confirm password";

pub const PASSWORD_ENV: &str = "FIMON_PASSWORD";
pub const NEW_PASSWORD_ENV: &str = "FIMON_NEW_PASSWORD";
pub const CONFIRM_ENV: &str = "FIMON_PASSWORD_CONFIRM";

/// Environment variables consulted for `prompt`, first non-empty wins.
fn env_candidates(prompt: &str) -> &'static [&'static str] {
    match prompt {
        NEW_PASSWORD_PROMPT => &[NEW_PASSWORD_ENV, PASSWORD_ENV],
        CONFIRM_PROMPT => &[CONFIRM_ENV, NEW_PASSWORD_ENV, PASSWORD_ENV],
        _ => &[PASSWORD_ENV],
    }
}

fn env_answer(prompt: &str, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    env_candidates(prompt)
        .iter()
        .filter_map(|key| lookup(*key))
        .find(|value| !value.is_empty())
}

/// Terminal prompt backed by `rpassword`.
///
/// For unattended runs `FIMON_PASSWORD` answers the unlock prompt,
/// `FIMON_NEW_PASSWORD` the enrollment prompt (falling back to
/// `FIMON_PASSWORD`) and `FIMON_PASSWORD_CONFIRM` its confirmation (falling
/// back to the new password). The unlock answer is taken from the
/// environment once; retries go to the terminal.
#[derive(Debug, Default)]
pub struct TerminalPrompt {
    unlock_env_used: bool,
}

impl PasswordPrompt for TerminalPrompt {
    fn read_password(&mut self, prompt: &str) -> io::Result<Zeroizing<String>> {
        let is_unlock = prompt != NEW_PASSWORD_PROMPT && prompt != CONFIRM_PROMPT;
        if !(is_unlock && self.unlock_env_used) {
            if let Some(pw) = env_answer(prompt, |key| std::env::var(key).ok()) {
                self.unlock_env_used |= is_unlock;
                return Ok(Zeroizing::new(pw));
            }
        }
        rpassword::prompt_password(format!("{prompt}: ")).map(Zeroizing::new)
    }

    fn confirm(&mut self, question: &str) -> io::Result<bool> {
        use std::io::Write;
        print!("{question} [y/N]: ");
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().read_line(&mut answer)?;
        Ok(answer
            .trim_start()
            .chars()
            .next()
            .is_some_and(|c| c.eq_ignore_ascii_case(&'y')))
    }
}

/// Config key handed to the caller for a single decrypt or encrypt.
pub type ConfigKey = Zeroizing<Vec<u8>>;

pub struct SecurityManager {
    store: CredentialStore,
    elevated: bool,
    iterations: u32,
    state: SecurityState,
    record: Option<CredentialRecord>,
    log_key: Option<Zeroizing<Vec<u8>>>,
}

impl SecurityManager {
    pub fn new(store: CredentialStore, elevated: bool) -> Self {
        Self {
            store,
            elevated,
            iterations: DEFAULT_ITERATIONS,
            state: SecurityState::Unverified,
            record: None,
            log_key: None,
        }
    }

    /// Iteration count used for records written by this manager.
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn state(&self) -> SecurityState {
        self.state
    }

    pub fn is_elevated(&self) -> bool {
        self.elevated
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Checks `candidate` against the stored verifier.
    ///
    /// A missing or corrupt record is not an error: the operator is offered
    /// enrollment instead, and the candidate is then checked against the new
    /// record.
    pub fn verify_password(
        &mut self,
        candidate: &str,
        prompt: &mut dyn PasswordPrompt,
    ) -> Result<bool> {
        let record = match self.store.load() {
            Ok(record) => record,
            Err(RecordError::Missing(path)) => {
                warn!(path = %path.display(), "no credential record found");
                return self.enroll_then_verify(candidate, prompt);
            }
            Err(RecordError::Corrupt(reason)) => {
                warn!(%reason, "credential record is corrupted");
                return self.enroll_then_verify(candidate, prompt);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(self.check_against(candidate, record)?)
    }

    fn enroll_then_verify(
        &mut self,
        candidate: &str,
        prompt: &mut dyn PasswordPrompt,
    ) -> Result<bool> {
        if !self.elevated {
            warn!("password enrollment needs root/Administrator; verification failed");
            return Ok(false);
        }
        let wants = prompt.confirm("Would you like to generate a new password?")?;
        if !wants || !self.enroll_new_password(prompt)? {
            return Ok(false);
        }
        let record = self.store.load()?;
        self.check_against(candidate, record)
    }

    fn check_against(&mut self, candidate: &str, record: CredentialRecord) -> Result<bool> {
        let derived = derive_key(
            candidate.as_bytes(),
            &record.verifier_salt,
            record.iterations,
            record.password_verifier.len(),
        )?;
        if !constant_time_eq(&derived, &record.password_verifier) {
            info!("password verification failed");
            return Ok(false);
        }
        if self.state == SecurityState::Unverified {
            self.state = SecurityState::Verified;
        }
        self.record = Some(record);
        info!("password verified");
        Ok(true)
    }

    /// Interactive enrollment. Needs elevated privilege; prompts twice and
    /// writes a fresh record. Returns `Ok(false)` when the operator's input
    /// is rejected.
    pub fn enroll_new_password(&mut self, prompt: &mut dyn PasswordPrompt) -> Result<bool> {
        if !self.elevated {
            return Err(MonitorError::PrivilegeRequired(
                "password enrollment must run as root/Administrator".into(),
            ));
        }
        if self.state == SecurityState::KeysDerived {
            return Err(MonitorError::Credentials(
                "cannot enroll after working keys were derived".into(),
            ));
        }
        let first = prompt.read_password(NEW_PASSWORD_PROMPT)?;
        let second = prompt.read_password(CONFIRM_PROMPT)?;
        if first.is_empty() {
            warn!("empty password rejected");
            return Ok(false);
        }
        if *first != *second {
            warn!("passwords do not match");
            return Ok(false);
        }
        let record = match CredentialRecord::generate(first.as_bytes(), self.iterations) {
            Ok(record) => record,
            Err(e) => {
                error!("failed to generate credential record: {e}");
                return Err(e);
            }
        };
        self.store.save(&record)?;
        if self.state == SecurityState::Verified {
            self.record = Some(record);
        }
        info!(iterations = self.iterations, "new password enrolled");
        Ok(true)
    }

    /// Derives the config and log keys from the verified password. The
    /// password buffer is consumed and wiped on return, on every path.
    pub fn derive_working_keys(&mut self, password: Zeroizing<String>) -> Result<ConfigKey> {
        let record = match (&self.state, &self.record) {
            (SecurityState::Verified, Some(record)) => record,
            _ => {
                return Err(MonitorError::Credentials(
                    "working keys require a verified password".into(),
                ))
            }
        };
        let config_key = derive_key(
            password.as_bytes(),
            &record.config_salt,
            record.iterations,
            DERIVED_KEY_LEN,
        )?;
        let log_key = derive_key(
            password.as_bytes(),
            &record.log_salt,
            record.iterations,
            DERIVED_KEY_LEN,
        )?;
        drop(password);
        self.log_key = Some(log_key);
        self.state = SecurityState::KeysDerived;
        Ok(config_key)
    }

    pub fn log_key(&self) -> Option<&[u8]> {
        self.log_key.as_ref().map(|k| k.as_slice())
    }

    fn record(&self) -> Result<&CredentialRecord> {
        self.record
            .as_ref()
            .ok_or_else(|| MonitorError::Credentials("password not verified".into()))
    }

    pub fn config_iv(&self) -> Result<&[u8]> {
        Ok(&self.record()?.config_iv)
    }

    pub fn log_iv(&self) -> Result<&[u8]> {
        Ok(&self.record()?.log_iv)
    }

    pub fn config_tag(&self) -> Result<Option<&[u8]>> {
        Ok(self.record()?.config_tag.as_deref())
    }

    pub fn set_config_tag(&mut self, tag: &[u8]) -> Result<()> {
        self.record()?;
        let updated = self.store.set_config_tag(tag)?;
        self.record = Some(updated);
        Ok(())
    }
}

/// Whether the process runs with root/Administrator rights.
#[cfg(unix)]
pub fn is_elevated() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_elevated() -> bool {
    false
}

#[cfg(any(test, feature = "test-util"))]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;

    /// Replays canned answers.
    #[derive(Debug, Default)]
    pub struct ScriptedPrompt {
        pub passwords: VecDeque<String>,
        pub answers: VecDeque<bool>,
    }

    impl ScriptedPrompt {
        pub fn new(passwords: &[&str], answers: &[bool]) -> Self {
            Self {
                passwords: passwords.iter().map(|s| s.to_string()).collect(),
                answers: answers.iter().copied().collect(),
            }
        }
    }

    impl PasswordPrompt for ScriptedPrompt {
        fn read_password(&mut self, _prompt: &str) -> io::Result<Zeroizing<String>> {
            self.passwords
                .pop_front()
                .map(Zeroizing::new)
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no password"))
        }

        fn confirm(&mut self, _question: &str) -> io::Result<bool> {
            Ok(self.answers.pop_front().unwrap_or(false))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedPrompt;
    use super::*;
    use tempfile::tempdir;

    fn manager(dir: &std::path::Path, elevated: bool) -> SecurityManager {
        SecurityManager::new(CredentialStore::new(dir.join("credentials.json")), elevated)
            .with_iterations(1000)
    }

    fn enrolled(dir: &std::path::Path, password: &str) -> SecurityManager {
        let mut mgr = manager(dir, true);
        let mut prompt = ScriptedPrompt::new(&[password, password], &[]);
        assert!(mgr.enroll_new_password(&mut prompt).unwrap());
        mgr
    }

    #[test]
    fn verify_after_enrollment() {
        let dir = tempdir().unwrap();
        let mut mgr = enrolled(dir.path(), "s3cret");
        let mut prompt = ScriptedPrompt::default();
        assert!(!mgr.verify_password("wrong", &mut prompt).unwrap());
        assert_eq!(mgr.state(), SecurityState::Unverified);
        assert!(mgr.verify_password("s3cret", &mut prompt).unwrap());
        assert_eq!(mgr.state(), SecurityState::Verified);
    }

    #[test]
    fn missing_record_triggers_enrollment() {
        let dir = tempdir().unwrap();
        let mut mgr = manager(dir.path(), true);
        let mut prompt = ScriptedPrompt::new(&["pw", "pw"], &[true]);
        assert!(mgr.verify_password("pw", &mut prompt).unwrap());
        assert!(mgr.store().exists());
        assert_eq!(mgr.state(), SecurityState::Verified);
    }

    #[test]
    fn missing_record_unprivileged_is_false_not_error() {
        let dir = tempdir().unwrap();
        let mut mgr = manager(dir.path(), false);
        let mut prompt = ScriptedPrompt::new(&["pw", "pw"], &[true]);
        assert!(!mgr.verify_password("pw", &mut prompt).unwrap());
        assert_eq!(mgr.state(), SecurityState::Unverified);
        assert!(!mgr.store().exists());
        // never asked
        assert_eq!(prompt.answers.len(), 1);
        assert_eq!(prompt.passwords.len(), 2);
    }

    #[test]
    fn reenrollment_keeps_verified_state() {
        let dir = tempdir().unwrap();
        let mut mgr = enrolled(dir.path(), "old");
        let mut prompt = ScriptedPrompt::new(&["new", "new"], &[]);
        assert!(mgr.verify_password("old", &mut prompt).unwrap());
        let old_iv = mgr.config_iv().unwrap().to_vec();

        assert!(mgr.enroll_new_password(&mut prompt).unwrap());
        assert_eq!(mgr.state(), SecurityState::Verified);
        assert_eq!(mgr.config_iv().unwrap(), &mgr.store().load().unwrap().config_iv[..]);
        assert_ne!(mgr.config_iv().unwrap(), &old_iv[..]);
        assert!(mgr
            .derive_working_keys(Zeroizing::new("new".to_string()))
            .is_ok());
    }

    #[test]
    fn env_answers_follow_the_prompt() {
        let env = |pairs: &'static [(&'static str, &'static str)]| {
            move |key: &str| {
                pairs
                    .iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, v)| v.to_string())
            }
        };
        let all = env(&[
            (PASSWORD_ENV, "current"),
            (NEW_PASSWORD_ENV, "next"),
            (CONFIRM_ENV, "next-confirm"),
        ]);
        assert_eq!(env_answer(UNLOCK_PROMPT, &all).as_deref(), Some("current"));
        assert_eq!(env_answer(NEW_PASSWORD_PROMPT, &all).as_deref(), Some("next"));
        assert_eq!(env_answer(CONFIRM_PROMPT, &all).as_deref(), Some("next-confirm"));

        let first_run = env(&[(PASSWORD_ENV, "only"), (NEW_PASSWORD_ENV, "")]);
        assert_eq!(env_answer(NEW_PASSWORD_PROMPT, &first_run).as_deref(), Some("only"));
        assert_eq!(env_answer(CONFIRM_PROMPT, &first_run).as_deref(), Some("only"));

        let none = env(&[]);
        assert_eq!(env_answer(UNLOCK_PROMPT, &none), None);
    }

    #[test]
    fn corrupt_record_declined_enrollment_is_false() {
        let dir = tempdir().unwrap();
        let mut mgr = manager(dir.path(), true);
        std::fs::write(mgr.store().path(), "garbage").unwrap();
        let mut prompt = ScriptedPrompt::new(&[], &[false]);
        assert!(!mgr.verify_password("pw", &mut prompt).unwrap());
    }

    #[test]
    fn enrollment_requires_privilege_and_matching_input() {
        let dir = tempdir().unwrap();
        let mut unprivileged = manager(dir.path(), false);
        let mut prompt = ScriptedPrompt::new(&["a", "a"], &[]);
        assert!(matches!(
            unprivileged.enroll_new_password(&mut prompt),
            Err(MonitorError::PrivilegeRequired(_))
        ));
        assert!(!unprivileged.store().exists());

        let mut mgr = manager(dir.path(), true);
        let mut prompt = ScriptedPrompt::new(&["a", "b"], &[]);
        assert!(!mgr.enroll_new_password(&mut prompt).unwrap());
        assert!(!mgr.store().exists());
    }

    #[test]
    fn working_keys_need_verification_and_are_independent() {
        let dir = tempdir().unwrap();
        let mut mgr = enrolled(dir.path(), "pw");
        assert!(mgr
            .derive_working_keys(Zeroizing::new("pw".to_string()))
            .is_err());

        let mut prompt = ScriptedPrompt::default();
        assert!(mgr.verify_password("pw", &mut prompt).unwrap());
        let config_key = mgr
            .derive_working_keys(Zeroizing::new("pw".to_string()))
            .unwrap();
        assert_eq!(mgr.state(), SecurityState::KeysDerived);
        let log_key = mgr.log_key().unwrap();
        assert_eq!(config_key.len(), DERIVED_KEY_LEN);
        assert_eq!(log_key.len(), DERIVED_KEY_LEN);
        assert_ne!(&config_key[..], log_key);

        // no second derivation and no re-enrollment once keys exist
        assert!(mgr
            .derive_working_keys(Zeroizing::new("pw".to_string()))
            .is_err());
        let mut prompt = ScriptedPrompt::new(&["x", "x"], &[]);
        assert!(mgr.enroll_new_password(&mut prompt).is_err());
    }

    #[test]
    fn config_tag_roundtrip_through_manager() {
        let dir = tempdir().unwrap();
        let mut mgr = enrolled(dir.path(), "pw");
        let mut prompt = ScriptedPrompt::default();
        assert!(mgr.verify_password("pw", &mut prompt).unwrap());
        assert_eq!(mgr.config_tag().unwrap(), None);
        mgr.set_config_tag(&[1, 2, 3]).unwrap();
        assert_eq!(mgr.config_tag().unwrap(), Some(&[1u8, 2, 3][..]));
        assert_eq!(
            mgr.store().load().unwrap().config_tag,
            Some(vec![1, 2, 3])
        );
    }
}
