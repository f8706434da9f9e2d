//! `fimon security ...` maintenance commands and the password unlock shared
//! with `fimon run`.

use anyhow::{anyhow, bail, Context, Result};
use fimon_core::config::{is_sealed, open_config, seal_config, Config, ConfigSecret};
use fimon_core::secure_log::{decrypt_logs, DecryptReport};
use fimon_core::security::{ConfigKey, PasswordPrompt, SecurityManager, UNLOCK_PROMPT};
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Attempts allowed to an elevated operator; everyone else gets one.
pub const MAX_ATTEMPTS: u32 = 3;

/// Prompts for the password until it verifies. Returns the password for key
/// derivation.
pub fn unlock(
    manager: &mut SecurityManager,
    prompt: &mut dyn PasswordPrompt,
) -> Result<Zeroizing<String>> {
    let attempts = if manager.is_elevated() { MAX_ATTEMPTS } else { 1 };
    for attempt in 1..=attempts {
        let password = prompt
            .read_password(UNLOCK_PROMPT)
            .context("read password")?;
        if manager.verify_password(&password, prompt)? {
            return Ok(password);
        }
        warn!(attempt, attempts, "incorrect password");
    }
    bail!("password verification failed")
}

/// Unlocks and derives the working keys. The log key stays inside
/// `manager`; the config key is returned for one use.
pub fn unlock_keys(
    manager: &mut SecurityManager,
    prompt: &mut dyn PasswordPrompt,
) -> Result<ConfigKey> {
    let password = unlock(manager, prompt)?;
    Ok(manager.derive_working_keys(password)?)
}

/// Unlocks, derives the keys and loads the configuration, opening it when
/// it is sealed.
pub fn open_session(
    manager: &mut SecurityManager,
    prompt: &mut dyn PasswordPrompt,
    config_path: &Path,
) -> Result<Config> {
    let config_key = unlock_keys(manager, prompt)?;
    let secret = ConfigSecret {
        key: &config_key,
        iv: manager.config_iv()?,
        tag: manager.config_tag()?,
    };
    let config = Config::load(config_path, Some(secret))
        .with_context(|| format!("load configuration {}", config_path.display()))?;
    Ok(config)
}

fn require_elevated(manager: &SecurityManager) -> Result<()> {
    if manager.is_elevated() {
        return Ok(());
    }
    if cfg!(windows) {
        bail!("you must run this command as Administrator")
    }
    bail!("you must run this command with sudo or as root")
}

/// Enrolls a new password. An existing password must verify first.
pub fn change_password(
    manager: &mut SecurityManager,
    prompt: &mut dyn PasswordPrompt,
) -> Result<()> {
    require_elevated(manager)?;
    if manager.store().exists() {
        unlock(manager, prompt)?;
    }
    if !manager.enroll_new_password(prompt)? {
        bail!("password was not changed");
    }
    info!("password changed");
    Ok(())
}

pub fn encrypt_config(
    manager: &mut SecurityManager,
    prompt: &mut dyn PasswordPrompt,
    config_path: &Path,
) -> Result<()> {
    require_elevated(manager)?;
    let config_key = unlock_keys(manager, prompt)?;
    let plaintext = Zeroizing::new(
        fs::read_to_string(config_path)
            .with_context(|| format!("read {}", config_path.display()))?,
    );
    if is_sealed(&plaintext) {
        bail!("configuration is already encrypted");
    }
    // must parse before we seal it
    Config::from_yaml(&plaintext).context("configuration is not valid YAML")?;

    let (ciphertext, tag) = seal_config(&plaintext, &config_key, manager.config_iv()?)?;
    manager.set_config_tag(&tag)?;
    fs::write(config_path, ciphertext)
        .with_context(|| format!("write {}", config_path.display()))?;
    info!(path = %config_path.display(), "configuration encrypted");
    Ok(())
}

pub fn decrypt_config(
    manager: &mut SecurityManager,
    prompt: &mut dyn PasswordPrompt,
    config_path: &Path,
) -> Result<()> {
    require_elevated(manager)?;
    let config_key = unlock_keys(manager, prompt)?;
    let text = fs::read_to_string(config_path)
        .with_context(|| format!("read {}", config_path.display()))?;
    if !is_sealed(&text) {
        bail!("configuration is not encrypted");
    }
    let secret = ConfigSecret {
        key: &config_key,
        iv: manager.config_iv()?,
        tag: manager.config_tag()?,
    };
    let plaintext = open_config(&text, secret)?;
    fs::write(config_path, plaintext.as_bytes())
        .with_context(|| format!("write {}", config_path.display()))?;
    info!(path = %config_path.display(), "configuration decrypted");
    Ok(())
}

pub fn decrypt_log_dir(
    manager: &mut SecurityManager,
    prompt: &mut dyn PasswordPrompt,
    log_dir: &Path,
) -> Result<DecryptReport> {
    require_elevated(manager)?;
    unlock_keys(manager, prompt)?;
    let key = manager
        .log_key()
        .ok_or_else(|| anyhow!("log key unavailable"))?;
    let report = decrypt_logs(log_dir, key, manager.log_iv()?)?;
    info!(
        decrypted = report.decrypted.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "log decryption finished"
    );
    Ok(report)
}
