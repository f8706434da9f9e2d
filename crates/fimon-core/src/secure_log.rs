//! Sealed log lines: `tag_hex || ciphertext_hex` under the log key and the
//! log IV, one per line.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::crypto::{aead_decrypt, aead_encrypt, from_hex, is_hex, to_hex, CryptoError, TAG_LEN};
use crate::error::{MonitorError, Result};

/// Hex characters taken by the tag at the front of a sealed line.
pub const TAG_HEX_LEN: usize = TAG_LEN * 2;

pub const DECRYPTED_DIR: &str = "decrypted";

pub fn seal_line(key: &[u8], iv: &[u8], line: &str) -> std::result::Result<String, CryptoError> {
    let sealed = aead_encrypt(key, line.as_bytes(), iv, TAG_LEN)?;
    let mut out = to_hex(&sealed.tag);
    out.push_str(&to_hex(&sealed.ciphertext));
    Ok(out)
}

pub fn open_line(key: &[u8], iv: &[u8], sealed: &str) -> std::result::Result<String, CryptoError> {
    if sealed.len() < TAG_HEX_LEN || !sealed.is_char_boundary(TAG_HEX_LEN) {
        return Err(CryptoError::InvalidEncoding(
            "line too short to hold a tag".into(),
        ));
    }
    let (tag_hex, data_hex) = sealed.split_at(TAG_HEX_LEN);
    let plain = aead_decrypt(key, &from_hex(data_hex)?, iv, &from_hex(tag_hex)?)?;
    String::from_utf8(plain.to_vec())
        .map_err(|_| CryptoError::InvalidEncoding("log line is not UTF-8".into()))
}

/// A log file counts as sealed only when it has lines and every one of them
/// is pure hex.
pub fn is_sealed_log(text: &str) -> bool {
    let mut lines = text.lines().peekable();
    lines.peek().is_some() && lines.all(is_hex)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DecryptReport {
    pub decrypted: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

/// Opens every sealed log in `log_dir` into `log_dir/decrypted/<name>`.
/// Plain or mixed files are skipped; a file with any line that fails to open
/// is reported as failed and nothing is written for it.
pub fn decrypt_logs(log_dir: &Path, key: &[u8], iv: &[u8]) -> Result<DecryptReport> {
    if !log_dir.is_dir() {
        return Err(MonitorError::config(format!(
            "invalid log directory: {}",
            log_dir.display()
        )));
    }
    let out_dir = log_dir.join(DECRYPTED_DIR);
    fs::create_dir_all(&out_dir)?;

    let mut entries: Vec<PathBuf> = fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    entries.sort();

    let mut report = DecryptReport::default();
    for path in entries {
        let Some(name) = path.file_name() else {
            continue;
        };
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), "cannot read log file: {e}");
                report.failed.push(path);
                continue;
            }
        };
        if !is_sealed_log(&text) {
            report.skipped.push(path);
            continue;
        }
        let opened: std::result::Result<Vec<String>, CryptoError> =
            text.lines().map(|line| open_line(key, iv, line)).collect();
        match opened {
            Ok(lines) => {
                let target = out_dir.join(name);
                let mut body = lines.join("\n");
                body.push('\n');
                fs::write(&target, body)?;
                info!(source = %path.display(), target = %target.display(), "log decrypted");
                report.decrypted.push(path);
            }
            Err(e) => {
                warn!(path = %path.display(), "log decryption failed: {e}");
                report.failed.push(path);
            }
        }
    }
    Ok(report)
}
