//! Logging setup: a console layer and a per-session log file.
//!
//! The file layer writes through [`LogSink`]. Until the configuration is
//! known the sink holds lines in memory; [`LoggingHandle::apply`] then opens
//! the file and writes everything either as plain text or sealed line by line
//! with the log key.

use anyhow::{Context, Result};
use chrono::Local;
use fimon_core::config::Config;
use fimon_core::secure_log::seal_line;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogSettings {
    pub secure: bool,
    pub silent: bool,
    pub verbosity: u8,
}

impl LogSettings {
    pub fn from_config(cfg: &Config) -> fimon_core::Result<Self> {
        Ok(Self {
            secure: cfg.get_or("monitor.log.secure", false)?,
            silent: cfg.get_or("monitor.log.silent", false)?,
            verbosity: cfg.get_or("monitor.log.verbosity", 1)?,
        })
    }

    /// 0 low, 1 normal, 2 high, 3 highest.
    pub fn directive(&self) -> &'static str {
        match self.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

enum SinkState {
    Pending(Vec<String>),
    Plain(File),
    Sealed {
        file: File,
        key: Zeroizing<Vec<u8>>,
        iv: Vec<u8>,
    },
}

/// Shared destination of the file layer.
#[derive(Clone)]
pub struct LogSink {
    path: PathBuf,
    state: Arc<Mutex<SinkState>>,
}

impl LogSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: Arc::new(Mutex::new(SinkState::Pending(Vec::new()))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the log file and drains buffered lines into it. `seal` carries
    /// the log key and IV for secure mode.
    pub fn activate(&self, seal: Option<(&[u8], &[u8])>) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut state = self.state.lock();
        let pending = match &mut *state {
            SinkState::Pending(lines) => std::mem::take(lines),
            _ => Vec::new(),
        };
        *state = match seal {
            Some((key, iv)) => SinkState::Sealed {
                file,
                key: Zeroizing::new(key.to_vec()),
                iv: iv.to_vec(),
            },
            None => SinkState::Plain(file),
        };
        for line in &pending {
            write_line(&mut state, line);
        }
        Ok(())
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.state.lock(), SinkState::Pending(_))
    }

    fn push(&self, line: &str) {
        write_line(&mut self.state.lock(), line);
    }
}

fn write_line(state: &mut SinkState, line: &str) {
    let result = match state {
        SinkState::Pending(lines) => {
            lines.push(line.to_string());
            Ok(())
        }
        SinkState::Plain(file) => writeln!(file, "{line}"),
        SinkState::Sealed { file, key, iv } => match seal_line(key, iv, line) {
            Ok(sealed) => writeln!(file, "{sealed}"),
            Err(e) => {
                eprintln!("log line dropped, encryption failed: {e}");
                Ok(())
            }
        },
    };
    if let Err(e) = result {
        eprintln!("log write failed: {e}");
    }
}

/// Collects one formatted event and hands it to the sink line by line.
pub struct EventWriter {
    sink: LogSink,
    buf: Vec<u8>,
}

impl Write for EventWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for EventWriter {
    fn drop(&mut self) {
        let text = String::from_utf8_lossy(&self.buf);
        for line in text.lines().filter(|l| !l.is_empty()) {
            self.sink.push(line);
        }
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = EventWriter;

    fn make_writer(&'a self) -> Self::Writer {
        EventWriter {
            sink: self.clone(),
            buf: Vec::new(),
        }
    }
}

/// Console writer that can be muted after startup.
#[derive(Clone)]
struct Console {
    muted: Arc<AtomicBool>,
}

impl<'a> MakeWriter<'a> for Console {
    type Writer = Box<dyn Write + 'a>;

    fn make_writer(&'a self) -> Self::Writer {
        if self.muted.load(Ordering::Relaxed) {
            Box::new(io::sink())
        } else {
            Box::new(io::stderr())
        }
    }
}

pub struct LoggingHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    env_override: bool,
    console_muted: Arc<AtomicBool>,
    sink: Option<LogSink>,
}

impl LoggingHandle {
    pub fn log_path(&self) -> Option<&Path> {
        self.sink.as_ref().map(LogSink::path)
    }

    /// Applies the configured verbosity and console setting and opens the
    /// log file, sealed when `settings.secure` is set.
    pub fn apply(&self, settings: &LogSettings, log_key: Option<(&[u8], &[u8])>) -> Result<()> {
        if !self.env_override {
            self.filter
                .reload(EnvFilter::new(settings.directive()))
                .context("reload log filter")?;
        }
        self.console_muted.store(settings.silent, Ordering::Relaxed);
        let seal = if settings.secure { log_key } else { None };
        if settings.secure && seal.is_none() {
            anyhow::bail!("secure logging requested but no log key is available");
        }
        if let Some(sink) = &self.sink {
            sink.activate(seal)
                .with_context(|| format!("open log file {}", sink.path().display()))?;
            tracing::info!(
                path = %sink.path().display(),
                secure = seal.is_some(),
                verbosity = settings.verbosity,
                "logging session started"
            );
        }
        Ok(())
    }

    /// Writes anything still buffered as plain text. Used when startup
    /// fails before the configuration is known.
    pub fn settle_plain(&self) {
        let Some(sink) = self.sink.as_ref().filter(|s| s.is_pending()) else {
            return;
        };
        if let Err(e) = sink.activate(None) {
            eprintln!("cannot open log file {}: {e}", sink.path().display());
        }
    }
}

pub fn session_log_path(log_dir: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
    log_dir.join(format!("{stamp}-monitor.log"))
}

/// Installs the global subscriber. With a `log_dir` a session log file is
/// written there once [`LoggingHandle::apply`] runs. `RUST_LOG`, when set,
/// wins over the configured verbosity.
pub fn init(log_dir: Option<&Path>) -> Result<LoggingHandle> {
    let (filter, env_override) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::new("info"), false),
    };
    let (filter_layer, filter_handle) = reload::Layer::new(filter);

    let console_muted = Arc::new(AtomicBool::new(false));
    let console_layer = fmt::layer().with_target(false).with_writer(Console {
        muted: console_muted.clone(),
    });

    let sink = log_dir.map(|dir| LogSink::new(session_log_path(dir)));
    let file_layer = sink.clone().map(|sink| {
        fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(sink)
    });

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;

    Ok(LoggingHandle {
        filter: filter_handle,
        env_override,
        console_muted,
        sink,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fimon_core::secure_log::{is_sealed_log, open_line};
    use tempfile::tempdir;

    fn emit(sink: &LogSink, text: &str) {
        let mut writer = sink.make_writer();
        writer.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn verbosity_directives() {
        let level = |v| LogSettings { verbosity: v, ..LogSettings::default() }.directive();
        assert_eq!(level(0), "warn");
        assert_eq!(level(1), "info");
        assert_eq!(level(2), "debug");
        assert_eq!(level(3), "trace");
    }

    #[test]
    fn settings_from_config() {
        let cfg = Config::from_yaml("monitor:\n  log: {secure: true, verbosity: 3}\n").unwrap();
        let settings = LogSettings::from_config(&cfg).unwrap();
        assert!(settings.secure);
        assert!(!settings.silent);
        assert_eq!(settings.verbosity, 3);
    }

    #[test]
    fn pending_lines_flush_plain() {
        let dir = tempdir().unwrap();
        let sink = LogSink::new(dir.path().join("logs").join("s.log"));
        emit(&sink, "early line\n");
        assert!(!sink.path().exists());
        sink.activate(None).unwrap();
        emit(&sink, "later line\n");
        assert_eq!(
            fs::read_to_string(sink.path()).unwrap(),
            "early line\nlater line\n"
        );
    }

    #[test]
    fn sealed_sink_writes_only_hex() {
        let dir = tempdir().unwrap();
        let key = [1u8; 32];
        let iv = [2u8; 12];
        let sink = LogSink::new(dir.path().join("s.log"));
        emit(&sink, "before activation\n");
        sink.activate(Some((&key, &iv))).unwrap();
        emit(&sink, "first\nsecond\n");

        let text = fs::read_to_string(sink.path()).unwrap();
        assert!(is_sealed_log(&text));
        let opened: Vec<String> = text
            .lines()
            .map(|l| open_line(&key, &iv, l).unwrap())
            .collect();
        assert_eq!(opened, vec!["before activation", "first", "second"]);
    }

    #[test]
    fn session_file_name() {
        let path = session_log_path(Path::new("/var/log/fimon"));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("-monitor.log"));
        assert_eq!(name.len(), "2026-01-01_00-00-00-monitor.log".len());
    }
}
