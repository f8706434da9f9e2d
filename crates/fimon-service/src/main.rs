use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use fimon_core::config::DEFAULT_CONFIG_FILE;
use fimon_core::credentials::CredentialStore;
use fimon_core::paths::{self, data_dir};
use fimon_core::security::{is_elevated, SecurityManager, TerminalPrompt};
use fimon_core::store::SqliteStore;
use fimon_service::logging::{self, LogSettings, LoggingHandle};
use fimon_service::monitor::{settings, spawn_scan_loop, Monitor, MonitorSettings};
use fimon_service::{baseline_cli, security_cli};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "fimon file-integrity monitor", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Overrides the per-user data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the monitor until interrupted (default)
    Run,
    /// Password and encryption maintenance (root/Administrator only)
    Security {
        #[command(subcommand)]
        op: SecurityOp,
    },
    /// Baseline maintenance
    Baseline {
        #[command(subcommand)]
        op: BaselineOp,
    },
}

#[derive(Subcommand, Debug)]
enum SecurityOp {
    /// Enroll a new password
    Pwd,
    /// Encrypt a file in place
    Encrypt {
        #[command(subcommand)]
        target: EncryptTarget,
    },
    /// Decrypt a file in place, or recover sealed logs
    Decrypt {
        #[command(subcommand)]
        target: DecryptTarget,
    },
}

#[derive(Subcommand, Debug)]
enum EncryptTarget {
    Config,
}

#[derive(Subcommand, Debug)]
enum DecryptTarget {
    Config,
    Logs,
}

#[derive(Subcommand, Debug)]
enum BaselineOp {
    /// Drop every stored baseline
    Reset,
    /// Drop the baseline of one file
    Forget { path: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let data = match &cli.data_dir {
        Some(dir) => dir.clone(),
        None => data_dir()?,
    };
    std::fs::create_dir_all(&data)
        .with_context(|| format!("create data directory {}", data.display()))?;
    let log_dir = paths::log_dir(&data);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let logging = logging::init(Some(&log_dir))?;
            let result = run_command(&cli.config, &data, &logging).await;
            if let Err(e) = &result {
                tracing::error!("monitor stopped: {e:#}");
                logging.settle_plain();
            }
            result
        }
        Commands::Security { op } => {
            logging::init(None)?;
            let mut manager = security_manager(&data);
            let mut prompt = TerminalPrompt::default();
            match op {
                SecurityOp::Pwd => security_cli::change_password(&mut manager, &mut prompt)?,
                SecurityOp::Encrypt {
                    target: EncryptTarget::Config,
                } => {
                    security_cli::encrypt_config(&mut manager, &mut prompt, &cli.config)?;
                    println!("Configuration encrypted");
                }
                SecurityOp::Decrypt {
                    target: DecryptTarget::Config,
                } => {
                    security_cli::decrypt_config(&mut manager, &mut prompt, &cli.config)?;
                    println!("Configuration decrypted");
                }
                SecurityOp::Decrypt {
                    target: DecryptTarget::Logs,
                } => {
                    let report = security_cli::decrypt_log_dir(&mut manager, &mut prompt, &log_dir)?;
                    println!(
                        "Decrypted {} log file(s), skipped {}, failed {}",
                        report.decrypted.len(),
                        report.skipped.len(),
                        report.failed.len()
                    );
                }
            }
            Ok(())
        }
        Commands::Baseline { op } => {
            logging::init(None)?;
            let mut manager = security_manager(&data);
            let mut prompt = TerminalPrompt::default();
            let config = security_cli::open_session(&mut manager, &mut prompt, &cli.config)?;
            let db_path = settings::storage_path(&config)?
                .unwrap_or_else(|| paths::baseline_db_path(&data));
            let store = SqliteStore::open(&db_path)?;
            match op {
                BaselineOp::Reset => baseline_cli::reset(&store),
                BaselineOp::Forget { path } => baseline_cli::forget(&store, &path),
            }
        }
    }
}

fn security_manager(data: &Path) -> SecurityManager {
    SecurityManager::new(CredentialStore::new(paths::credentials_path(data)), is_elevated())
}

async fn run_command(config_path: &Path, data: &Path, logging: &LoggingHandle) -> Result<()> {
    let mut manager = security_manager(data);
    let mut prompt = TerminalPrompt::default();
    let config = security_cli::open_session(&mut manager, &mut prompt, config_path)?;

    let log_settings = LogSettings::from_config(&config)?;
    let log_key = manager
        .log_key()
        .ok_or_else(|| anyhow!("log key unavailable after unlock"))?;
    logging.apply(&log_settings, Some((log_key, manager.log_iv()?)))?;
    if let Some(path) = logging.log_path() {
        info!(log = %path.display(), secure = log_settings.secure, "session log opened");
    }

    let settings = MonitorSettings::from_config(&config)?;
    drop(config);
    let monitor = Arc::new(Monitor::open(&settings, data)?);

    let (task, handle) = spawn_scan_loop(monitor, settings.period, |report| {
        if report.mismatches() > 0 {
            warn!(
                mismatches = report.mismatches(),
                "integrity mismatches in this pass"
            );
        }
    });

    info!(config = %config_path.display(), "monitor running, press Ctrl+C to stop");
    signal::ctrl_c().await.context("wait for interrupt")?;
    info!("interrupt received, finishing current pass");
    handle.shutdown();
    task.await.context("scan loop task")?;
    info!("monitor stopped");
    Ok(())
}
