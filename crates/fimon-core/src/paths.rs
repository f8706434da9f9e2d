use directories::ProjectDirs;
use std::path::{Path, PathBuf};

use crate::error::{MonitorError, Result};

pub const APP_QUALIFIER: &str = "org";
pub const APP_ORG: &str = "fimon";
pub const APP_NAME: &str = "monitor";

pub const CREDENTIALS_FILE: &str = "credentials.json";
pub const BASELINE_DB_FILE: &str = "baseline.db";
pub const LOG_DIR: &str = "logs";

/// Per-user data directory. `FIMON_DATA_DIR` takes precedence.
pub fn data_dir() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var("FIMON_DATA_DIR") {
        if !override_path.is_empty() {
            return Ok(PathBuf::from(override_path));
        }
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| MonitorError::config("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn log_dir(data: &Path) -> PathBuf {
    data.join(LOG_DIR)
}

pub fn credentials_path(data: &Path) -> PathBuf {
    data.join(CREDENTIALS_FILE)
}

pub fn baseline_db_path(data: &Path) -> PathBuf {
    data.join(BASELINE_DB_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_live_under_the_data_dir() {
        let data = Path::new("/var/lib/fimon");
        assert_eq!(log_dir(data), Path::new("/var/lib/fimon/logs"));
        assert_eq!(credentials_path(data), Path::new("/var/lib/fimon/credentials.json"));
        assert_eq!(baseline_db_path(data), Path::new("/var/lib/fimon/baseline.db"));
    }
}
