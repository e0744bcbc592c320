//! Where retrace keeps its config and logs.
//!
//! The data directory is chosen once at startup, in order: `--data-dir`,
//! the `RETRACE_HOME` environment variable, then `~/.retrace`.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Environment variable naming an alternative data directory
pub const HOME_ENV: &str = "RETRACE_HOME";

const DIR_NAME: &str = ".retrace";

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Pick the data directory for this process. Later calls keep the first choice.
pub fn init_data_dir(custom_path: Option<PathBuf>) {
    let path = resolve_data_dir(custom_path, std::env::var_os(HOME_ENV), dirs::home_dir());
    if let Err(rejected) = DATA_DIR.set(path) {
        tracing::debug!(
            rejected = %rejected.display(),
            existing = %data_dir().display(),
            "Data directory already chosen"
        );
    }
}

/// Resolution order for the data directory. Empty values are skipped.
pub fn resolve_data_dir(
    flag: Option<PathBuf>,
    env: Option<OsString>,
    home: Option<PathBuf>,
) -> PathBuf {
    flag.filter(|p| !p.as_os_str().is_empty())
        .or_else(|| env.filter(|v| !v.is_empty()).map(PathBuf::from))
        .unwrap_or_else(|| home.map_or_else(|| PathBuf::from(DIR_NAME), |h| h.join(DIR_NAME)))
}

pub fn data_dir() -> PathBuf {
    DATA_DIR.get().cloned().unwrap_or_else(|| {
        resolve_data_dir(None, std::env::var_os(HOME_ENV), dirs::home_dir())
    })
}

pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

pub fn log_file_path() -> PathBuf {
    logs_dir().join("retrace.log")
}

pub fn config_path() -> PathBuf {
    data_dir().join("config.toml")
}

/// Create the data and log directories, returning the data directory.
pub fn ensure_layout() -> io::Result<PathBuf> {
    let root = data_dir();
    std::fs::create_dir_all(logs_dir())?;
    Ok(root)
}
