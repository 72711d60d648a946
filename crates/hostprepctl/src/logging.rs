//! Logging setup for hostprepctl
//!
//! Log lines go to a file so they never interleave with the interactive
//! menu. Priority for the destination:
//! 1. $HOSTPREP_LOG_FILE (explicit override)
//! 2. /var/log/hostprep/hostprep.log
//! 3. stderr, when neither can be opened
//!
//! The filter comes from $HOSTPREP_LOG, default `info` (`debug` with -v).

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_PATH: &str = "/var/log/hostprep/hostprep.log";
pub const LOG_FILTER_ENV: &str = "HOSTPREP_LOG";
pub const LOG_FILE_ENV: &str = "HOSTPREP_LOG_FILE";

/// Where log output ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    File(PathBuf),
    Stderr,
}

pub fn log_path() -> PathBuf {
    std::env::var_os(LOG_FILE_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_PATH))
}

fn open_log(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber. Safe to call more than once; later calls
/// keep the first subscriber.
pub fn init(verbose: bool) -> LogDestination {
    let path = log_path();
    match open_log(&path) {
        Ok(file) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter(verbose))
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file))
                .try_init();
            LogDestination::File(path)
        }
        Err(e) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter(verbose))
                .with_target(false)
                .with_writer(std::io::stderr)
                .try_init();
            tracing::warn!("cannot open log file {}: {}; logging to stderr", path.display(), e);
            LogDestination::Stderr
        }
    }
}
