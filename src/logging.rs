//! Tracing setup for the server and CLI.
//!
//! Logs go to stdout in compact form and to a file. `DOCQA_LOG_FILE` names the file to append
//! to; without it logs land in `logs/docqa.log`. File writes go through a non-blocking worker.
use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable overriding the log file path.
pub const LOG_FILE_ENV: &str = "DOCQA_LOG_FILE";

const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_FILE: &str = "docqa.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber. `RUST_LOG` controls filtering and defaults to `info`.
///
/// Calling this more than once leaves the first subscriber in place.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    let result = if let Some(writer) = configure_file_writer() {
        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact();
        registry.with(file_layer).try_init()
    } else {
        registry.try_init()
    };

    if let Err(error) = result {
        eprintln!("Tracing already initialised: {error}");
    }
}

fn configure_file_writer() -> Option<NonBlocking> {
    match std::env::var(LOG_FILE_ENV) {
        Ok(path) => open_append(Path::new(&path)),
        Err(_) => {
            if let Err(error) = std::fs::create_dir_all(DEFAULT_LOG_DIR) {
                eprintln!("Failed to create logs directory: {error}");
                return None;
            }
            let appender = tracing_appender::rolling::never(DEFAULT_LOG_DIR, DEFAULT_LOG_FILE);
            Some(install_writer(appender))
        }
    }
}

fn open_append(path: &Path) -> Option<NonBlocking> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty())
        && let Err(error) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create log directory {}: {error}", parent.display());
        return None;
    }

    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
    {
        Ok(file) => Some(install_writer(file)),
        Err(error) => {
            eprintln!("Failed to open log file {}: {error}", path.display());
            None
        }
    }
}

fn install_writer<W>(writer: W) -> NonBlocking
where
    W: std::io::Write + Send + 'static,
{
    let (non_blocking, guard) = tracing_appender::non_blocking(writer);
    let _ = LOG_GUARD.set(guard);
    non_blocking
}
